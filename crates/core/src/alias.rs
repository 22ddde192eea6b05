//! Alias management
//!
//! Aliases are named references to S3-compatible storage endpoints. Each
//! alias is persisted as an [`EndpointRecord`], the durable result of one
//! bootstrap run.

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigManager;
use crate::error::{Error, Result};
use crate::federated::FederatedSession;
use crate::traits::{CredentialKind, Credentials, EndpointStore, SignatureDialect};

/// Bucket lookup style used when talking to the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// Let the client decide per request
    #[default]
    Auto,
    /// Always use path-style `endpoint/bucket` URLs
    On,
    /// Always use virtual-host style `bucket.endpoint` URLs
    Off,
}

impl PathStyle {
    pub const fn as_str(self) -> &'static str {
        match self {
            PathStyle::Auto => "auto",
            PathStyle::On => "on",
            PathStyle::Off => "off",
        }
    }
}

impl fmt::Display for PathStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PathStyle::Auto),
            "on" | "path" => Ok(PathStyle::On),
            "off" | "dns" => Ok(PathStyle::Off),
            other => Err(Error::InvalidArgument(format!(
                "unrecognized path value '{other}', valid options are [auto, on, off]"
            ))),
        }
    }
}

/// Connection options recorded alongside the negotiated settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasOptions {
    pub path: PathStyle,
    pub region: String,
    /// Certificate verification was explicitly disabled
    pub insecure: bool,
}

impl Default for AliasOptions {
    fn default() -> Self {
        Self {
            path: PathStyle::Auto,
            region: default_region(),
            insecure: false,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn never_expires() -> Timestamp {
    Timestamp::UNIX_EPOCH
}

/// The persisted result of bootstrapping one alias
///
/// Records are immutable once built. A federated record always carries a
/// session token whose expiry was in the future when it was built; a static
/// record never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    name: String,
    url: String,
    api: SignatureDialect,
    credential_kind: CredentialKind,
    access_key: String,
    secret_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    session_token: String,
    #[serde(default = "never_expires")]
    session_expiry: Timestamp,
    #[serde(default)]
    path: PathStyle,
    #[serde(default = "default_region")]
    region: String,
    #[serde(default)]
    insecure: bool,
}

impl EndpointRecord {
    /// Build a record for long-lived static credentials
    pub fn with_static(
        name: impl Into<String>,
        url: &Url,
        api: SignatureDialect,
        credentials: &Credentials,
        options: &AliasOptions,
    ) -> Self {
        Self {
            name: name.into(),
            url: endpoint_string(url),
            api,
            credential_kind: CredentialKind::Static,
            access_key: credentials.access_key.clone(),
            secret_key: credentials.secret_key.clone(),
            session_token: String::new(),
            session_expiry: never_expires(),
            path: options.path,
            region: options.region.clone(),
            insecure: options.insecure,
        }
    }

    /// Build a record for a federated session, checked against `now`
    pub fn with_session(
        name: impl Into<String>,
        url: &Url,
        api: SignatureDialect,
        session: &FederatedSession,
        options: &AliasOptions,
        now: Timestamp,
    ) -> Result<Self> {
        let name = name.into();
        if session.session_token.is_empty() {
            return Err(Error::General(format!(
                "federated session for alias '{name}' has no session token"
            )));
        }
        let expiry = session.effective_expiry();
        if expiry <= now {
            return Err(Error::General(format!(
                "federated session for alias '{name}' expired at {expiry}"
            )));
        }

        Ok(Self {
            name,
            url: endpoint_string(url),
            api,
            credential_kind: CredentialKind::Federated,
            access_key: session.access_key.clone(),
            secret_key: session.secret_key.clone(),
            session_token: session.session_token.clone(),
            session_expiry: expiry,
            path: options.path,
            region: options.region.clone(),
            insecure: options.insecure,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api(&self) -> SignatureDialect {
        self.api
    }

    pub fn credential_kind(&self) -> CredentialKind {
        self.credential_kind
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// `Timestamp::UNIX_EPOCH` means the credentials never expire
    pub fn session_expiry(&self) -> Timestamp {
        self.session_expiry
    }

    pub fn path(&self) -> PathStyle {
        self.path
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Whether the stored credentials can still be presented at `now`
    pub fn is_usable_at(&self, now: Timestamp) -> bool {
        self.session_expiry == never_expires() || now < self.session_expiry
    }
}

fn endpoint_string(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

/// Check an alias name: a letter followed by letters, digits, `-` or `_`
pub fn validate_alias_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid alias name '{name}'")))
    }
}

/// Parse and normalize an endpoint URL
///
/// Only `http` and `https` URLs with a host are accepted. Trailing
/// separators are trimmed.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim().trim_end_matches('/'))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidArgument(format!(
            "unsupported URL scheme '{}' in {raw}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidArgument(format!("URL has no host: {raw}")));
    }
    Ok(url)
}

/// Manager for alias operations
pub struct AliasManager {
    config_manager: ConfigManager,
}

impl AliasManager {
    /// Create a new AliasManager with a specific ConfigManager
    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Create a new AliasManager using the default config location
    pub fn new() -> Result<Self> {
        let config_manager = ConfigManager::new()?;
        Ok(Self { config_manager })
    }

    /// List all configured aliases
    pub fn list(&self) -> Result<Vec<EndpointRecord>> {
        let config = self.config_manager.load()?;
        Ok(config.aliases)
    }

    /// Check if an alias exists
    pub fn exists(&self, name: &str) -> Result<bool> {
        let config = self.config_manager.load()?;
        Ok(config.aliases.iter().any(|a| a.name == name))
    }
}

impl EndpointStore for AliasManager {
    fn get(&self, name: &str) -> Result<EndpointRecord> {
        let config = self.config_manager.load()?;
        config
            .aliases
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    fn set(&self, record: EndpointRecord) -> Result<()> {
        let mut config = self.config_manager.load()?;

        // Last writer wins per alias
        config.aliases.retain(|a| a.name != record.name);
        config.aliases.push(record);

        self.config_manager.save(&config)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let original_len = config.aliases.len();

        config.aliases.retain(|a| a.name != name);

        if config.aliases.len() == original_len {
            return Err(Error::AliasNotFound(name.to_string()));
        }

        self.config_manager.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;
    use tempfile::TempDir;

    fn temp_alias_manager() -> (AliasManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let config_manager = ConfigManager::with_path(config_path);
        let alias_manager = AliasManager::with_config_manager(config_manager);
        (alias_manager, temp_dir)
    }

    fn static_record(name: &str, endpoint: &str) -> EndpointRecord {
        EndpointRecord::with_static(
            name,
            &parse_endpoint(endpoint).unwrap(),
            SignatureDialect::V4,
            &Credentials::new("access", "secret"),
            &AliasOptions::default(),
        )
    }

    fn session(issued_at: Timestamp, token: &str) -> FederatedSession {
        FederatedSession {
            access_key: "sts-ak".into(),
            secret_key: "sts-sk".into(),
            session_token: token.into(),
            issued_at,
            requested_validity: SignedDuration::from_hours(1),
            server_expiry: None,
        }
    }

    #[test]
    fn test_static_record_never_expires() {
        let record = static_record("test", "http://localhost:9000/");
        assert_eq!(record.name(), "test");
        assert_eq!(record.url(), "http://localhost:9000");
        assert_eq!(record.credential_kind(), CredentialKind::Static);
        assert_eq!(record.session_expiry(), Timestamp::UNIX_EPOCH);
        assert!(record.session_token().is_empty());
        assert!(record.is_usable_at(Timestamp::now()));
    }

    #[test]
    fn test_session_record_requires_token_and_future_expiry() {
        let url = parse_endpoint("https://sts.example.com").unwrap();
        let now = Timestamp::now();
        let options = AliasOptions::default();

        let record = EndpointRecord::with_session(
            "ldap",
            &url,
            SignatureDialect::V4,
            &session(now, "token"),
            &options,
            now,
        )
        .unwrap();
        assert_eq!(record.credential_kind(), CredentialKind::Federated);
        assert_eq!(record.session_expiry(), now + SignedDuration::from_mins(50));
        assert!(record.is_usable_at(now));

        let empty = EndpointRecord::with_session(
            "ldap",
            &url,
            SignatureDialect::V4,
            &session(now, ""),
            &options,
            now,
        );
        assert!(empty.is_err());

        let stale = EndpointRecord::with_session(
            "ldap",
            &url,
            SignatureDialect::V4,
            &session(now - SignedDuration::from_hours(2), "token"),
            &options,
            now,
        );
        assert!(stale.is_err());
    }

    #[test]
    fn test_validate_alias_name() {
        assert!(validate_alias_name("minio").is_ok());
        assert!(validate_alias_name("s3_prod-2").is_ok());
        assert!(validate_alias_name("").is_err());
        assert!(validate_alias_name("2fast").is_err());
        assert!(validate_alias_name("bad/alias").is_err());
    }

    #[test]
    fn test_parse_endpoint() {
        let url = parse_endpoint("https://play.min.io/").unwrap();
        assert_eq!(url.scheme(), "https");
        assert!(parse_endpoint("ftp://example.com").is_err());
        assert!(parse_endpoint("not a url").is_err());
    }

    #[test]
    fn test_path_style_from_str() {
        assert_eq!("auto".parse::<PathStyle>().unwrap(), PathStyle::Auto);
        assert_eq!("ON".parse::<PathStyle>().unwrap(), PathStyle::On);
        assert_eq!("dns".parse::<PathStyle>().unwrap(), PathStyle::Off);
        assert!("sideways".parse::<PathStyle>().is_err());
    }

    #[test]
    fn test_alias_manager_set_and_get() {
        let (manager, _temp_dir) = temp_alias_manager();

        manager
            .set(static_record("minio", "http://localhost:9000"))
            .unwrap();

        let retrieved = manager.get("minio").unwrap();
        assert_eq!(retrieved.name(), "minio");
        assert_eq!(retrieved.url(), "http://localhost:9000");
        assert_eq!(retrieved.api(), SignatureDialect::V4);
    }

    #[test]
    fn test_alias_manager_remove() {
        let (manager, _temp_dir) = temp_alias_manager();

        manager
            .set(static_record("test", "http://localhost:9000"))
            .unwrap();
        assert!(manager.exists("test").unwrap());

        manager.remove("test").unwrap();
        assert!(!manager.exists("test").unwrap());
    }

    #[test]
    fn test_alias_manager_not_found() {
        let (manager, _temp_dir) = temp_alias_manager();

        assert!(matches!(
            manager.get("nonexistent").unwrap_err(),
            Error::AliasNotFound(_)
        ));
        assert!(matches!(
            manager.remove("nonexistent").unwrap_err(),
            Error::AliasNotFound(_)
        ));
    }

    #[test]
    fn test_alias_update_existing() {
        let (manager, _temp_dir) = temp_alias_manager();

        manager.set(static_record("test", "http://old:9000")).unwrap();
        manager.set(static_record("test", "http://new:9000")).unwrap();

        let aliases = manager.list().unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].url(), "http://new:9000");
    }
}
