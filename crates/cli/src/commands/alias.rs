//! Alias management commands
//!
//! `alias set` runs the full bootstrap: trust negotiation, identity exchange
//! and signature probing. The alias is only saved when all of them succeed.

use std::fmt;
use std::sync::Arc;

use aliasboot_core::alias::parse_endpoint;
use aliasboot_core::{
    AliasBootstrapper, AliasManager, AliasOptions, BootstrapRequest, BootstrapServices,
    CertificateStore, ConfigManager, CredentialKind, Credentials, EndpointRecord, EndpointStore,
    Error, FileCertificateStore, PathStyle, Prompter, Result, SignatureDialect,
};
use aliasboot_s3::{HttpSignedStat, LdapTokenService, RustlsTlsProbe};
use clap::Subcommand;
use jiff::Timestamp;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use crate::prompt::{TerminalPrompter, is_interactive};

/// Environment switch selecting directory login for `--type auto`
const LDAP_ENABLED_ENV: &str = "CONSOLE_LDAP_ENABLED";

/// Alias subcommands for managing storage service connections
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List all configured aliases
    List(ListArgs),

    /// Remove an alias
    Remove(RemoveArgs),
}

/// Arguments for the `alias set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Alias name (e.g., "local", "s3", "minio")
    pub name: String,

    /// S3 endpoint URL (e.g., "http://localhost:9000", "https://s3.amazonaws.com")
    pub endpoint: String,

    /// Access key ID, or LDAP username with `--type ldap`
    pub access_key: Option<String>,

    /// Secret access key, or LDAP password with `--type ldap`
    pub secret_key: Option<String>,

    /// Signature version: S3v4 or S3v2 (probed when omitted)
    #[arg(long)]
    pub api: Option<SignatureDialect>,

    /// Bucket lookup style: auto, on, or off
    #[arg(long, default_value = "auto")]
    pub path: String,

    /// Credential type: auto, normal, or ldap
    #[arg(long = "type", default_value = "auto")]
    pub kind: String,

    /// AWS region (default: us-east-1)
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Skip TLS certificate verification
    #[arg(long, default_value = "false")]
    pub insecure: bool,
}

/// Arguments for the `alias list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show full details including signature and credential type
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `alias remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the alias to remove
    pub name: String,
}

/// JSON output for alias list
#[derive(Serialize)]
struct AliasListOutput {
    aliases: Vec<AliasInfo>,
}

/// Alias information for output (without secrets)
#[derive(Debug, Serialize)]
struct AliasInfo {
    name: String,
    url: String,
    api: SignatureDialect,
    path: PathStyle,
    region: String,
    credential_type: CredentialKind,
    insecure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_expiry: Option<Timestamp>,
    expired: bool,
}

impl From<&EndpointRecord> for AliasInfo {
    fn from(record: &EndpointRecord) -> Self {
        let session_expiry = match record.credential_kind() {
            CredentialKind::Federated => Some(record.session_expiry()),
            CredentialKind::Static => None,
        };
        Self {
            name: record.name().to_string(),
            url: record.url().to_string(),
            api: record.api(),
            path: record.path(),
            region: record.region().to_string(),
            credential_type: record.credential_kind(),
            insecure: record.insecure(),
            session_expiry,
            expired: !record.is_usable_at(Timestamp::now()),
        }
    }
}

impl fmt::Display for AliasInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12} {}", self.name, self.url)?;
        write!(
            f,
            " (api: {}, path: {}, type: {}",
            self.api, self.path, self.credential_type
        )?;
        if let Some(expiry) = self.session_expiry {
            write!(f, ", expires: {expiry}")?;
        }
        if self.insecure {
            f.write_str(", insecure")?;
        }
        if self.expired {
            f.write_str(", expired")?;
        }
        f.write_str(")")
    }
}

/// JSON output for alias set/remove operations
#[derive(Serialize)]
struct AliasOperationOutput {
    success: bool,
    alias: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<AliasInfo>,
}

/// Execute an alias subcommand
pub async fn execute(cmd: AliasCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let config_manager = match ConfigManager::new() {
        Ok(manager) => manager,
        Err(e) => return report(&formatter, &e),
    };

    match cmd {
        AliasCommands::Set(args) => execute_set(args, config_manager, &formatter).await,
        AliasCommands::List(args) => execute_list(args, config_manager, &formatter),
        AliasCommands::Remove(args) => execute_remove(args, config_manager, &formatter),
    }
}

fn report(formatter: &Formatter, error: &Error) -> ExitCode {
    if error.is_canceled() {
        formatter.notice("Canceled, nothing was saved.");
    } else {
        formatter.error(&error.to_string());
    }
    ExitCode::from_error(error)
}

/// Resolve `--type` into a credential kind
///
/// `auto` selects LDAP when `ldap_enabled` is `on`.
pub fn resolve_credential_kind(kind: &str, ldap_enabled: Option<&str>) -> Result<CredentialKind> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "normal" => Ok(CredentialKind::Static),
        "ldap" => Ok(CredentialKind::Federated),
        "auto" => Ok(match ldap_enabled {
            Some(value) if value.trim().eq_ignore_ascii_case("on") => CredentialKind::Federated,
            _ => CredentialKind::Static,
        }),
        other => Err(Error::InvalidArgument(format!(
            "unrecognized type '{other}', valid options are [auto, normal, ldap]"
        ))),
    }
}

/// Fill in missing keys by asking the user
async fn collect_credentials(
    args: &SetArgs,
    kind: CredentialKind,
    prompter: Option<&dyn Prompter>,
) -> Result<Credentials> {
    let (key_label, secret_label) = match kind {
        CredentialKind::Static => ("Access Key", "Secret Key"),
        CredentialKind::Federated => ("LDAP Username", "LDAP Password"),
    };

    let access_key = match (&args.access_key, prompter) {
        (Some(key), _) => key.clone(),
        (None, Some(prompter)) => prompter
            .read_line(&format!("Enter {key_label}: "))
            .await?
            .trim()
            .to_string(),
        (None, None) => {
            return Err(Error::InvalidArgument(format!(
                "{key_label} is required when not running interactively"
            )));
        }
    };
    let secret_key = match (&args.secret_key, prompter) {
        (Some(secret), _) => secret.clone(),
        (None, Some(prompter)) => prompter
            .read_secret(&format!("Enter {secret_label}: "))
            .await?
            .trim()
            .to_string(),
        (None, None) => {
            return Err(Error::InvalidArgument(format!(
                "{secret_label} is required when not running interactively"
            )));
        }
    };

    if kind == CredentialKind::Federated && (access_key.is_empty() || secret_key.is_empty()) {
        return Err(Error::InvalidArgument(
            "LDAP username and password cannot be empty".into(),
        ));
    }
    Ok(Credentials::new(access_key, secret_key))
}

/// Cancel `token` on Ctrl-C until the returned handle is aborted
fn cancel_on_interrupt(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupt received, canceling");
            token.cancel();
        }
    })
}

async fn execute_set(
    args: SetArgs,
    config_manager: ConfigManager,
    formatter: &Formatter,
) -> ExitCode {
    let ldap_enabled = std::env::var(LDAP_ENABLED_ENV).ok();
    let request = match build_request(&args, ldap_enabled.as_deref()) {
        Ok(request) => request,
        Err(e) => return report(formatter, &e),
    };

    let timeouts = match config_manager.load() {
        Ok(config) => config.defaults.timeout,
        Err(e) => return report(formatter, &e),
    };
    let certificates = Arc::new(FileCertificateStore::new(config_manager.certs_dir()));
    let records = Arc::new(AliasManager::with_config_manager(config_manager));

    let interactive = is_interactive() && !formatter.is_json() && !args.insecure;
    let prompter: Option<Arc<dyn Prompter>> = if is_interactive() && !formatter.is_json() {
        Some(Arc::new(TerminalPrompter))
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel_on_interrupt(cancel.clone());

    let credentials = match aliasboot_core::cancellable(
        &cancel,
        collect_credentials(&args, request.credential_kind, prompter.as_deref()),
    )
    .await
    {
        Ok(credentials) => credentials,
        Err(e) => {
            interrupt.abort();
            return report(formatter, &e);
        }
    };

    if args.insecure {
        formatter.warning("TLS certificate verification is disabled for this alias");
    }

    let services = BootstrapServices {
        tls: Arc::new(RustlsTlsProbe::new(timeouts)),
        stat: Arc::new(HttpSignedStat::new(&args.region, timeouts)),
        sts: Arc::new(LdapTokenService::new(timeouts)),
        prompter: if interactive { prompter } else { None },
        certificates,
        records,
    };
    let bootstrapper = AliasBootstrapper::new(services, cancel);
    let result = bootstrapper
        .bootstrap(BootstrapRequest {
            credentials,
            interactive,
            ..request
        })
        .await;
    interrupt.abort();

    match result {
        Ok(record) => {
            let info = AliasInfo::from(&record);
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Added `{}` successfully", args.name),
                    details: Some(info),
                });
            } else {
                formatter.success(&format!("Added `{}` successfully.", args.name));
                formatter.output(&info);
            }
            ExitCode::Success
        }
        Err(e) => report(formatter, &e),
    }
}

/// Validate the command line into a bootstrap request with empty credentials
fn build_request(args: &SetArgs, ldap_enabled: Option<&str>) -> Result<BootstrapRequest> {
    aliasboot_core::alias::validate_alias_name(&args.name)?;
    let endpoint = parse_endpoint(&args.endpoint)?;
    let path: PathStyle = args.path.parse()?;
    let credential_kind = resolve_credential_kind(&args.kind, ldap_enabled)?;

    Ok(BootstrapRequest {
        alias: args.name.clone(),
        endpoint,
        credentials: Credentials::new("", ""),
        explicit_dialect: args.api,
        credential_kind,
        interactive: false,
        options: AliasOptions {
            path,
            region: args.region.clone(),
            insecure: args.insecure,
        },
    })
}

fn execute_list(args: ListArgs, config_manager: ConfigManager, formatter: &Formatter) -> ExitCode {
    let manager = AliasManager::with_config_manager(config_manager);
    let records = match manager.list() {
        Ok(records) => records,
        Err(e) => return report(formatter, &e),
    };
    let aliases: Vec<AliasInfo> = records.iter().map(AliasInfo::from).collect();

    if formatter.is_json() {
        formatter.json(&AliasListOutput { aliases });
    } else if aliases.is_empty() {
        formatter.println("No aliases configured.");
    } else if args.long {
        for alias in &aliases {
            formatter.output(alias);
        }
    } else {
        for alias in &aliases {
            formatter.println(&format!("{:<12} {}", alias.name, alias.url));
        }
    }
    ExitCode::Success
}

/// Delete the record of `name` and any certificate pinned for it
fn remove_alias(
    records: &dyn EndpointStore,
    certificates: &dyn CertificateStore,
    name: &str,
) -> Result<()> {
    records.remove(name)?;
    if certificates.remove(name)? {
        tracing::debug!(alias = name, "Removed pinned certificate");
    }
    Ok(())
}

fn execute_remove(
    args: RemoveArgs,
    config_manager: ConfigManager,
    formatter: &Formatter,
) -> ExitCode {
    let certificates = FileCertificateStore::new(config_manager.certs_dir());
    let records = AliasManager::with_config_manager(config_manager);

    match remove_alias(&records, &certificates, &args.name) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Removed `{}` successfully", args.name),
                    details: None,
                });
            } else {
                formatter.success(&format!("Removed `{}` successfully.", args.name));
            }
            ExitCode::Success
        }
        Err(e) => report(formatter, &e),
    }
}
