//! Capability traits consumed by the bootstrap pipeline
//!
//! These traits decouple trust negotiation, signature probing and identity
//! exchange from the HTTP, TLS and terminal implementations that back them.
//! The aliasboot-s3 crate implements the network capabilities; the CLI
//! implements the prompter. All of them can be mocked for testing.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::alias::EndpointRecord;
use crate::certstore::PinnedCertificate;
use crate::error::{Error, Result};
use crate::trust::TrustContext;

/// Request-signing dialect accepted by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureDialect {
    /// AWS Signature Version 4
    #[serde(rename = "S3v4")]
    V4,
    /// AWS Signature Version 2
    #[serde(rename = "S3v2")]
    V2,
}

impl SignatureDialect {
    pub const fn as_str(self) -> &'static str {
        match self {
            SignatureDialect::V4 => "S3v4",
            SignatureDialect::V2 => "S3v2",
        }
    }
}

impl fmt::Display for SignatureDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3v4" | "v4" => Ok(SignatureDialect::V4),
            "s3v2" | "v2" => Ok(SignatureDialect::V2),
            other => Err(Error::InvalidArgument(format!(
                "unrecognized API signature '{other}', valid options are [S3v4, S3v2]"
            ))),
        }
    }
}

/// How the credentials of an alias were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Long-lived access key and secret key
    Static,
    /// Directory credentials exchanged for a session token
    Federated,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::Static => f.write_str("static"),
            CredentialKind::Federated => f.write_str("federated"),
        }
    }
}

/// Credentials used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

// Never print secrets, even in debug logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Server answer to a signed metadata-only bucket stat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatOutcome {
    /// The bucket exists and the request was authorized
    Exists,
    /// The signature verified and the bucket does not exist
    NotFound,
    /// The signature verified and the policy denied the stat
    AccessDenied,
    /// The server rejected the request signature
    SignatureMismatch(String),
    /// Any other server answer
    Unexpected(String),
}

impl fmt::Display for StatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatOutcome::Exists => f.write_str("bucket exists"),
            StatOutcome::NotFound => f.write_str("bucket does not exist"),
            StatOutcome::AccessDenied => f.write_str("access denied"),
            StatOutcome::SignatureMismatch(detail) => write!(f, "signature mismatch: {detail}"),
            StatOutcome::Unexpected(detail) => write!(f, "unexpected response: {detail}"),
        }
    }
}

/// Result of a request made with verification against the current trust set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustCheck {
    /// The TLS handshake verified against the trust set
    Trusted,
    /// The handshake failed only because the issuer is unknown
    UnknownAuthority(String),
}

/// Session credentials issued by a security token service
#[derive(Clone)]
pub struct IssuedCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    /// Server-side expiration, when the service reports one
    pub expiration: Option<Timestamp>,
}

impl fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("access_key", &self.access_key)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// TLS reachability checks for an HTTPS endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TlsProbe: Send + Sync {
    /// Issue one plain request verified against `trust`
    ///
    /// Returns `UnknownAuthority` only for an unknown-issuer handshake
    /// failure; every other failure is an error.
    async fn check(&self, endpoint: &Url, trust: &TrustContext) -> Result<TrustCheck>;

    /// Complete a TLS handshake without verification and return the peer
    /// leaf certificate in DER form. No request is sent over the connection.
    async fn fetch_peer_certificate(&self, endpoint: &Url) -> Result<Vec<u8>>;
}

/// Signed metadata-only existence check
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignedStat: Send + Sync {
    /// Stat `target` (a bucket URL) with requests signed in `dialect`
    ///
    /// Server answers are reported as a [`StatOutcome`]; transport failures
    /// are errors.
    async fn stat(
        &self,
        target: &Url,
        dialect: SignatureDialect,
        credentials: &Credentials,
        trust: &TrustContext,
    ) -> Result<StatOutcome>;
}

/// Security token service implementing the LDAP identity grant
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn assume_role_with_ldap(
        &self,
        endpoint: &Url,
        username: &str,
        password: &str,
        requested_validity: Duration,
        trust: &TrustContext,
    ) -> Result<IssuedCredentials>;
}

/// Interactive input and output
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Write `prompt` and read one line
    async fn read_line(&self, prompt: &str) -> Result<String>;

    /// Write `prompt` and read one line without echo
    async fn read_secret(&self, prompt: &str) -> Result<String>;
}

/// Pinned certificates keyed by alias name
#[cfg_attr(test, mockall::automock)]
pub trait CertificateStore: Send + Sync {
    fn load(&self, alias: &str) -> Result<Option<PinnedCertificate>>;

    /// Write or overwrite the certificate pinned for its alias
    fn save(&self, cert: &PinnedCertificate) -> Result<()>;

    /// Returns whether a certificate was removed
    fn remove(&self, alias: &str) -> Result<bool>;

    /// DER bytes of every stored certificate, used as extra trust roots
    fn trust_roots(&self) -> Result<Vec<Vec<u8>>>;
}

/// Endpoint records keyed by alias name
#[cfg_attr(test, mockall::automock)]
pub trait EndpointStore: Send + Sync {
    fn get(&self, alias: &str) -> Result<EndpointRecord>;

    /// Write or overwrite the record under its alias
    fn set(&self, record: EndpointRecord) -> Result<()>;

    fn remove(&self, alias: &str) -> Result<()>;
}
