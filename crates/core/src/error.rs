//! Error types for aliasboot-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.
//! Trust, protocol and transport failures are kept in separate variants so the
//! CLI can render distinct diagnostics for each.

use thiserror::Error;

/// Result type alias for aliasboot-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for aliasboot-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid command input (alias name, URL, signature or lookup value)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Alias not found
    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Transport failure: connection refused, timeout, TLS handshake failure
    #[error("Network error contacting {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    /// The peer certificate is signed by an unknown issuer and is not self-signed
    #[error(
        "Certificate presented by {endpoint} for alias '{alias}' is not self-signed and its issuer is not trusted"
    )]
    UntrustedIssuer { alias: String, endpoint: String },

    /// The user did not confirm the self-signed certificate fingerprint
    #[error("Certificate of {endpoint} was not trusted for alias '{alias}': {reason}")]
    UserDeclinedTrust {
        alias: String,
        endpoint: String,
        reason: String,
    },

    /// Malformed or unreadable certificate
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Neither signature dialect was accepted by the server
    #[error(
        "Unable to determine the signature version of {endpoint}: S3v4 rejected ({v4}), S3v2 rejected ({v2})"
    )]
    SignatureProbeExhausted {
        endpoint: String,
        v4: String,
        v2: String,
    },

    /// The security token service did not issue session credentials
    #[error("Unable to obtain session credentials from {endpoint}: {cause}")]
    IdentityExchangeFailed { endpoint: String, cause: String },

    /// The bootstrap was canceled before it completed
    #[error("Operation canceled")]
    Canceled,

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Build a network error for the given endpoint
    pub fn network(endpoint: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::Network {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error is a cancellation rather than a failure
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) | Error::Config(_) | Error::InvalidUrl(_) => 2, // UsageError
            Error::Network { .. } => 3,                                               // NetworkError
            Error::UntrustedIssuer { .. }
            | Error::UserDeclinedTrust { .. }
            | Error::SignatureProbeExhausted { .. }
            | Error::IdentityExchangeFailed { .. } => 4, // AuthError
            Error::AliasNotFound(_) => 5, // NotFound
            Error::Canceled => 130,       // Interrupted
            _ => 1,                       // GeneralError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(Error::InvalidArgument("test".into()).exit_code(), 2);
        assert_eq!(Error::Config("test".into()).exit_code(), 2);
        assert_eq!(Error::network("https://s3", "refused").exit_code(), 3);
        assert_eq!(
            Error::UntrustedIssuer {
                alias: "a".into(),
                endpoint: "https://s3".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            Error::SignatureProbeExhausted {
                endpoint: "https://s3".into(),
                v4: "x".into(),
                v2: "y".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(Error::AliasNotFound("test".into()).exit_code(), 5);
        assert_eq!(Error::Canceled.exit_code(), 130);
        assert_eq!(Error::General("test".into()).exit_code(), 1);
    }

    #[test]
    fn test_error_display() {
        let err = Error::AliasNotFound("minio".into());
        assert_eq!(err.to_string(), "Alias not found: minio");

        let err = Error::IdentityExchangeFailed {
            endpoint: "https://sts".into(),
            cause: "InvalidParameterValue".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unable to obtain session credentials from https://sts: InvalidParameterValue"
        );
    }

    #[test]
    fn test_only_cancellation_is_canceled() {
        assert!(Error::Canceled.is_canceled());
        assert!(
            !Error::UserDeclinedTrust {
                alias: "a".into(),
                endpoint: "e".into(),
                reason: "r".into()
            }
            .is_canceled()
        );
    }
}
