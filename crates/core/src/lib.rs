//! aliasboot-core: Core library for bootstrapping S3 endpoint aliases
//!
//! This crate provides the core functionality for aliasboot, including:
//! - Configuration and alias record management
//! - Pinned certificate storage
//! - TLS trust negotiation for self-signed endpoints
//! - Signature dialect probing
//! - Federated (LDAP) identity exchange
//! - The bootstrap pipeline tying them together
//!
//! Network access goes through the capability traits in [`traits`], so this
//! crate stays independent of any HTTP or TLS stack.

pub mod alias;
pub mod bootstrap;
pub mod certstore;
pub mod config;
pub mod error;
pub mod federated;
pub mod probe;
pub mod traits;
pub mod trust;

pub use alias::{AliasManager, AliasOptions, EndpointRecord, PathStyle};
pub use bootstrap::{
    AliasBootstrapper, BootstrapRequest, BootstrapServices, BootstrapState, cancellable,
};
pub use certstore::{FileCertificateStore, PinnedCertificate};
pub use config::{Config, ConfigManager, TimeoutConfig};
pub use error::{Error, Result};
pub use federated::{FederatedIdentityExchanger, FederatedSession};
pub use probe::SignatureProber;
pub use traits::{
    CertificateStore, CredentialKind, Credentials, EndpointStore, IssuedCredentials, Prompter,
    SignatureDialect, SignedStat, StatOutcome, TlsProbe, TokenService, TrustCheck,
};
pub use trust::{TrustContext, TrustNegotiator};
