//! aliasboot-s3: Network adapters for aliasboot
//!
//! This crate implements the capability traits of `aliasboot-core` on top
//! of rustls and reqwest:
//! - [`RustlsTlsProbe`] checks and reads server certificates
//! - [`HttpSignedStat`] issues V4 or V2 signed bucket stats
//! - [`LdapTokenService`] runs the STS LDAP identity grant
//!
//! It is the only crate that talks to the network.

pub mod http;
pub mod signer;
pub mod stat;
pub mod sts;
pub mod tls;

#[cfg(test)]
mod test_server;

pub use stat::HttpSignedStat;
pub use sts::LdapTokenService;
pub use tls::RustlsTlsProbe;
