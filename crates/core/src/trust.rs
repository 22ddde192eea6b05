//! TLS trust negotiation
//!
//! Decides whether a server certificate must be pinned before the endpoint
//! can be used. Certificates that already verify need nothing. A self-signed
//! certificate can be pinned after the user confirms the SHA-256 fingerprint
//! of its public key. A certificate issued by some other unknown CA is always
//! rejected without asking.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;
use x509_parser::prelude::*;

use crate::certstore::PinnedCertificate;
use crate::error::{Error, Result};
use crate::traits::{Prompter, TlsProbe, TrustCheck};

/// Certificates trusted for one network operation
///
/// Built-in roots are always trusted. `extra_roots` holds certificates
/// pinned by earlier bootstraps; `pinned` holds the certificate confirmed
/// during the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustContext {
    extra_roots: Vec<Vec<u8>>,
    pinned: Option<PinnedCertificate>,
    insecure: bool,
}

impl TrustContext {
    pub fn new(extra_roots: Vec<Vec<u8>>) -> Self {
        Self {
            extra_roots,
            pinned: None,
            insecure: false,
        }
    }

    /// A context that skips certificate verification entirely
    pub fn insecure() -> Self {
        Self {
            insecure: true,
            ..Self::default()
        }
    }

    /// Copy of this context that also trusts `cert`
    pub fn with_pinned(&self, cert: PinnedCertificate) -> Self {
        Self {
            pinned: Some(cert),
            ..self.clone()
        }
    }

    /// Copy of this context with verification disabled
    pub fn without_verification(&self) -> Self {
        Self {
            insecure: true,
            ..self.clone()
        }
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn pinned(&self) -> Option<&PinnedCertificate> {
        self.pinned.as_ref()
    }

    /// DER bytes of every extra root, the pinned certificate included
    pub fn roots(&self) -> impl Iterator<Item = &[u8]> {
        self.extra_roots
            .iter()
            .map(Vec::as_slice)
            .chain(self.pinned.iter().map(PinnedCertificate::der))
    }
}

/// Facts about a peer certificate needed for the trust decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub self_issued: bool,
    /// Hex SHA-256 of the DER SubjectPublicKeyInfo
    pub fingerprint: String,
}

impl CertificateSummary {
    pub fn parse(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("failed to parse X.509 certificate: {e}")))?;

        let mut ski = None;
        let mut aki = None;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(kid) => ski = Some(kid.0),
                ParsedExtension::AuthorityKeyIdentifier(auth) => {
                    aki = auth.key_identifier.as_ref().map(|kid| kid.0)
                }
                _ => {}
            }
        }
        let same_name = cert.subject().as_raw() == cert.issuer().as_raw();

        Ok(Self {
            subject: cert.subject().to_string(),
            self_issued: is_self_issued(ski, aki, same_name),
            fingerprint: public_key_fingerprint(cert.public_key().raw),
        })
    }
}

/// Whether key identifiers show a certificate is its own issuer
///
/// Both identifiers present: they must be equal. Both absent: subject and
/// issuer names must match. Only one present: never self-issued.
pub fn is_self_issued(ski: Option<&[u8]>, aki: Option<&[u8]>, same_name: bool) -> bool {
    match (ski, aki) {
        (Some(ski), Some(aki)) => ski == aki,
        (None, None) => same_name,
        _ => false,
    }
}

/// Hex encoded SHA-256 of a DER SubjectPublicKeyInfo
pub fn public_key_fingerprint(spki_der: &[u8]) -> String {
    hex::encode(Sha256::digest(spki_der))
}

/// Only `y` and `yes` confirm, in any case
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Runs the trust-on-first-use ceremony for one endpoint
pub struct TrustNegotiator {
    probe: Arc<dyn TlsProbe>,
    prompter: Option<Arc<dyn Prompter>>,
}

impl TrustNegotiator {
    /// Without a prompter every self-signed certificate is declined
    pub fn new(probe: Arc<dyn TlsProbe>, prompter: Option<Arc<dyn Prompter>>) -> Self {
        Self { probe, prompter }
    }

    /// Decide whether `endpoint` needs a pinned certificate for `alias`
    ///
    /// Returns `None` when the endpoint is plain HTTP, verification is
    /// disabled, or the certificate already verifies against `trust`.
    /// Returns the certificate to pin once the user confirmed it.
    pub async fn negotiate(
        &self,
        endpoint: &Url,
        alias: &str,
        trust: &TrustContext,
    ) -> Result<Option<PinnedCertificate>> {
        if endpoint.scheme() != "https" {
            tracing::debug!(alias, %endpoint, "Plain HTTP endpoint, no certificate to negotiate");
            return Ok(None);
        }
        if trust.is_insecure() {
            tracing::debug!(alias, %endpoint, "Certificate verification disabled");
            return Ok(None);
        }

        let reason = match self.probe.check(endpoint, trust).await? {
            TrustCheck::Trusted => {
                tracing::debug!(alias, %endpoint, "Certificate already trusted");
                return Ok(None);
            }
            TrustCheck::UnknownAuthority(reason) => reason,
        };
        tracing::debug!(alias, %endpoint, reason = %reason, "Certificate issuer unknown");

        let der = self.probe.fetch_peer_certificate(endpoint).await?;
        let summary = CertificateSummary::parse(&der)?;
        if !summary.self_issued {
            tracing::warn!(alias, %endpoint, subject = %summary.subject, "Certificate is not self-signed");
            return Err(Error::UntrustedIssuer {
                alias: alias.to_string(),
                endpoint: endpoint.to_string(),
            });
        }

        let Some(prompter) = &self.prompter else {
            return Err(Error::UserDeclinedTrust {
                alias: alias.to_string(),
                endpoint: endpoint.to_string(),
                reason: "confirming a self-signed certificate requires an interactive terminal"
                    .into(),
            });
        };

        let prompt = format!(
            "Fingerprint of {alias} public key: {}\nConfirm public key y/N: ",
            summary.fingerprint
        );
        let answer = prompter.read_line(&prompt).await?;
        if !is_affirmative(&answer) {
            return Err(Error::UserDeclinedTrust {
                alias: alias.to_string(),
                endpoint: endpoint.to_string(),
                reason: "fingerprint not confirmed".into(),
            });
        }

        tracing::info!(alias, %endpoint, fingerprint = %summary.fingerprint, "Self-signed certificate confirmed");
        Ok(Some(PinnedCertificate::new(alias, der)))
    }
}
