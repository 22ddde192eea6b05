//! Alias bootstrap pipeline
//!
//! Registers a new alias by running, in order: trust negotiation, identity
//! exchange for federated credentials, signature probing unless a dialect
//! was given, and finally persisting the pinned certificate and the
//! [`EndpointRecord`]. Nothing is persisted unless every step succeeded.
//!
//! The whole run is bound to one [`CancellationToken`]. Cancelling it drops
//! the in-flight network call or prompt and the run ends with
//! [`Error::Canceled`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use jiff::Timestamp;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::alias::{AliasOptions, EndpointRecord, validate_alias_name};
use crate::error::{Error, Result};
use crate::federated::FederatedIdentityExchanger;
use crate::probe::SignatureProber;
use crate::traits::{
    CertificateStore, CredentialKind, Credentials, EndpointStore, Prompter, SignatureDialect,
    SignedStat, TlsProbe, TokenService,
};
use crate::trust::{TrustContext, TrustNegotiator};

/// Progress of one bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Start,
    TrustNegotiated,
    IdentityExchanged,
    SignatureProbed,
    RecordBuilt,
    Persisted,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Start => "start",
            BootstrapState::TrustNegotiated => "trust-negotiated",
            BootstrapState::IdentityExchanged => "identity-exchanged",
            BootstrapState::SignatureProbed => "signature-probed",
            BootstrapState::RecordBuilt => "record-built",
            BootstrapState::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// Input of one bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapRequest {
    pub alias: String,
    pub endpoint: Url,
    /// Access and secret key, or LDAP username and password when federated
    pub credentials: Credentials,
    /// Skip probing and record this dialect verbatim
    pub explicit_dialect: Option<SignatureDialect>,
    pub credential_kind: CredentialKind,
    /// Whether the user can be asked to confirm a certificate
    pub interactive: bool,
    pub options: AliasOptions,
}

/// Capabilities the pipeline runs on
#[derive(Clone)]
pub struct BootstrapServices {
    pub tls: Arc<dyn TlsProbe>,
    pub stat: Arc<dyn SignedStat>,
    pub sts: Arc<dyn TokenService>,
    pub prompter: Option<Arc<dyn Prompter>>,
    pub certificates: Arc<dyn CertificateStore>,
    pub records: Arc<dyn EndpointStore>,
}

/// Await `fut` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Canceled),
        result = fut => result,
    }
}

/// Orchestrates trust, identity and signature discovery for one alias
pub struct AliasBootstrapper {
    services: BootstrapServices,
    cancel: CancellationToken,
    clock: fn() -> Timestamp,
}

impl AliasBootstrapper {
    pub fn new(services: BootstrapServices, cancel: CancellationToken) -> Self {
        Self {
            services,
            cancel,
            clock: Timestamp::now,
        }
    }

    /// Replace the clock used for session stamps and record checks
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Run the pipeline and return the persisted record
    pub async fn bootstrap(&self, request: BootstrapRequest) -> Result<EndpointRecord> {
        validate_alias_name(&request.alias)?;

        let mut state = BootstrapState::Start;
        let result = self.run(&request, &mut state).await;
        match &result {
            Ok(record) => tracing::info!(
                alias = %request.alias,
                endpoint = %request.endpoint,
                api = %record.api(),
                kind = %record.credential_kind(),
                "Alias bootstrapped"
            ),
            Err(e) if e.is_canceled() => tracing::info!(
                alias = %request.alias,
                endpoint = %request.endpoint,
                state = %state,
                "Alias bootstrap canceled"
            ),
            Err(e) => tracing::warn!(
                alias = %request.alias,
                endpoint = %request.endpoint,
                state = %state,
                error = %e,
                "Alias bootstrap aborted"
            ),
        }
        result
    }

    async fn run(
        &self,
        request: &BootstrapRequest,
        state: &mut BootstrapState,
    ) -> Result<EndpointRecord> {
        let alias = request.alias.as_str();
        let endpoint = &request.endpoint;

        let base_trust = if request.options.insecure {
            TrustContext::insecure()
        } else {
            TrustContext::new(self.services.certificates.trust_roots()?)
        };

        let prompter = request
            .interactive
            .then(|| self.services.prompter.clone())
            .flatten();
        let negotiator = TrustNegotiator::new(self.services.tls.clone(), prompter);
        let pinned = cancellable(
            &self.cancel,
            negotiator.negotiate(endpoint, alias, &base_trust),
        )
        .await?;
        let trust = match &pinned {
            Some(cert) => base_trust.with_pinned(cert.clone()),
            None => base_trust,
        };
        self.advance(state, BootstrapState::TrustNegotiated, alias);

        let session = match request.credential_kind {
            CredentialKind::Static => None,
            CredentialKind::Federated => {
                let exchanger = FederatedIdentityExchanger::new(self.services.sts.clone())
                    .with_clock(self.clock);
                let session = cancellable(
                    &self.cancel,
                    exchanger.exchange(
                        endpoint,
                        &request.credentials.access_key,
                        &request.credentials.secret_key,
                        &trust,
                    ),
                )
                .await?;
                self.advance(state, BootstrapState::IdentityExchanged, alias);
                Some(session)
            }
        };
        let signing_credentials = match &session {
            Some(session) => session.credentials(),
            None => request.credentials.clone(),
        };

        let api = match request.explicit_dialect {
            Some(dialect) => {
                tracing::debug!(alias, %dialect, "Using explicit signature dialect");
                dialect
            }
            None => {
                let prober = SignatureProber::new(self.services.stat.clone());
                let dialect = cancellable(
                    &self.cancel,
                    prober.probe(endpoint, &signing_credentials, &trust),
                )
                .await?;
                self.advance(state, BootstrapState::SignatureProbed, alias);
                dialect
            }
        };

        let record = match &session {
            Some(session) => EndpointRecord::with_session(
                alias,
                endpoint,
                api,
                session,
                &request.options,
                (self.clock)(),
            )?,
            None => EndpointRecord::with_static(
                alias,
                endpoint,
                api,
                &request.credentials,
                &request.options,
            ),
        };
        self.advance(state, BootstrapState::RecordBuilt, alias);

        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        if let Some(cert) = &pinned {
            self.services.certificates.save(cert)?;
        }
        if let Err(e) = self.services.records.set(record.clone()) {
            // Every stored certificate is a trust root, so an orphan must not stay behind.
            if pinned.is_some()
                && let Err(cleanup) = self.services.certificates.remove(alias)
            {
                tracing::warn!(alias, error = %cleanup, "Failed to remove pinned certificate");
            }
            return Err(e);
        }
        self.advance(state, BootstrapState::Persisted, alias);

        Ok(record)
    }

    fn advance(&self, state: &mut BootstrapState, next: BootstrapState, alias: &str) {
        tracing::debug!(alias, from = %state, to = %next, "Bootstrap state transition");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{AliasManager, PathStyle};
    use crate::certstore::FileCertificateStore;
    use crate::config::ConfigManager;
    use crate::traits::{
        IssuedCredentials, MockCertificateStore, MockEndpointStore, MockPrompter, MockSignedStat,
        MockTlsProbe, MockTokenService, StatOutcome, TrustCheck,
    };
    use crate::trust::test_certs;
    use jiff::SignedDuration;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    fn fixed_now() -> Timestamp {
        "2026-10-19T12:00:00Z".parse().unwrap()
    }

    fn request(kind: CredentialKind, explicit: Option<SignatureDialect>) -> BootstrapRequest {
        BootstrapRequest {
            alias: "test".into(),
            endpoint: Url::parse("https://mock-endpoint").unwrap(),
            credentials: Credentials::new("AK", "SK"),
            explicit_dialect: explicit,
            credential_kind: kind,
            interactive: true,
            options: AliasOptions::default(),
        }
    }

    fn trusted_tls() -> MockTlsProbe {
        let mut tls = MockTlsProbe::new();
        tls.expect_check()
            .returning(|_, _| Ok(TrustCheck::Trusted));
        tls
    }

    fn empty_certificates() -> MockCertificateStore {
        let mut certs = MockCertificateStore::new();
        certs.expect_trust_roots().returning(|| Ok(Vec::new()));
        certs.expect_save().never();
        certs
    }

    fn unused_sts() -> MockTokenService {
        let mut sts = MockTokenService::new();
        sts.expect_assume_role_with_ldap().never();
        sts
    }

    fn services(
        tls: MockTlsProbe,
        stat: MockSignedStat,
        sts: MockTokenService,
        certificates: Arc<dyn CertificateStore>,
        records: Arc<dyn EndpointStore>,
    ) -> BootstrapServices {
        BootstrapServices {
            tls: Arc::new(tls),
            stat: Arc::new(stat),
            sts: Arc::new(sts),
            prompter: None,
            certificates,
            records,
        }
    }

    #[tokio::test]
    async fn test_explicit_dialect_skips_probe() {
        let mut stat = MockSignedStat::new();
        stat.expect_stat().never();
        let mut records = MockEndpointStore::new();
        records
            .expect_set()
            .withf(|record| record.api() == SignatureDialect::V2)
            .times(1)
            .returning(|_| Ok(()));

        let bootstrapper = AliasBootstrapper::new(
            services(
                trusted_tls(),
                stat,
                unused_sts(),
                Arc::new(empty_certificates()),
                Arc::new(records),
            ),
            CancellationToken::new(),
        );

        let record = bootstrapper
            .bootstrap(request(CredentialKind::Static, Some(SignatureDialect::V2)))
            .await
            .unwrap();
        assert_eq!(record.api(), SignatureDialect::V2);
        assert_eq!(record.credential_kind(), CredentialKind::Static);
    }

    #[tokio::test]
    async fn test_federated_probe_uses_session_credentials() {
        let mut sts = MockTokenService::new();
        sts.expect_assume_role_with_ldap()
            .times(1)
            .returning(|_, _, _, _, _| {
                Ok(IssuedCredentials {
                    access_key: "STSAK".into(),
                    secret_key: "STSSK".into(),
                    session_token: "token".into(),
                    expiration: None,
                })
            });
        let mut stat = MockSignedStat::new();
        stat.expect_stat()
            .withf(|_, dialect, creds, _| {
                *dialect == SignatureDialect::V4
                    && creds.access_key == "STSAK"
                    && creds.session_token.as_deref() == Some("token")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(StatOutcome::AccessDenied));
        let mut records = MockEndpointStore::new();
        records.expect_set().times(1).returning(|_| Ok(()));

        let bootstrapper = AliasBootstrapper::new(
            services(
                trusted_tls(),
                stat,
                sts,
                Arc::new(empty_certificates()),
                Arc::new(records),
            ),
            CancellationToken::new(),
        )
        .with_clock(fixed_now);

        let record = bootstrapper
            .bootstrap(request(CredentialKind::Federated, None))
            .await
            .unwrap();
        assert_eq!(record.credential_kind(), CredentialKind::Federated);
        assert_eq!(record.access_key(), "STSAK");
        assert_eq!(record.session_token(), "token");
        assert_eq!(
            record.session_expiry(),
            fixed_now() + SignedDuration::from_mins(50)
        );
    }

    #[tokio::test]
    async fn test_failure_persists_nothing() {
        let mut stat = MockSignedStat::new();
        stat.expect_stat()
            .times(2)
            .returning(|_, _, _, _| Ok(StatOutcome::SignatureMismatch("bad".into())));
        let mut records = MockEndpointStore::new();
        records.expect_set().never();

        let bootstrapper = AliasBootstrapper::new(
            services(
                trusted_tls(),
                stat,
                unused_sts(),
                Arc::new(empty_certificates()),
                Arc::new(records),
            ),
            CancellationToken::new(),
        );

        let err = bootstrapper
            .bootstrap(request(CredentialKind::Static, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignatureProbeExhausted { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_reports_canceled() {
        let mut tls = MockTlsProbe::new();
        tls.expect_check().never();
        let mut records = MockEndpointStore::new();
        records.expect_set().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let bootstrapper = AliasBootstrapper::new(
            services(
                tls,
                MockSignedStat::new(),
                unused_sts(),
                Arc::new(empty_certificates()),
                Arc::new(records),
            ),
            cancel,
        );

        let err = bootstrapper
            .bootstrap(request(CredentialKind::Static, None))
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_cancellable_passes_through() {
        let cancel = CancellationToken::new();
        let value = cancellable(&cancel, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        cancel.cancel();
        let err = cancellable(&cancel, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_invalid_alias_rejected_before_network() {
        let mut tls = MockTlsProbe::new();
        tls.expect_check().never();
        let bootstrapper = AliasBootstrapper::new(
            services(
                tls,
                MockSignedStat::new(),
                unused_sts(),
                Arc::new(empty_certificates()),
                Arc::new(MockEndpointStore::new()),
            ),
            CancellationToken::new(),
        );

        let mut req = request(CredentialKind::Static, None);
        req.alias = "9lives".into();
        let err = bootstrapper.bootstrap(req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_self_signed_static_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let config_manager = ConfigManager::with_path(temp_dir.path().join("config.toml"));
        let cert_store = Arc::new(FileCertificateStore::new(config_manager.certs_dir()));
        let alias_manager = Arc::new(AliasManager::with_config_manager(config_manager));

        let der = test_certs::self_signed();
        let served = der.clone();
        let mut tls = MockTlsProbe::new();
        tls.expect_check()
            .times(1)
            .returning(|_, _| Ok(TrustCheck::UnknownAuthority("UnknownIssuer".into())));
        tls.expect_fetch_peer_certificate()
            .times(1)
            .returning(move |_| Ok(served.clone()));

        let mut prompter = MockPrompter::new();
        prompter
            .expect_read_line()
            .times(1)
            .returning(|_| Ok("yes".to_string()));

        let pinned = der.clone();
        let mut stat = MockSignedStat::new();
        stat.expect_stat()
            .with(
                mockall::predicate::always(),
                eq(SignatureDialect::V4),
                eq(Credentials::new("AK", "SK")),
                mockall::predicate::function(move |trust: &TrustContext| {
                    trust.pinned().map(|c| c.der().to_vec()) == Some(pinned.clone())
                }),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(StatOutcome::AccessDenied));

        let bootstrapper = AliasBootstrapper::new(
            BootstrapServices {
                tls: Arc::new(tls),
                stat: Arc::new(stat),
                sts: Arc::new(unused_sts()),
                prompter: Some(Arc::new(prompter)),
                certificates: cert_store.clone(),
                records: alias_manager.clone(),
            },
            CancellationToken::new(),
        );

        let record = bootstrapper
            .bootstrap(request(CredentialKind::Static, None))
            .await
            .unwrap();

        assert_eq!(record.name(), "test");
        assert_eq!(record.api(), SignatureDialect::V4);
        assert_eq!(record.credential_kind(), CredentialKind::Static);
        assert_eq!(record.session_expiry(), Timestamp::UNIX_EPOCH);
        assert_eq!(record.path(), PathStyle::Auto);

        let stored_cert = cert_store.load("test").unwrap().unwrap();
        assert_eq!(stored_cert.der(), der.as_slice());
        assert_eq!(alias_manager.get("test").unwrap(), record);
    }

    #[tokio::test]
    async fn test_record_write_failure_removes_pinned_certificate() {
        let temp_dir = TempDir::new().unwrap();
        let config_manager = ConfigManager::with_path(temp_dir.path().join("config.toml"));
        let cert_store = Arc::new(FileCertificateStore::new(config_manager.certs_dir()));

        let der = test_certs::self_signed();
        let mut tls = MockTlsProbe::new();
        tls.expect_check()
            .returning(|_, _| Ok(TrustCheck::UnknownAuthority("UnknownIssuer".into())));
        tls.expect_fetch_peer_certificate()
            .returning(move |_| Ok(der.clone()));
        let mut prompter = MockPrompter::new();
        prompter
            .expect_read_line()
            .returning(|_| Ok("yes".to_string()));
        let mut records = MockEndpointStore::new();
        records
            .expect_set()
            .times(1)
            .returning(|_| Err(Error::Config("read-only file system".into())));

        let bootstrapper = AliasBootstrapper::new(
            BootstrapServices {
                tls: Arc::new(tls),
                stat: Arc::new(MockSignedStat::new()),
                sts: Arc::new(unused_sts()),
                prompter: Some(Arc::new(prompter)),
                certificates: cert_store.clone(),
                records: Arc::new(records),
            },
            CancellationToken::new(),
        );

        let err = bootstrapper
            .bootstrap(request(CredentialKind::Static, Some(SignatureDialect::V4)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(cert_store.load("test").unwrap().is_none());
        assert!(cert_store.trust_roots().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_declined_trust_stores_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config_manager = ConfigManager::with_path(temp_dir.path().join("config.toml"));
        let cert_store = Arc::new(FileCertificateStore::new(config_manager.certs_dir()));
        let alias_manager = Arc::new(AliasManager::with_config_manager(config_manager));

        let der = test_certs::self_signed();
        let mut tls = MockTlsProbe::new();
        tls.expect_check()
            .returning(|_, _| Ok(TrustCheck::UnknownAuthority("UnknownIssuer".into())));
        tls.expect_fetch_peer_certificate()
            .returning(move |_| Ok(der.clone()));
        let mut prompter = MockPrompter::new();
        prompter
            .expect_read_line()
            .times(1)
            .returning(|_| Ok("n".to_string()));
        let mut stat = MockSignedStat::new();
        stat.expect_stat().never();

        let bootstrapper = AliasBootstrapper::new(
            BootstrapServices {
                tls: Arc::new(tls),
                stat: Arc::new(stat),
                sts: Arc::new(unused_sts()),
                prompter: Some(Arc::new(prompter)),
                certificates: cert_store.clone(),
                records: alias_manager.clone(),
            },
            CancellationToken::new(),
        );

        let err = bootstrapper
            .bootstrap(request(CredentialKind::Static, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UserDeclinedTrust { .. }));
        assert!(cert_store.load("test").unwrap().is_none());
        assert!(!alias_manager.exists("test").unwrap());
    }
}
