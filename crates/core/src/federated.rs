//! Federated identity exchange
//!
//! Exchanges LDAP directory credentials for short-lived session credentials
//! through the token service of the endpoint. The effective expiry of a
//! session is pulled in by a fixed safety window so that a caller checking
//! `now < effective_expiry` never presents a token the server already
//! considers expired.

use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use url::Url;

use crate::error::{Error, Result};
use crate::traits::{Credentials, TokenService};
use crate::trust::TrustContext;

/// Validity requested from the token service
pub const STS_DEFAULT_EXPIRY: SignedDuration = SignedDuration::from_hours(1);

/// Margin for clock drift and in-flight operation latency
pub const STS_WINDOW_TIME: SignedDuration = SignedDuration::from_mins(10);

/// Session credentials obtained from a federated identity
#[derive(Clone, PartialEq, Eq)]
pub struct FederatedSession {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub issued_at: Timestamp,
    pub requested_validity: SignedDuration,
    /// Expiration reported by the token service, if any
    pub server_expiry: Option<Timestamp>,
}

impl FederatedSession {
    /// Nominal expiry: the requested validity, capped by the server's
    pub fn nominal_expiry(&self) -> Timestamp {
        let requested = self.issued_at + self.requested_validity;
        match self.server_expiry {
            Some(server) if server < requested => server,
            _ => requested,
        }
    }

    /// Point after which the session must no longer be used
    pub fn effective_expiry(&self) -> Timestamp {
        self.nominal_expiry() - STS_WINDOW_TIME
    }

    pub fn is_usable_at(&self, now: Timestamp) -> bool {
        now < self.effective_expiry()
    }

    /// Credentials for signing requests with this session
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.access_key, &self.secret_key)
            .with_session_token(&self.session_token)
    }
}

impl std::fmt::Debug for FederatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedSession")
            .field("access_key", &self.access_key)
            .field("issued_at", &self.issued_at)
            .field("effective_expiry", &self.effective_expiry())
            .finish_non_exhaustive()
    }
}

/// Exchanges directory credentials for session credentials
pub struct FederatedIdentityExchanger {
    sts: Arc<dyn TokenService>,
    clock: fn() -> Timestamp,
}

impl FederatedIdentityExchanger {
    pub fn new(sts: Arc<dyn TokenService>) -> Self {
        Self {
            sts,
            clock: Timestamp::now,
        }
    }

    /// Replace the clock used to stamp issued sessions
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Run the LDAP identity grant against `endpoint`
    ///
    /// The token service trusts `trust`; a plain HTTP endpoint is contacted
    /// without any certificate verification. Failures are reported as
    /// `IdentityExchangeFailed` and never retried.
    pub async fn exchange(
        &self,
        endpoint: &Url,
        username: &str,
        password: &str,
        trust: &TrustContext,
    ) -> Result<FederatedSession> {
        let trust = if endpoint.scheme() == "https" {
            trust.clone()
        } else {
            trust.without_verification()
        };

        tracing::debug!(%endpoint, username, "Requesting session credentials");
        let issued = self
            .sts
            .assume_role_with_ldap(
                endpoint,
                username,
                password,
                STS_DEFAULT_EXPIRY.unsigned_abs(),
                &trust,
            )
            .await
            .map_err(|e| match e {
                Error::Canceled => Error::Canceled,
                Error::IdentityExchangeFailed { .. } => e,
                other => Error::IdentityExchangeFailed {
                    endpoint: endpoint.to_string(),
                    cause: other.to_string(),
                },
            })?;

        if issued.session_token.is_empty() || issued.access_key.is_empty() {
            return Err(Error::IdentityExchangeFailed {
                endpoint: endpoint.to_string(),
                cause: "token service returned incomplete credentials".into(),
            });
        }

        let session = FederatedSession {
            access_key: issued.access_key,
            secret_key: issued.secret_key,
            session_token: issued.session_token,
            issued_at: (self.clock)(),
            requested_validity: STS_DEFAULT_EXPIRY,
            server_expiry: issued.expiration,
        };
        tracing::info!(
            %endpoint,
            access_key = %session.access_key,
            expires = %session.effective_expiry(),
            "Session credentials issued"
        );
        Ok(session)
    }
}
