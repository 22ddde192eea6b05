//! Signature dialect probing
//!
//! Stats a bucket name that almost certainly does not exist. A server that
//! answers "no such bucket" or "access denied" has verified the signature
//! and reached its authorization logic, so the dialect is accepted. Neither
//! a real bucket nor list or write permissions are required.

use std::sync::Arc;

use rand::Rng;
use url::Url;

use crate::error::{Error, Result};
use crate::traits::{Credentials, SignatureDialect, SignedStat, StatOutcome};
use crate::trust::TrustContext;

const PROBE_BUCKET_PREFIX: &str = "probe-bucket-sign-";
const PROBE_BUCKET_LEN: usize = 60;
const BUCKET_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

type OutcomeClassifier = fn(&StatOutcome) -> bool;

/// Dialects in the order they are tried, each with its acceptance test
const CANDIDATES: [(SignatureDialect, OutcomeClassifier); 2] = [
    (SignatureDialect::V4, signature_verified),
    (SignatureDialect::V2, signature_verified),
];

/// The server got past signature verification
fn signature_verified(outcome: &StatOutcome) -> bool {
    matches!(
        outcome,
        StatOutcome::Exists | StatOutcome::NotFound | StatOutcome::AccessDenied
    )
}

/// Random, valid bucket name used only for probing
pub fn probe_bucket_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut name = String::with_capacity(PROBE_BUCKET_LEN);
    name.push_str(PROBE_BUCKET_PREFIX);
    while name.len() < PROBE_BUCKET_LEN {
        let idx = rng.gen_range(0..BUCKET_CHARSET.len());
        name.push(BUCKET_CHARSET[idx] as char);
    }
    name
}

/// Path-style URL of `bucket` under `endpoint`
pub fn bucket_url(endpoint: &Url, bucket: &str) -> Result<Url> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidArgument(format!("cannot append a bucket to {endpoint}")))?
        .pop_if_empty()
        .push(bucket);
    Ok(url)
}

/// Determines which signature dialect a server accepts
pub struct SignatureProber {
    stat: Arc<dyn SignedStat>,
}

impl SignatureProber {
    pub fn new(stat: Arc<dyn SignedStat>) -> Self {
        Self { stat }
    }

    /// Try each candidate dialect in order against a random probe bucket
    ///
    /// Transport errors are returned as-is; only server answers move on to
    /// the next dialect.
    pub async fn probe(
        &self,
        endpoint: &Url,
        credentials: &Credentials,
        trust: &TrustContext,
    ) -> Result<SignatureDialect> {
        let bucket = probe_bucket_name(&mut rand::thread_rng());
        let target = bucket_url(endpoint, &bucket)?;
        let mut rejections = Vec::with_capacity(CANDIDATES.len());

        for (dialect, accepted) in CANDIDATES {
            let outcome = self.stat.stat(&target, dialect, credentials, trust).await?;
            if accepted(&outcome) {
                tracing::info!(%endpoint, %dialect, outcome = %outcome, "Signature dialect accepted");
                return Ok(dialect);
            }
            tracing::debug!(%endpoint, %dialect, outcome = %outcome, "Signature dialect rejected");
            rejections.push(outcome.to_string());
        }

        let mut rejections = rejections.into_iter();
        Err(Error::SignatureProbeExhausted {
            endpoint: endpoint.to_string(),
            v4: rejections.next().unwrap_or_default(),
            v2: rejections.next().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockSignedStat;
    use mockall::predicate::eq;

    fn endpoint() -> Url {
        Url::parse("https://mock-endpoint").unwrap()
    }

    fn prober_with(outcomes: Vec<(SignatureDialect, StatOutcome)>) -> SignatureProber {
        let mut stat = MockSignedStat::new();
        for (dialect, outcome) in outcomes {
            stat.expect_stat()
                .with(
                    mockall::predicate::always(),
                    eq(dialect),
                    mockall::predicate::always(),
                    mockall::predicate::always(),
                )
                .times(1)
                .returning(move |_, _, _, _| Ok(outcome.clone()));
        }
        SignatureProber::new(Arc::new(stat))
    }

    async fn run(prober: &SignatureProber) -> Result<SignatureDialect> {
        prober
            .probe(
                &endpoint(),
                &Credentials::new("AK", "SK"),
                &TrustContext::default(),
            )
            .await
    }

    #[test]
    fn test_probe_bucket_name() {
        let mut rng = rand::thread_rng();
        let a = probe_bucket_name(&mut rng);
        let b = probe_bucket_name(&mut rng);
        assert_eq!(a.len(), PROBE_BUCKET_LEN);
        assert!(a.starts_with(PROBE_BUCKET_PREFIX));
        assert!(
            a.bytes()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-')
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_bucket_url() {
        let url = bucket_url(&endpoint(), "probe").unwrap();
        assert_eq!(url.as_str(), "https://mock-endpoint/probe");

        let prefixed = Url::parse("https://gw.example.com/s3/").unwrap();
        let url = bucket_url(&prefixed, "probe").unwrap();
        assert_eq!(url.as_str(), "https://gw.example.com/s3/probe");
    }

    #[test]
    fn test_classifier() {
        assert!(signature_verified(&StatOutcome::NotFound));
        assert!(signature_verified(&StatOutcome::AccessDenied));
        assert!(signature_verified(&StatOutcome::Exists));
        assert!(!signature_verified(&StatOutcome::SignatureMismatch(
            "SignatureDoesNotMatch".into()
        )));
        assert!(!signature_verified(&StatOutcome::Unexpected("500".into())));
    }

    #[tokio::test]
    async fn test_v4_not_found_accepts_v4() {
        let prober = prober_with(vec![(SignatureDialect::V4, StatOutcome::NotFound)]);
        assert_eq!(run(&prober).await.unwrap(), SignatureDialect::V4);
    }

    #[tokio::test]
    async fn test_v4_access_denied_accepts_v4() {
        let prober = prober_with(vec![(SignatureDialect::V4, StatOutcome::AccessDenied)]);
        assert_eq!(run(&prober).await.unwrap(), SignatureDialect::V4);
    }

    #[tokio::test]
    async fn test_v4_mismatch_falls_back_to_v2() {
        let prober = prober_with(vec![
            (
                SignatureDialect::V4,
                StatOutcome::SignatureMismatch("SignatureDoesNotMatch".into()),
            ),
            (SignatureDialect::V2, StatOutcome::NotFound),
        ]);
        assert_eq!(run(&prober).await.unwrap(), SignatureDialect::V2);
    }

    #[tokio::test]
    async fn test_both_mismatch_exhausts() {
        let prober = prober_with(vec![
            (
                SignatureDialect::V4,
                StatOutcome::SignatureMismatch("SignatureDoesNotMatch".into()),
            ),
            (
                SignatureDialect::V2,
                StatOutcome::Unexpected("HTTP 501".into()),
            ),
        ]);
        match run(&prober).await.unwrap_err() {
            Error::SignatureProbeExhausted { v4, v2, .. } => {
                assert!(v4.contains("SignatureDoesNotMatch"));
                assert!(v2.contains("HTTP 501"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let mut stat = MockSignedStat::new();
        stat.expect_stat()
            .times(1)
            .returning(|url, _, _, _| Err(Error::network(url, "connection refused")));
        let prober = SignatureProber::new(Arc::new(stat));

        assert!(matches!(
            run(&prober).await.unwrap_err(),
            Error::Network { .. }
        ));
    }

    #[tokio::test]
    async fn test_probe_targets_random_bucket() {
        let mut stat = MockSignedStat::new();
        stat.expect_stat()
            .withf(|target, _, _, _| {
                target
                    .path()
                    .trim_start_matches('/')
                    .starts_with(PROBE_BUCKET_PREFIX)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(StatOutcome::NotFound));
        let prober = SignatureProber::new(Arc::new(stat));
        run(&prober).await.unwrap();
    }
}
