//! Signed bucket stat over HTTP

use std::time::SystemTime;

use aliasboot_core::{
    Credentials, Result, SignatureDialect, SignedStat, StatOutcome, TimeoutConfig,
    TrustContext,
};
use async_trait::async_trait;
use jiff::Timestamp;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::http::{http_client, request_error};
use crate::signer::{sign_v2, sign_v4};

/// Error code headers set on bodiless error responses
const ERROR_CODE_HEADERS: [&str; 2] = ["x-minio-error-code", "x-amz-error-code"];

/// [`SignedStat`] issuing a signed `HEAD` on the bucket URL
#[derive(Debug, Clone)]
pub struct HttpSignedStat {
    region: String,
    timeouts: TimeoutConfig,
}

impl HttpSignedStat {
    pub fn new(region: impl Into<String>, timeouts: TimeoutConfig) -> Self {
        Self {
            region: region.into(),
            timeouts,
        }
    }
}

#[async_trait]
impl SignedStat for HttpSignedStat {
    async fn stat(
        &self,
        target: &Url,
        dialect: SignatureDialect,
        credentials: &Credentials,
        trust: &TrustContext,
    ) -> Result<StatOutcome> {
        let client = http_client(trust, &self.timeouts)?;
        let method = Method::HEAD;
        let headers = match dialect {
            SignatureDialect::V4 => sign_v4(
                &method,
                target,
                &HeaderMap::new(),
                &[],
                credentials,
                &self.region,
                SystemTime::now(),
            )?,
            SignatureDialect::V2 => sign_v2(
                &method,
                target,
                &HeaderMap::new(),
                credentials,
                Timestamp::now(),
            )?,
        };

        let response = client
            .request(method, target.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| request_error(target, e))?;

        let outcome = classify_response(response.status(), response.headers());
        tracing::debug!(%target, %dialect, status = response.status().as_u16(), %outcome, "Stat response");
        Ok(outcome)
    }
}

/// Map a stat response onto its outcome
///
/// The error code header wins over the status; without one the status
/// alone decides.
pub fn classify_response(status: StatusCode, headers: &HeaderMap) -> StatOutcome {
    let code = ERROR_CODE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .filter(|code| !code.is_empty());

    if let Some(code) = code {
        return match code {
            "NoSuchBucket" | "NoSuchKey" | "NotFound" => StatOutcome::NotFound,
            "AccessDenied" | "AllAccessDisabled" => StatOutcome::AccessDenied,
            _ => StatOutcome::SignatureMismatch(code.to_string()),
        };
    }

    match status {
        s if s.is_success() => StatOutcome::Exists,
        StatusCode::NOT_FOUND => StatOutcome::NotFound,
        StatusCode::FORBIDDEN => StatOutcome::AccessDenied,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
            StatOutcome::SignatureMismatch(format!("HTTP {}", status.as_u16()))
        }
        _ => StatOutcome::Unexpected(format!("HTTP {}", status.as_u16())),
    }
}
