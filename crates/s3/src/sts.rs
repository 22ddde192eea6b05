//! LDAP identity grant against the endpoint's token service

use std::time::Duration;

use aliasboot_core::{Error, IssuedCredentials, Result, TimeoutConfig, TokenService, TrustContext};
use async_trait::async_trait;
use jiff::Timestamp;
use serde::Deserialize;
use url::Url;

use crate::http::{http_client, request_error};

const STS_API_VERSION: &str = "2011-06-15";
const LDAP_ACTION: &str = "AssumeRoleWithLDAPIdentity";

#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleWithLDAPIdentityResult")]
    result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    #[serde(default)]
    expiration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Error")]
    error: StsError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// [`TokenService`] speaking the STS query protocol
#[derive(Debug, Clone, Default)]
pub struct LdapTokenService {
    timeouts: TimeoutConfig,
}

impl LdapTokenService {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl TokenService for LdapTokenService {
    async fn assume_role_with_ldap(
        &self,
        endpoint: &Url,
        username: &str,
        password: &str,
        validity: Duration,
        trust: &TrustContext,
    ) -> Result<IssuedCredentials> {
        let client = http_client(trust, &self.timeouts)?;
        let duration = validity.as_secs().to_string();
        let form = [
            ("Action", LDAP_ACTION),
            ("LDAPUsername", username),
            ("LDAPPassword", password),
            ("Version", STS_API_VERSION),
            ("DurationSeconds", duration.as_str()),
        ];

        let response = client
            .post(endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        if !status.is_success() {
            return Err(Error::IdentityExchangeFailed {
                endpoint: endpoint.to_string(),
                cause: describe_error(status.as_u16(), &body),
            });
        }
        parse_credentials(&body).map_err(|cause| Error::IdentityExchangeFailed {
            endpoint: endpoint.to_string(),
            cause,
        })
    }
}

fn parse_credentials(body: &str) -> std::result::Result<IssuedCredentials, String> {
    let response: AssumeRoleResponse = quick_xml::de::from_str(body)
        .map_err(|e| format!("malformed token service response: {e}"))?;
    let credentials = response.result.credentials;

    let expiration = match credentials.expiration.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<Timestamp>()
                .map_err(|e| format!("invalid expiration {raw:?}: {e}"))?,
        ),
    };

    Ok(IssuedCredentials {
        access_key: credentials.access_key_id,
        secret_key: credentials.secret_access_key,
        session_token: credentials.session_token,
        expiration,
    })
}

fn describe_error(status: u16, body: &str) -> String {
    match quick_xml::de::from_str::<ErrorResponse>(body) {
        Ok(response) if !response.error.code.is_empty() => {
            if response.error.message.is_empty() {
                response.error.code
            } else {
                format!("{}: {}", response.error.code, response.error.message)
            }
        }
        _ => format!("HTTP {status}"),
    }
}
