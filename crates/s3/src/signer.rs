//! Request signing for both S3 signature dialects

use std::time::SystemTime;

use aliasboot_core::{Credentials, Error, Result};
use aws_credential_types::Credentials as AwsCredentials;
use aws_sigv4::http_request::{
    PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest, SignatureLocation,
    SigningSettings, UriPathNormalizationMode, sign,
};
use aws_sigv4::sign::v4;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use hmac::{Hmac, Mac};
use jiff::Timestamp;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, DATE, HeaderMap, HeaderName, HeaderValue};
use sha1::Sha1;
use url::Url;

type HmacSha1 = Hmac<Sha1>;

/// RFC 1123 date as sent in the `Date` header of V2 requests
const V2_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const SECURITY_TOKEN: &str = "x-amz-security-token";

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::try_from(value).map_err(|e| Error::General(format!("Invalid header value: {e}")))
}

/// Sign a request using AWS Signature Version 4
pub fn sign_v4(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: &[u8],
    credentials: &Credentials,
    region: &str,
    time: SystemTime,
) -> Result<HeaderMap> {
    let aws_credentials = AwsCredentials::new(
        &credentials.access_key,
        &credentials.secret_key,
        credentials.session_token.clone(),
        None,
        "aliasboot",
    );

    let identity = aws_credentials.into();
    let mut signing_settings = SigningSettings::default();
    signing_settings.signature_location = SignatureLocation::Headers;
    signing_settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
    signing_settings.percent_encoding_mode = PercentEncodingMode::Single;
    signing_settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("s3")
        .time(time)
        .settings(signing_settings)
        .build()
        .map_err(|e| Error::General(format!("Failed to build signing params: {e}")))?;

    let header_pairs: Vec<(&str, &str)> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v)))
        .collect();

    let signable_request = SignableRequest::new(
        method.as_str(),
        url.as_str(),
        header_pairs.into_iter(),
        SignableBody::Bytes(body),
    )
    .map_err(|e| Error::General(format!("Failed to create signable request: {e}")))?;

    let (signing_instructions, _signature) = sign(signable_request, &signing_params.into())
        .map_err(|e| Error::General(format!("Failed to sign request: {e}")))?
        .into_parts();

    let mut signed_headers = headers.clone();
    for (name, value) in signing_instructions.headers() {
        let header_name = HeaderName::try_from(name)
            .map_err(|e| Error::General(format!("Invalid header name: {e}")))?;
        signed_headers.insert(header_name, header_value(value)?);
    }

    Ok(signed_headers)
}

/// Sign a request using AWS Signature Version 2
pub fn sign_v2(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    credentials: &Credentials,
    date: Timestamp,
) -> Result<HeaderMap> {
    let mut signed_headers = headers.clone();
    signed_headers.insert(
        DATE,
        header_value(&date.strftime(V2_DATE_FORMAT).to_string())?,
    );
    if let Some(token) = &credentials.session_token {
        signed_headers.insert(HeaderName::from_static(SECURITY_TOKEN), header_value(token)?);
    }

    let signature = signature_v2(
        &credentials.secret_key,
        &string_to_sign_v2(method, url, &signed_headers),
    )?;
    signed_headers.insert(
        AUTHORIZATION,
        header_value(&format!("AWS {}:{signature}", credentials.access_key))?,
    );
    Ok(signed_headers)
}

/// Base64 HMAC-SHA1 of `string_to_sign`
fn signature_v2(secret_key: &str, string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| Error::General(format!("Invalid signing key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Method, content headers, date, `x-amz-*` headers and the path-style resource
fn string_to_sign_v2(method: &Method, url: &Url, headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };

    let mut amz_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-amz-"))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.trim())))
        .collect();
    amz_headers.sort();

    let mut string_to_sign = format!(
        "{}\n{}\n{}\n{}\n",
        method.as_str(),
        header("content-md5"),
        header("content-type"),
        header("date"),
    );
    for (name, value) in amz_headers {
        string_to_sign.push_str(name);
        string_to_sign.push(':');
        string_to_sign.push_str(value);
        string_to_sign.push('\n');
    }
    string_to_sign.push_str(url.path());
    string_to_sign
}
