//! Direct TLS handshakes against an endpoint

use std::sync::Arc;

use aliasboot_core::{Error, Result, TimeoutConfig, TlsProbe, TrustCheck, TrustContext};
use async_trait::async_trait;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use url::Url;

use crate::http::{AcceptAnyCertificate, crypto_provider, is_unknown_authority, tls_error};

/// [`TlsProbe`] backed by rustls
#[derive(Debug, Clone, Default)]
pub struct RustlsTlsProbe {
    timeouts: TimeoutConfig,
}

impl RustlsTlsProbe {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self { timeouts }
    }

    async fn handshake(
        &self,
        endpoint: &Url,
        config: ClientConfig,
    ) -> Result<std::result::Result<TlsStream<TcpStream>, std::io::Error>> {
        let host = endpoint
            .host_str()
            .ok_or_else(|| Error::InvalidArgument(format!("{endpoint} has no host")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = endpoint.port_or_known_default().unwrap_or(443);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::InvalidArgument(format!("invalid TLS server name {host}: {e}")))?;

        let tcp = tokio::time::timeout(self.timeouts.connect(), TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::network(endpoint, "connection timed out"))?
            .map_err(|e| Error::network(endpoint, e.to_string()))?;

        let connector = TlsConnector::from(Arc::new(config));
        let handshake = tokio::time::timeout(self.timeouts.read(), connector.connect(server_name, tcp))
            .await
            .map_err(|_| Error::network(endpoint, "TLS handshake timed out"))?;
        Ok(handshake)
    }
}

#[async_trait]
impl TlsProbe for RustlsTlsProbe {
    async fn check(&self, endpoint: &Url, trust: &TrustContext) -> Result<TrustCheck> {
        let config = crate::http::tls_config(trust)?;
        match self.handshake(endpoint, config).await? {
            Ok(_) => Ok(TrustCheck::Trusted),
            Err(e) => match tls_error(&e) {
                Some(tls) if is_unknown_authority(tls) => {
                    Ok(TrustCheck::UnknownAuthority(tls.to_string()))
                }
                Some(tls) => Err(Error::network(
                    endpoint,
                    format!("TLS verification failed: {tls}"),
                )),
                None => Err(Error::network(endpoint, e.to_string())),
            },
        }
    }

    async fn fetch_peer_certificate(&self, endpoint: &Url) -> Result<Vec<u8>> {
        let provider = crypto_provider();
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Certificate(format!("Unsupported TLS configuration: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new(provider)))
            .with_no_client_auth();

        let stream = self
            .handshake(endpoint, config)
            .await?
            .map_err(|e| Error::network(endpoint, e.to_string()))?;
        let (_, session) = stream.get_ref();
        session
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|cert| cert.as_ref().to_vec())
            .ok_or_else(|| Error::Certificate(format!("{endpoint} presented no certificate")))
    }
}
