//! tonic-backed [`EventTransport`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use chainfabric_core::config::PeerConfig;
use chainfabric_core::error::TransportError;
use chainfabric_core::transport::{EventTransport, InboundEvents, OutboundEvents};
use chainfabric_core::wire::{Event, SignedEvent};

/// Fully-qualified method of the peer event service.
pub const CHAT_PATH: &str = "/protos.Events/Chat";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Event transport over a tonic gRPC channel.
///
/// `dial` establishes the channel once and reuses it until `release`.
pub struct GrpcEventTransport {
    config: PeerConfig,
    connect_timeout: Duration,
    channel: Mutex<Option<Channel>>,
}

impl GrpcEventTransport {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel: Mutex::new(None),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn peer(&self) -> &PeerConfig {
        &self.config
    }

    fn endpoint(&self) -> Result<Endpoint, TransportError> {
        let endpoint = Endpoint::from_shared(self.config.endpoint_uri())
            .map_err(|e| TransportError::InvalidUrl {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(Some(KEEPALIVE));

        if !self.config.is_secure() {
            return Ok(endpoint);
        }
        endpoint
            .tls_config(self.tls_config()?)
            .map_err(|e| TransportError::Tls(e.to_string()))
    }

    /// TLS settings: the configured CA as the only trust root, and the
    /// server-name override (or URL host) as the verified name.
    fn tls_config(&self) -> Result<ClientTlsConfig, TransportError> {
        let path = self.config.tls_ca_cert.as_ref().ok_or_else(|| {
            TransportError::Tls(format!("{} needs tls_ca_cert for a TLS connection", self.config.url))
        })?;
        let pem = std::fs::read(path)
            .map_err(|e| TransportError::Tls(format!("reading {}: {e}", path.display())))?;
        let domain = self
            .config
            .server_host_override
            .clone()
            .unwrap_or_else(|| self.config.host().to_string());
        Ok(ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(pem))
            .domain_name(domain))
    }

    fn connect_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Connect {
            url: self.config.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl EventTransport for GrpcEventTransport {
    async fn dial(&self) -> Result<(), TransportError> {
        if self.channel.lock().is_some() {
            return Ok(());
        }
        let endpoint = self.endpoint()?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| self.connect_error(e))?;
        info!(url = %self.config.url, secure = self.config.is_secure(), "connected to peer event service");
        *self.channel.lock() = Some(channel);
        Ok(())
    }

    async fn chat(&self, outbound: OutboundEvents) -> Result<InboundEvents, TransportError> {
        let channel = self
            .channel
            .lock()
            .clone()
            .ok_or_else(|| TransportError::NotConnected {
                url: self.config.url.clone(),
            })?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|e| self.connect_error(e))?;

        let codec: ProstCodec<SignedEvent, Event> = ProstCodec::default();
        let request = tonic::Request::new(UnboundedReceiverStream::new(outbound));
        let response = grpc
            .streaming(request, PathAndQuery::from_static(CHAT_PATH), codec)
            .await
            .map_err(status_error)?;
        debug!(url = %self.config.url, "event stream opened");

        let inbound = response
            .into_inner()
            .map(|item| item.map_err(status_error));
        Ok(Box::pin(inbound))
    }

    async fn release(&self) {
        if self.channel.lock().take().is_some() {
            debug!(url = %self.config.url, "released peer channel");
        }
    }

    fn url(&self) -> &str {
        &self.config.url
    }
}

fn status_error(status: tonic::Status) -> TransportError {
    TransportError::Status {
        code: format!("{:?}", status.code()),
        message: status.message().to_string(),
    }
}
