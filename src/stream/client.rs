//! gRPC transport for the subscription stream.
//!
//! [`Connector`] dials the endpoint and [`SubscribeTransport`] opens the
//! bidirectional stream. [`GrpcConnector`] is the tonic-backed pair used in
//! production; tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{future, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};
use tonic::{Request, Status};
use tracing::info;

use crate::config::{ConfigError, SessionConfig, TransportSecurity};
use crate::stream::proto::geyser_client::GeyserClient;
use crate::stream::proto::{SubscribeRequest, SubscribeUpdate};

/// Metadata key carrying the auth token.
pub const TOKEN_METADATA_KEY: &str = "x-token";
/// Upper bound on a single decoded update.
pub const MAX_DECODING_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Outbound half of the subscription stream.
pub type OutboundStream = BoxStream<'static, SubscribeRequest>;
/// Inbound half of the subscription stream.
pub type UpdateStream = BoxStream<'static, Result<SubscribeUpdate, Status>>;

/// Boxed error for transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// HTTP/2 keepalive settings applied to every connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeepalivePolicy {
    /// Idle time after which a ping is sent.
    pub interval: Duration,
    /// Time to wait for a ping ack before the connection is considered dead.
    pub timeout: Duration,
    /// Whether pings are sent while no request is in flight.
    pub while_idle: bool,
}

/// Keepalive used for all subscription connections.
pub const KEEPALIVE: KeepalivePolicy = KeepalivePolicy {
    interval: Duration::from_secs(10),
    timeout: Duration::from_secs(1),
    while_idle: true,
};

/// Everything needed to dial the endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectSettings {
    /// Scheme and authority to dial.
    pub endpoint: Uri,
    /// Plaintext or TLS.
    pub security: TransportSecurity,
    /// HTTP/2 keepalive applied to the connection.
    pub keepalive: KeepalivePolicy,
}

impl ConnectSettings {
    /// Extracts dial settings from a resolved configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            endpoint: config.endpoint().clone(),
            security: config.security(),
            keepalive: KEEPALIVE,
        }
    }
}

/// Errors produced while running a subscription.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// Configuration problem detected after the session was built.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The endpoint could not be dialed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// The stream could not be opened or failed mid-way.
    #[error("subscription stream error: {0}")]
    Stream(#[from] Status),

    /// The subscribe request could not be serialized for logging.
    #[error("failed to serialize subscribe request: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SubscribeError {
    pub(crate) fn connection(endpoint: &Uri, source: impl Into<BoxError>) -> Self {
        SubscribeError::Connection {
            endpoint: endpoint.to_string(),
            source: source.into(),
        }
    }
}

/// Dials the subscription endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connection produced by a successful dial.
    type Transport: SubscribeTransport;

    /// Dials the endpoint described by `settings`.
    async fn connect(&self, settings: &ConnectSettings) -> Result<Self::Transport, SubscribeError>;
}

/// An established connection able to open the subscription stream.
#[async_trait]
pub trait SubscribeTransport: Send {
    /// Sends `request` and returns the inbound update stream.
    async fn open_subscription(
        &mut self,
        request: Request<OutboundStream>,
    ) -> Result<UpdateStream, Status>;
}

/// Tonic-backed connector.
#[derive(Clone, Copy, Debug, Default)]
pub struct GrpcConnector;

#[async_trait]
impl Connector for GrpcConnector {
    type Transport = GeyserClient<Channel>;

    async fn connect(&self, settings: &ConnectSettings) -> Result<Self::Transport, SubscribeError> {
        info!(
            event = "grpc_connect",
            endpoint = %settings.endpoint,
            security = ?settings.security
        );
        let channel = build_endpoint(settings)
            .map_err(|err| SubscribeError::connection(&settings.endpoint, err))?
            .connect()
            .await
            .map_err(|err| SubscribeError::connection(&settings.endpoint, err))?;

        Ok(GeyserClient::new(channel).max_decoding_message_size(MAX_DECODING_MESSAGE_SIZE))
    }
}

#[async_trait]
impl SubscribeTransport for GeyserClient<Channel> {
    async fn open_subscription(
        &mut self,
        request: Request<OutboundStream>,
    ) -> Result<UpdateStream, Status> {
        let response = self.subscribe(request).await?;
        Ok(response.into_inner().boxed())
    }
}

/// Builds the tonic endpoint with keepalive and transport security applied.
pub fn build_endpoint(settings: &ConnectSettings) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from(settings.endpoint.clone())
        .http2_keep_alive_interval(settings.keepalive.interval)
        .keep_alive_timeout(settings.keepalive.timeout)
        .keep_alive_while_idle(settings.keepalive.while_idle);

    match settings.security {
        TransportSecurity::Plaintext => Ok(endpoint),
        TransportSecurity::Tls => endpoint.tls_config(ClientTlsConfig::new().with_native_roots()),
    }
}

/// Wraps the subscribe request into the outbound stream request.
///
/// The outbound half yields `payload` once and then stays open, so the
/// server never sees a half-close. A non-empty token is attached as
/// [`TOKEN_METADATA_KEY`].
pub fn subscribe_request(
    payload: SubscribeRequest,
    token: &SecretString,
) -> Result<Request<OutboundStream>, ConfigError> {
    let outbound = stream::once(future::ready(payload))
        .chain(stream::pending())
        .boxed();
    let mut request = Request::new(outbound);

    let token = token.expose_secret();
    if !token.is_empty() {
        let mut value =
            AsciiMetadataValue::try_from(token.as_str()).map_err(|_| ConfigError::InvalidToken)?;
        value.set_sensitive(true);
        request.metadata_mut().insert(TOKEN_METADATA_KEY, value);
    }

    Ok(request)
}
