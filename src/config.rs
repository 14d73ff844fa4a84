//! Session configuration resolved from the environment.
//!
//! The endpoint and token come from `GRPC_ENDPOINT` and `GRPC_TOKEN`; the
//! address lists and update handler come from the caller. Resolution never
//! touches the network.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Uri;

use crate::stream::filter::AddressFilters;
use crate::stream::proto::{CommitmentLevel, SubscribeUpdate};
use crate::stream::session::UpdateHandler;

/// Environment variable holding the endpoint URL.
pub const ENDPOINT_ENV: &str = "GRPC_ENDPOINT";
/// Environment variable holding the auth token. Must be set; may be empty.
pub const TOKEN_ENV: &str = "GRPC_TOKEN";
/// Optional environment variable selecting the commitment level.
pub const COMMITMENT_ENV: &str = "GRPC_COMMITMENT";

/// Transport security used for the connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportSecurity {
    /// Cleartext HTTP/2.
    Plaintext,
    /// TLS verified against the system trust store.
    Tls,
}

impl TransportSecurity {
    fn scheme(self) -> &'static str {
        match self {
            TransportSecurity::Plaintext => "http",
            TransportSecurity::Tls => "https",
        }
    }
}

/// Errors raised while resolving a [`SessionConfig`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing {0} environment variable")]
    Missing(&'static str),

    /// A required variable is set but blank.
    #[error("empty {0} environment variable")]
    Empty(&'static str),

    /// The endpoint is not of the form `http(s)://<host>[:<port>]`.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The token cannot be carried in gRPC metadata.
    #[error("auth token contains characters not allowed in request metadata")]
    InvalidToken,

    /// Unknown commitment level name.
    #[error("invalid commitment level {0:?}, expected processed, confirmed or finalized")]
    InvalidCommitment(String),
}

/// Everything a subscription session needs before it connects.
pub struct SessionConfig {
    pub(crate) endpoint: Uri,
    pub(crate) security: TransportSecurity,
    pub(crate) token: SecretString,
    pub(crate) filters: AddressFilters,
    pub(crate) commitment: Option<CommitmentLevel>,
    pub(crate) handler: Option<UpdateHandler>,
}

impl SessionConfig {
    /// Resolves the configuration from the process environment.
    pub fn from_env(filters: AddressFilters) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), filters)
    }

    /// Resolves the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F, filters: AddressFilters) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_endpoint = lookup(ENDPOINT_ENV).ok_or(ConfigError::Missing(ENDPOINT_ENV))?;
        if raw_endpoint.trim().is_empty() {
            return Err(ConfigError::Empty(ENDPOINT_ENV));
        }
        let (endpoint, security) = parse_endpoint(raw_endpoint.trim())?;

        let token = lookup(TOKEN_ENV).ok_or(ConfigError::Missing(TOKEN_ENV))?;
        validate_token(&token)?;

        let commitment = match lookup(COMMITMENT_ENV) {
            Some(name) if !name.trim().is_empty() => Some(
                CommitmentLevel::from_name(&name).ok_or(ConfigError::InvalidCommitment(name))?,
            ),
            _ => None,
        };

        Ok(Self {
            endpoint,
            security,
            token: SecretString::new(token),
            filters,
            commitment,
            handler: None,
        })
    }

    /// Overrides the transport security derived from the endpoint scheme.
    pub fn with_transport_security(mut self, security: TransportSecurity) -> Self {
        if security != self.security {
            self.endpoint = with_scheme(&self.endpoint, security);
            self.security = security;
        }
        self
    }

    /// Sets the commitment level requested from the server.
    pub fn with_commitment(mut self, commitment: CommitmentLevel) -> Self {
        self.commitment = Some(commitment);
        self
    }

    /// Registers the handler invoked for every received update.
    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: FnMut(SubscribeUpdate) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Endpoint that will be dialed.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Transport security used for the connection.
    pub fn security(&self) -> TransportSecurity {
        self.security
    }

    /// Address lists the subscription is scoped to.
    pub fn filters(&self) -> &AddressFilters {
        &self.filters
    }

    /// Commitment level requested from the server, if any.
    pub fn commitment(&self) -> Option<CommitmentLevel> {
        self.commitment
    }

    /// Returns true when an auth token will be attached to the stream.
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().is_empty()
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("security", &self.security)
            .field("token", &"[REDACTED]")
            .field("filters", &self.filters)
            .field("commitment", &self.commitment)
            .field("handler", &self.handler.as_ref().map(|_| "FnMut(SubscribeUpdate)"))
            .finish()
    }
}

fn parse_endpoint(raw: &str) -> Result<(Uri, TransportSecurity), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = raw
        .parse()
        .map_err(|_| invalid("expected URL format e.g. http(s)://<endpoint>:<port>"))?;
    let security = match uri.scheme_str() {
        Some("http") => TransportSecurity::Plaintext,
        Some("https") => TransportSecurity::Tls,
        Some(_) => return Err(invalid("scheme must be http or https")),
        None => return Err(invalid("expected URL format e.g. http(s)://<endpoint>:<port>")),
    };
    if uri.host().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    let authority = uri
        .authority()
        .ok_or_else(|| invalid("missing host"))?
        .as_str();

    // The RPC path is fixed by the protocol, so only scheme and authority are kept.
    let endpoint = format!("{}://{}", security.scheme(), authority)
        .parse()
        .map_err(|_| invalid("malformed authority"))?;
    Ok((endpoint, security))
}

fn with_scheme(endpoint: &Uri, security: TransportSecurity) -> Uri {
    let authority = endpoint.authority().map(|a| a.as_str()).unwrap_or_default();
    format!("{}://{}", security.scheme(), authority)
        .parse()
        .unwrap_or_else(|_| endpoint.clone())
}

fn validate_token(token: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Ok(());
    }
    AsciiMetadataValue::try_from(token)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidToken)
}
