//! Rust client for Geyser gRPC account and transaction subscriptions.
//!
//! The crate is organized by concern:
//! - `config`: endpoint, token and commitment resolved from the environment.
//! - `stream`: gRPC transport, filter payload, wire messages and the
//!   subscription session.

/// Session configuration resolver.
pub mod config;
/// Subscription stream client, protocol types, and session lifecycle.
pub mod stream;

pub use config::{ConfigError, SessionConfig, TransportSecurity};
pub use stream::client::{GrpcConnector, SubscribeError};
pub use stream::filter::AddressFilters;
pub use stream::proto::{CommitmentLevel, SubscribeUpdate};
pub use stream::session::{SessionHandle, SessionState, SubscriptionSession, UpdateHandler};
