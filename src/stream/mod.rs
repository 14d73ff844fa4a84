//! Subscription stream modules.
//!
//! - `client`: gRPC connection, keepalive, auth metadata, and errors.
//! - `filter`: subscribe request construction from address lists.
//! - `proto`: wire messages and the `geyser.Geyser` client stub.
//! - `session`: the receive loop and cooperative shutdown.

/// gRPC connector and transport seam.
pub mod client;
/// Filter payload construction.
pub mod filter;
/// Wire protocol messages.
pub mod proto;
/// Subscription session lifecycle.
pub mod session;
