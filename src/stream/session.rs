//! Subscription session lifecycle.
//!
//! A [`SubscriptionSession`] owns one connection and one stream. `run` sends
//! the filter payload, then hands every received update to the handler on the
//! same task, one at a time, until the stream ends, fails, or the session is
//! closed through its [`SessionHandle`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigError, SessionConfig};
use crate::stream::client::{
    subscribe_request, ConnectSettings, Connector, GrpcConnector, SubscribeError,
    SubscribeTransport, UpdateStream,
};
use crate::stream::filter::{build_subscribe_request, render_subscribe_request, AddressFilters};
use crate::stream::proto::SubscribeUpdate;

/// Callback invoked synchronously for every received update.
pub type UpdateHandler = Box<dyn FnMut(SubscribeUpdate) + Send>;

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Built, not yet connected.
    Idle,
    /// Connection established, stream not yet open.
    Connected,
    /// Filter sent, receiving updates.
    Streaming,
    /// Terminal. Reached on every exit path of `run`.
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Connected,
            2 => SessionState::Streaming,
            _ => SessionState::Closed,
        }
    }
}

/// Shareable handle used to observe and close a running session.
///
/// Cloning is cheap; all clones refer to the same session.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    closed: AtomicBool,
    state: AtomicU8,
    notify: Notify,
}

impl SessionHandle {
    /// Requests the session to stop. Safe to call from any task or thread;
    /// repeated calls have no further effect.
    ///
    /// A receive that is already waiting is abandoned, so `run` returns
    /// without waiting for the next message.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_one();
        }
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Current lifecycle state of the session.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
        debug!(event = "session_state", state = ?state);
    }

    async fn closed(&self) {
        // `notify_one` leaves a permit when nobody is waiting, so a close that
        // lands between the check and the await is not lost.
        while !self.is_closed() {
            self.inner.notify.notified().await;
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.is_closed())
            .field("state", &self.state())
            .finish()
    }
}

/// Marks the session closed when `run` unwinds through any exit path.
struct ClosedOnDrop<'a>(&'a SessionHandle);

impl Drop for ClosedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_state(SessionState::Closed);
    }
}

/// One subscription over one connection.
pub struct SubscriptionSession<C = GrpcConnector> {
    config: SessionConfig,
    connector: C,
    handle: SessionHandle,
}

impl SubscriptionSession<GrpcConnector> {
    /// Resolves configuration from the environment and builds a session.
    pub fn new<H>(
        accounts: Vec<String>,
        owners: Vec<String>,
        signers: Vec<String>,
        handler: H,
    ) -> Result<Self, ConfigError>
    where
        H: FnMut(SubscribeUpdate) + Send + 'static,
    {
        let filters = AddressFilters::new(accounts, owners, signers);
        let config = SessionConfig::from_env(filters)?.with_handler(handler);
        Ok(Self::from_config(config))
    }

    /// Builds a session that dials with tonic.
    pub fn from_config(config: SessionConfig) -> Self {
        Self::with_connector(config, GrpcConnector)
    }
}

impl<C> SubscriptionSession<C>
where
    C: Connector,
{
    /// Builds a session around a custom connector.
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            handle: SessionHandle::default(),
        }
    }

    /// Returns a handle that can close the session while `run` is pending.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Requests the session to stop. See [`SessionHandle::close`].
    pub fn close(&self) {
        self.handle.close();
    }

    /// Configuration the session will run with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connects, subscribes and dispatches updates until the session ends.
    ///
    /// Returns `Ok(())` when the server ends the stream cleanly or the session
    /// is closed; any other termination is returned as an error. The
    /// connection is released before this returns.
    pub async fn run(self) -> Result<(), SubscribeError> {
        let Self {
            config,
            connector,
            handle,
        } = self;
        let _closed_on_exit = ClosedOnDrop(&handle);
        let settings = ConnectSettings::from_config(&config);
        let SessionConfig {
            token,
            filters,
            commitment,
            mut handler,
            ..
        } = config;

        let payload = build_subscribe_request(&filters, commitment);
        let rendered = render_subscribe_request(&payload)?;
        info!(event = "subscribe_request", request = %rendered);

        if handle.is_closed() {
            info!(event = "subscription_closed", reason = "closed_before_connect");
            return Ok(());
        }

        let mut transport = connector.connect(&settings).await?;
        handle.set_state(SessionState::Connected);

        let request = subscribe_request(payload, &token)?;
        let mut updates = transport.open_subscription(request).await?;
        handle.set_state(SessionState::Streaming);
        info!(event = "subscription_opened", endpoint = %settings.endpoint);

        let outcome = receive_updates(&mut updates, &mut handler, &handle).await;

        drop(updates);
        drop(transport);
        outcome
    }
}

impl<C> fmt::Debug for SubscriptionSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("config", &self.config)
            .field("handle", &self.handle)
            .finish()
    }
}

async fn receive_updates(
    updates: &mut UpdateStream,
    handler: &mut Option<UpdateHandler>,
    handle: &SessionHandle,
) -> Result<(), SubscribeError> {
    let mut delivered: u64 = 0;

    loop {
        if handle.is_closed() {
            info!(event = "subscription_closed", reason = "close_requested", delivered);
            return Ok(());
        }

        let next = tokio::select! {
            biased;
            _ = handle.closed() => continue,
            next = updates.next() => next,
        };

        match next {
            Some(Ok(update)) => {
                delivered += 1;
                trace!(event = "update_received", kind = update.kind(), delivered);
                if let Some(handler) = handler.as_mut() {
                    handler(update);
                }
            }
            Some(Err(status)) => {
                warn!(
                    event = "subscription_failed",
                    code = ?status.code(),
                    message = status.message(),
                    delivered
                );
                return Err(SubscribeError::Stream(status));
            }
            None => {
                info!(event = "subscription_ended", delivered);
                return Ok(());
            }
        }
    }
}
