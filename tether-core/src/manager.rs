//! Broker session lifecycle, publishing, and subscription management.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::EventDispatcher;
use crate::error::{ConnectError, PublishError, SubscribeError, TransportError};
use crate::events::{DeliveryToken, InboundMessage};
use crate::handlers::{HandlerRegistry, HandlerResult};
use crate::session::{ConnectionState, Session};
use crate::transport::{Transport, TransportListener};

/// State shared between the manager and its event dispatcher.
pub(crate) struct SessionShared {
    /// Current lifecycle state. This mutex is the single serialization
    /// point between application calls and transport-driven transitions,
    /// so an application `close` and a connection loss cannot both tear
    /// down the same session.
    pub(crate) state: Mutex<ConnectionState>,
    /// Registered application handlers.
    pub(crate) handlers: HandlerRegistry,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            handlers: HandlerRegistry::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Manages one broker session end to end.
///
/// The manager owns its transport: controller operations (`open`,
/// `reconnect`, `close`) and outbound traffic serialize on it, while
/// inbound events are routed by an internal dispatcher that shares the
/// state mutex with the controller. Handlers are replaceable at any time
/// and their failures never travel past the dispatcher.
pub struct SessionManager {
    /// The owned broker connection.
    transport: tokio::sync::Mutex<Box<dyn Transport>>,

    /// State and handlers shared with the event dispatcher.
    shared: Arc<SessionShared>,

    /// Listener registered with the transport at connect time.
    dispatcher: Arc<EventDispatcher>,

    /// Configuration of the current or last-opened session.
    config: Mutex<Option<SessionConfig>>,

    /// Topics successfully registered in the current session.
    subscriptions: Mutex<BTreeSet<String>>,
}

impl SessionManager {
    /// Create a manager around a transport. No connection is attempted.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let shared = Arc::new(SessionShared::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&shared)));
        Self {
            transport: tokio::sync::Mutex::new(transport),
            shared,
            dispatcher,
            config: Mutex::new(None),
            subscriptions: Mutex::new(BTreeSet::new()),
        }
    }

    /// Create a manager and connect immediately.
    ///
    /// A failed attempt is logged rather than returned; the manager comes
    /// back `Disconnected` and can be opened again later.
    pub async fn connect(
        transport: Box<dyn Transport>,
        username: impl Into<String>,
        credential: impl Into<Vec<u8>>,
        server_uri: impl Into<String>,
    ) -> Self {
        let manager = Self::new(transport);
        let config = SessionConfig::new(server_uri).with_credentials(username, credential);
        if let Err(e) = manager.open(config).await {
            error!(error = %e, "Initial broker connection failed");
        }
        manager
    }

    /// Open a session with the given configuration.
    ///
    /// A manager holds at most one live connection, so any currently
    /// connected session is torn down first (best effort). On success the
    /// tracked subscription set resets and a [`Session`] receipt comes
    /// back; on failure the manager is left `Disconnected` with the
    /// config retained, so `reconnect` can retry the same session.
    pub async fn open(&self, config: SessionConfig) -> Result<Session, ConnectError> {
        if config.server_uri.is_empty() {
            return Err(ConnectError::InvalidConfig("server_uri is empty".to_string()));
        }

        let mut transport = self.transport.lock().await;

        if self.shared.state() == ConnectionState::Connected || transport.is_connected() {
            info!("Tearing down existing session before opening a new one");
            if let Err(e) = transport.disconnect().await {
                warn!(error = %e, "Disconnect of previous session failed");
            }
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Release of previous session failed");
            }
        }

        self.shared.set_state(ConnectionState::Connecting);
        *self.config.lock().unwrap() = Some(config.clone());
        self.subscriptions.lock().unwrap().clear();

        info!(
            client_id = %config.client_id,
            server_uri = %config.server_uri,
            "Opening broker session"
        );

        let listener = Arc::clone(&self.dispatcher) as Arc<dyn TransportListener>;
        match transport.connect(&config, listener).await {
            Ok(()) => {
                self.shared.set_state(ConnectionState::Connected);
                info!(client_id = %config.client_id, "Broker session established");
                Ok(Session {
                    client_id: config.client_id,
                    server_uri: config.server_uri,
                    connected_at: Utc::now(),
                })
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                error!(error = %e, "Failed to open broker session");
                Err(e.into())
            }
        }
    }

    /// Resume a dropped session with the same configuration and client id.
    ///
    /// A logged no-op when already connected, when no session was ever
    /// opened, or after `close`. Failure leaves the manager
    /// `Disconnected` and eligible for another attempt. Subscriptions are
    /// not re-established; use [`SessionManager::subscriptions`] from
    /// before the drop to re-register what the application needs.
    pub async fn reconnect(&self) {
        let mut transport = self.transport.lock().await;

        if self.shared.state() == ConnectionState::Connected && transport.is_connected() {
            debug!("Already connected, skipping reconnect");
            return;
        }
        if self.shared.state() == ConnectionState::Closed {
            warn!("Session is closed; open a new session instead of reconnecting");
            return;
        }
        let Some(client_id) = self.client_id() else {
            warn!("No session to reconnect; call open first");
            return;
        };

        self.shared.set_state(ConnectionState::Connecting);
        info!(client_id = %client_id, "Reconnecting to broker");

        match transport.reconnect().await {
            Ok(()) => {
                self.shared.set_state(ConnectionState::Connected);
                info!(client_id = %client_id, "Reconnected to broker");
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                error!(error = %e, "Reconnect failed");
            }
        }
    }

    /// Close the session and release the transport's resources.
    ///
    /// Idempotent: only a `Connected` session is torn down, and calling
    /// this while `Disconnected` or `Closed` has no effect. Resources are
    /// released even when the disconnect handshake fails.
    pub async fn close(&self) {
        let mut transport = self.transport.lock().await;

        // Claim the transition under the state mutex so a racing
        // connection-loss dispatch sees the session as already closed.
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != ConnectionState::Connected {
                debug!(state = %*state, "Close called with no connected session");
                return;
            }
            *state = ConnectionState::Closed;
        }

        info!("Closing broker session");
        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "Disconnect failed during close, releasing anyway");
        }
        if let Err(e) = transport.close().await {
            error!(error = %e, "Failed to release transport resources");
        }
    }

    /// Whether the manager currently holds a live broker connection.
    ///
    /// True only when the session state is `Connected` and the transport
    /// confirms the link is up.
    pub async fn is_connected(&self) -> bool {
        if self.shared.state() != ConnectionState::Connected {
            return false;
        }
        self.transport.lock().await.is_connected()
    }

    /// Publish a payload to a topic, fire-and-forget.
    ///
    /// Returns `true` when the transport accepted the hand-off. Failures
    /// (not connected, transport rejection) are logged and reported as
    /// `false`; nothing is retried and no error crosses this boundary.
    pub async fn send(&self, topic: &str, payload: impl AsRef<[u8]>) -> bool {
        match self.try_send(topic, payload.as_ref()).await {
            Ok(()) => {
                debug!(topic = %topic, "Published message");
                true
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Publish failed");
                false
            }
        }
    }

    async fn try_send(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut transport = self.transport.lock().await;
        if self.shared.state() != ConnectionState::Connected || !transport.is_connected() {
            return Err(PublishError::NotConnected);
        }
        transport.publish(topic, payload).await?;
        Ok(())
    }

    /// Register subscriptions at at-most-once delivery.
    ///
    /// Returns `false` for an empty topic list (the transport is not
    /// contacted), when not connected, or when any registration fails.
    /// Registrations made before a failure stay in place; there is no
    /// rollback. Subscriptions are not re-established by `reconnect`.
    pub async fn subscribe(&self, topics: &[&str]) -> bool {
        match self.try_subscribe(topics).await {
            Ok(()) => {
                debug!(count = topics.len(), "Subscribed to topics");
                true
            }
            Err(e) => {
                error!(error = %e, "Subscribe failed");
                false
            }
        }
    }

    async fn try_subscribe(&self, topics: &[&str]) -> Result<(), SubscribeError> {
        if topics.is_empty() {
            return Err(SubscribeError::NoTopics);
        }

        let mut transport = self.transport.lock().await;
        if self.shared.state() != ConnectionState::Connected || !transport.is_connected() {
            return Err(SubscribeError::NotConnected);
        }

        for topic in topics {
            transport
                .subscribe(topic)
                .await
                .map_err(|source| SubscribeError::Topic {
                    topic: (*topic).to_string(),
                    source,
                })?;
            self.subscriptions.lock().unwrap().insert((*topic).to_string());
        }
        Ok(())
    }

    /// Install the handler for arriving messages, replacing any previous one.
    pub fn set_message_arrived_handler<F>(&self, handler: F)
    where
        F: Fn(&InboundMessage) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.handlers.set_message_arrived(Arc::new(handler));
    }

    /// Install the handler for connection loss, replacing any previous one.
    pub fn set_connection_lost_handler<F>(&self, handler: F)
    where
        F: Fn(&TransportError) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.handlers.set_connection_lost(Arc::new(handler));
    }

    /// Install the handler for delivery completions, replacing any previous one.
    pub fn set_delivery_complete_handler<F>(&self, handler: F)
    where
        F: Fn(DeliveryToken) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.handlers.set_delivery_complete(Arc::new(handler));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Configuration of the current session, if one was opened.
    pub fn config(&self) -> Option<SessionConfig> {
        self.config.lock().unwrap().clone()
    }

    /// Topics registered in the current session, in lexical order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().iter().cloned().collect()
    }

    fn client_id(&self) -> Option<String> {
        self.config
            .lock()
            .unwrap()
            .as_ref()
            .map(|config| config.client_id.clone())
    }
}
