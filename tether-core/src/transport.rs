//! Transport seam between the session manager and a concrete broker client.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::events::{DeliveryToken, InboundMessage};

/// Receiver for events originated by the transport.
///
/// The session manager registers one listener at connect time and the
/// transport invokes it from its own tasks, at any time relative to
/// application calls. Implementations must stay cheap and must not panic;
/// long-running work belongs in spawned tasks.
pub trait TransportListener: Send + Sync {
    /// A message arrived on a subscribed topic.
    fn message_arrived(&self, message: InboundMessage);

    /// The connection dropped without an application `disconnect`.
    fn connection_lost(&self, cause: TransportError);

    /// The transport finished handing off a published message.
    fn delivery_complete(&self, token: DeliveryToken);
}

/// A broker connection owned by the session manager.
///
/// One transport carries at most one live connection at a time. The
/// manager serializes all calls, so implementations only need the locking
/// their client library demands.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection and register the listener for inbound
    /// events. Resolves once the broker accepted the session or the
    /// attempt failed.
    async fn connect(
        &mut self,
        config: &SessionConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), TransportError>;

    /// Re-establish the connection from the last `connect`, keeping the
    /// same configuration and client id. Fails if `connect` never ran.
    async fn reconnect(&mut self) -> Result<(), TransportError>;

    /// Publish a payload to a topic. At-most-once hand-off; completion is
    /// reported through [`TransportListener::delivery_complete`].
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Register a subscription at at-most-once quality of service.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Drop the connection cleanly. The transport stays usable for a
    /// later `connect` or `reconnect`.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Release the resources of the current session: background tasks,
    /// sockets, client handles. A later `connect` starts from scratch.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the transport currently holds a live connection.
    fn is_connected(&self) -> bool;
}
