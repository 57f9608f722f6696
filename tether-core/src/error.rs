//! Error types for tether-core

use thiserror::Error;

/// Errors surfaced by the underlying broker transport.
///
/// Carried inside [`crate::events::InboundEvent::ConnectionLost`], so the
/// type stays cloneable and owns its detail strings.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Broker refused the connection: {0}")]
    ConnectionRefused(String),

    #[error("Not connected to a broker")]
    NotConnected,

    #[error("Connection to broker lost: {0}")]
    ConnectionLost(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Publish rejected by transport: {0}")]
    PublishRejected(String),

    #[error("Subscribe to {topic:?} rejected: {reason}")]
    SubscribeRejected { topic: String, reason: String },

    #[error("Transport is closed")]
    Closed,
}

/// Errors returned by `SessionManager::open`.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors behind the boolean `send` surface.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Cannot publish while disconnected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors behind the boolean `subscribe` surface.
#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error("No topics given")]
    NoTopics,

    #[error("Cannot subscribe while disconnected")]
    NotConnected,

    #[error("Subscribe to {topic:?} failed: {source}")]
    Topic {
        topic: String,
        source: TransportError,
    },
}
