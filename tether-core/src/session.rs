//! Session state and the receipt returned by a successful open

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a broker session.
///
/// Exactly one state value exists per manager. Transitions are driven by
/// the application (`open`, `reconnect`, `close`) and by the transport
/// (connection loss), serialized through one mutex inside the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live connection; `open` or `reconnect` may establish one.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected to the broker.
    Connected,
    /// Closed by the application. Terminal for the session, not the
    /// manager: `open` starts a fresh session.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Receipt for an established session, returned by `SessionManager::open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Client identifier the broker knows this session by.
    pub client_id: String,
    /// Broker endpoint the session was opened against.
    pub server_uri: String,
    /// When the connection was established.
    pub connected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Disconnected), "disconnected");
        assert_eq!(format!("{}", ConnectionState::Connecting), "connecting");
        assert_eq!(format!("{}", ConnectionState::Connected), "connected");
        assert_eq!(format!("{}", ConnectionState::Closed), "closed");
    }

    #[test]
    fn connection_state_serialization_roundtrip() {
        let state = ConnectionState::Connected;
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("connected"));
        let parsed: ConnectionState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ConnectionState::Connected);
    }

    #[test]
    fn session_serialization_roundtrip() {
        let session = Session {
            client_id: "client-1".to_string(),
            server_uri: "tcp://localhost:1883".to_string(),
            connected_at: Utc::now(),
        };
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }
}
