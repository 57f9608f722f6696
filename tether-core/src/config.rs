//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration for one broker session.
///
/// Values are fixed once the session is opened: `reconnect` reuses the
/// same configuration, including the client id. Opening a new session
/// takes a new config (and, unless overridden, a freshly generated id).
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Broker endpoint, e.g. `tcp://localhost:1883`.
    pub server_uri: String,

    /// Client identifier presented to the broker. Generated when not set,
    /// so concurrent sessions never collide.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Username presented to the broker; empty for anonymous access.
    #[serde(default)]
    pub username: String,

    /// Secret presented alongside the username. Redacted from `Debug`
    /// output so it cannot leak through logs.
    #[serde(default)]
    pub credential: Vec<u8>,

    /// Keep-alive interval negotiated with the broker.
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_client_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

impl SessionConfig {
    /// Create a config for the given broker endpoint with a generated
    /// client id and default keep-alive.
    #[must_use]
    pub fn new(server_uri: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            client_id: default_client_id(),
            username: String::new(),
            credential: Vec::new(),
            keep_alive: default_keep_alive(),
        }
    }

    /// Create a new config with a custom client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Create a new config with broker credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        credential: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = username.into();
        self.credential = credential.into();
        self
    }

    /// Create a new config with a custom keep-alive interval.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("server_uri", &self.server_uri)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}
