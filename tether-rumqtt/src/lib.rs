//! MQTT transport for tether, backed by rumqttc.
//!
//! This crate binds the [`tether_core::Transport`] seam to a real MQTT
//! 3.1.1 broker. The connection is driven by a spawned event loop task
//! that forwards inbound publishes, delivery confirmations, and
//! connection loss to the listener registered at connect time.
//!
//! # Key Types
//!
//! - [`RumqttTransport`] - MQTT implementation of `Transport`
//!
//! # Quick Start
//!
//! ```no_run
//! # async fn example() -> Result<(), tether_core::ConnectError> {
//! use tether_core::{SessionConfig, SessionManager};
//! use tether_rumqtt::RumqttTransport;
//!
//! let manager = SessionManager::new(Box::new(RumqttTransport::new()));
//! let session = manager
//!     .open(SessionConfig::new("tcp://localhost:1883"))
//!     .await?;
//! println!("connected as {}", session.client_id);
//! # Ok(())
//! # }
//! ```

pub mod transport;

mod uri;

// Re-exports
pub use transport::RumqttTransport;
