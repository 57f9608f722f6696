//! tether-core: session management for pub/sub broker connections
//!
//! This crate sits between an application and a message broker and keeps
//! the messy parts in one place:
//!
//! - **Connection lifecycle** - [`SessionManager`] opens, reconnects, and
//!   closes sessions against a [`Transport`] it owns
//! - **Publishing** - fire-and-forget `send` with a boolean outcome;
//!   failures are logged, never thrown
//! - **Subscriptions** - at-most-once topic registration with explicit
//!   partial-failure semantics
//! - **Event dispatch** - inbound broker events routed to replaceable
//!   handlers, with handler errors and panics confined per dispatch
//! - **Loopback transport** - [`LoopbackTransport`] plays the broker
//!   in-process for tests and local development
//!
//! # Quick Start
//!
//! ```no_run
//! use tether_core::{LoopbackTransport, SessionConfig, SessionManager};
//!
//! # async fn example() -> Result<(), tether_core::ConnectError> {
//! let manager = SessionManager::new(Box::new(LoopbackTransport::new()));
//!
//! manager.set_message_arrived_handler(|message| {
//!     println!("{}: {}", message.topic, message.payload_lossy());
//!     Ok(())
//! });
//!
//! let session = manager.open(SessionConfig::new("tcp://localhost:1883")).await?;
//! println!("connected as {}", session.client_id);
//!
//! manager.subscribe(&["sensors/#"]).await;
//! manager.send("sensors/hall", b"21.5").await;
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod loopback;
pub mod manager;
pub mod session;
pub mod transport;

mod dispatch;

// Re-export key types for convenience
pub use config::SessionConfig;
pub use error::{ConnectError, PublishError, SubscribeError, TransportError};
pub use events::{DeliveryToken, InboundEvent, InboundMessage};
pub use handlers::{HandlerRegistry, HandlerResult};
pub use loopback::{LoopbackHandle, LoopbackTransport};
pub use manager::SessionManager;
pub use session::{ConnectionState, Session};
pub use transport::{Transport, TransportListener};
