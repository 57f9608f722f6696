//! Application handler registration.

use std::sync::{Arc, RwLock};

use crate::error::TransportError;
use crate::events::{DeliveryToken, InboundMessage};

/// Outcome of one handler invocation. Errors are logged and isolated by
/// the dispatcher; they never reach the transport.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Handler for messages arriving on subscribed topics.
pub type MessageArrivedHandler = dyn Fn(&InboundMessage) -> HandlerResult + Send + Sync;

/// Handler for connection loss outside an application `close`.
pub type ConnectionLostHandler = dyn Fn(&TransportError) -> HandlerResult + Send + Sync;

/// Handler for delivery completion notifications.
pub type DeliveryCompleteHandler = dyn Fn(DeliveryToken) -> HandlerResult + Send + Sync;

/// One replaceable handler slot per inbound event kind.
///
/// Registration is last-write-wins and may happen at any time, including
/// while dispatches are in flight; a dispatch that already cloned out the
/// previous handler finishes with it. Dispatch clones the `Arc` under a
/// read lock and invokes outside of it, so a handler may re-register
/// handlers (even itself) without deadlocking.
#[derive(Default)]
pub struct HandlerRegistry {
    message_arrived: RwLock<Option<Arc<MessageArrivedHandler>>>,
    connection_lost: RwLock<Option<Arc<ConnectionLostHandler>>>,
    delivery_complete: RwLock<Option<Arc<DeliveryCompleteHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the message-arrived handler.
    pub fn set_message_arrived(&self, handler: Arc<MessageArrivedHandler>) {
        *self.message_arrived.write().unwrap() = Some(handler);
    }

    /// Replace the connection-lost handler.
    pub fn set_connection_lost(&self, handler: Arc<ConnectionLostHandler>) {
        *self.connection_lost.write().unwrap() = Some(handler);
    }

    /// Replace the delivery-complete handler.
    pub fn set_delivery_complete(&self, handler: Arc<DeliveryCompleteHandler>) {
        *self.delivery_complete.write().unwrap() = Some(handler);
    }

    /// Current message-arrived handler, if any.
    pub fn message_arrived(&self) -> Option<Arc<MessageArrivedHandler>> {
        self.message_arrived.read().unwrap().clone()
    }

    /// Current connection-lost handler, if any.
    pub fn connection_lost(&self) -> Option<Arc<ConnectionLostHandler>> {
        self.connection_lost.read().unwrap().clone()
    }

    /// Current delivery-complete handler, if any.
    pub fn delivery_complete(&self) -> Option<Arc<DeliveryCompleteHandler>> {
        self.delivery_complete.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::events::InboundMessage;

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.message_arrived().is_none());
        assert!(registry.connection_lost().is_none());
        assert!(registry.delivery_complete().is_none());
    }

    #[test]
    fn set_handler_makes_it_visible() {
        let registry = HandlerRegistry::new();
        registry.set_message_arrived(Arc::new(|_| Ok(())));
        assert!(registry.message_arrived().is_some());
    }

    #[test]
    fn last_registered_handler_wins() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));

        registry.set_message_arrived(Arc::new(|_| {
            panic!("replaced handler must never run");
        }));

        let counter = Arc::clone(&calls);
        registry.set_message_arrived(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let handler = registry.message_arrived().unwrap();
        handler(&InboundMessage::new("t", vec![])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_replace_itself_during_invocation() {
        let registry = Arc::new(HandlerRegistry::new());

        let inner = Arc::clone(&registry);
        registry.set_message_arrived(Arc::new(move |_| {
            inner.set_message_arrived(Arc::new(|_| Ok(())));
            Ok(())
        }));

        // Cloned out before invocation, so re-registration cannot deadlock.
        let handler = registry.message_arrived().unwrap();
        handler(&InboundMessage::new("t", vec![])).unwrap();
        assert!(registry.message_arrived().is_some());
    }

    #[test]
    fn replacement_races_with_concurrent_reads() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.set_delivery_complete(Arc::new(|_| Ok(())));

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    registry.set_delivery_complete(Arc::new(|_| Ok(())));
                }
            })
        };

        for _ in 0..1000 {
            if let Some(handler) = registry.delivery_complete() {
                handler(crate::events::DeliveryToken(7)).unwrap();
            }
        }

        writer.join().unwrap();
        assert!(registry.delivery_complete().is_some());
    }
}
