//! Routing of transport events onto application handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::events::InboundEvent;
use crate::handlers::HandlerResult;
use crate::manager::SessionShared;
use crate::session::ConnectionState;
use crate::transport::TransportListener;

/// Routes inbound transport events to the registered handlers.
///
/// Registered with the transport at connect time; only the transport
/// invokes it. Every event kind goes through the same isolation policy:
/// a handler returning `Err` or panicking is logged and confined to that
/// single dispatch, so neither the transport nor the manager state is
/// ever destabilized by application code.
pub(crate) struct EventDispatcher {
    shared: Arc<SessionShared>,
}

impl EventDispatcher {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Route one event to its handler slot.
    fn dispatch(&self, event: InboundEvent) {
        let kind = event.kind();
        match event {
            InboundEvent::MessageArrived(message) => {
                let Some(handler) = self.shared.handlers.message_arrived() else {
                    tracing::error!(
                        topic = %message.topic,
                        payload = %message.payload_lossy(),
                        "Message arrived with no handler registered, dropping"
                    );
                    return;
                };
                if let Some(failure) = run_isolated(kind, || handler(&message)) {
                    tracing::error!(
                        event = kind,
                        topic = %message.topic,
                        payload = %message.payload_lossy(),
                        error = %failure,
                        "Message-arrived handler failed"
                    );
                }
            }
            InboundEvent::ConnectionLost(cause) => {
                // Claim the transition under the state mutex. If an
                // application close already won, this notification is
                // stale and the session stays closed.
                {
                    let mut state = self.shared.state.lock().unwrap();
                    if *state == ConnectionState::Closed {
                        tracing::debug!(cause = %cause, "Connection loss after close, ignoring");
                        return;
                    }
                    *state = ConnectionState::Disconnected;
                }
                tracing::warn!(cause = %cause, "Connection to broker lost");

                match self.shared.handlers.connection_lost() {
                    Some(handler) => {
                        if let Some(failure) = run_isolated(kind, || handler(&cause)) {
                            tracing::error!(
                                event = kind,
                                cause = %cause,
                                error = %failure,
                                "Connection-lost handler failed"
                            );
                        }
                    }
                    None => tracing::debug!("No connection-lost handler registered"),
                }
            }
            InboundEvent::DeliveryComplete(token) => {
                match self.shared.handlers.delivery_complete() {
                    Some(handler) => {
                        if let Some(failure) = run_isolated(kind, || handler(token)) {
                            tracing::error!(
                                event = kind,
                                token = %token,
                                error = %failure,
                                "Delivery-complete handler failed"
                            );
                        }
                    }
                    None => tracing::debug!(token = %token, "Delivery complete, no handler registered"),
                }
            }
        }
    }
}

impl TransportListener for EventDispatcher {
    fn message_arrived(&self, message: crate::events::InboundMessage) {
        self.dispatch(InboundEvent::MessageArrived(message));
    }

    fn connection_lost(&self, cause: crate::error::TransportError) {
        self.dispatch(InboundEvent::ConnectionLost(cause));
    }

    fn delivery_complete(&self, token: crate::events::DeliveryToken) {
        self.dispatch(InboundEvent::DeliveryComplete(token));
    }
}

/// One handler invocation gone wrong: an `Err` return or a panic.
enum HandlerFailure {
    Error(Box<dyn std::error::Error + Send + Sync>),
    Panic,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Panic => write!(f, "handler panicked"),
        }
    }
}

/// Run one handler invocation, containing both errors and panics.
///
/// The failure, if any, comes back to the caller, which logs it with the
/// event context it has in scope.
fn run_isolated(kind: &str, call: impl FnOnce() -> HandlerResult) -> Option<HandlerFailure> {
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {
            tracing::trace!(event = kind, "Handler completed");
            None
        }
        Ok(Err(e)) => Some(HandlerFailure::Error(e)),
        Err(_) => Some(HandlerFailure::Panic),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::TransportError;
    use crate::events::{DeliveryToken, InboundMessage};

    fn dispatcher() -> (EventDispatcher, Arc<SessionShared>) {
        let shared = Arc::new(SessionShared::new());
        (EventDispatcher::new(Arc::clone(&shared)), shared)
    }

    /// Records every emitted event as one "field=value .." line.
    struct CapturingSubscriber {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl tracing::Subscriber for CapturingSubscriber {
        fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            struct Collect<'a>(&'a mut String);

            impl tracing::field::Visit for Collect<'_> {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    use std::fmt::Write;
                    let _ = write!(self.0, "{}={:?} ", field.name(), value);
                }
            }

            let mut line = String::new();
            event.record(&mut Collect(&mut line));
            self.events.lock().unwrap().push(line);
        }

        fn enter(&self, _span: &tracing::span::Id) {}

        fn exit(&self, _span: &tracing::span::Id) {}
    }

    fn capture_events(run: impl FnOnce()) -> Vec<String> {
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let subscriber = CapturingSubscriber {
            events: Arc::clone(&events),
        };
        tracing::subscriber::with_default(subscriber, run);
        let captured = events.lock().unwrap().clone();
        captured
    }

    #[test]
    fn message_arrived_invokes_handler_with_topic_and_payload() {
        let (dispatcher, shared) = dispatcher();
        let seen: Arc<Mutex<Vec<InboundMessage>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        shared.handlers.set_message_arrived(Arc::new(move |message| {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        }));

        dispatcher.message_arrived(InboundMessage::new("sensors/hall", b"21.5".to_vec()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "sensors/hall");
        assert_eq!(seen[0].payload, b"21.5");
    }

    #[test]
    fn message_arrived_without_handler_is_dropped() {
        let (dispatcher, _shared) = dispatcher();

        // Logged as a reportable condition; nothing to invoke, nothing queued.
        dispatcher.message_arrived(InboundMessage::new("orphan", b"x".to_vec()));
    }

    #[test]
    fn handler_error_does_not_affect_next_dispatch() {
        let (dispatcher, shared) = dispatcher();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        shared.handlers.set_message_arrived(Arc::new(move |message| {
            if message.topic == "bad" {
                return Err("application failure".into());
            }
            sink.lock().unwrap().push(message.topic.clone());
            Ok(())
        }));

        dispatcher.message_arrived(InboundMessage::new("bad", vec![]));
        dispatcher.message_arrived(InboundMessage::new("good", vec![]));

        assert_eq!(*seen.lock().unwrap(), vec!["good".to_string()]);
    }

    #[test]
    fn handler_panic_does_not_affect_next_dispatch() {
        let (dispatcher, shared) = dispatcher();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        shared.handlers.set_message_arrived(Arc::new(move |message| {
            if message.topic == "boom" {
                panic!("handler exploded");
            }
            sink.lock().unwrap().push(message.topic.clone());
            Ok(())
        }));

        dispatcher.message_arrived(InboundMessage::new("boom", vec![]));
        dispatcher.message_arrived(InboundMessage::new("fine", vec![]));

        assert_eq!(*seen.lock().unwrap(), vec!["fine".to_string()]);
    }

    #[test]
    fn failing_message_handler_is_logged_with_message_context() {
        let (dispatcher, shared) = dispatcher();
        shared
            .handlers
            .set_message_arrived(Arc::new(|_| Err("cannot process".into())));

        let events = capture_events(|| {
            dispatcher.message_arrived(InboundMessage::new("sensors/hall", b"21.5".to_vec()));
        });

        let failure = events
            .iter()
            .find(|line| line.contains("cannot process"))
            .expect("handler failure should be logged");
        assert!(failure.contains("sensors/hall"));
        assert!(failure.contains("21.5"));
    }

    #[test]
    fn panicking_message_handler_is_logged_with_message_context() {
        let (dispatcher, shared) = dispatcher();
        shared
            .handlers
            .set_message_arrived(Arc::new(|_| panic!("handler exploded")));

        let events = capture_events(|| {
            dispatcher.message_arrived(InboundMessage::new("sensors/hall", b"21.5".to_vec()));
        });

        let failure = events
            .iter()
            .find(|line| line.contains("panicked"))
            .expect("handler panic should be logged");
        assert!(failure.contains("sensors/hall"));
    }

    #[test]
    fn connection_lost_sets_disconnected_before_handler_runs() {
        let (dispatcher, shared) = dispatcher();
        shared.set_state(ConnectionState::Connected);

        let observed: Arc<Mutex<Option<ConnectionState>>> = Arc::new(Mutex::new(None));
        let state_handle = Arc::clone(&shared);
        let sink = Arc::clone(&observed);
        shared.handlers.set_connection_lost(Arc::new(move |_| {
            *sink.lock().unwrap() = Some(state_handle.state());
            Ok(())
        }));

        dispatcher.connection_lost(TransportError::ConnectionLost("broken pipe".to_string()));

        assert_eq!(
            *observed.lock().unwrap(),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(shared.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connection_lost_handler_panic_still_leaves_disconnected() {
        let (dispatcher, shared) = dispatcher();
        shared.set_state(ConnectionState::Connected);

        shared
            .handlers
            .set_connection_lost(Arc::new(|_| panic!("handler exploded")));

        dispatcher.connection_lost(TransportError::ConnectionLost("broken pipe".to_string()));

        assert_eq!(shared.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connection_lost_after_close_is_ignored() {
        let (dispatcher, shared) = dispatcher();
        shared.set_state(ConnectionState::Closed);

        let invoked = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&invoked);
        shared.handlers.set_connection_lost(Arc::new(move |_| {
            *sink.lock().unwrap() = true;
            Ok(())
        }));

        dispatcher.connection_lost(TransportError::ConnectionLost("late".to_string()));

        assert!(!*invoked.lock().unwrap());
        assert_eq!(shared.state(), ConnectionState::Closed);
    }

    #[test]
    fn delivery_complete_invokes_handler_with_token() {
        let (dispatcher, shared) = dispatcher();
        let seen: Arc<Mutex<Vec<DeliveryToken>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        shared.handlers.set_delivery_complete(Arc::new(move |token| {
            sink.lock().unwrap().push(token);
            Ok(())
        }));

        dispatcher.delivery_complete(DeliveryToken(9));

        assert_eq!(*seen.lock().unwrap(), vec![DeliveryToken(9)]);
    }

    #[test]
    fn delivery_complete_without_handler_is_quiet() {
        let (dispatcher, _shared) = dispatcher();
        dispatcher.delivery_complete(DeliveryToken(1));
    }
}
