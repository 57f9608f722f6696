//! In-process loopback transport for tests and local development.
//!
//! Plays the broker side of a session without any network: publishes
//! route straight back to the registered listener when a subscription
//! filter matches, and failures can be scripted per call or per topic
//! through a [`LoopbackHandle`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::events::{DeliveryToken, InboundMessage};
use crate::transport::{Transport, TransportListener};

struct LoopbackInner {
    connected: AtomicBool,
    ever_connected: AtomicBool,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    subscriptions: Mutex<BTreeSet<String>>,
    next_token: AtomicU64,
    connect_count: AtomicU64,
    close_count: AtomicU64,
    fail_next_connect: Mutex<Option<TransportError>>,
    fail_next_disconnect: Mutex<Option<TransportError>>,
    failing_topics: Mutex<BTreeSet<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl LoopbackInner {
    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.lock().unwrap().clone()
    }
}

/// In-process broker double with inline, deterministic delivery.
///
/// Accepted publishes are delivered synchronously: the listener sees
/// `message_arrived` for every subscription filter match (MQTT-style,
/// `+` spans one level and `#` the rest), then `delivery_complete` with
/// a monotone token. Obtain a [`LoopbackHandle`] before boxing the
/// transport to script failures and inject broker-side events.
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

impl LoopbackTransport {
    /// Create a disconnected loopback transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                connected: AtomicBool::new(false),
                ever_connected: AtomicBool::new(false),
                listener: Mutex::new(None),
                subscriptions: Mutex::new(BTreeSet::new()),
                next_token: AtomicU64::new(0),
                connect_count: AtomicU64::new(0),
                close_count: AtomicU64::new(0),
                fail_next_connect: Mutex::new(None),
                fail_next_disconnect: Mutex::new(None),
                failing_topics: Mutex::new(BTreeSet::new()),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Handle for scripting this transport from the broker side.
    #[must_use]
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &mut self,
        config: &SessionConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.inner.fail_next_connect.lock().unwrap().take() {
            debug!(client_id = %config.client_id, error = %error, "Loopback connect failed by script");
            return Err(error);
        }

        *self.inner.listener.lock().unwrap() = Some(listener);
        self.inner.subscriptions.lock().unwrap().clear();
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.ever_connected.store(true, Ordering::SeqCst);
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);

        debug!(client_id = %config.client_id, "Loopback transport connected");
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        if self.inner.listener.lock().unwrap().is_none() {
            if self.inner.ever_connected.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            return Err(TransportError::NotConnected);
        }

        if let Some(error) = self.inner.fail_next_connect.lock().unwrap().take() {
            debug!(error = %error, "Loopback reconnect failed by script");
            return Err(error);
        }

        // The loopback broker keeps no session state across connections,
        // so subscriptions do not survive a reconnect.
        self.inner.subscriptions.lock().unwrap().clear();
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.inner.failing_topics.lock().unwrap().contains(topic) {
            return Err(TransportError::PublishRejected(format!(
                "topic {topic:?} refused by loopback script"
            )));
        }

        self.inner
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));

        let Some(listener) = self.inner.listener() else {
            return Ok(());
        };

        let matched = {
            let subscriptions = self.inner.subscriptions.lock().unwrap();
            subscriptions.iter().any(|filter| topic_matches(filter, topic))
        };
        if matched {
            listener.message_arrived(InboundMessage::new(topic, payload.to_vec()));
        }

        let token = DeliveryToken(self.inner.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        listener.delivery_complete(token);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.inner.failing_topics.lock().unwrap().contains(topic) {
            return Err(TransportError::SubscribeRejected {
                topic: topic.to_string(),
                reason: "refused by loopback script".to_string(),
            });
        }

        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .insert(topic.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(error) = self.inner.fail_next_disconnect.lock().unwrap().take() {
            debug!(error = %error, "Loopback disconnect failed by script");
            return Err(error);
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.connected.store(false, Ordering::SeqCst);
        *self.inner.listener.lock().unwrap() = None;
        self.inner.subscriptions.lock().unwrap().clear();
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

/// Broker-side handle onto a [`LoopbackTransport`].
///
/// Stays valid after the transport is boxed and moved into a manager.
#[derive(Clone)]
pub struct LoopbackHandle {
    inner: Arc<LoopbackInner>,
}

impl LoopbackHandle {
    /// Make the next connect or reconnect attempt fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        *self.inner.fail_next_connect.lock().unwrap() = Some(error);
    }

    /// Make the next disconnect fail with `error`.
    pub fn fail_next_disconnect(&self, error: TransportError) {
        *self.inner.fail_next_disconnect.lock().unwrap() = Some(error);
    }

    /// Reject every publish and subscribe touching `topic`.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.inner.failing_topics.lock().unwrap().insert(topic.into());
    }

    /// Push a broker-originated message to the listener.
    pub fn inject_message(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        match self.inner.listener() {
            Some(listener) => listener.message_arrived(InboundMessage::new(topic, payload)),
            None => debug!("Loopback has no listener, dropping injected message"),
        }
    }

    /// Sever the link as the broker would: mark it down, then notify the
    /// listener of the loss.
    pub fn drop_connection(&self, cause: TransportError) {
        self.inner.connected.store(false, Ordering::SeqCst);
        match self.inner.listener() {
            Some(listener) => listener.connection_lost(cause),
            None => debug!("Loopback has no listener to notify of connection loss"),
        }
    }

    /// Whether the link is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of successful connect and reconnect attempts.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    /// Number of times the transport resources were released.
    #[must_use]
    pub fn close_count(&self) -> u64 {
        self.inner.close_count.load(Ordering::SeqCst)
    }

    /// Topics currently registered with the loopback broker.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    /// Every payload the transport accepted, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.published.lock().unwrap().clone()
    }
}

/// MQTT-style filter match: `+` spans one level, `#` the rest.
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
