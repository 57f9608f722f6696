//! MQTT transport backed by `rumqttc`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_core::{
    DeliveryToken, InboundMessage, SessionConfig, Transport, TransportError, TransportListener,
};

use crate::uri::parse_endpoint;

/// Capacity of the rumqttc request channel between client and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Resolves a pending connect or reconnect once the broker answered.
type HandshakeAck = oneshot::Sender<Result<(), TransportError>>;

/// [`Transport`] implementation speaking MQTT 3.1.1 through `rumqttc`.
///
/// `connect` spawns an event loop task that drives the network connection
/// and forwards inbound traffic to the registered listener. The task
/// survives connection failures: it parks until `reconnect` asks it to
/// dial the same broker again, and exits when the transport is closed.
pub struct RumqttTransport {
    link: Option<Link>,
}

/// Client handle plus the channels shared with the event loop task.
struct Link {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    expected_disconnect: Arc<AtomicBool>,
    resume_tx: mpsc::UnboundedSender<HandshakeAck>,
    cancel: CancellationToken,
}

impl RumqttTransport {
    /// Create a transport with no broker connection yet.
    #[must_use]
    pub fn new() -> Self {
        Self { link: None }
    }

    /// Stop the event loop task of the current link, if any.
    fn teardown_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
        }
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.teardown_link();
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(
        &mut self,
        config: &SessionConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), TransportError> {
        self.teardown_link();

        let endpoint = parse_endpoint(&config.server_uri)?;
        let mut options =
            MqttOptions::new(config.client_id.clone(), endpoint.host.clone(), endpoint.port);
        if config.keep_alive >= Duration::from_secs(1) {
            options.set_keep_alive(config.keep_alive);
        } else {
            warn!(
                keep_alive = ?config.keep_alive,
                "Keep-alive below one second, using the client default"
            );
        }
        if !config.username.is_empty() {
            // The MQTT password field carries UTF-8 text; binary
            // credentials cannot be presented through this client.
            let credential = std::str::from_utf8(&config.credential).map_err(|_| {
                TransportError::InvalidCredentials(
                    "credential is not valid UTF-8, required for the MQTT password field"
                        .to_string(),
                )
            })?;
            options.set_credentials(config.username.clone(), credential.to_string());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let expected_disconnect = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        tokio::spawn(run_event_loop(
            event_loop,
            listener,
            Arc::clone(&connected),
            Arc::clone(&expected_disconnect),
            cancel.clone(),
            resume_rx,
            ack_tx,
        ));

        // Keep the link on handshake failure; reconnect retries over it.
        self.link = Some(Link {
            client,
            connected,
            expected_disconnect,
            resume_tx,
            cancel,
        });

        match ack_rx.await {
            Ok(Ok(())) => {
                debug!(
                    host = %endpoint.host,
                    port = endpoint.port,
                    client_id = %config.client_id,
                    "Broker connection established"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, host = %endpoint.host, "Broker connection failed");
                Err(e)
            }
            Err(_) => Err(TransportError::ConnectionLost(
                "event loop task exited during handshake".to_string(),
            )),
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if link.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        link.resume_tx
            .send(ack_tx)
            .map_err(|_| TransportError::Closed)?;
        ack_rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if !link.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        link.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::PublishRejected(e.to_string()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if !link.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        link.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::SubscribeRejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.expected_disconnect.store(true, Ordering::SeqCst);
        link.connected.store(false, Ordering::SeqCst);

        link.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.teardown_link();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.connected.load(Ordering::SeqCst))
    }
}

/// Drive the rumqttc event loop until the transport is closed.
///
/// Exactly one handshake ack is pending while a connect or reconnect is
/// in flight; its resolution mirrors the CONNACK. After any terminal poll
/// error the task parks and waits for a reconnect request instead of
/// redialing on its own.
async fn run_event_loop(
    mut event_loop: EventLoop,
    listener: Arc<dyn TransportListener>,
    connected: Arc<AtomicBool>,
    expected_disconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
    mut resume_rx: mpsc::UnboundedReceiver<HandshakeAck>,
    ack_tx: HandshakeAck,
) {
    let mut pending_ack = Some(ack_tx);
    let mut tokens: u64 = 0;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(ack) = pending_ack.take() {
                    let _ = ack.send(Err(TransportError::Closed));
                }
                return;
            }
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected.store(true, Ordering::SeqCst);
                    debug!(session_present = ack.session_present, "Broker accepted connection");
                    if let Some(ack_tx) = pending_ack.take() {
                        let _ = ack_tx.send(Ok(()));
                    }
                } else {
                    connected.store(false, Ordering::SeqCst);
                    let cause = TransportError::ConnectionRefused(format!("{:?}", ack.code));
                    match pending_ack.take() {
                        Some(ack_tx) => {
                            let _ = ack_tx.send(Err(cause));
                        }
                        None => listener.connection_lost(cause),
                    }
                    if !park(&mut resume_rx, &cancel, &mut pending_ack).await {
                        return;
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = publish.payload.to_vec();
                listener.message_arrived(InboundMessage::new(publish.topic, payload));
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                tokens += 1;
                listener.delivery_complete(DeliveryToken(tokens));
            }
            Ok(_) => {}
            Err(e) => {
                let was_connected = connected.swap(false, Ordering::SeqCst);
                let cause = map_connection_error(&e);

                if expected_disconnect.swap(false, Ordering::SeqCst) {
                    debug!(error = %e, "Connection closed after local disconnect");
                } else if let Some(ack_tx) = pending_ack.take() {
                    let _ = ack_tx.send(Err(cause));
                } else if was_connected {
                    warn!(error = %e, "Connection to broker lost");
                    listener.connection_lost(cause);
                } else {
                    debug!(error = %e, "Poll failed while disconnected");
                }

                if !park(&mut resume_rx, &cancel, &mut pending_ack).await {
                    return;
                }
            }
        }
    }
}

/// Wait for a reconnect request or teardown. Returns `false` when the
/// task should exit. The next `poll` after a resume redials the broker.
async fn park(
    resume_rx: &mut mpsc::UnboundedReceiver<HandshakeAck>,
    cancel: &CancellationToken,
    pending_ack: &mut Option<HandshakeAck>,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        request = resume_rx.recv() => match request {
            Some(ack) => {
                *pending_ack = Some(ack);
                true
            }
            None => false,
        },
    }
}

fn map_connection_error(e: &ConnectionError) -> TransportError {
    match e {
        ConnectionError::Io(io) => TransportError::Io(io.to_string()),
        ConnectionError::ConnectionRefused(code) => {
            TransportError::ConnectionRefused(format!("{code:?}"))
        }
        other => TransportError::ConnectionLost(other.to_string()),
    }
}
