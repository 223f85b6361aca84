//! WebSocket signaling transport
//!
//! Connects to `{url}/{peer_id}` on the rendezvous service and keeps the
//! link alive with jittered exponential backoff. Every successful connect
//! after the first is reported as [`ChannelEvent::Reconnected`].

use crate::config::SignalingConfig;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::PeerId;
use crate::infrastructure::signaling::channel::{ChannelEvent, ChannelEventSender, ChannelEvents, SignalingChannel};
use crate::infrastructure::signaling::message::{Envelope, Recipient, SignalingMessage};
use async_trait::async_trait;
use futures::{sink::SinkExt, stream::StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub struct WebSocketChannel {
    local_id: PeerId,
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl WebSocketChannel {
    /// Start the transport task
    pub fn spawn(config: SignalingConfig, local_id: PeerId) -> (Arc<Self>, ChannelEvents) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let url = format!("{}/{}", config.url.trim_end_matches('/'), local_id);
        tokio::spawn(supervise(url, config, outbound_rx, events_tx, connected.clone()));

        let channel = Arc::new(Self {
            local_id,
            outbound,
            connected,
        });
        (channel, events_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    async fn send(&self, to: Recipient, message: SignalingMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(DomainError::SignalingDelivery("signaling link is down".to_string()));
        }

        let envelope = Envelope::new(self.local_id.clone(), to, message);
        let json = envelope
            .to_json()
            .map_err(|e| DomainError::Internal(format!("Failed to serialize message: {}", e)))?;

        self.outbound
            .send(json)
            .map_err(|_| DomainError::SignalingDelivery("signaling task stopped".to_string()))
    }
}

/// Delay before reconnect attempt `attempt` (0-based), with up to 20% jitter
fn backoff_delay(config: &SignalingConfig, attempt: u32) -> Duration {
    let min = config.reconnect_min_ms.max(1);
    let max = config.reconnect_max_ms.max(min);
    let base = min.saturating_mul(1u64 << attempt.min(16)).min(max);
    let jitter = rand::thread_rng().gen_range(0..=base / 5);
    Duration::from_millis(base + jitter)
}

async fn supervise(
    url: String,
    config: SignalingConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    events: ChannelEventSender,
    connected: Arc<AtomicBool>,
) {
    let mut ever_connected = false;
    let mut attempt: u32 = 0;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!("Signaling connected: {}", url);
                attempt = 0;
                connected.store(true, Ordering::SeqCst);
                if ever_connected && events.send(ChannelEvent::Reconnected).is_err() {
                    return;
                }
                ever_connected = true;

                let (mut write, mut read) = stream.split();
                loop {
                    tokio::select! {
                        outbound = outbound_rx.recv() => {
                            let Some(json) = outbound else {
                                debug!("Signaling outbound queue closed, stopping");
                                let _ = write.close().await;
                                connected.store(false, Ordering::SeqCst);
                                return;
                            };
                            if let Err(e) = write.send(Message::Text(json)).await {
                                warn!("Signaling write failed: {}", e);
                                break;
                            }
                        }
                        frame = read.next() => match frame {
                            Some(Ok(Message::Text(text))) => match Envelope::from_json(&text) {
                                Ok(envelope) => {
                                    if events.send(ChannelEvent::Message(envelope)).is_err() {
                                        connected.store(false, Ordering::SeqCst);
                                        return;
                                    }
                                }
                                Err(e) => warn!("Dropping malformed signaling frame: {}", e),
                            },
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Signaling connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Signaling connection error: {}", e);
                                break;
                            }
                        },
                    }
                }

                connected.store(false, Ordering::SeqCst);
                if events.send(ChannelEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Signaling connect to {} failed: {}", url, e);
            }
        }

        if events.is_closed() {
            return;
        }
        let delay = backoff_delay(&config, attempt);
        attempt = attempt.saturating_add(1);
        debug!("Reconnecting signaling in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}
