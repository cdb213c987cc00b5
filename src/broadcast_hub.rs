use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast;
use tracing::warn;

/// Bounded backlog per client (spec.md §4.4: "slow clients are dropped
/// after a bounded backlog"). `tokio::sync::broadcast` lags a receiver
/// (returns `Lagged`) once it falls this far behind rather than growing
/// unbounded memory for one slow client.
const CLIENT_BACKLOG: usize = 256;

/// Fans serialized Alert payloads out to every connected WebSocket client.
/// One slow or disconnected client never blocks delivery to the others.
pub struct BroadcastHub {
    sender: broadcast::Sender<Vec<u8>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CLIENT_BACKLOG);
        Self { sender }
    }

    /// Publish one payload to all currently-subscribed clients. A no-op
    /// (not an error) when nobody is connected.
    pub fn publish(&self, payload: Vec<u8>) {
        let _ = self.sender.send(payload);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.sender.subscribe()
    }

    /// Drives one client's WebSocket connection until it disconnects or
    /// falls behind the backlog. Run as its own task per accepted socket.
    pub async fn serve_client(&self, mut socket: WebSocket) {
        let mut rx = self.subscribe();
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Ok(payload) => {
                            if socket.send(Message::Binary(payload.into())).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "slow websocket client dropped messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => return,
                    }
                }
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
