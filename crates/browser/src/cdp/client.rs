//! CDP Client - WebSocket transport to a browser endpoint
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection (pages use flattened sessions)
//! 2. Request/response matching via ID in a lock-free map
//! 3. Events are forwarded in arrival order into one stream; fan-out is
//!    the connection's job, not ours
//! 4. Fail fast - no retries, no queuing. Let the caller decide.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::protocol::*;
use super::transport::{EventStream, Transport};
use crate::error::{BrowserError, Result};
use crate::scope::Scope;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Pending = DashMap<RequestId, oneshot::Sender<CDPResponse>>;

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    /// Key: request_id, Value: oneshot sender for response
    pending: Arc<Pending>,

    /// WebSocket write half
    ws_sink: AsyncMutex<WsSink>,

    /// Event stream, handed out once
    events: Mutex<Option<EventStream>>,

    /// Stops the reader task
    shutdown: CancellationToken,

    /// Fired by the reader task once the socket is gone
    disconnected: CancellationToken,

    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Removes a pending entry if its call is abandoned before the response.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        tracing::debug!("Connecting to {}", ws_url);
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let disconnected = CancellationToken::new();

        let reader = {
            let pending = pending.clone();
            let shutdown = shutdown.clone();
            let disconnected = disconnected.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = stream.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Err(e) = route_message(&pending, &event_tx, &text) {
                                        tracing::error!("Failed to handle message: {}", e);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::info!("WebSocket closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    tracing::error!("WebSocket error: {}", e);
                                    break;
                                }
                                _ => {}
                            }
                        }
                        _ = shutdown.cancelled() => {
                            tracing::debug!("Shutdown signal received");
                            break;
                        }
                    }
                }

                // Late senders check `disconnected` after registering, so
                // everything still pending here is failed with Closed
                disconnected.cancel();
                pending.clear();
            })
        };

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            ws_sink: AsyncMutex::new(sink),
            events: Mutex::new(Some(event_rx)),
            shutdown,
            disconnected,
            reader: Mutex::new(Some(reader)),
        }))
    }

    /// Send CDP request and wait for response
    async fn send_request(&self, command: Command) -> Result<Value> {
        if self.is_closed() {
            return Err(BrowserError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = command.into_request(id);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        if self.disconnected.is_cancelled() {
            return Err(BrowserError::Closed);
        }

        let json = serde_json::to_string(&request)?;
        tracing::trace!("-> {}", json);
        {
            let mut sink = self.ws_sink.lock().await;
            if let Err(e) = sink.send(Message::Text(json)).await {
                if self.disconnected.is_cancelled() {
                    return Err(BrowserError::Closed);
                }
                return Err(e.into());
            }
        }

        let response = rx.await.map_err(|_| BrowserError::Closed)?;
        response_into_result(response)
    }

    /// Closed locally or dropped by the remote end
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.disconnected.is_cancelled()
    }
}

/// Route one incoming frame to its waiter or to the event stream
fn route_message(
    pending: &Pending,
    events: &mpsc::UnboundedSender<CDPEvent>,
    text: &str,
) -> Result<()> {
    match serde_json::from_str::<CDPMessage>(text)? {
        CDPMessage::Response(response) => {
            if let Some((_, tx)) = pending.remove(&response.id) {
                let _ = tx.send(response); // Receiver dropped: caller gave up
            } else {
                tracing::warn!("Received response for unknown request: {}", response.id);
            }
        }
        CDPMessage::Event(event) => {
            // Nobody took the stream yet, or it was dropped on shutdown
            let _ = events.send(event);
        }
    }
    Ok(())
}

pub(crate) fn response_into_result(response: CDPResponse) -> Result<Value> {
    if let Some(error) = response.error {
        return Err(BrowserError::Protocol {
            code: error.code,
            message: error.message,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

#[async_trait]
impl Transport for CDPClient {
    async fn call(&self, scope: &Scope, command: Command) -> Result<Value> {
        scope.run(self.send_request(command)).await
    }

    fn events(&self) -> Option<EventStream> {
        self.events.lock().take()
    }

    /// Close connection gracefully
    async fn close(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }

        let mut sink = self.ws_sink.lock().await;
        match sink.close().await {
            Ok(()) | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => {
                tracing::debug!("WebSocket close: {}", e);
                Ok(())
            }
        }
    }
}
