//! One WebSocket connection to the browser.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use exfil_core::Message;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::{CdpError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending command waiting for its reply. `Err` carries `error.message`.
type PendingTx = oneshot::Sender<std::result::Result<Value, String>>;

/// Callback for one event method. Receives the event's `params`.
pub type EventHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<String, EventHandler>>>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

/// Anything that can issue protocol commands.
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Send `method` with `params` and wait for the reply's `result`.
    ///
    /// There is no timeout: the far end is the one browser this process
    /// controls.
    async fn send(&self, method: &str, params: Value) -> Result<Message>;

    /// Tear the connection down. Outstanding and later sends fail.
    fn close(&self) {}
}

struct Command {
    method: String,
    params: Value,
    response_tx: PendingTx,
}

/// A live protocol connection.
pub struct Connection {
    url: String,
    cmd_tx: mpsc::Sender<Command>,
    handlers: HandlerMap,
    cancel: CancellationToken,
}

impl Connection {
    /// Open a WebSocket to `ws_url` and start the I/O and dispatch tasks.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| CdpError::Connect {
                url: ws_url.to_owned(),
                reason: e.to_string(),
            })?;
        debug!(url = ws_url, "protocol connection open");

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<(String, Message)>();
        let handlers: HandlerMap = Arc::default();
        let cancel = CancellationToken::new();

        drop(tokio::spawn(io_loop(ws, cmd_rx, event_tx, cancel.clone())));
        drop(tokio::spawn(dispatch_loop(
            event_rx,
            Arc::clone(&handlers),
            cancel.clone(),
        )));

        Ok(Self {
            url: ws_url.to_owned(),
            cmd_tx,
            handlers,
            cancel,
        })
    }

    /// The WebSocket URL this connection was opened with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register the handler for `method`, replacing any previous one.
    pub fn on(&self, method: &str, handler: EventHandler) {
        let _ = self.handlers.write().insert(method.to_owned(), handler);
    }

    /// Whether [`close`](CommandSender::close) was called or the socket died.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.cmd_tx.is_closed()
    }
}

#[async_trait]
impl CommandSender for Connection {
    async fn send(&self, method: &str, params: Value) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command {
                method: method.to_owned(),
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| CdpError::ConnectionClosed)?;

        let reply = rx.await.map_err(|_| CdpError::ConnectionClosed)?;
        reply
            .map(Message::from)
            .map_err(|message| CdpError::Protocol {
                method: method.to_owned(),
                message,
            })
    }

    fn close(&self) {
        self.cancel.cancel();
        // Handlers may hold clones of whatever owns this connection.
        self.handlers.write().clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send commands, route replies to their waiters, and forward events to
/// the dispatcher.
async fn io_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::UnboundedSender<(String, Message)>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = ws_tx.close().await;
                break;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let msg = json!({
                    "id": id,
                    "method": cmd.method,
                    "params": cmd.params,
                });
                trace!(id, method = %cmd.method, "send");
                let _ = pending.insert(id, cmd.response_tx);
                if ws_tx.send(WsMessage::Text(msg.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let WsMessage::Text(text) = msg else { continue };
                let Ok(val): std::result::Result<Value, _> = serde_json::from_str(&text) else {
                    warn!(len = text.len(), "dropping unparseable protocol frame");
                    continue;
                };
                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.remove(&id) {
                        if let Some(err) = val.get("error") {
                            let msg = err["message"].as_str().unwrap_or("protocol error");
                            let _ = tx.send(Err(msg.into()));
                        } else {
                            let _ = tx.send(Ok(val["result"].clone()));
                        }
                    }
                } else if let Some(method) = val.get("method").and_then(Value::as_str) {
                    let params = Message::from(val.get("params").cloned().unwrap_or_default());
                    if event_tx.send((method.to_owned(), params)).is_err() {
                        break;
                    }
                }
            }
        }
    }
    cancel.cancel();
    debug!(pending = pending.len(), "protocol connection closed");
}

/// Run handlers one at a time, in event arrival order.
async fn dispatch_loop(
    mut event_rx: mpsc::UnboundedReceiver<(String, Message)>,
    handlers: HandlerMap,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            ev = event_rx.recv() => ev,
        };
        let Some((method, params)) = next else { break };
        let handler = handlers.read().get(&method).cloned();
        match handler {
            Some(h) => h(params).await,
            None => trace!(%method, "no handler"),
        }
    }
}
