use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use tabwire_bus::{BrowserDriver, Origin, TabHandle};
use tabwire_core::{Error, Message, Result};

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Commands the coordinator sends to the companion browser extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeCommand {
    CreateTab { id: u64, url: String },
    CloseTab { id: u64, handle: TabHandle },
    Deliver { id: u64, handle: TabHandle, message: Message },
}

/// Events the extension pushes back over the same socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Ack {
        id: u64,
        #[serde(default)]
        handle: Option<TabHandle>,
        #[serde(default)]
        error: Option<String>,
    },
    TabLoaded {
        handle: TabHandle,
    },
    Bus {
        #[serde(default)]
        handle: Option<TabHandle>,
        message: Message,
    },
}

struct CommandAck {
    handle: Option<TabHandle>,
    error: Option<String>,
}

struct BridgeState {
    // The currently connected bridge, if any; replaced on reconnect.
    commands: Mutex<Option<mpsc::UnboundedSender<BridgeCommand>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<CommandAck>>>,
    next_command_id: AtomicU64,
    loads: broadcast::Sender<TabHandle>,
    inbound: mpsc::Sender<(Message, Origin)>,
}

impl BridgeState {
    async fn apply_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Ack { id, handle, error } => {
                let waiter = self.pending.lock().unwrap().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(CommandAck { handle, error });
                    }
                    None => debug!(id, "Ack for unknown or expired command"),
                }
            }
            BridgeEvent::TabLoaded { handle } => {
                debug!(handle, "Tab finished loading");
                let _ = self.loads.send(handle);
            }
            BridgeEvent::Bus { handle, message } => {
                let origin = match handle {
                    Some(handle) => Origin::Tab(handle),
                    None => Origin::Local,
                };
                if self.inbound.send((message, origin)).await.is_err() {
                    warn!("Inbound pump is gone, dropping bridge message");
                }
            }
        }
    }
}

/// `BrowserDriver` backed by a single WebSocket to the companion
/// extension. One ordered socket carries both directions, which is what
/// preserves per-tab FIFO delivery.
pub struct WsBridge {
    state: Arc<BridgeState>,
}

impl WsBridge {
    /// Tab-originated bus messages are handed to `inbound` together with
    /// their origin; the caller pumps them into the router.
    pub fn new(inbound: mpsc::Sender<(Message, Origin)>) -> Self {
        let (loads, _) = broadcast::channel(64);
        Self {
            state: Arc::new(BridgeState {
                commands: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_command_id: AtomicU64::new(1),
                loads,
                inbound,
            }),
        }
    }

    pub fn axum_router(&self) -> axum::Router {
        axum::Router::new()
            .route("/bridge", get(handle_upgrade))
            .with_state(self.state.clone())
    }

    /// Serves the bridge endpoint until shutdown fires.
    pub async fn serve(
        &self,
        addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "Bridge gateway listening");
        axum::serve(listener, self.axum_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;
        Ok(())
    }

    async fn command<F>(&self, build: F) -> Result<CommandAck>
    where
        F: FnOnce(u64) -> BridgeCommand,
    {
        let sender = self.state.commands.lock().unwrap().clone();
        let Some(sender) = sender else {
            return Err(Error::TabOperation(
                "browser bridge is not connected".to_string(),
            ));
        };

        let id = self.state.next_command_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.state.pending.lock().unwrap().insert(id, tx);

        if sender.send(build(id)).is_err() {
            self.state.pending.lock().unwrap().remove(&id);
            return Err(Error::TabOperation(
                "browser bridge disconnected".to_string(),
            ));
        }

        match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(ack)) => match ack.error {
                None => Ok(ack),
                Some(error) => Err(Error::TabOperation(error)),
            },
            Ok(Err(_)) => Err(Error::TabOperation(
                "browser bridge dropped the command".to_string(),
            )),
            Err(_) => {
                self.state.pending.lock().unwrap().remove(&id);
                Err(Error::TabOperation(
                    "browser bridge did not acknowledge in time".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl BrowserDriver for WsBridge {
    async fn create_tab(&self, url: &str) -> Result<TabHandle> {
        let url = url.to_string();
        let ack = self
            .command(move |id| BridgeCommand::CreateTab { id, url })
            .await?;
        ack.handle
            .ok_or_else(|| Error::TabOperation("bridge ack carried no tab handle".to_string()))
    }

    async fn close_tab(&self, handle: TabHandle) -> Result<()> {
        self.command(move |id| BridgeCommand::CloseTab { id, handle })
            .await?;
        Ok(())
    }

    async fn send_to_tab(&self, handle: TabHandle, message: Message) -> Result<()> {
        self.command(move |id| BridgeCommand::Deliver {
            id,
            handle,
            message,
        })
        .await?;
        Ok(())
    }

    fn subscribe_loads(&self) -> broadcast::Receiver<TabHandle> {
        self.state.loads.subscribe()
    }
}

async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_bridge(socket, state))
}

async fn handle_bridge(socket: WebSocket, state: Arc<BridgeState>) {
    info!("Browser bridge connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<BridgeCommand>();

    {
        let mut commands = state.commands.lock().unwrap();
        if commands.is_some() {
            warn!("Replacing an existing bridge connection");
        }
        *commands = Some(tx.clone());
    }

    // Forward queued commands to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let text = match serde_json::to_string(&command) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode bridge command");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = stream.next().await {
        match received {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<BridgeEvent>(&text) {
                Ok(event) => state.apply_event(event).await,
                Err(e) => warn!(error = %e, "Undecodable bridge event"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Bridge receive error");
                break;
            }
        }
    }

    send_task.abort();
    // Only clear the slot if a newer connection has not replaced us.
    let mut commands = state.commands.lock().unwrap();
    if commands.as_ref().is_some_and(|current| current.same_channel(&tx)) {
        *commands = None;
    }
    info!("Browser bridge disconnected");
}
