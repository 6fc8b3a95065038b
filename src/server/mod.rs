//! Sync server
//!
//! Serves read-only replication queries over websockets. Each connection gets
//! its own task; requests on a connection are answered strictly one at a
//! time, in order. A request that cannot be parsed or answered ends the
//! connection. With an idle timeout set, a client that stops sending or
//! stops reading is disconnected after that long.

pub mod protocol;

use crate::config::ServerConfig;
use crate::{DataStore, Error, Result};
use futures_util::{SinkExt, StreamExt};
use protocol::{NodeEntry, NodesAnswer, OperationEntry, Request, RootAnswer};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Websocket facade over a [`DataStore`]
#[derive(Clone)]
pub struct SyncServer {
    store: Arc<DataStore>,
    idle_timeout: Option<Duration>,
    max_message_size: Option<usize>,
}

impl SyncServer {
    /// A server with no idle timeout and no message size limit
    pub fn new(store: Arc<DataStore>) -> Self {
        SyncServer {
            store,
            idle_timeout: None,
            max_message_size: None,
        }
    }

    pub fn with_config(store: Arc<DataStore>, config: &ServerConfig) -> Self {
        SyncServer {
            store,
            idle_timeout: config.idle_timeout(),
            max_message_size: config.max_message_size,
        }
    }

    /// Close connections that send nothing for `timeout`
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Accept connections until the process exits
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already open keep being served by their own tasks.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "Sync server listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            warn!(client = %peer, error = %e, "Connection terminated");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!(%addr, "Sync server shutting down");
                    return Ok(());
                }
            }
        }
    }

    #[tracing::instrument(name = "connection", skip_all, fields(client = %peer))]
    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let ws = tokio_tungstenite::accept_async_with_config(
            stream,
            Some(websocket_config(self.max_message_size)),
        )
        .await?;
        info!("Client connected");

        let (mut ws_tx, mut ws_rx) = ws.split();
        loop {
            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, ws_rx.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        info!(idle_secs = limit.as_secs(), "Closing idle connection");
                        let _ = ws_tx.close().await;
                        return Ok(());
                    }
                },
                None => ws_rx.next().await,
            };

            let text = match next {
                None => break,
                Some(message) => match message? {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Binary(_) => {
                        return Err(Error::Protocol("binary frames are not supported".into()))
                    }
                },
            };

            let request = Request::parse(&text)?;
            debug!(request = request.kind(), "Received request");
            if request == Request::Close {
                let _ = ws_tx.close().await;
                break;
            }

            let store = self.store.clone();
            let response = tokio::task::spawn_blocking(move || answer(&store, request))
                .await
                .map_err(|e| Error::Protocol(format!("request handler failed: {}", e)))??;
            let send = ws_tx.send(Message::Text(response));
            match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, send).await {
                    Ok(sent) => sent?,
                    Err(_) => {
                        info!(idle_secs = limit.as_secs(), "Closing connection that stopped reading");
                        return Ok(());
                    }
                },
                None => send.await?,
            }
        }

        info!("Client disconnected");
        Ok(())
    }
}

/// Build the response frame for one request
pub fn answer(store: &DataStore, request: Request) -> Result<String> {
    let response = match request {
        Request::RequestRoot { tree_id, node_hash } => {
            let root = match store.get_last_tree_root_by_hash(&tree_id, Some(node_hash)) {
                Ok(root) => root,
                Err(Error::NotFound(_)) | Err(Error::Quarantined(_)) => None,
                Err(e) => return Err(e),
            };
            serde_json::to_string(&RootAnswer::from_root(root))?
        }
        Request::RequestNodes { tree_id, node_hash } => {
            if !store.tree_exists(&tree_id) {
                return Err(Error::NotFound(format!("tree {}", tree_id)));
            }
            store.ensure_serving(&tree_id)?;
            let answer = store
                .left_to_right_traversal(node_hash)
                .map(|node| node.map(|node| NodeEntry::from(&node)))
                .collect::<Result<Vec<_>>>()?;
            serde_json::to_string(&NodesAnswer { answer })?
        }
        Request::RequestOperations {
            tree_id,
            generation,
            max_generation,
        } => {
            let operations = store.get_operations(&tree_id, generation, max_generation)?;
            let entries: Vec<OperationEntry> = operations.iter().map(OperationEntry::from).collect();
            serde_json::to_string(&entries)?
        }
        Request::Close => return Err(Error::Protocol("close has no answer".into())),
    };
    Ok(response)
}

pub(crate) fn websocket_config(max_message_size: Option<usize>) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = max_message_size;
    config.max_frame_size = max_message_size;
    config
}
