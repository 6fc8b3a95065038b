//! Follower side of the sync protocol
//!
//! The server is not trusted: every replicated generation is rebuilt locally
//! and its root hash compared with the one the server advertised.

use crate::model::{Hash, Node, Operation, Root, Status, TreeId};
use crate::server::protocol::{NodesAnswer, OperationEntry, Request, RootAnswer};
use crate::server::websocket_config;
use crate::{DataStore, Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome of [`SyncClient::replicate`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationReport {
    pub tree_id: TreeId,
    /// Local generation before replication
    pub from_generation: u64,
    /// Local generation after replication
    pub to_generation: u64,
    pub root: Hash,
    /// Generations marked committed because the server reported them so,
    /// including earlier ones committed after they were replicated
    pub committed: Vec<u64>,
}

/// A connection to a sync server
pub struct SyncClient {
    write: SplitSink<Socket, Message>,
    read: SplitStream<Socket>,
}

impl SyncClient {
    /// Connect to `url`, e.g. `ws://127.0.0.1:8575`
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(websocket_config(None)), false)
                .await?;
        debug!(%url, "Connected to sync server");
        let (write, read) = socket.split();
        Ok(SyncClient { write, read })
    }

    /// Most recent generation the server has with root `node_hash`
    pub async fn request_root(&mut self, tree_id: &TreeId, node_hash: &Hash) -> Result<Option<Root>> {
        let text = self
            .exchange(&Request::RequestRoot {
                tree_id: *tree_id,
                node_hash: *node_hash,
            })
            .await?;
        let answer: RootAnswer = serde_json::from_str(&text)?;
        Ok(answer.into_root())
    }

    /// Subtree under `node_hash`, left to right, with hashes recomputed locally
    pub async fn request_nodes(&mut self, tree_id: &TreeId, node_hash: &Hash) -> Result<Vec<Node>> {
        let text = self
            .exchange(&Request::RequestNodes {
                tree_id: *tree_id,
                node_hash: *node_hash,
            })
            .await?;
        let answer: NodesAnswer = serde_json::from_str(&text)?;
        let nodes = answer
            .answer
            .into_iter()
            .map(|entry| entry.into_node())
            .collect::<Result<Vec<_>>>()?;
        if let Some(first) = nodes.first() {
            if first.hash() != *node_hash {
                return Err(Error::Integrity {
                    tree_id: Some(*tree_id),
                    detail: format!("server sent subtree {} for {}", first.hash(), node_hash),
                });
            }
        }
        Ok(nodes)
    }

    /// Operations producing generations `from + 1 ..= max`
    pub async fn request_operations(&mut self, tree_id: &TreeId, from: u64, max: u64) -> Result<Vec<Operation>> {
        let text = self
            .exchange(&Request::RequestOperations {
                tree_id: *tree_id,
                generation: from,
                max_generation: max,
            })
            .await?;
        let entries: Vec<OperationEntry> = serde_json::from_str(&text)?;
        entries.into_iter().map(Operation::try_from).collect()
    }

    /// Say goodbye and drop the connection
    pub async fn close(mut self) -> Result<()> {
        let request = serde_json::to_string(&Request::Close)?;
        self.write.send(Message::Text(request)).await?;
        let _ = self.write.close().await;
        Ok(())
    }

    /// Bring `local`'s copy of `tree_id` up to the server's `root_hash`.
    ///
    /// The local tree is created if missing. Its current root must be one the
    /// server's history passed through. Fetched operations are replayed one by
    /// one and each resulting root must match the hash the server logged.
    /// Committed statuses are mirrored for old and new generations alike.
    pub async fn replicate(
        &mut self,
        local: &DataStore,
        tree_id: &TreeId,
        root_hash: &Hash,
    ) -> Result<ReplicationReport> {
        let remote = self
            .request_root(tree_id, root_hash)
            .await?
            .ok_or_else(|| Error::NotFound(format!("root {} on the server for tree {}", root_hash, tree_id)))?;

        if !local.tree_exists(tree_id) {
            local.create_tree(tree_id)?;
        }
        let local_root = local.get_latest_root(tree_id)?;
        let from = local_root.generation;
        if from > remote.generation {
            return Err(Error::InvalidArgument(format!(
                "local tree {} is at generation {}, past the requested generation {}",
                tree_id, from, remote.generation
            )));
        }

        // Local generations still pending may have been committed on the
        // server since they were replicated. Their operations also prove the
        // local history is a prefix of the server's.
        let mut to_commit = Vec::new();
        if from > 0 {
            let local_roots = local.get_roots_between(tree_id, 1, from + 1)?;
            let first_pending = local_roots
                .iter()
                .find(|root| root.status == Status::Pending)
                .map_or(from, |root| root.generation);
            let known = self.request_operations(tree_id, first_pending - 1, from).await?;
            let local_roots = &local_roots[(first_pending - 1) as usize..];
            if known.len() != local_roots.len() {
                return Err(Error::Protocol(format!(
                    "asked for {} operations, server sent {}",
                    local_roots.len(),
                    known.len()
                )));
            }
            for (root, operation) in local_roots.iter().zip(&known) {
                if operation.root_hash() != root.node_hash {
                    return Err(Error::Integrity {
                        tree_id: Some(*tree_id),
                        detail: format!("local generation {} diverges from the server", root.generation),
                    });
                }
                if root.status == Status::Pending && operation.root_status() == Status::Committed {
                    to_commit.push(root.generation);
                }
            }
        }

        let operations = self.request_operations(tree_id, from, remote.generation).await?;
        let root = local.apply_operations(tree_id, &operations)?;
        if root != Some(*root_hash) {
            return Err(Error::Integrity {
                tree_id: Some(*tree_id),
                detail: format!("replicated root does not match advertised root {}", root_hash),
            });
        }

        for (generation, operation) in (from + 1..).zip(&operations) {
            if operation.root_status() == Status::Committed {
                to_commit.push(generation);
            }
        }
        for generation in &to_commit {
            local.commit(tree_id, *generation)?;
        }

        info!(
            tree_id = %tree_id,
            from_generation = from,
            to_generation = remote.generation,
            "Replicated tree"
        );
        Ok(ReplicationReport {
            tree_id: *tree_id,
            from_generation: from,
            to_generation: remote.generation,
            root: *root_hash,
            committed: to_commit,
        })
    }

    async fn exchange(&mut self, request: &Request) -> Result<String> {
        let text = serde_json::to_string(request)?;
        self.write.send(Message::Text(text)).await?;
        loop {
            match self.read.next().await {
                Some(message) => match message? {
                    Message::Text(text) => return Ok(text),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Binary(_) => {
                        return Err(Error::Protocol("unexpected binary frame".into()))
                    }
                    Message::Close(_) => break,
                },
                None => break,
            }
        }
        Err(Error::Protocol(format!(
            "server closed the connection while answering {}",
            request.kind()
        )))
    }
}
