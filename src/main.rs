//! arbor CLI - Command line interface for arbor_db
//!
//! Every command prints one JSON document on stdout. Logs go to stderr and
//! are filtered with `RUST_LOG`.

use anyhow::Context;
use arbor_db::config::default_config_path;
use arbor_db::{Config, DataStore, DiffEntry, Hash, Operation, Root, Side, TreeId};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "An authenticated, versioned key-value store on a binary Merkle tree")]
#[command(version)]
struct Cli {
    /// Path to the database file (overrides the config file and ARBOR_DB_PATH)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Keys and values on the command line and in output are hex encoded
    #[arg(long)]
    hex: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new database
    Init,

    /// Create an empty tree
    CreateTree {
        /// 32-byte tree id, hex encoded
        tree_id: String,
    },

    /// Insert a key/value pair
    Insert {
        tree_id: String,
        key: String,
        value: String,
        /// Existing node to attach beside (omit for an empty tree)
        #[arg(short, long)]
        reference: Option<String>,
        /// Side of the reference node the new leaf goes on
        #[arg(short, long)]
        side: Option<String>,
    },

    /// Delete a key
    Delete { tree_id: String, key: String },

    /// Look up a key in the latest generation
    Get { tree_id: String, key: String },

    /// Show the latest root, or one generation
    Root {
        tree_id: String,
        #[arg(short, long)]
        generation: Option<u64>,
    },

    /// List roots in a generation range
    Roots {
        tree_id: String,
        #[arg(long, default_value = "0")]
        from: u64,
        /// Exclusive upper bound (defaults to past the latest generation)
        #[arg(long)]
        to: Option<u64>,
    },

    /// List the operations producing generations from+1..=max
    Operations { tree_id: String, from: u64, max: u64 },

    /// List key/value pairs left to right
    Nodes {
        tree_id: String,
        /// A root hash the tree has had (defaults to the latest)
        #[arg(short, long)]
        root: Option<String>,
    },

    /// Show the internal nodes from a node's parent up to the latest root
    Ancestors { tree_id: String, hash: String },

    /// Mark a generation committed
    Commit { tree_id: String, generation: u64 },

    /// Verify every stored hash
    Check,

    /// Show key/value changes between two roots ("none" is the empty tree)
    Diff {
        tree_id: String,
        from: String,
        /// Defaults to the latest root
        to: Option<String>,
    },

    /// List known trees
    Trees,

    /// Run the sync server
    #[cfg(feature = "sync")]
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Close connections idle for this many seconds
        #[arg(long)]
        idle_timeout: Option<u64>,
    },

    /// Replicate a tree from a sync server up to a root hash
    #[cfg(feature = "sync")]
    Replicate {
        /// Server URL, e.g. ws://127.0.0.1:8575
        url: String,
        tree_id: String,
        root: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(path) = &cli.database {
        config.store.path = path.clone();
    }
    let db_path = config.store.path.clone();

    match cli.command {
        Commands::Init => {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            DataStore::create(&db_path)?;
            output(
                &cli.format,
                &json!({
                    "status": "ok",
                    "message": format!("Created database at {}", db_path.display())
                }),
            )?;
        }

        Commands::CreateTree { tree_id } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            store.create_tree(&tree_id)?;
            output(
                &cli.format,
                &json!({
                    "status": "ok",
                    "tree_id": tree_id.to_hex()
                }),
            )?;
        }

        Commands::Insert {
            tree_id,
            key,
            value,
            reference,
            side,
        } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let reference = reference.as_deref().map(parse_hash).transpose()?;
            let side = side
                .as_deref()
                .map(|s| s.parse::<Side>().map_err(anyhow::Error::msg))
                .transpose()?;
            let hash = store.insert(
                &tree_id,
                &decode(&key, cli.hex)?,
                &decode(&value, cli.hex)?,
                reference,
                side,
            )?;
            output(
                &cli.format,
                &json!({
                    "status": "ok",
                    "hash": hash.to_hex(),
                    "root": root_json(&store.get_latest_root(&tree_id)?)
                }),
            )?;
        }

        Commands::Delete { tree_id, key } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            store.delete(&tree_id, &decode(&key, cli.hex)?)?;
            output(
                &cli.format,
                &json!({
                    "status": "ok",
                    "root": root_json(&store.get_latest_root(&tree_id)?)
                }),
            )?;
        }

        Commands::Get { tree_id, key } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            match store.get_node_by_key(&tree_id, &decode(&key, cli.hex)?) {
                Ok(node) => {
                    output(
                        &cli.format,
                        &json!({
                            "key": encode(&node.key, cli.hex),
                            "value": encode(&node.value, cli.hex),
                            "hash": node.hash.to_hex()
                        }),
                    )?;
                }
                Err(e) if e.is_not_found() => {
                    output(
                        &cli.format,
                        &json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    )?;
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Root { tree_id, generation } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let root = match generation {
                Some(generation) => store.get_root(&tree_id, generation)?,
                None => store.get_latest_root(&tree_id)?,
            };
            output(&cli.format, &root_json(&root))?;
        }

        Commands::Roots { tree_id, from, to } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let roots = store.get_roots_between(&tree_id, from, to.unwrap_or(u64::MAX))?;
            let items: Vec<Value> = roots.iter().map(root_json).collect();
            output(
                &cli.format,
                &json!({
                    "count": items.len(),
                    "roots": items
                }),
            )?;
        }

        Commands::Operations { tree_id, from, max } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let operations = store.get_operations(&tree_id, from, max)?;
            let items: Vec<Value> = (from + 1..)
                .zip(&operations)
                .map(|(generation, op)| operation_json(generation, op, cli.hex))
                .collect();
            output(
                &cli.format,
                &json!({
                    "count": items.len(),
                    "operations": items
                }),
            )?;
        }

        Commands::Nodes { tree_id, root } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let root = root.as_deref().map(parse_hash).transpose()?;
            let items: Vec<Value> = store
                .get_keys_values(&tree_id, root)?
                .iter()
                .map(|node| {
                    json!({
                        "key": encode(&node.key, cli.hex),
                        "value": encode(&node.value, cli.hex),
                        "hash": node.hash.to_hex()
                    })
                })
                .collect();
            output(
                &cli.format,
                &json!({
                    "count": items.len(),
                    "nodes": items
                }),
            )?;
        }

        Commands::Ancestors { tree_id, hash } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let items: Vec<Value> = store
                .get_ancestors(&tree_id, &parse_hash(&hash)?)?
                .iter()
                .map(|node| {
                    json!({
                        "hash": node.hash.to_hex(),
                        "left": node.left.to_hex(),
                        "right": node.right.to_hex()
                    })
                })
                .collect();
            output(
                &cli.format,
                &json!({
                    "count": items.len(),
                    "ancestors": items
                }),
            )?;
        }

        Commands::Commit {
            tree_id,
            generation,
        } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            store.commit(&tree_id, generation)?;
            output(
                &cli.format,
                &root_json(&store.get_root(&tree_id, generation)?),
            )?;
        }

        Commands::Check => {
            let store = open_store(&db_path)?;
            match store.check() {
                Ok(()) => {
                    output(
                        &cli.format,
                        &json!({
                            "status": "ok",
                            "nodes": store.storage().node_count(),
                            "trees": store.get_tree_ids().len()
                        }),
                    )?;
                }
                Err(e) => {
                    output(
                        &cli.format,
                        &json!({
                            "status": "error",
                            "message": e.to_string()
                        }),
                    )?;
                    std::process::exit(1);
                }
            }
        }

        Commands::Diff { tree_id, from, to } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let from_hash = parse_optional_hash(&from)?;
            let to_hash = match to {
                Some(to) => parse_optional_hash(&to)?,
                None => store.get_latest_root(&tree_id)?.node_hash,
            };

            let diff = store.get_kv_diff(&tree_id, from_hash, to_hash)?;
            let entries: Vec<Value> = diff
                .entries
                .iter()
                .map(|e| match e {
                    DiffEntry::Added(node) => json!({
                        "type": "added",
                        "key": encode(&node.key, cli.hex),
                        "value": encode(&node.value, cli.hex)
                    }),
                    DiffEntry::Removed(node) => json!({
                        "type": "removed",
                        "key": encode(&node.key, cli.hex),
                        "value": encode(&node.value, cli.hex)
                    }),
                    DiffEntry::Modified { old, new } => json!({
                        "type": "modified",
                        "key": encode(&new.key, cli.hex),
                        "old_value": encode(&old.value, cli.hex),
                        "new_value": encode(&new.value, cli.hex)
                    }),
                })
                .collect();
            output(
                &cli.format,
                &json!({
                    "from": hash_or_none(from_hash),
                    "to": hash_or_none(to_hash),
                    "added": diff.added_count(),
                    "removed": diff.removed_count(),
                    "modified": diff.modified_count(),
                    "entries": entries
                }),
            )?;
        }

        Commands::Trees => {
            let store = open_store(&db_path)?;
            let items: Vec<String> = store.get_tree_ids().iter().map(TreeId::to_hex).collect();
            output(
                &cli.format,
                &json!({
                    "count": items.len(),
                    "trees": items
                }),
            )?;
        }

        #[cfg(feature = "sync")]
        Commands::Serve {
            host,
            port,
            idle_timeout,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if idle_timeout.is_some() {
                config.server.idle_timeout_secs = idle_timeout;
            }
            let store = std::sync::Arc::new(open_store(&db_path)?);
            let server = arbor_db::SyncServer::with_config(store, &config.server);
            let addr = config.server.listen_addr();

            tokio::runtime::Runtime::new()?.block_on(async move {
                let listener = tokio::net::TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("Failed to bind {}", addr))?;
                server
                    .serve_with_shutdown(listener, async {
                        let _ = tokio::signal::ctrl_c().await;
                    })
                    .await?;
                anyhow::Ok(())
            })?;
        }

        #[cfg(feature = "sync")]
        Commands::Replicate { url, tree_id, root } => {
            let store = open_store(&db_path)?;
            let tree_id = parse_tree_id(&tree_id)?;
            let root = parse_hash(&root)?;

            let report = tokio::runtime::Runtime::new()?.block_on(async {
                let mut client = arbor_db::SyncClient::connect(&url).await?;
                let report = client.replicate(&store, &tree_id, &root).await?;
                client.close().await?;
                anyhow::Ok(report)
            })?;
            output(
                &cli.format,
                &json!({
                    "status": "ok",
                    "tree_id": report.tree_id.to_hex(),
                    "from_generation": report.from_generation,
                    "to_generation": report.to_generation,
                    "root": report.root.to_hex(),
                    "committed": report.committed
                }),
            )?;
        }
    }

    Ok(())
}

fn open_store(path: &PathBuf) -> anyhow::Result<DataStore> {
    DataStore::open_or_create(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

fn output(format: &OutputFormat, value: &Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn parse_tree_id(s: &str) -> anyhow::Result<TreeId> {
    TreeId::from_hex(s).map_err(|_| anyhow::anyhow!("Invalid tree id: {}", s))
}

fn parse_hash(s: &str) -> anyhow::Result<Hash> {
    Hash::from_hex(s).map_err(|_| anyhow::anyhow!("Invalid hash: {}", s))
}

fn parse_optional_hash(s: &str) -> anyhow::Result<Option<Hash>> {
    if s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_hash(s).map(Some)
}

fn decode(s: &str, hex: bool) -> anyhow::Result<Vec<u8>> {
    if hex {
        hex::decode(s.strip_prefix("0x").unwrap_or(s)).with_context(|| format!("Invalid hex: {}", s))
    } else {
        Ok(s.as_bytes().to_vec())
    }
}

fn encode(bytes: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(bytes)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn hash_or_none(hash: Option<Hash>) -> Value {
    match hash {
        Some(hash) => Value::String(hash.to_hex()),
        None => Value::Null,
    }
}

fn root_json(root: &Root) -> Value {
    json!({
        "tree_id": root.tree_id.to_hex(),
        "generation": root.generation,
        "node_hash": hash_or_none(root.node_hash),
        "status": root.status.as_str()
    })
}

fn operation_json(generation: u64, operation: &Operation, hex: bool) -> Value {
    match operation {
        Operation::Insertion(data) => json!({
            "generation": generation,
            "type": "insert",
            "key": encode(&data.key, hex),
            "value": encode(&data.value, hex),
            "reference_node_hash": hash_or_none(data.reference_node_hash),
            "side": data.side.map(|s| s.as_str()),
            "root_hash": data.hash.to_hex(),
            "root_status": data.root_status.as_str()
        }),
        Operation::Deletion(data) => json!({
            "generation": generation,
            "type": "delete",
            "key": encode(&data.key, hex),
            "root_hash": hash_or_none(data.hash),
            "root_status": data.root_status.as_str()
        }),
    }
}
