//! Wire format of the sync protocol
//!
//! Every message is one JSON text frame. Hashes, tree ids, keys and values
//! travel as hex strings; an absent optional field is the literal string
//! `"None"`.

use crate::model::{
    DeletionData, Hash, InsertionData, InternalNode, Node, Operation, Root, Side, Status,
    TerminalNode, TreeId,
};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;
use std::str::FromStr;

/// Literal used for absent optional fields
pub const NONE: &str = "None";

/// A client request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    RequestRoot {
        #[serde(with = "text")]
        tree_id: TreeId,
        #[serde(with = "text")]
        node_hash: Hash,
    },
    RequestNodes {
        #[serde(with = "text")]
        tree_id: TreeId,
        #[serde(with = "text")]
        node_hash: Hash,
    },
    RequestOperations {
        #[serde(with = "text")]
        tree_id: TreeId,
        #[serde(with = "generation")]
        generation: u64,
        #[serde(with = "generation")]
        max_generation: u64,
    },
    Close,
}

impl Request {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("malformed request: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::RequestRoot { .. } => "request_root",
            Request::RequestNodes { .. } => "request_nodes",
            Request::RequestOperations { .. } => "request_operations",
            Request::Close => "close",
        }
    }
}

/// Answer to `request_root`; `Unknown` serializes as `{}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RootAnswer {
    Known {
        #[serde(with = "text")]
        tree_id: TreeId,
        generation: u64,
        #[serde(with = "text")]
        node_hash: Hash,
        #[serde(with = "status_name")]
        status: Status,
    },
    Unknown {},
}

impl RootAnswer {
    /// Only non-empty roots can be answered; the empty tree has no hash
    pub fn from_root(root: Option<Root>) -> Self {
        match root {
            Some(Root {
                tree_id,
                generation,
                node_hash: Some(node_hash),
                status,
            }) => RootAnswer::Known {
                tree_id,
                generation,
                node_hash,
                status,
            },
            _ => RootAnswer::Unknown {},
        }
    }

    pub fn into_root(self) -> Option<Root> {
        match self {
            RootAnswer::Known {
                tree_id,
                generation,
                node_hash,
                status,
            } => Some(Root {
                tree_id,
                generation,
                node_hash: Some(node_hash),
                status,
            }),
            RootAnswer::Unknown {} => None,
        }
    }
}

/// Answer to `request_nodes`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesAnswer {
    pub answer: Vec<NodeEntry>,
}

/// One node of a `request_nodes` answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeEntry {
    Terminal {
        #[serde(with = "hex_bytes")]
        key: Vec<u8>,
        #[serde(with = "hex_bytes")]
        value: Vec<u8>,
        is_terminal: bool,
    },
    Internal {
        #[serde(with = "text")]
        left: Hash,
        #[serde(with = "text")]
        right: Hash,
        is_terminal: bool,
    },
}

impl From<&Node> for NodeEntry {
    fn from(node: &Node) -> Self {
        match node {
            Node::Terminal(node) => NodeEntry::Terminal {
                key: node.key.clone(),
                value: node.value.clone(),
                is_terminal: true,
            },
            Node::Internal(node) => NodeEntry::Internal {
                left: node.left,
                right: node.right,
                is_terminal: false,
            },
        }
    }
}

impl NodeEntry {
    /// Rebuild the node, recomputing its hash from the received content
    pub fn into_node(self) -> Result<Node> {
        match self {
            NodeEntry::Terminal {
                key,
                value,
                is_terminal: true,
            } => Ok(TerminalNode::new(key, value).into()),
            NodeEntry::Internal {
                left,
                right,
                is_terminal: false,
            } => Ok(InternalNode::new(left, right).into()),
            _ => Err(Error::Protocol("node entry has a mismatched is_terminal flag".into())),
        }
    }
}

/// One entry of a `request_operations` answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationEntry {
    Insert {
        is_insert: bool,
        #[serde(with = "text")]
        hash: Hash,
        #[serde(with = "hex_bytes")]
        key: Vec<u8>,
        #[serde(with = "hex_bytes")]
        value: Vec<u8>,
        #[serde(with = "optional")]
        reference_node_hash: Option<Hash>,
        #[serde(with = "optional")]
        side: Option<Side>,
        root_status: u8,
    },
    Delete {
        is_insert: bool,
        #[serde(with = "optional")]
        hash: Option<Hash>,
        #[serde(with = "hex_bytes")]
        key: Vec<u8>,
        root_status: u8,
    },
}

impl From<&Operation> for OperationEntry {
    fn from(operation: &Operation) -> Self {
        match operation {
            Operation::Insertion(data) => OperationEntry::Insert {
                is_insert: true,
                hash: data.hash,
                key: data.key.clone(),
                value: data.value.clone(),
                reference_node_hash: data.reference_node_hash,
                side: data.side,
                root_status: data.root_status.code(),
            },
            Operation::Deletion(data) => OperationEntry::Delete {
                is_insert: false,
                hash: data.hash,
                key: data.key.clone(),
                root_status: data.root_status.code(),
            },
        }
    }
}

impl TryFrom<OperationEntry> for Operation {
    type Error = Error;

    fn try_from(entry: OperationEntry) -> Result<Self> {
        let status = |code: u8| {
            Status::from_code(code)
                .ok_or_else(|| Error::Protocol(format!("unknown root status code {}", code)))
        };
        match entry {
            OperationEntry::Insert {
                is_insert: true,
                hash,
                key,
                value,
                reference_node_hash,
                side,
                root_status,
            } => Ok(Operation::Insertion(InsertionData {
                hash,
                key,
                value,
                reference_node_hash,
                side,
                root_status: status(root_status)?,
            })),
            OperationEntry::Delete {
                is_insert: false,
                hash,
                key,
                root_status,
            } => Ok(Operation::Deletion(DeletionData {
                hash,
                key,
                root_status: status(root_status)?,
            })),
            _ => Err(Error::Protocol("operation entry has a mismatched is_insert flag".into())),
        }
    }
}

/// Values carried as their `Display`/`FromStr` text
mod text {
    use super::*;

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> std::result::Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Optional values, with `"None"` standing for absence
mod optional {
    use super::*;

    pub fn serialize<T: Display, S: Serializer>(
        value: &Option<T>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_str(NONE),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == NONE {
            return Ok(None);
        }
        s.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

mod status_name {
    use super::*;

    pub fn serialize<S: Serializer>(status: &Status, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(status.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Status, D::Error> {
        let s = String::deserialize(deserializer)?;
        Status::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown status: {}", s)))
    }
}

/// Generations arrive either as JSON numbers or as decimal strings
mod generation {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(generation: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(generation)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_id() -> TreeId {
        TreeId::from_bytes([7; 32])
    }

    #[test]
    fn test_parse_requests() {
        let hash = Hash::terminal(b"k", b"v");
        let text = json!({
            "type": "request_root",
            "tree_id": tree_id().to_hex(),
            "node_hash": hash.to_hex(),
        })
        .to_string();
        assert_eq!(
            Request::parse(&text).unwrap(),
            Request::RequestRoot {
                tree_id: tree_id(),
                node_hash: hash
            }
        );

        assert_eq!(Request::parse(r#"{"type":"close"}"#).unwrap(), Request::Close);
    }

    #[test]
    fn test_generations_as_strings_or_numbers() {
        for (generation, max) in [(json!("1"), json!("3")), (json!(1), json!(3))] {
            let text = json!({
                "type": "request_operations",
                "tree_id": tree_id().to_hex(),
                "generation": generation,
                "max_generation": max,
            })
            .to_string();
            assert_eq!(
                Request::parse(&text).unwrap(),
                Request::RequestOperations {
                    tree_id: tree_id(),
                    generation: 1,
                    max_generation: 3
                }
            );
        }
    }

    #[test]
    fn test_malformed_requests() {
        assert!(Request::parse("not json").is_err());
        assert!(Request::parse(r#"{"type":"request_everything"}"#).is_err());
        assert!(Request::parse(r#"{"type":"request_nodes","tree_id":"zz","node_hash":"00"}"#).is_err());
        assert!(Request::parse(r#"{"type":"request_root","tree_id":"00"}"#).is_err());
    }

    #[test]
    fn test_unknown_root_is_empty_object() {
        let answer = RootAnswer::from_root(None);
        assert_eq!(serde_json::to_string(&answer).unwrap(), "{}");

        let parsed: RootAnswer = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.into_root(), None);
    }

    #[test]
    fn test_known_root_shape() {
        let hash = Hash::terminal(b"k", b"v");
        let root = Root {
            tree_id: tree_id(),
            generation: 4,
            node_hash: Some(hash),
            status: Status::Committed,
        };
        let value = serde_json::to_value(RootAnswer::from_root(Some(root.clone()))).unwrap();
        assert_eq!(
            value,
            json!({
                "tree_id": tree_id().to_hex(),
                "generation": 4,
                "node_hash": hash.to_hex(),
                "status": "committed",
            })
        );

        let parsed: RootAnswer = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.into_root(), Some(root));
    }

    #[test]
    fn test_node_entries() {
        let leaf = Node::from(TerminalNode::new(b"\x01".to_vec(), b"\xff".to_vec()));
        let value = serde_json::to_value(NodeEntry::from(&leaf)).unwrap();
        assert_eq!(value, json!({"key": "01", "value": "ff", "is_terminal": true}));

        let internal = Node::from(InternalNode::new(leaf.hash(), leaf.hash()));
        let value = serde_json::to_value(NodeEntry::from(&internal)).unwrap();
        assert_eq!(value["is_terminal"], json!(false));
        assert_eq!(value["left"], json!(leaf.hash().to_hex()));

        let entry: NodeEntry = serde_json::from_value(value).unwrap();
        assert_eq!(entry.into_node().unwrap(), internal);

        let lying: NodeEntry =
            serde_json::from_value(json!({"key": "01", "value": "ff", "is_terminal": false})).unwrap();
        assert!(lying.into_node().is_err());
    }

    #[test]
    fn test_operation_entries() {
        let root = Hash::digest(b"root");
        let first = Operation::Insertion(InsertionData {
            hash: root,
            key: b"a".to_vec(),
            value: b"1".to_vec(),
            reference_node_hash: None,
            side: None,
            root_status: Status::Pending,
        });
        let value = serde_json::to_value(OperationEntry::from(&first)).unwrap();
        assert_eq!(
            value,
            json!({
                "is_insert": true,
                "hash": root.to_hex(),
                "key": "61",
                "value": "31",
                "reference_node_hash": "None",
                "side": "None",
                "root_status": 1,
            })
        );

        let emptied = Operation::Deletion(DeletionData {
            hash: None,
            key: b"a".to_vec(),
            root_status: Status::Committed,
        });
        let value = serde_json::to_value(OperationEntry::from(&emptied)).unwrap();
        assert_eq!(
            value,
            json!({"is_insert": false, "hash": "None", "key": "61", "root_status": 2})
        );

        let entries: Vec<OperationEntry> = serde_json::from_value(json!([
            serde_json::to_value(OperationEntry::from(&first)).unwrap(),
            value,
        ]))
        .unwrap();
        let decoded: Vec<Operation> = entries
            .into_iter()
            .map(Operation::try_from)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, vec![first, emptied]);
    }
}
