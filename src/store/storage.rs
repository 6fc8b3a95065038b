//! Single-file transactional record log
//!
//! File format:
//! ```text
//! [HEADER: 16 bytes]
//!   - magic: 8 bytes ("ARBOR_DB")
//!   - version: 4 bytes (u32 LE)
//!   - reserved: 4 bytes
//!
//! [FRAMES: variable]
//!   - one frame per committed transaction, see `record.rs`
//! ```
//!
//! The whole log is replayed into memory on open. A frame that was only
//! partly written when the process died is discarded and the file is cut
//! back to the last complete frame. Any other damage fails the open and
//! leaves the file untouched.

use crate::store::record::{contains_frame, decode_frame, encode_frame, FrameRead, Record};
use crate::store::state::{IndexUpdate, State};
use crate::store::Transaction;
use crate::model::TreeId;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub(crate) const HEADER_SIZE: u64 = 16;

/// Append handle for the backing file
struct LogFile {
    file: File,
    /// Current append position
    write_offset: u64,
}

/// Durable backend for nodes, roots and operations
pub struct Storage {
    /// Path to the database file, `None` for in-memory stores
    path: Option<PathBuf>,
    /// Serializes commits; `None` for in-memory stores
    log: Mutex<Option<LogFile>>,
    /// Everything committed so far
    state: RwLock<State>,
}

impl Storage {
    /// Create a new database file, replacing any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        info!(path = %path.display(), "Created database");

        Ok(Storage {
            path: Some(path),
            log: Mutex::new(Some(LogFile {
                file,
                write_offset: HEADER_SIZE,
            })),
            state: RwLock::new(State::default()),
        })
    }

    /// Open an existing database file, recovering from a torn final frame
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)?;

        if data.len() < HEADER_SIZE as usize || &data[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&data[8..12]);
        let version = u32::from_le_bytes(version_bytes);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let mut state = State::default();
        let mut offset = HEADER_SIZE as usize;
        let mut frames = 0usize;
        while offset < data.len() {
            match decode_frame(&data[offset..])? {
                FrameRead::Frame(records, used) => {
                    for record in records {
                        state.apply(record)?;
                    }
                    offset += used;
                    frames += 1;
                }
                FrameRead::Truncated => {
                    // A torn write is the last thing in the file; a frame
                    // found past it means the length prefix itself is bad
                    if contains_frame(&data[offset + 1..]) {
                        return Err(Error::Corruption(format!(
                            "frame at offset {} overruns the frames that follow it",
                            offset
                        )));
                    }
                    warn!(offset, "Discarding incomplete trailing frame");
                    break;
                }
                FrameRead::ChecksumMismatch(used) => {
                    if offset + used < data.len() {
                        return Err(Error::Corruption(format!(
                            "checksum mismatch in frame at offset {}",
                            offset
                        )));
                    }
                    warn!(offset, "Discarding trailing frame with bad checksum");
                    break;
                }
            }
        }
        state.rebuild_indexes()?;

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let write_offset = offset as u64;
        if write_offset < data.len() as u64 {
            file.set_len(write_offset)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(write_offset))?;

        info!(
            path = %path.display(),
            frames,
            trees = state.trees.len(),
            nodes = state.nodes.len(),
            "Opened database"
        );

        Ok(Storage {
            path: Some(path),
            log: Mutex::new(Some(LogFile { file, write_offset })),
            state: RwLock::new(state),
        })
    }

    /// Open or create a database file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// A store that lives only as long as this value
    pub fn in_memory() -> Self {
        Storage {
            path: None,
            log: Mutex::new(None),
            state: RwLock::new(State::default()),
        }
    }

    /// Start a transaction; nothing is visible or durable until it commits
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Get the file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of distinct nodes stored
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// A consistent read view; writers wait while it is held
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read()
    }

    /// Write `records` as one frame, then make them visible all at once
    pub(crate) fn commit(
        &self,
        records: Vec<Record>,
        index_updates: Vec<(TreeId, IndexUpdate)>,
    ) -> Result<()> {
        if records.is_empty() && index_updates.is_empty() {
            return Ok(());
        }

        let mut log = self.log.lock();
        self.state.read().validate(&records)?;

        if let Some(log) = log.as_mut() {
            let frame = encode_frame(&records)?;
            log.file.seek(SeekFrom::Start(log.write_offset))?;
            if let Err(e) = log.file.write_all(&frame).and_then(|_| log.file.sync_data()) {
                // Drop whatever part of the frame reached the file
                let _ = log.file.set_len(log.write_offset);
                return Err(e.into());
            }
            log.write_offset += frame.len() as u64;
            debug!(records = records.len(), bytes = frame.len(), "Committed frame");
        }

        let mut state = self.state.write();
        for record in records {
            state.apply(record)?;
        }
        for (tree_id, update) in index_updates {
            state.apply_index(&tree_id, update);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, State> {
        self.state.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, Root, Status, TerminalNode};
    use tempfile::tempdir;

    fn tree_id() -> TreeId {
        TreeId::from_bytes([9; 32])
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");

        {
            let store = Storage::create(&path).unwrap();
            assert_eq!(store.node_count(), 0);
        }

        {
            let store = Storage::open(&path).unwrap();
            assert_eq!(store.node_count(), 0);
            assert!(store.read().trees.is_empty());
        }
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, b"definitely not a database").unwrap();
        assert!(matches!(Storage::open(&path), Err(Error::InvalidFile(_))));
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        let node = Node::Terminal(TerminalNode::new(b"k".to_vec(), b"v".to_vec()));

        {
            let store = Storage::create(&path).unwrap();
            let mut tx = store.begin();
            tx.put_node(node.clone());
            tx.append_root(Root::empty(tree_id()));
            tx.commit().unwrap();
        }

        {
            let store = Storage::open(&path).unwrap();
            let state = store.read();
            assert_eq!(state.node(&node.hash()).unwrap(), &node);
            assert_eq!(state.tree(&tree_id()).unwrap().roots.len(), 1);
        }
    }

    #[test]
    fn test_torn_frame_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");

        {
            let store = Storage::create(&path).unwrap();
            let mut tx = store.begin();
            tx.append_root(Root::empty(tree_id()));
            tx.commit().unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        // A crash halfway through writing the next frame
        let mut next = Root::empty(tree_id());
        next.generation = 1;
        let frame = encode_frame(&[Record::Root(next)]).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&frame[..frame.len() / 2]).unwrap();
        }

        let store = Storage::open(&path).unwrap();
        assert_eq!(store.read().tree(&tree_id()).unwrap().roots.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        // The log is writable again after recovery
        let mut root = Root::empty(tree_id());
        root.generation = 1;
        let mut tx = store.begin();
        tx.append_root(root);
        tx.commit().unwrap();
        drop(store);
        let store = Storage::open(&path).unwrap();
        assert_eq!(store.read().tree(&tree_id()).unwrap().roots.len(), 2);
    }

    #[test]
    fn test_corrupt_middle_frame_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        {
            let store = Storage::create(&path).unwrap();
            for generation in 0..2 {
                let mut root = Root::empty(tree_id());
                root.generation = generation;
                let mut tx = store.begin();
                tx.append_root(root);
                tx.commit().unwrap();
            }
        }

        let mut data = std::fs::read(&path).unwrap();
        let last_payload_byte = HEADER_SIZE as usize + 40;
        data[last_payload_byte] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(Storage::open(&path), Err(Error::Corruption(_))));
    }

    fn two_frame_store(path: &Path) -> Vec<u8> {
        let store = Storage::create(path).unwrap();
        for generation in 0..2 {
            let mut root = Root::empty(tree_id());
            root.generation = generation;
            let mut tx = store.begin();
            tx.append_root(root);
            tx.commit().unwrap();
        }
        drop(store);
        std::fs::read(path).unwrap()
    }

    #[test]
    fn test_corrupt_length_prefix_keeps_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        let mut data = two_frame_store(&path);
        let first = HEADER_SIZE as usize;
        data[first..first + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(Storage::open(&path), Err(Error::Corruption(_))));
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_overlong_length_prefix_keeps_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        let mut data = two_frame_store(&path);

        // Plausible length that runs just past the end of the file
        let first = HEADER_SIZE as usize;
        let overrun = (data.len() - first) as u32;
        data[first..first + 4].copy_from_slice(&overrun.to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(Storage::open(&path), Err(Error::Corruption(_))));
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_generation_gap_rejected_before_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        let store = Storage::create(&path).unwrap();

        let mut root = Root::empty(tree_id());
        root.generation = 3;
        let mut tx = store.begin();
        tx.append_root(root);
        assert!(tx.commit().is_err());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn test_status_transition_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.arbor");
        {
            let store = Storage::create(&path).unwrap();
            let mut tx = store.begin();
            tx.append_root(Root::empty(tree_id()));
            tx.commit().unwrap();

            let mut tx = store.begin();
            tx.set_status(tree_id(), 0, Status::Committed);
            tx.commit().unwrap();
        }
        let store = Storage::open(&path).unwrap();
        let state = store.read();
        assert_eq!(state.tree(&tree_id()).unwrap().roots[0].status, Status::Committed);
    }
}
