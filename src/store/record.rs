//! Records and frames - the unit of durable storage
//!
//! Every committed transaction becomes one frame:
//! ```text
//! [len: u32 LE][checksum: 32 bytes, BLAKE3 of payload][payload: zstd(bincode(Vec<Record>))]
//! ```

use crate::model::{Hash, Node, Operation, Root, Status, TreeId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Bytes before the payload in every frame
pub const FRAME_HEADER_SIZE: usize = 4 + 32;

/// Largest payload a frame may carry
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Every payload is a single zstd frame
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// A single durable change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// A new content-addressed node
    Node(Node),
    /// A new generation of a tree
    Root(Root),
    /// The operation that produced `generation`
    Operation {
        tree_id: TreeId,
        generation: u64,
        operation: Operation,
    },
    /// A status transition for an existing generation
    Status {
        tree_id: TreeId,
        generation: u64,
        status: Status,
    },
}

/// Encode a batch of records as one frame
pub fn encode_frame(records: &[Record]) -> Result<Vec<u8>> {
    let data = bincode::serialize(records)?;
    let payload = zstd::encode_all(data.as_slice(), 3)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::InvalidArgument(format!("frame too large: {} bytes", payload.len())));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidArgument(format!("frame too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(Hash::digest(&payload).as_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Result of reading one frame from a byte buffer
#[derive(Debug)]
pub enum FrameRead {
    /// A complete, verified frame and the number of bytes it occupied
    Frame(Vec<Record>, usize),
    /// The buffer ends inside a frame
    Truncated,
    /// The frame is complete but its checksum does not match
    ChecksumMismatch(usize),
}

/// Read the frame at the start of `buf`
pub fn decode_frame(buf: &[u8]) -> Result<FrameRead> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(FrameRead::Truncated);
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[0..4]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Corruption(format!("frame claims {} payload bytes", len)));
    }
    let total = FRAME_HEADER_SIZE + len;
    if buf.len() < total {
        return Ok(FrameRead::Truncated);
    }

    let mut checksum = [0u8; 32];
    checksum.copy_from_slice(&buf[4..FRAME_HEADER_SIZE]);
    let payload = &buf[FRAME_HEADER_SIZE..total];
    if Hash::digest(payload) != Hash::from_bytes(checksum) {
        return Ok(FrameRead::ChecksumMismatch(total));
    }

    let data = zstd::decode_all(payload)?;
    let records: Vec<Record> = bincode::deserialize(&data)?;
    Ok(FrameRead::Frame(records, total))
}

/// Whether a complete, verified frame starts anywhere in `buf`
pub fn contains_frame(buf: &[u8]) -> bool {
    (0..buf.len()).any(|start| {
        let candidate = &buf[start..];
        candidate.len() > FRAME_HEADER_SIZE + ZSTD_MAGIC.len()
            && candidate[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + ZSTD_MAGIC.len()] == ZSTD_MAGIC
            && matches!(decode_frame(candidate), Ok(FrameRead::Frame(..)))
    })
}
