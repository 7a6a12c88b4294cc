//! Multichunk container body.
//!
//! The plaintext body is laid out as:
//!
//! ```text
//! ┌──────────┬───────────┬──────────────────────────────────┬──────────┐
//! │ "MCHK"   │ count u32 │ count × (checksum 32, off u64,   │ data ... │
//! │          │           │          len u32)                │          │
//! └──────────┴───────────┴──────────────────────────────────┴──────────┘
//! ```
//!
//! Offsets are relative to the start of the data section. The multichunk
//! id is the SHA-256 of the whole body. The body is then framed in an
//! envelope with [`MULTICHUNK_MAGIC`], encrypted or not.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::{ChunkChecksum, MultiChunkId, HASH_SIZE};

/// Envelope magic for uploaded multichunks.
pub const MULTICHUNK_MAGIC: [u8; 4] = *b"SVMC";

const BODY_MAGIC: [u8; 4] = *b"MCHK";
const BODY_HEADER_SIZE: usize = 8;
const ENTRY_SIZE: usize = HASH_SIZE + 8 + 4;

/// Directory entry of one packed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyEntry {
    /// Chunk checksum.
    pub checksum: ChunkChecksum,
    /// Offset within the data section.
    pub offset: u64,
    /// Chunk length.
    pub length: u32,
}

/// Serializes `chunks` into a body and returns it with its directory.
///
/// # Errors
///
/// Returns an error if a chunk is larger than `u32::MAX` bytes.
pub fn encode_body<'a, I>(chunks: I) -> ProtocolResult<(Vec<u8>, Vec<BodyEntry>)>
where
    I: IntoIterator<Item = (ChunkChecksum, &'a [u8])>,
{
    let chunks: Vec<_> = chunks.into_iter().collect();
    let mut entries = Vec::with_capacity(chunks.len());
    let mut offset = 0u64;
    for (checksum, data) in &chunks {
        let length = u32::try_from(data.len())
            .map_err(|_| ProtocolError::encode(format!("chunk {checksum} too large")))?;
        entries.push(BodyEntry {
            checksum: *checksum,
            offset,
            length,
        });
        offset += u64::from(length);
    }
    let count = u32::try_from(entries.len())
        .map_err(|_| ProtocolError::encode("too many chunks in multichunk"))?;

    let data_len = offset as usize;
    let mut body = Vec::with_capacity(BODY_HEADER_SIZE + entries.len() * ENTRY_SIZE + data_len);
    body.extend_from_slice(&BODY_MAGIC);
    body.extend_from_slice(&count.to_le_bytes());
    for entry in &entries {
        body.extend_from_slice(entry.checksum.as_bytes());
        body.extend_from_slice(&entry.offset.to_le_bytes());
        body.extend_from_slice(&entry.length.to_le_bytes());
    }
    for (_, data) in &chunks {
        body.extend_from_slice(data);
    }
    Ok((body, entries))
}

/// Id of a body: SHA-256 over its bytes.
#[must_use]
pub fn body_id(body: &[u8]) -> MultiChunkId {
    MultiChunkId::digest(body)
}

/// A parsed body borrowing its data section.
#[derive(Debug, Clone)]
pub struct MultiChunkBody<'a> {
    entries: Vec<BodyEntry>,
    data: &'a [u8],
}

impl<'a> MultiChunkBody<'a> {
    /// Parses a body and checks every entry lies within the data section.
    ///
    /// # Errors
    ///
    /// Returns an error on bad magic, truncation or out-of-range entries.
    pub fn parse(body: &'a [u8]) -> ProtocolResult<Self> {
        if body.len() < BODY_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "multichunk header",
            });
        }
        if body[..4] != BODY_MAGIC {
            return Err(ProtocolError::InvalidMagic {
                expected: BODY_MAGIC,
                found: body[..4].to_vec(),
            });
        }
        let count = u32::from_le_bytes([body[4], body[5], body[6], body[7]]) as usize;
        let dir_end = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(BODY_HEADER_SIZE))
            .filter(|end| *end <= body.len())
            .ok_or(ProtocolError::Truncated {
                what: "multichunk directory",
            })?;

        let data = &body[dir_end..];
        let mut entries = Vec::with_capacity(count);
        for raw in body[BODY_HEADER_SIZE..dir_end].chunks_exact(ENTRY_SIZE) {
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(&raw[..HASH_SIZE]);
            let mut off = [0u8; 8];
            off.copy_from_slice(&raw[HASH_SIZE..HASH_SIZE + 8]);
            let mut len = [0u8; 4];
            len.copy_from_slice(&raw[HASH_SIZE + 8..]);
            let entry = BodyEntry {
                checksum: ChunkChecksum::from_bytes(hash),
                offset: u64::from_le_bytes(off),
                length: u32::from_le_bytes(len),
            };
            let end = entry.offset.checked_add(u64::from(entry.length));
            if end.map_or(true, |end| end > data.len() as u64) {
                return Err(ProtocolError::Truncated {
                    what: "multichunk data",
                });
            }
            entries.push(entry);
        }
        Ok(Self { entries, data })
    }

    /// Directory entries in packing order.
    #[must_use]
    pub fn entries(&self) -> &[BodyEntry] {
        &self.entries
    }

    /// Bytes at `offset..offset + length` of the data section.
    #[must_use]
    pub fn slice(&self, offset: u64, length: u32) -> Option<&'a [u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(length as usize)?;
        self.data.get(start..end)
    }

    /// Bytes of the entry with `checksum`.
    #[must_use]
    pub fn chunk(&self, checksum: &ChunkChecksum) -> Option<&'a [u8]> {
        let entry = self.entries.iter().find(|e| &e.checksum == checksum)?;
        self.slice(entry.offset, entry.length)
    }
}
