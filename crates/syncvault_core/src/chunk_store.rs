//! Deduplicating chunk store and multichunk packing.
//!
//! New chunks queue up until they are sealed into a multichunk. A
//! multichunk is sealed once: its body is serialized, hashed into the
//! multichunk id, optionally encrypted with the id as associated data, and
//! framed in an envelope. Sealed multichunks wait in an upload queue until
//! the caller drains them.

use crate::chunker::Chunk;
use crate::config::{ChunkStoreConfig, ChunkerConfig};
use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use syncvault_protocol::multichunk::{self, MultiChunkBody, MULTICHUNK_MAGIC};
use syncvault_protocol::{envelope, ChunkChecksum, ChunkRecord, MultiChunkId, MultiChunkRecord};

/// Where a chunk's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Containing multichunk.
    pub multichunk: MultiChunkId,
    /// Offset within the multichunk's data section.
    pub offset: u64,
    /// Chunk length.
    pub length: u32,
}

/// Index of every stored chunk and multichunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkIndex {
    chunks: HashMap<ChunkChecksum, ChunkLocation>,
    multichunks: HashMap<MultiChunkId, MultiChunkRecord>,
}

impl ChunkIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of `checksum`.
    #[must_use]
    pub fn get(&self, checksum: &ChunkChecksum) -> Option<&ChunkLocation> {
        self.chunks.get(checksum)
    }

    /// Returns true if `checksum` is stored.
    #[must_use]
    pub fn contains(&self, checksum: &ChunkChecksum) -> bool {
        self.chunks.contains_key(checksum)
    }

    /// Record of a multichunk.
    #[must_use]
    pub fn multichunk(&self, id: &MultiChunkId) -> Option<&MultiChunkRecord> {
        self.multichunks.get(id)
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of stored multichunks.
    #[must_use]
    pub fn multichunk_count(&self) -> usize {
        self.multichunks.len()
    }

    /// Iterates over chunk locations.
    pub fn chunks(&self) -> impl Iterator<Item = (&ChunkChecksum, &ChunkLocation)> {
        self.chunks.iter()
    }

    /// Iterates over multichunk records.
    pub fn multichunks(&self) -> impl Iterator<Item = &MultiChunkRecord> {
        self.multichunks.values()
    }

    /// Adds a multichunk record.
    pub fn insert_multichunk(&mut self, record: MultiChunkRecord) {
        self.multichunks.insert(record.id, record);
    }

    /// Adds a chunk record. The first location of a checksum wins.
    pub fn insert_chunk(&mut self, record: &ChunkRecord) {
        self.chunks.entry(record.checksum).or_insert(ChunkLocation {
            multichunk: record.multichunk,
            offset: record.offset,
            length: record.length,
        });
    }

    /// Drops a multichunk and every chunk located in it.
    pub fn remove_multichunk(&mut self, id: &MultiChunkId) -> bool {
        self.chunks.retain(|_, loc| &loc.multichunk != id);
        self.multichunks.remove(id).is_some()
    }
}

/// A sealed multichunk ready for upload.
#[derive(Debug, Clone)]
pub struct SealedMultiChunk {
    /// Multichunk id.
    pub id: MultiChunkId,
    /// Envelope bytes to upload.
    pub data: Bytes,
    /// Record for the database version.
    pub record: MultiChunkRecord,
    /// Locations of the packed chunks.
    pub chunks: Vec<ChunkRecord>,
}

/// Collects chunks, deduplicates them and packs new ones into multichunks.
#[derive(Debug)]
pub struct ChunkStore {
    config: ChunkStoreConfig,
    crypto: Option<Arc<CryptoManager>>,
    known: HashSet<ChunkChecksum>,
    pending: VecDeque<Chunk>,
    pending_bytes: usize,
    uploads: Vec<SealedMultiChunk>,
}

impl ChunkStore {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if a maximal chunk from `chunker`
    /// would not fit into one multichunk.
    pub fn new(
        config: ChunkStoreConfig,
        chunker: &ChunkerConfig,
        crypto: Option<Arc<CryptoManager>>,
    ) -> CoreResult<Self> {
        config.validate(chunker)?;
        Ok(Self {
            config,
            crypto,
            known: HashSet::new(),
            pending: VecDeque::new(),
            pending_bytes: 0,
            uploads: Vec::new(),
        })
    }

    /// Marks every chunk of `index` as already stored.
    pub fn seed(&mut self, index: &ChunkIndex) {
        self.known.extend(index.chunks().map(|(checksum, _)| *checksum));
    }

    /// Queues `chunk` unless its checksum is already stored or queued.
    ///
    /// Returns true if the chunk is new.
    pub fn add_chunk(&mut self, chunk: &Chunk) -> bool {
        if !self.known.insert(chunk.checksum) {
            return false;
        }
        self.pending_bytes += chunk.len();
        self.pending.push_back(chunk.clone());
        true
    }

    /// Bytes waiting to be sealed.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Returns true if the pending queue fills a whole multichunk.
    #[must_use]
    pub fn has_full_multichunk(&self) -> bool {
        self.pending_bytes >= self.config.multichunk_size
    }

    /// Packs pending chunks in arrival order into one multichunk.
    ///
    /// Returns `None` when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or encryption fails.
    pub fn seal_multichunk(&mut self) -> CoreResult<Option<SealedMultiChunk>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let mut batch = Vec::new();
        let mut size = 0;
        while let Some(next) = self.pending.front() {
            if !batch.is_empty() && size + next.len() > self.config.multichunk_size {
                break;
            }
            size += next.len();
            if let Some(chunk) = self.pending.pop_front() {
                batch.push(chunk);
            }
        }
        self.pending_bytes -= size;

        let (body, entries) =
            multichunk::encode_body(batch.iter().map(|c| (c.checksum, c.data.as_ref())))?;
        let id = multichunk::body_id(&body);

        let data = match &self.crypto {
            Some(crypto) => {
                let ciphertext = crypto.encrypt(&body, id.as_bytes())?;
                envelope::seal(&MULTICHUNK_MAGIC, envelope::FLAG_ENCRYPTED, &ciphertext)
            }
            None => envelope::seal(&MULTICHUNK_MAGIC, 0, &body),
        };

        let sealed = SealedMultiChunk {
            id,
            record: MultiChunkRecord {
                id,
                stored_size: data.len() as u64,
                chunk_count: entries.len() as u32,
            },
            chunks: entries
                .iter()
                .map(|e| ChunkRecord {
                    checksum: e.checksum,
                    length: e.length,
                    multichunk: id,
                    offset: e.offset,
                })
                .collect(),
            data: Bytes::from(data),
        };
        self.uploads.push(sealed.clone());
        Ok(Some(sealed))
    }

    /// Seals until nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns the first sealing error.
    pub fn seal_all(&mut self) -> CoreResult<Vec<SealedMultiChunk>> {
        let mut sealed = Vec::new();
        while let Some(mc) = self.seal_multichunk()? {
            sealed.push(mc);
        }
        Ok(sealed)
    }

    /// Takes all sealed multichunks not yet handed out for upload.
    pub fn drain_uploads(&mut self) -> Vec<SealedMultiChunk> {
        std::mem::take(&mut self.uploads)
    }

    /// Forgets pending chunks and undelivered uploads after an aborted cycle.
    pub fn discard_pending(&mut self) {
        for chunk in self.pending.drain(..) {
            self.known.remove(&chunk.checksum);
        }
        for mc in self.uploads.drain(..) {
            for chunk in &mc.chunks {
                self.known.remove(&chunk.checksum);
            }
        }
        self.pending_bytes = 0;
    }
}

/// Opens an uploaded multichunk and verifies it is the body of `id`.
///
/// Returns the plaintext body.
///
/// # Errors
///
/// Returns [`CoreError::EncryptionRequired`] for encrypted data without a
/// key and [`CoreError::MultiChunkCorrupted`] for anything that fails to
/// decrypt, parse or hash to `id`.
pub fn open_multichunk(
    stored: &[u8],
    id: &MultiChunkId,
    crypto: Option<&CryptoManager>,
) -> CoreResult<Vec<u8>> {
    let env = envelope::open(&MULTICHUNK_MAGIC, stored)
        .map_err(|e| CoreError::corrupted(*id, e.to_string()))?;
    let body = if env.is_encrypted() {
        let crypto = crypto.ok_or_else(|| CoreError::EncryptionRequired {
            what: format!("multichunk {id}"),
        })?;
        crypto
            .decrypt(env.payload, id.as_bytes(), &format!("multichunk {id}"))
            .map_err(|_| CoreError::corrupted(*id, "decryption failed"))?
    } else {
        env.payload.to_vec()
    };

    if &multichunk::body_id(&body) != id {
        return Err(CoreError::corrupted(*id, "content does not match id"));
    }
    MultiChunkBody::parse(&body).map_err(|e| CoreError::corrupted(*id, e.to_string()))?;
    Ok(body)
}

/// Extracts and verifies one chunk from an opened multichunk body.
///
/// # Errors
///
/// Returns [`CoreError::ChecksumMismatch`] if the bytes at `location` do not
/// hash to `checksum`.
pub fn extract_chunk<'a>(
    body: &'a [u8],
    checksum: &ChunkChecksum,
    location: &ChunkLocation,
) -> CoreResult<&'a [u8]> {
    let parsed = MultiChunkBody::parse(body)
        .map_err(|e| CoreError::corrupted(location.multichunk, e.to_string()))?;
    let data = parsed
        .slice(location.offset, location.length)
        .ok_or_else(|| {
            CoreError::corrupted(location.multichunk, format!("chunk {checksum} out of range"))
        })?;
    if &ChunkChecksum::digest(data) != checksum {
        return Err(CoreError::ChecksumMismatch {
            chunk: *checksum,
            multichunk: location.multichunk,
        });
    }
    Ok(data)
}
