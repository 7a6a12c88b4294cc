//! Content-defined chunking.
//!
//! Boundaries come from a gear rolling hash: each byte shifts the hash
//! left and adds a fixed pseudo-random value for that byte. A boundary is
//! placed where the masked high bits of the hash are zero. With normalized
//! chunking a stricter mask is used before the average size and a looser
//! one after it, which tightens the size distribution around the average.
//!
//! Because the hash only depends on the bytes since the chunk start,
//! an insertion shifts at most the boundaries around it; identical
//! content elsewhere produces identical chunks.

use crate::config::ChunkerConfig;
use crate::error::{CoreError, CoreResult};
use bytes::{Bytes, BytesMut};
use std::io::{self, Read};
use syncvault_protocol::ChunkChecksum;

/// Gear table, derived from splitmix64 at compile time.
const GEAR: [u64; 256] = gear_table();

const fn gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state: u64 = 0x5356_4155_4c54_2d31;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// Mask selecting the top `bits` bits.
const fn high_mask(bits: u32) -> u64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        u64::MAX
    } else {
        ((1u64 << bits) - 1) << (64 - bits)
    }
}

/// A content-defined byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// SHA-256 of `data`.
    pub checksum: ChunkChecksum,
    /// Offset of the chunk within its source stream.
    pub offset: u64,
    /// Chunk bytes.
    pub data: Bytes,
}

impl Chunk {
    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length chunk (never produced by the chunker).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reference used when recording a file version.
    #[must_use]
    pub fn to_ref(&self) -> ChunkRef {
        ChunkRef {
            checksum: self.checksum,
            length: self.data.len() as u32,
        }
    }
}

/// Checksum and length of a chunk, as recorded in a file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    /// Chunk checksum.
    pub checksum: ChunkChecksum,
    /// Chunk length in bytes.
    pub length: u32,
}

/// Splits byte streams into content-defined chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    mask_strict: u64,
    mask_loose: u64,
}

impl Chunker {
    /// Creates a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: ChunkerConfig) -> CoreResult<Self> {
        config.validate()?;
        let bits = config.avg_size.trailing_zeros();
        Ok(Self {
            config,
            mask_strict: high_mask(bits + 1),
            mask_loose: high_mask(bits.saturating_sub(1)),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily chunks everything `reader` yields.
    pub fn chunks<R: Read>(&self, reader: R) -> ChunkStream<'_, R> {
        ChunkStream {
            chunker: self,
            reader,
            buffer: BytesMut::with_capacity(self.config.max_size),
            offset: 0,
            eof: false,
            failed: false,
        }
    }

    /// Chunks an in-memory buffer.
    #[must_use]
    pub fn chunk_bytes(&self, data: &[u8]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let len = self.cut_point(&data[offset..]);
            let piece = &data[offset..offset + len];
            chunks.push(Chunk {
                checksum: ChunkChecksum::digest(piece),
                offset: offset as u64,
                data: Bytes::copy_from_slice(piece),
            });
            offset += len;
        }
        chunks
    }

    /// Length of the first chunk of `data`, which holds all remaining input
    /// or at least `max_size` bytes.
    fn cut_point(&self, data: &[u8]) -> usize {
        let ChunkerConfig {
            min_size,
            avg_size,
            max_size,
        } = self.config;

        if data.len() <= min_size {
            return data.len();
        }
        let end = data.len().min(max_size);
        let normal = avg_size.min(end);

        let mut hash = 0u64;
        let mut i = min_size;
        while i < normal {
            hash = (hash << 1).wrapping_add(GEAR[data[i] as usize]);
            if hash & self.mask_strict == 0 {
                return i + 1;
            }
            i += 1;
        }
        while i < end {
            hash = (hash << 1).wrapping_add(GEAR[data[i] as usize]);
            if hash & self.mask_loose == 0 {
                return i + 1;
            }
            i += 1;
        }
        end
    }
}

/// Iterator over the chunks of a reader.
///
/// Yields `Err` at most once, after which it is exhausted.
#[derive(Debug)]
pub struct ChunkStream<'a, R> {
    chunker: &'a Chunker,
    reader: R,
    buffer: BytesMut,
    offset: u64,
    eof: bool,
    failed: bool,
}

impl<R: Read> ChunkStream<'_, R> {
    fn fill(&mut self) -> io::Result<()> {
        let max = self.chunker.config.max_size;
        let mut scratch = [0u8; 16 * 1024];
        while !self.eof && self.buffer.len() < max {
            let want = (max - self.buffer.len()).min(scratch.len());
            match self.reader.read(&mut scratch[..want]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ChunkStream<'_, R> {
    type Item = CoreResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(err) = self.fill() {
            self.failed = true;
            return Some(Err(CoreError::Io(err)));
        }
        if self.buffer.is_empty() {
            return None;
        }

        let len = self.chunker.cut_point(&self.buffer);
        let data = self.buffer.split_to(len).freeze();
        let chunk = Chunk {
            checksum: ChunkChecksum::digest(&data),
            offset: self.offset,
            data,
        };
        self.offset += len as u64;
        Some(Ok(chunk))
    }
}

impl<R: Read> std::iter::FusedIterator for ChunkStream<'_, R> {}
