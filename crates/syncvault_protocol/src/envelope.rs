//! Binary envelope shared by all repository objects.
//!
//! ```text
//! ┌──────────┬─────────────────┬───────┬─────────────┐
//! │ magic(4) │ format (u16 LE) │ flags │ payload ... │
//! └──────────┴─────────────────┴───────┴─────────────┘
//! ```

use crate::error::{ProtocolError, ProtocolResult};
use crate::FORMAT_VERSION;

/// Envelope header size in bytes.
pub const HEADER_SIZE: usize = 7;

/// Flag bit: the payload is encrypted.
pub const FLAG_ENCRYPTED: u8 = 0x01;

/// A parsed envelope borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// Format version the object was written with.
    pub format: u16,
    /// Flag bits.
    pub flags: u8,
    /// Payload bytes.
    pub payload: &'a [u8],
}

impl Envelope<'_> {
    /// Returns true if [`FLAG_ENCRYPTED`] is set.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Frames `payload` with `magic`, the current format version and `flags`.
#[must_use]
pub fn seal(magic: &[u8; 4], flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(flags);
    out.extend_from_slice(payload);
    out
}

/// Parses an envelope, checking magic and format version.
///
/// # Errors
///
/// Returns an error if the input is shorter than the header, the magic
/// differs, or the format version is newer than this build supports.
pub fn open<'a>(magic: &[u8; 4], bytes: &'a [u8]) -> ProtocolResult<Envelope<'a>> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            what: "envelope header",
        });
    }
    if &bytes[..4] != magic {
        return Err(ProtocolError::InvalidMagic {
            expected: *magic,
            found: bytes[..4].to_vec(),
        });
    }
    let format = u16::from_le_bytes([bytes[4], bytes[5]]);
    if format == 0 || format > FORMAT_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: format,
            supported: FORMAT_VERSION,
        });
    }
    Ok(Envelope {
        format,
        flags: bytes[6],
        payload: &bytes[HEADER_SIZE..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let framed = seal(b"TEST", FLAG_ENCRYPTED, b"payload");
        let env = open(b"TEST", &framed).unwrap();
        assert!(env.is_encrypted());
        assert_eq!(env.format, FORMAT_VERSION);
        assert_eq!(env.payload, b"payload");
    }

    #[test]
    fn rejects_wrong_magic_and_version() {
        let framed = seal(b"AAAA", 0, b"");
        assert!(matches!(
            open(b"BBBB", &framed),
            Err(ProtocolError::InvalidMagic { .. })
        ));

        let mut future = framed.clone();
        future[4] = 0xFF;
        assert!(matches!(
            open(b"AAAA", &future),
            Err(ProtocolError::UnsupportedVersion { .. })
        ));

        assert!(matches!(
            open(b"AAAA", &framed[..3]),
            Err(ProtocolError::Truncated { .. })
        ));
    }
}
