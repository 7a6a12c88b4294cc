//! Repository marker.

use crate::envelope;
use crate::error::{ProtocolError, ProtocolResult};
use crate::FORMAT_VERSION;
use serde::{Deserialize, Serialize};

/// Envelope magic for the repository marker.
pub const REPO_MAGIC: [u8; 4] = *b"SVRP";

/// Encryption parameters shared by all replicas of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    /// Salt for password key derivation.
    pub salt: Vec<u8>,
}

/// Contents of the repository marker, written once at creation.
///
/// Never encrypted: replicas read it to learn whether and how to derive
/// the repository key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoManifest {
    /// Format version the repository was created with.
    pub format_version: u16,
    /// Encryption parameters, `None` for plaintext repositories.
    pub encryption: Option<EncryptionInfo>,
}

impl RepoManifest {
    /// A plaintext repository.
    #[must_use]
    pub fn plaintext() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            encryption: None,
        }
    }

    /// An encrypted repository using `salt`.
    #[must_use]
    pub fn encrypted(salt: Vec<u8>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            encryption: Some(EncryptionInfo { salt }),
        }
    }

    /// Returns true if repository content is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Encodes the marker.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| ProtocolError::encode(e.to_string()))?;
        Ok(envelope::seal(&REPO_MAGIC, 0, &payload))
    }

    /// Decodes a marker.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad envelope or payload.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let env = envelope::open(&REPO_MAGIC, bytes)?;
        ciborium::from_reader(env.payload).map_err(|e| ProtocolError::decode(e.to_string()))
    }
}
