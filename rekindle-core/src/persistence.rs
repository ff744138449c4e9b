//! Shared persistence utilities: atomic writes, versioned state blobs, digests.
//!
//! Every state blob persisted in a lineage is a JSON envelope
//! `{"kind": ..., "version": ..., "state": {...}}` so that a schema change is
//! detected on load instead of silently misread.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

use crate::error::{Result, SnapshotError};

/// Atomically write raw bytes to a file.
///
/// Writes to a `.tmp` sibling file, then renames onto the target path.
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(sha256_hex(&data))
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    kind: &'a str,
    version: u32,
    state: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    kind: String,
    version: u32,
    state: serde_json::Value,
}

/// A plain state struct with a stable, versioned on-disk schema.
pub trait StateBlob: Serialize + DeserializeOwned {
    /// Schema name recorded in the envelope.
    const KIND: &'static str;
    /// Bumped whenever a field changes meaning.
    const VERSION: u32 = 1;

    fn to_blob(&self) -> Result<Vec<u8>> {
        let envelope = EnvelopeRef {
            kind: Self::KIND,
            version: Self::VERSION,
            state: self,
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    fn from_blob(data: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        if envelope.kind != Self::KIND {
            return Err(SnapshotError::KindMismatch {
                expected: Self::KIND.to_string(),
                found: envelope.kind,
            }
            .into());
        }
        if envelope.version != Self::VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                kind: Self::KIND.to_string(),
                found: envelope.version,
                expected: Self::VERSION,
            }
            .into());
        }
        Ok(serde_json::from_value(envelope.state)?)
    }
}
