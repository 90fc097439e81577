use std::path::{Path, PathBuf};

use hex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::{M3Error, ResultExt};

/// Whole-run checkpoints keyed by the content of their inputs.
///
/// A batch run writes two of these: the normalized records (keyed by the raw
/// input) and the predictions (keyed by the normalized records). Because the
/// file name embeds the SHA-256 of the input, a changed input never hits a
/// stale checkpoint. Each file also stores a checksum of its payload:
/// 1. The checksum is computed when the checkpoint is written
/// 2. It is validated when the checkpoint is read
/// 3. Corrupted or hand-edited files are ignored and rebuilt

/// Serialized checkpoint file body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCheckpoint {
    /// Hash of the input this checkpoint was derived from (hex encoded)
    pub input_key: String,
    /// The checkpointed payload (JSON string)
    pub data: String,
    /// SHA-256 checksum of the data (hex encoded)
    pub checksum: String,
}

impl ValidatedCheckpoint {
    pub fn new(input_key: String, data: String) -> Self {
        let checksum = compute_checksum(data.as_bytes());
        Self {
            input_key,
            data,
            checksum,
        }
    }

    /// Returns true if the checksum matches, false if tampered
    pub fn is_valid(&self) -> bool {
        compute_checksum(self.data.as_bytes()) == self.checksum
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content key of a serializable value.
pub fn content_key<T: Serialize + ?Sized>(value: &T) -> Result<String, M3Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(compute_checksum(&bytes))
}

/// A directory of named, content-keyed checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/<name>-<key>.json`
    pub fn path(&self, name: &str, key: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.json", name, key))
    }

    /// Loads a checkpoint, returning `None` when it is absent, unreadable or invalid.
    pub fn load<T: DeserializeOwned>(&self, name: &str, key: &str) -> Option<T> {
        let path = self.path(name, key);
        let raw = std::fs::read_to_string(&path).ok()?;

        let entry: ValidatedCheckpoint = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Ignoring unreadable checkpoint {}: {}", path.display(), e);
                return None;
            }
        };

        if entry.input_key != key || !entry.is_valid() {
            // Checksum mismatch - file was edited or truncated
            tracing::warn!(
                "Checkpoint validation failed for {}. Expected: {}, Data length: {}",
                path.display(),
                entry.checksum,
                entry.data.len()
            );
            return None;
        }

        match serde_json::from_str(&entry.data) {
            Ok(value) => {
                tracing::info!("Loaded checkpoint {}", path.display());
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Checkpoint {} has an unexpected shape: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save<T: Serialize + ?Sized>(
        &self,
        name: &str,
        key: &str,
        value: &T,
    ) -> Result<PathBuf, M3Error> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let entry = ValidatedCheckpoint::new(key.to_string(), serde_json::to_string(value)?);
        let path = self.path(name, key);
        write_atomic(&path, serde_json::to_string(&entry)?.as_bytes())?;
        tracing::info!("Wrote checkpoint {}", path.display());
        Ok(path)
    }
}

/// Writes to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), M3Error> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_validation() {
        let data = r#"[{"id": "1"}]"#.to_string();
        let entry = ValidatedCheckpoint::new("k".to_string(), data.clone());

        assert!(entry.is_valid());
        assert_eq!(entry.data, data);
    }

    #[test]
    fn test_tampered_data_rejected() {
        let mut entry = ValidatedCheckpoint::new("k".to_string(), r#"{"a": 1}"#.to_string());
        entry.data = r#"{"a": 2}"#.to_string();
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_content_key_tracks_input() {
        let a = content_key(&vec!["1", "2"]).unwrap();
        let b = content_key(&vec!["1", "2"]).unwrap();
        let c = content_key(&vec!["2", "1"]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let value = vec!["alice".to_string(), "bob".to_string()];

        let path = store.save("users_li", "abc", &value).unwrap();
        assert!(path.ends_with("users_li-abc.json"));

        let loaded: Option<Vec<String>> = store.load("users_li", "abc");
        assert_eq!(loaded, Some(value));

        let other: Option<Vec<String>> = store.load("users_li", "def");
        assert_eq!(other, None);
    }

    #[test]
    fn test_tampered_file_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let path = store.save("users_li", "abc", &vec!["original"]).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("original", "hacked")).unwrap();

        let loaded: Option<Vec<String>> = store.load("users_li", "abc");
        assert_eq!(loaded, None);
    }
}
