use std::collections::HashMap;
use std::path::Path;

use crate::errors::{M3Error, ResultExt};

/// Bidirectional mapping between platform user ids and human-readable names.
///
/// Loaded once from a `{ "<name>": "<id>", ... }` JSON file. Only used to
/// name the per-user output files of a batch run.
#[derive(Debug, Clone, Default)]
pub struct IdNameIndex {
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
}

impl IdNameIndex {
    pub fn from_name_to_id(name_to_id: HashMap<String, String>) -> Self {
        let id_to_name = name_to_id
            .iter()
            .map(|(name, id)| (id.clone(), name.clone()))
            .collect();
        Self {
            name_to_id,
            id_to_name,
        }
    }

    /// Reads a `name → id` JSON object. Numeric ids are accepted and stored as strings.
    pub fn load(path: &Path) -> Result<Self, M3Error> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read id index {}", path.display()))?;
        let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse id index {}", path.display()))?;

        let mut name_to_id = HashMap::with_capacity(parsed.len());
        for (name, id) in parsed {
            let id = match id {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    tracing::warn!("Skipping {} in id index: unsupported id {}", name, other);
                    continue;
                }
            };
            name_to_id.insert(name, id);
        }

        let index = Self::from_name_to_id(name_to_id);
        tracing::info!("Loaded id index with {} users from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn name_for(&self, id: &str) -> Option<&str> {
        self.id_to_name.get(id).map(String::as_str)
    }

    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.name_to_id.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_inverts_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_name2id.json");
        std::fs::write(&path, r#"{"nasa": "11348282", "jack": 12, "bad": null}"#).unwrap();

        let index = IdNameIndex::load(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.name_for("11348282"), Some("nasa"));
        assert_eq!(index.name_for("12"), Some("jack"));
        assert_eq!(index.id_for("nasa"), Some("11348282"));
        assert_eq!(index.name_for("999"), None);
    }

    #[test]
    fn test_load_missing_file() {
        let err = IdNameIndex::load(Path::new("/nonexistent/user_name2id.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read id index"));
    }
}
