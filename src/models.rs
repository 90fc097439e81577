use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Language code assigned when a bio is empty or cannot be classified.
pub const UNKNOWN_LANG: &str = "un";

/// Id used for a profile without one. Only safe for single-user batches.
pub const MISSING_ID: &str = "dummy";

// ============ Inference input ============

/// Canonical user record consumed by the inference engine.
///
/// Field order matches the serialized key order expected by the model server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Profile bio; empty when the account has none.
    pub description: String,
    /// Platform user id as a string.
    pub id: String,
    /// Local path (or URL) of the 224x224 profile image.
    pub img_path: String,
    /// ISO 639-1 language code or [`UNKNOWN_LANG`].
    pub lang: String,
    /// Display name.
    pub name: String,
    /// Handle without the leading `@`.
    pub screen_name: String,
}

// ============ Inference output ============

/// Probability distribution over the labels of one attribute.
pub type Distribution = BTreeMap<String, f64>;

/// Predicted attribute distributions for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// e.g. `male` / `female`.
    pub gender: Distribution,
    /// e.g. `<=18` / `19-29` / `30-39` / `>=40`.
    pub age: Distribution,
    /// e.g. `non-org` / `is-org`.
    pub org: Distribution,
    /// Any further fields the engine returns, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Prediction {
    /// Most probable label of a distribution, ties broken by label order.
    pub fn most_likely(dist: &Distribution) -> Option<(&str, f64)> {
        dist.iter()
            .fold(None, |best: Option<(&str, f64)>, (label, p)| match best {
                Some((_, bp)) if bp >= *p => best,
                _ => Some((label.as_str(), *p)),
            })
    }

    /// One-line summary such as `gender=female(0.91) age=19-29(0.55) org=non-org(0.99)`.
    pub fn summary(&self) -> String {
        [("gender", &self.gender), ("age", &self.age), ("org", &self.org)]
            .iter()
            .filter_map(|(attr, dist)| {
                Self::most_likely(dist).map(|(label, p)| format!("{}={}({:.2})", attr, label, p))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Predictions keyed by user id.
pub type Predictions = BTreeMap<String, Prediction>;

/// Body of a single-user cache file: what was sent to the model and what it
/// predicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub input: UserRecord,
    pub output: Prediction,
}

// ============ Batch results ============

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Records sent to the inference engine.
    pub users: usize,
    /// Prediction files written.
    pub written: usize,
    /// Predictions whose id had no entry in the id-to-name index.
    pub errors: usize,
    /// Raw records dropped because they carried no id.
    pub skipped: usize,
    /// Whether normalized records came from a checkpoint.
    pub records_from_checkpoint: bool,
    /// Whether predictions came from a checkpoint.
    pub predictions_from_checkpoint: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(pairs: &[(&str, f64)]) -> Distribution {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_user_record_json_keys() {
        let record = UserRecord {
            description: "bio".to_string(),
            id: "42".to_string(),
            img_path: "cache/42_224x224.jpg".to_string(),
            lang: "en".to_string(),
            name: "Jack".to_string(),
            screen_name: "jack".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["description", "id", "img_path", "lang", "name", "screen_name"]
        );
    }

    #[test]
    fn test_most_likely() {
        let d = dist(&[("male", 0.2), ("female", 0.8)]);
        assert_eq!(Prediction::most_likely(&d), Some(("female", 0.8)));
        assert_eq!(Prediction::most_likely(&Distribution::new()), None);
    }

    #[test]
    fn test_summary() {
        let p = Prediction {
            gender: dist(&[("male", 0.1), ("female", 0.9)]),
            age: dist(&[("<=18", 0.1), ("19-29", 0.5), ("30-39", 0.3), (">=40", 0.1)]),
            org: dist(&[("non-org", 0.99), ("is-org", 0.01)]),
            extra: BTreeMap::new(),
        };
        assert_eq!(
            p.summary(),
            "gender=female(0.90) age=19-29(0.50) org=non-org(0.99)"
        );
    }

    #[test]
    fn test_prediction_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "gender": {"male": 0.3, "female": 0.7},
            "age": {"19-29": 1.0},
            "org": {"non-org": 1.0},
            "model_version": "m3-1.0",
            "ethnicity": {"a": 0.5, "b": 0.5}
        });
        let p: Prediction = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(p.extra["model_version"], "m3-1.0");
        assert_eq!(serde_json::to_value(&p).unwrap(), raw);
    }
}
