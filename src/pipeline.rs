/// Inference pipeline
///
/// Drives the single-user and batch workflows:
/// 1. Look up profiles (single-user cache first, then Twitter)
/// 2. Normalize them into canonical records
/// 3. Run the inference engine
/// 4. Persist results (per-key cache file or per-user output files)
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::checkpoint::{content_key, CheckpointStore};
use crate::config::{Config, Credentials};
use crate::errors::{M3Error, ResultExt};
use crate::id_index::IdNameIndex;
use crate::images::ImageFetcher;
use crate::inference::InferenceEngine;
use crate::lang::LanguageDetector;
use crate::models::{BatchReport, InferenceOutput, Predictions, UserRecord, MISSING_ID};
use crate::normalizer::{user_id, ImageLayout, NormalizeOptions, Normalizer};
use crate::twitter_client::{TwitterClient, UserLookup};

/// Checkpoint of normalized records, keyed by the raw batch.
pub const RECORDS_CHECKPOINT: &str = "user_features_li";
/// Checkpoint of predictions, keyed by the normalized records.
pub const PREDICTIONS_CHECKPOINT: &str = "users_li";

/// Data loader workers requested from the engine. Batch runs stay sequential.
const NUM_WORKERS: usize = 0;

/// Cache key for a screen name: lower-cased, without a leading `@`.
pub fn screen_name_key(screen_name: &str) -> String {
    let lowered = screen_name.trim().to_lowercase();
    match lowered.strip_prefix('@') {
        Some(stripped) => stripped.to_string(),
        None => lowered,
    }
}

/// Screen names are `[A-Za-z0-9_]+`; anything else cannot name a cache file.
fn is_valid_screen_name(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_user_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// A name from the id index must stay a single file inside the output directory.
fn is_safe_file_stem(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Explicit pipeline context: configuration, collaborators and the optional
/// authenticated Twitter session.
pub struct M3Twitter {
    config: Config,
    twitter: Option<TwitterClient>,
    engine: Arc<dyn InferenceEngine>,
    normalizer: Normalizer,
    id_index: IdNameIndex,
    checkpoints: CheckpointStore,
}

impl M3Twitter {
    pub fn new(
        config: Config,
        engine: Arc<dyn InferenceEngine>,
        fetcher: Arc<dyn ImageFetcher>,
        detector: Arc<dyn LanguageDetector>,
    ) -> Result<Self, M3Error> {
        config.ensure_dirs()?;
        let normalizer = Normalizer::new(
            fetcher,
            detector,
            config.cache_dir.clone(),
            config.default_profile_img.clone(),
        );
        let checkpoints = CheckpointStore::new(config.checkpoint_dir());
        Ok(Self {
            config,
            twitter: None,
            engine,
            normalizer,
            id_index: IdNameIndex::default(),
            checkpoints,
        })
    }

    pub fn with_id_index(mut self, id_index: IdNameIndex) -> Self {
        self.id_index = id_index;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_twitter_initialized(&self) -> bool {
        self.twitter.is_some()
    }

    /// Creates the authenticated Twitter session used by the lookup methods.
    pub fn twitter_init(&mut self, credentials: Credentials) -> Result<(), M3Error> {
        let client = TwitterClient::new(self.config.twitter_api_base_url.clone(), credentials)?;
        self.twitter = Some(client);
        tracing::info!("Twitter session initialized");
        Ok(())
    }

    /// Same as [`Self::twitter_init`], reading the credentials from a `key = value` file.
    pub fn twitter_init_from_file(&mut self, auth_file: &Path) -> Result<(), M3Error> {
        let credentials = Credentials::from_file(auth_file)?;
        self.twitter_init(credentials)
    }

    // ============ Single-user path ============

    /// Predicts attributes for a screen name (with or without the `@`).
    ///
    /// Unless `skip_cache`, a result already in the cache directory is
    /// returned as-is without contacting Twitter. Lookup failures are logged
    /// and yield `Ok(None)`.
    pub async fn infer_screen_name(
        &self,
        screen_name: &str,
        skip_cache: bool,
    ) -> Result<Option<InferenceOutput>, M3Error> {
        let key = screen_name_key(screen_name);
        if !is_valid_screen_name(&key) {
            tracing::warn!("Invalid screen name {:?}", screen_name);
            return Ok(None);
        }
        self.infer_cached(&key, UserLookup::ScreenName(key.clone()), skip_cache)
            .await
    }

    /// Predicts attributes for a numeric user id.
    pub async fn infer_id(
        &self,
        id: &str,
        skip_cache: bool,
    ) -> Result<Option<InferenceOutput>, M3Error> {
        let id = id.trim();
        if !is_valid_user_id(id) {
            tracing::warn!("Invalid user id {:?}", id);
            return Ok(None);
        }
        self.infer_cached(id, UserLookup::Id(id.to_string()), skip_cache)
            .await
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{}.json", key))
    }

    async fn infer_cached(
        &self,
        key: &str,
        lookup: UserLookup,
        skip_cache: bool,
    ) -> Result<Option<InferenceOutput>, M3Error> {
        let path = self.cache_path(key);
        if skip_cache {
            tracing::info!("skip_cache is True. Fetching data from Twitter for {}.", key);
        } else {
            match read_cached(&path).await {
                Some(output) => {
                    tracing::info!("Results from cache for {}.", key);
                    return Ok(Some(output));
                }
                None => {
                    tracing::info!(
                        "Results not in cache. Fetching data from Twitter for {}.",
                        key
                    );
                }
            }
        }

        let Some(output) = self.twitter_api(&lookup).await? else {
            return Ok(None);
        };

        write_json_pretty(&path, &output).await?;
        Ok(Some(output))
    }

    async fn twitter_api(&self, lookup: &UserLookup) -> Result<Option<InferenceOutput>, M3Error> {
        let Some(ref twitter) = self.twitter else {
            tracing::error!(
                "You must call twitter_init(...) before using this method. Provide credentials via TWITTER_* variables or --auth-file."
            );
            return Ok(None);
        };

        let data = match twitter.show_user(lookup).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Invalid response from Twitter: {}", e);
                return Ok(None);
            }
        };

        match self.process_twitter(&data).await {
            Ok(output) => Ok(Some(output)),
            Err(e @ M3Error::ExternalApiError(_)) => {
                tracing::warn!("Inference failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Normalizes one user object and runs the engine on it (batch of one).
    pub async fn process_twitter(&self, data: &Value) -> Result<InferenceOutput, M3Error> {
        let id = user_id(data).unwrap_or_else(|| {
            tracing::warn!("Could not retrieve id_str");
            MISSING_ID.to_string()
        });
        let layout = ImageLayout::cache(&self.config.cache_dir);
        let record = self.normalizer.normalize_profile(data, &id, &layout).await;

        let mut preds = self
            .engine
            .infer(std::slice::from_ref(&record), 1, NUM_WORKERS)
            .await?;

        let output = preds.remove(&record.id).ok_or_else(|| M3Error::BatchMismatch {
            missing: vec![record.id.clone()],
            unexpected: preds.keys().cloned().collect(),
        })?;

        Ok(InferenceOutput {
            input: record,
            output,
        })
    }

    // ============ Batch path ============

    /// Normalizes a batch of stored user objects, runs inference once over
    /// all of them and writes one prediction file per user, named through the
    /// id-to-name index.
    ///
    /// Normalized records and predictions are checkpointed under keys derived
    /// from their inputs, so re-running the same batch skips downloads and
    /// inference.
    pub async fn process_batch(&self, raw_records: &[Value]) -> Result<BatchReport, M3Error> {
        let mut report = BatchReport::default();

        let records_key = content_key(raw_records)?;
        let users = match self
            .checkpoints
            .load::<Vec<UserRecord>>(RECORDS_CHECKPOINT, &records_key)
        {
            Some(users) => {
                report.records_from_checkpoint = true;
                users
            }
            None => {
                let (users, skipped) = self.normalize_batch(raw_records).await?;
                report.skipped = skipped;
                self.checkpoints
                    .save(RECORDS_CHECKPOINT, &records_key, &users)?;
                users
            }
        };
        report.users = users.len();

        let preds_key = content_key(&users)?;
        let preds = match self
            .checkpoints
            .load::<Predictions>(PREDICTIONS_CHECKPOINT, &preds_key)
        {
            Some(preds) => {
                report.predictions_from_checkpoint = true;
                preds
            }
            None => {
                let preds = self
                    .engine
                    .infer(&users, self.config.batch_size, NUM_WORKERS)
                    .await?;
                check_correspondence(&users, &preds)?;
                self.checkpoints
                    .save(PREDICTIONS_CHECKPOINT, &preds_key, &preds)?;
                preds
            }
        };
        check_correspondence(&users, &preds)?;

        let out_dir = self.config.inferred_attributes_dir();
        tokio::fs::create_dir_all(&out_dir)
            .await
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        for user in &users {
            let Some(pred) = preds.get(&user.id) else {
                continue;
            };
            let Some(name) = self
                .id_index
                .name_for(&user.id)
                .filter(|name| is_safe_file_stem(name))
            else {
                report.errors += 1;
                tracing::error!("{}-th error: user {}", report.errors, user.id);
                continue;
            };
            write_json_pretty(&out_dir.join(format!("{}.json", name)), pred).await?;
            report.written += 1;
        }

        tracing::info!(
            "Batch complete: {} users, {} written, {} errors, {} skipped",
            report.users,
            report.written,
            report.errors,
            report.skipped
        );
        Ok(report)
    }

    async fn normalize_batch(&self, raw_records: &[Value]) -> Result<(Vec<UserRecord>, usize), M3Error> {
        let full_dir = self.config.profile_img_full_dir();
        let resize_dir = self.config.profile_img_resize_dir();
        for dir in [&full_dir, &resize_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let layout = ImageLayout::batch(full_dir, resize_dir);

        let total = raw_records.len();
        let mut users = Vec::with_capacity(total);
        let mut skipped = 0;
        let mut seen = BTreeSet::new();
        for (idx, raw) in raw_records.iter().enumerate() {
            let Some(id) = user_id(raw) else {
                skipped += 1;
                tracing::warn!("[{}/{}] Skipping Twitter user without an id", idx + 1, total);
                continue;
            };
            if !seen.insert(id.clone()) {
                skipped += 1;
                tracing::warn!("[{}/{}] Skipping duplicate user {}", idx + 1, total, id);
                continue;
            }
            tracing::debug!("[{}/{}] Processing Twitter user {}", idx + 1, total, id);
            users.push(self.normalizer.normalize_profile(raw, &id, &layout).await);
        }
        Ok((users, skipped))
    }

    // ============ JSONL transform ============

    /// Converts a JSONL file of tweets or user objects into canonical records,
    /// one per line. Unparseable lines are logged and skipped.
    pub async fn transform_jsonl(
        &self,
        input_file: &Path,
        output_file: &Path,
        opts: &NormalizeOptions,
    ) -> Result<usize, M3Error> {
        let input = tokio::fs::File::open(input_file)
            .await
            .with_context(|| format!("Failed to open {}", input_file.display()))?;
        let mut output = tokio::fs::File::create(output_file)
            .await
            .with_context(|| format!("Failed to create {}", output_file.display()))?;

        let mut lines = BufReader::new(input).lines();
        let mut line_no = 0;
        let mut written = 0;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("{}:{}: invalid JSON: {}", input_file.display(), line_no, e);
                    continue;
                }
            };
            let record = self.normalizer.normalize_object(&value, opts).await;
            let mut encoded = serde_json::to_string(&record)?;
            encoded.push('\n');
            output.write_all(encoded.as_bytes()).await?;
            written += 1;
        }
        output.flush().await?;

        tracing::info!("Transformed {} records into {}", written, output_file.display());
        Ok(written)
    }
}

/// Every input id must have a prediction and every prediction an input.
pub fn check_correspondence(users: &[UserRecord], preds: &Predictions) -> Result<(), M3Error> {
    let input_ids: BTreeSet<&str> = users.iter().map(|u| u.id.as_str()).collect();
    let missing: Vec<String> = input_ids
        .iter()
        .filter(|id| !preds.contains_key(**id))
        .map(|id| id.to_string())
        .collect();
    let unexpected: Vec<String> = preds
        .keys()
        .filter(|id| !input_ids.contains(id.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        tracing::error!(
            "Prediction ids do not match input ids (missing: {:?}, unexpected: {:?})",
            missing,
            unexpected
        );
        Err(M3Error::BatchMismatch {
            missing,
            unexpected,
        })
    }
}

/// Reads every `*.json` file of `dir` in file-name order, up to `limit` records.
pub fn load_raw_records(dir: &Path, limit: Option<usize>) -> Result<Vec<Value>, M3Error> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        if limit.is_some_and(|limit| records.len() >= limit) {
            break;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(M3Error::from)
            .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(M3Error::from));
        match parsed {
            Ok(value) => records.push(value),
            Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
        }
    }
    tracing::info!("Loaded {} user records from {}", records.len(), dir.display());
    Ok(records)
}

async fn read_cached(path: &Path) -> Option<InferenceOutput> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(output) => Some(output),
        Err(e) => {
            tracing::warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
            None
        }
    }
}

/// Pretty JSON with sorted keys.
async fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), M3Error> {
    // Round-trip through Value so object keys come out sorted
    let value = serde_json::to_value(value)?;
    let encoded = serde_json::to_string_pretty(&value)?;
    tokio::fs::write(path, encoded)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
