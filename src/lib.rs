//! Twitter demographic inference pipeline.
//!
//! This library fetches Twitter profiles, normalizes them into the canonical
//! records a multimodal age/gender/organization model consumes, runs the model
//! through a pluggable inference backend and caches results on disk.
//!
//! # Modules
//!
//! - `checkpoint`: Content-keyed whole-run checkpoints with integrity checks.
//! - `config`: Configuration and Twitter credentials.
//! - `errors`: Error handling types.
//! - `id_index`: Id-to-name index used to name batch outputs.
//! - `images`: Profile image download and resize.
//! - `inference`: Inference engine trait and HTTP backend.
//! - `lang`: Bio language detection.
//! - `models`: Canonical records and predictions.
//! - `normalizer`: Raw Twitter objects to canonical records.
//! - `oauth`: OAuth1 request signing.
//! - `pipeline`: Single-user and batch orchestration.
//! - `twitter_client`: Twitter REST API client.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod id_index;
pub mod images;
pub mod inference;
pub mod lang;
pub mod models;
pub mod normalizer;
pub mod oauth;
pub mod pipeline;
pub mod twitter_client;
