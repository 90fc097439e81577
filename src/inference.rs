//! Demographic inference backends.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::M3Error;
use crate::models::{Predictions, UserRecord};

/// Runs the multimodal model over a batch of canonical records.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Predicts attributes for every record, keyed by `UserRecord::id`.
    ///
    /// `num_workers` is forwarded to the backend's data loader; the pipeline
    /// always passes 0.
    async fn infer(
        &self,
        users: &[UserRecord],
        batch_size: usize,
        num_workers: usize,
    ) -> Result<Predictions, M3Error>;
}

#[derive(Serialize)]
struct InferRequest<'a> {
    batch_size: usize,
    num_workers: usize,
    users: &'a [UserRecord],
}

/// Engine that delegates to a model server over HTTP (`POST {base}/infer`).
#[derive(Clone)]
pub struct HttpInferenceEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInferenceEngine {
    pub fn new(base_url: String) -> Result<Self, M3Error> {
        // Large batches on CPU can take a while
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| {
                M3Error::ExternalApiError(format!("Failed to create inference client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl InferenceEngine for HttpInferenceEngine {
    async fn infer(
        &self,
        users: &[UserRecord],
        batch_size: usize,
        num_workers: usize,
    ) -> Result<Predictions, M3Error> {
        let url = format!("{}/infer", self.base_url);
        tracing::info!(
            "Running inference on {} users (batch_size={}, num_workers={})",
            users.len(),
            batch_size,
            num_workers
        );

        let response = self
            .client
            .post(&url)
            .json(&InferRequest {
                batch_size,
                num_workers,
                users,
            })
            .send()
            .await
            .map_err(|e| M3Error::ExternalApiError(format!("Inference request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Inference server returned error {}: {}", status, error_text);
            return Err(M3Error::ExternalApiError(format!(
                "Inference server returned {}: {}",
                status, error_text
            )));
        }

        let predictions: Predictions = response.json().await.map_err(|e| {
            M3Error::ExternalApiError(format!("Failed to parse inference response: {}", e))
        })?;

        tracing::info!("Received {} predictions", predictions.len());
        Ok(predictions)
    }
}
