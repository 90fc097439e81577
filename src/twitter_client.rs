use std::time::Duration;

use reqwest;
use serde_json::Value;
use tracing;

use crate::config::Credentials;
use crate::errors::M3Error;
use crate::oauth;

/// Lookup key for `users/show.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    ScreenName(String),
    Id(String),
}

impl UserLookup {
    fn query(&self) -> (&'static str, &str) {
        match self {
            UserLookup::ScreenName(name) => ("screen_name", name.as_str()),
            UserLookup::Id(id) => ("id", id.as_str()),
        }
    }
}

/// Client for the Twitter REST API v1.1, signing every request with OAuth1.
#[derive(Clone)]
pub struct TwitterClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl TwitterClient {
    /// Creates a new `TwitterClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API root, e.g. `https://api.twitter.com/1.1`.
    /// * `credentials` - OAuth1 consumer and access token pairs.
    pub fn new(base_url: String, credentials: Credentials) -> Result<Self, M3Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                M3Error::ExternalApiError(format!("Failed to create Twitter client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Fetches a user object via `GET users/show.json`.
    ///
    /// # Returns
    ///
    /// * `Result<serde_json::Value, M3Error>` - The raw user object. Any status
    ///   other than 200 is an error.
    pub async fn show_user(&self, lookup: &UserLookup) -> Result<Value, M3Error> {
        let url = format!("{}/users/show.json", self.base_url);
        let (key, value) = lookup.query();
        tracing::info!("GET /users/show.json?{}={}", key, value);

        let auth = oauth::authorization_header(
            &self.credentials,
            "GET",
            &url,
            &[(key, value)],
            &uuid::Uuid::new_v4().simple().to_string(),
            chrono::Utc::now().timestamp(),
        );

        let response = self
            .client
            .get(&url)
            .query(&[(key, value)])
            .header("Authorization", auth)
            .send()
            .await
            .map_err(|e| M3Error::ExternalApiError(format!("Twitter request failed: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(M3Error::ExternalApiError(format!(
                "Response {} from Twitter: {}",
                status, error_text
            )));
        }

        let data = response.json().await.map_err(|e| {
            M3Error::ExternalApiError(format!("Failed to parse Twitter response: {}", e))
        })?;

        Ok(data)
    }
}
