use std::fmt;

/// Crate-wide error type.
///
/// Network and API failures on the lookup paths are usually logged and turned
/// into `Ok(None)` by the pipeline; the variants here surface the failures a
/// caller has to act on.
#[derive(Debug)]
pub enum M3Error {
    /// Filesystem error reading or writing caches, images or outputs.
    Io(std::io::Error),
    /// Malformed JSON in a cache file, checkpoint or API payload.
    Json(serde_json::Error),
    /// Error interacting with the Twitter API or the inference server.
    ExternalApiError(String),
    /// Invalid or missing configuration.
    ConfigError(String),
    /// Image could not be decoded, resized or encoded.
    ImageError(String),
    /// Prediction ids do not correspond to the ids of the input batch.
    BatchMismatch {
        /// Input ids with no prediction.
        missing: Vec<String>,
        /// Predicted ids that were not part of the input.
        unexpected: Vec<String>,
    },
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<M3Error>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for M3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            M3Error::Io(e) => write!(f, "I/O error: {}", e),
            M3Error::Json(e) => write!(f, "JSON error: {}", e),
            M3Error::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            M3Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            M3Error::ImageError(msg) => write!(f, "Image error: {}", msg),
            M3Error::BatchMismatch {
                missing,
                unexpected,
            } => write!(
                f,
                "Prediction batch does not match input batch (missing: {:?}, unexpected: {:?})",
                missing, unexpected
            ),
            M3Error::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for M3Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            M3Error::Io(e) => Some(e),
            M3Error::Json(e) => Some(e),
            M3Error::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for M3Error {
    fn from(err: std::io::Error) -> Self {
        M3Error::Io(err)
    }
}

impl From<serde_json::Error> for M3Error {
    fn from(err: serde_json::Error) -> Self {
        M3Error::Json(err)
    }
}

impl From<reqwest::Error> for M3Error {
    fn from(err: reqwest::Error) -> Self {
        M3Error::ExternalApiError(err.to_string())
    }
}

impl From<image::ImageError> for M3Error {
    fn from(err: image::ImageError) -> Self {
        M3Error::ImageError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `M3Error` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, M3Error>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, M3Error>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<M3Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T, M3Error> {
        self.map_err(|e| M3Error::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, M3Error>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| M3Error::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_display() {
        let err: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        let err = err.context("Failed to read cache/jack.json").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.starts_with("Failed to read cache/jack.json: I/O error"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_batch_mismatch_display() {
        let err = M3Error::BatchMismatch {
            missing: vec!["1".to_string()],
            unexpected: vec!["2".to_string()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("missing: [\"1\"]"));
        assert!(rendered.contains("unexpected: [\"2\"]"));
    }
}
