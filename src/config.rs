use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{M3Error, ResultExt};

pub const DEFAULT_TWITTER_API_BASE_URL: &str = "https://api.twitter.com/1.1";
pub const DEFAULT_PROFILE_IMG: &str = "assets/tw_default_profile.png";
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// OAuth1 four-tuple used to sign Twitter API requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("access_secret", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Parses a flat `key = value` credentials file (no section header).
    ///
    /// Blank lines and lines starting with `#` or `;` are ignored. Both `=`
    /// and `:` are accepted as separators. Keys are case-insensitive.
    pub fn parse(contents: &str) -> Result<Self, M3Error> {
        let mut values: HashMap<String, String> = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                return Err(M3Error::ConfigError(format!(
                    "Malformed credentials line: {}",
                    line
                )));
            };
            let (key, value) = line.split_at(split);
            values.insert(key.trim().to_lowercase(), value[1..].trim().to_string());
        }

        let mut take = |key: &str| -> Result<String, M3Error> {
            match values.remove(key) {
                Some(v) if !v.is_empty() => Ok(v),
                Some(_) => Err(M3Error::ConfigError(format!("{} cannot be empty", key))),
                None => Err(M3Error::ConfigError(format!(
                    "{} missing from credentials",
                    key
                ))),
            }
        };

        Ok(Self {
            api_key: take("api_key")?,
            api_secret: take("api_secret")?,
            access_token: take("access_token")?,
            access_secret: take("access_secret")?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, M3Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        Self::parse(&contents)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub inference_url: Option<String>,
    pub twitter_api_base_url: String,
    pub default_profile_img: PathBuf,
    pub batch_size: usize,
    pub id2name_path: Option<PathBuf>,
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_dir: PathBuf::from("cache"),
            inference_url: None,
            twitter_api_base_url: DEFAULT_TWITTER_API_BASE_URL.to_string(),
            default_profile_img: PathBuf::from(DEFAULT_PROFILE_IMG),
            batch_size: DEFAULT_BATCH_SIZE,
            id2name_path: None,
            credentials: None,
        }
    }
}

fn http_url(name: &str, url: String) -> anyhow::Result<String> {
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    let parsed = url::Url::parse(url.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        anyhow::bail!("{} must be an http:// or https:// URL with a host", name);
    }
    Ok(url.trim().trim_end_matches('/').to_string())
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let credentials = match (
            non_empty("TWITTER_API_KEY"),
            non_empty("TWITTER_API_SECRET"),
            non_empty("TWITTER_ACCESS_TOKEN"),
            non_empty("TWITTER_ACCESS_SECRET"),
        ) {
            (Some(api_key), Some(api_secret), Some(access_token), Some(access_secret)) => {
                Some(Credentials {
                    api_key,
                    api_secret,
                    access_token,
                    access_secret,
                })
            }
            (None, None, None, None) => None,
            _ => anyhow::bail!(
                "TWITTER_API_KEY, TWITTER_API_SECRET, TWITTER_ACCESS_TOKEN and TWITTER_ACCESS_SECRET must be set together"
            ),
        };

        let config = Self {
            data_dir: non_empty("M3_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            cache_dir: non_empty("M3_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cache")),
            inference_url: non_empty("M3_INFERENCE_URL")
                .map(|url| http_url("M3_INFERENCE_URL", url))
                .transpose()?,
            twitter_api_base_url: http_url(
                "TWITTER_API_BASE_URL",
                std::env::var("TWITTER_API_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_TWITTER_API_BASE_URL.to_string()),
            )?,
            default_profile_img: non_empty("M3_DEFAULT_PROFILE_IMG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILE_IMG)),
            batch_size: std::env::var("M3_BATCH_SIZE")
                .unwrap_or_else(|_| DEFAULT_BATCH_SIZE.to_string())
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow::anyhow!("M3_BATCH_SIZE must be a positive number"))?,
            id2name_path: non_empty("M3_ID2NAME_PATH").map(PathBuf::from),
            credentials,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Data dir: {}", config.data_dir.display());
        tracing::debug!("Cache dir: {}", config.cache_dir.display());
        tracing::debug!("Twitter API base URL: {}", config.twitter_api_base_url);
        if let Some(ref url) = config.inference_url {
            tracing::debug!("Inference server: {}", url);
        }
        tracing::debug!("Batch size: {}", config.batch_size);

        Ok(config)
    }

    /// Creates the cache directory if it does not exist yet.
    pub fn ensure_dirs(&self) -> Result<(), M3Error> {
        if !self.cache_dir.is_dir() {
            tracing::info!("Dir {} does not exist. Creating now.", self.cache_dir.display());
            std::fs::create_dir_all(&self.cache_dir)
                .with_context(|| format!("Failed to create {}", self.cache_dir.display()))?;
            tracing::info!("Dir {} created.", self.cache_dir.display());
        }
        Ok(())
    }

    pub fn profile_img_full_dir(&self) -> PathBuf {
        self.data_dir.join("profile_img_full")
    }

    pub fn profile_img_resize_dir(&self) -> PathBuf {
        self.data_dir.join("profile_img_resize")
    }

    pub fn inferred_attributes_dir(&self) -> PathBuf {
        self.data_dir.join("inferred_user_attributes")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials_file() {
        let contents = "\
# keys for the research account
api_key = abc
API_SECRET=def
access_token : ghi
access_secret = jkl==
";
        let creds = Credentials::parse(contents).unwrap();
        assert_eq!(creds.api_key, "abc");
        assert_eq!(creds.api_secret, "def");
        assert_eq!(creds.access_token, "ghi");
        assert_eq!(creds.access_secret, "jkl==");
    }

    #[test]
    fn test_parse_credentials_missing_key() {
        let err = Credentials::parse("api_key = abc\napi_secret = def\n").unwrap_err();
        assert!(err.to_string().contains("access_token missing"));
    }

    #[test]
    fn test_parse_credentials_malformed_line() {
        assert!(Credentials::parse("just some text").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials {
            api_key: "key".to_string(),
            api_secret: "s3cret".to_string(),
            access_token: "tok".to_string(),
            access_secret: "s3cret2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_http_url_validation() {
        assert!(http_url("X", "ftp://host".to_string()).is_err());
        assert!(http_url("X", " ".to_string()).is_err());
        assert!(http_url("X", "http//missing-colon".to_string()).is_err());
        assert!(http_url("X", "https://".to_string()).is_err());
        assert_eq!(
            http_url("X", "https://api.twitter.com/1.1/".to_string()).unwrap(),
            "https://api.twitter.com/1.1"
        );
        assert_eq!(
            http_url("X", "http://localhost:8000/".to_string()).unwrap(),
            "http://localhost:8000"
        );
    }

    #[test]
    fn test_data_layout() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/m3"),
            ..Config::default()
        };
        assert_eq!(
            config.profile_img_resize_dir(),
            PathBuf::from("/tmp/m3/profile_img_resize")
        );
        assert_eq!(
            config.inferred_attributes_dir(),
            PathBuf::from("/tmp/m3/inferred_user_attributes")
        );
    }
}
