/// Record normalization
///
/// Turns raw Twitter user or tweet objects into the canonical records the
/// model consumes:
/// 1. Resolve the user sub-object
/// 2. Resolve the profile image (downloading and resizing when needed)
/// 3. Resolve the bio language
/// 4. Assemble the `UserRecord`
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::images::{self, ImageFetcher};
use crate::lang::LanguageDetector;
use crate::models::{UserRecord, UNKNOWN_LANG};

/// Options for [`Normalizer::normalize_object`].
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Field holding an image path or URL to use instead of the profile image.
    pub img_path_key: Option<String>,
    /// Field holding a precomputed language code.
    pub lang_key: Option<String>,
    /// Download and resize images found under `img_path_key`.
    pub resize_img: bool,
    /// Keep the full-size profile image next to the resized one.
    pub keep_full_size_img: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            img_path_key: None,
            lang_key: None,
            resize_img: true,
            keep_full_size_img: false,
        }
    }
}

/// Where [`Normalizer::normalize_profile`] puts downloaded images.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub full_dir: PathBuf,
    pub resize_dir: PathBuf,
    /// Skip the download when the resized file is already on disk.
    pub reuse_existing: bool,
}

impl ImageLayout {
    /// Both variants in the cache directory, always re-downloaded.
    pub fn cache(cache_dir: &Path) -> Self {
        Self {
            full_dir: cache_dir.to_path_buf(),
            resize_dir: cache_dir.to_path_buf(),
            reuse_existing: false,
        }
    }

    /// Dedicated `profile_img_full` / `profile_img_resize` directories.
    pub fn batch(full_dir: PathBuf, resize_dir: PathBuf) -> Self {
        Self {
            full_dir,
            resize_dir,
            reuse_existing: true,
        }
    }
}

/// Reads a string attribute, logging and substituting `""` when absent.
pub fn get_attrib(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
        None => {
            tracing::warn!("Could not retrieve {}", key);
            String::new()
        }
    }
}

/// User id of a raw object: `id_str`, else `id` (string or number).
pub fn user_id(data: &Value) -> Option<String> {
    let from = |key: &str| match data.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    from("id_str").or_else(|| from("id"))
}

pub struct Normalizer {
    fetcher: Arc<dyn ImageFetcher>,
    detector: Arc<dyn LanguageDetector>,
    cache_dir: PathBuf,
    default_profile_img: PathBuf,
}

impl Normalizer {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        detector: Arc<dyn LanguageDetector>,
        cache_dir: PathBuf,
        default_profile_img: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            detector,
            cache_dir,
            default_profile_img,
        }
    }

    fn placeholder(&self) -> String {
        self.default_profile_img.to_string_lossy().into_owned()
    }

    fn language(&self, bio: &str) -> String {
        if bio.is_empty() {
            UNKNOWN_LANG.to_string()
        } else {
            self.detector.detect(bio)
        }
    }

    /// Normalizes a tweet or user object.
    ///
    /// A tweet is recognized by its nested `user` object. Image and language
    /// may be overridden through `opts`; otherwise the profile image is
    /// resized into the cache directory and the bio language is detected.
    pub async fn normalize_object(&self, input: &Value, opts: &NormalizeOptions) -> UserRecord {
        let user = match input.get("user") {
            Some(user) if user.is_object() => user,
            _ => input,
        };
        let id = user_id(user).unwrap_or_else(|| {
            tracing::warn!("Could not retrieve id_str");
            crate::models::MISSING_ID.to_string()
        });

        let explicit_img = opts.img_path_key.as_deref().and_then(|key| {
            user.get(key)
                .and_then(Value::as_str)
                .or_else(|| input.get(key).and_then(Value::as_str))
        });

        let img_path = if let Some(img) = explicit_img {
            if opts.resize_img {
                let resized = images::resized_path(&self.cache_dir, &id, img);
                self.fetcher.download_resize(img, &resized, None).await;
                self.checked(resized.to_string_lossy().into_owned())
            } else if images::is_url(img) {
                img.to_string()
            } else {
                self.checked(img.to_string())
            }
        } else if user
            .get("default_profile_image")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            self.placeholder()
        } else {
            let url = images::upgrade_thumbnail(&get_attrib(user, "profile_image_url_https"));
            if url.is_empty() {
                self.placeholder()
            } else {
                let resized = images::resized_path(&self.cache_dir, &id, &url);
                if !resized.is_file() {
                    let full = opts
                        .keep_full_size_img
                        .then(|| images::full_size_path(&self.cache_dir, &id, &url));
                    self.fetcher
                        .download_resize(&url, &resized, full.as_deref())
                        .await;
                }
                self.checked(resized.to_string_lossy().into_owned())
            }
        };

        let bio = get_attrib(user, "description");
        let explicit_lang = opts.lang_key.as_deref().and_then(|key| {
            user.get(key)
                .and_then(Value::as_str)
                .or_else(|| input.get(key).and_then(Value::as_str))
        });
        let lang = match explicit_lang {
            Some(lang) => lang.to_string(),
            None => self.language(&bio),
        };

        UserRecord {
            description: bio,
            id,
            img_path,
            lang,
            name: get_attrib(user, "name"),
            screen_name: get_attrib(user, "screen_name"),
        }
    }

    /// Normalizes a user object returned by `users/show.json` (or a stored copy of one).
    ///
    /// `id` is the key the record is filed under; images land in `layout`.
    pub async fn normalize_profile(
        &self,
        data: &Value,
        id: &str,
        layout: &ImageLayout,
    ) -> UserRecord {
        let screen_name = get_attrib(data, "screen_name");
        let bio = get_attrib(data, "description");
        let name = get_attrib(data, "name");
        let img_url = get_attrib(data, "profile_image_url");

        let lang = self.language(&bio);

        let img_path = if img_url.is_empty() || img_url.contains("default_profile") {
            tracing::warn!("Unable to extract image from Twitter. Using default image.");
            self.placeholder()
        } else {
            let url = images::upgrade_thumbnail(&img_url);
            let full = images::full_size_path(&layout.full_dir, id, &url);
            let resized = images::resized_path(&layout.resize_dir, id, &url);
            if layout.reuse_existing && resized.is_file() {
                tracing::debug!("Reusing {}", resized.display());
            } else {
                self.fetcher
                    .download_resize(&url, &resized, Some(&full))
                    .await;
            }
            self.checked(resized.to_string_lossy().into_owned())
        };

        UserRecord {
            description: bio,
            id: id.to_string(),
            img_path,
            lang,
            name,
            screen_name,
        }
    }

    /// Falls back to the placeholder when `path` is not on disk.
    fn checked(&self, path: String) -> String {
        if Path::new(&path).exists() {
            path
        } else {
            tracing::warn!("Image {} not available. Using default image.", path);
            self.placeholder()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records calls; "downloads" by writing a stub file unless told to fail.
    #[derive(Default)]
    struct StubFetcher {
        calls: Mutex<Vec<(String, PathBuf, Option<PathBuf>)>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageFetcher for StubFetcher {
        async fn download_resize(&self, url: &str, resized: &Path, full: Option<&Path>) {
            self.calls.lock().unwrap().push((
                url.to_string(),
                resized.to_path_buf(),
                full.map(Path::to_path_buf),
            ));
            if !self.fail {
                std::fs::create_dir_all(resized.parent().unwrap()).unwrap();
                std::fs::write(resized, b"img").unwrap();
            }
        }
    }

    #[derive(Default)]
    struct StubDetector {
        seen: Mutex<Vec<String>>,
    }

    impl LanguageDetector for StubDetector {
        fn detect(&self, text: &str) -> String {
            self.seen.lock().unwrap().push(text.to_string());
            "en".to_string()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cache_dir: PathBuf,
        fetcher: Arc<StubFetcher>,
        detector: Arc<StubDetector>,
        normalizer: Normalizer,
    }

    fn fixture(fail: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let fetcher = Arc::new(StubFetcher {
            fail,
            ..Default::default()
        });
        let detector = Arc::new(StubDetector::default());
        let normalizer = Normalizer::new(
            fetcher.clone(),
            detector.clone(),
            cache_dir.clone(),
            PathBuf::from("assets/tw_default_profile.png"),
        );
        Fixture {
            _dir: dir,
            cache_dir,
            fetcher,
            detector,
            normalizer,
        }
    }

    fn user() -> Value {
        json!({
            "id_str": "783214",
            "name": "Twitter",
            "screen_name": "Twitter",
            "description": "What's happening?!",
            "default_profile_image": false,
            "profile_image_url_https": "https://pbs.twimg.com/profile_images/1/abc_normal.jpg",
            "profile_image_url": "http://pbs.twimg.com/profile_images/1/abc_normal.jpg"
        })
    }

    #[tokio::test]
    async fn test_profile_image_is_upgraded_and_resized() {
        let f = fixture(false);
        let record = f
            .normalizer
            .normalize_object(&user(), &NormalizeOptions::default())
            .await;

        let expected = f.cache_dir.join("783214_224x224.jpg");
        assert_eq!(record.img_path, expected.to_string_lossy());
        let calls = f.fetcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            "https://pbs.twimg.com/profile_images/1/abc_400x400.jpg"
        );
        assert_eq!(calls[0].2, None);
        assert_eq!(record.id, "783214");
        assert_eq!(record.lang, "en");
    }

    #[tokio::test]
    async fn test_tweet_object_uses_nested_user() {
        let f = fixture(false);
        let tweet = json!({"id_str": "1", "text": "hello", "user": user()});
        let record = f
            .normalizer
            .normalize_object(&tweet, &NormalizeOptions::default())
            .await;
        assert_eq!(record.id, "783214");
        assert_eq!(record.screen_name, "Twitter");
    }

    #[tokio::test]
    async fn test_default_profile_image_wins_over_url() {
        let f = fixture(false);
        let mut u = user();
        u["default_profile_image"] = json!(true);
        let record = f
            .normalizer
            .normalize_object(&u, &NormalizeOptions::default())
            .await;
        assert_eq!(record.img_path, "assets/tw_default_profile.png");
        assert!(f.fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_download_falls_back_to_placeholder() {
        let f = fixture(true);
        let record = f
            .normalizer
            .normalize_object(&user(), &NormalizeOptions::default())
            .await;
        assert_eq!(record.img_path, "assets/tw_default_profile.png");
        assert_eq!(f.fetcher.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_resized_image_not_downloaded() {
        let f = fixture(false);
        std::fs::create_dir_all(&f.cache_dir).unwrap();
        std::fs::write(f.cache_dir.join("783214_224x224.jpg"), b"img").unwrap();
        f.normalizer
            .normalize_object(&user(), &NormalizeOptions::default())
            .await;
        assert!(f.fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keep_full_size_image() {
        let f = fixture(false);
        let opts = NormalizeOptions {
            keep_full_size_img: true,
            ..Default::default()
        };
        f.normalizer.normalize_object(&user(), &opts).await;
        let calls = f.fetcher.calls.lock().unwrap();
        assert_eq!(calls[0].2, Some(f.cache_dir.join("783214.jpg")));
    }

    #[tokio::test]
    async fn test_explicit_image_key_on_top_level() {
        let f = fixture(false);
        let tweet = json!({"user": user(), "img": "https://example.com/me.gif"});
        let opts = NormalizeOptions {
            img_path_key: Some("img".to_string()),
            ..Default::default()
        };
        let record = f.normalizer.normalize_object(&tweet, &opts).await;
        assert_eq!(
            record.img_path,
            f.cache_dir.join("783214_224x224.png").to_string_lossy()
        );
        assert_eq!(f.fetcher.calls.lock().unwrap()[0].0, "https://example.com/me.gif");
    }

    #[tokio::test]
    async fn test_explicit_image_url_without_resize_kept_verbatim() {
        let f = fixture(false);
        let mut u = user();
        u["img"] = json!("https://example.com/me.jpg");
        let opts = NormalizeOptions {
            img_path_key: Some("img".to_string()),
            resize_img: false,
            ..Default::default()
        };
        let record = f.normalizer.normalize_object(&u, &opts).await;
        assert_eq!(record.img_path, "https://example.com/me.jpg");
        assert!(f.fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_bio_is_unknown_without_detection() {
        let f = fixture(false);
        let mut u = user();
        u["description"] = Value::Null;
        let record = f
            .normalizer
            .normalize_object(&u, &NormalizeOptions::default())
            .await;
        assert_eq!(record.description, "");
        assert_eq!(record.lang, UNKNOWN_LANG);
        assert!(f.detector.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bio_is_passed_to_detector_verbatim() {
        let f = fixture(false);
        f.normalizer
            .normalize_object(&user(), &NormalizeOptions::default())
            .await;
        assert_eq!(
            *f.detector.seen.lock().unwrap(),
            vec!["What's happening?!".to_string()]
        );
    }

    #[tokio::test]
    async fn test_explicit_lang_key() {
        let f = fixture(false);
        let tweet = json!({"user": user(), "lang": "fr"});
        let opts = NormalizeOptions {
            lang_key: Some("lang".to_string()),
            ..Default::default()
        };
        let record = f.normalizer.normalize_object(&tweet, &opts).await;
        assert_eq!(record.lang, "fr");
        assert!(f.detector.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_on_user_falls_through_to_top_level() {
        let f = fixture(false);
        let mut u = user();
        u["lang"] = Value::Null;
        u["img"] = json!(42);
        let tweet = json!({"user": u, "lang": "fr", "img": "https://example.com/me.png"});
        let opts = NormalizeOptions {
            img_path_key: Some("img".to_string()),
            lang_key: Some("lang".to_string()),
            ..Default::default()
        };
        let record = f.normalizer.normalize_object(&tweet, &opts).await;
        assert_eq!(record.lang, "fr");
        assert_eq!(f.fetcher.calls.lock().unwrap()[0].0, "https://example.com/me.png");
    }

    #[tokio::test]
    async fn test_profile_default_image_url() {
        let f = fixture(false);
        let data = json!({
            "screen_name": "egg",
            "name": "Egg",
            "description": "",
            "profile_image_url": "http://abs.twimg.com/sticky/default_profile_images/default_profile_normal.png"
        });
        let layout = ImageLayout::cache(&f.cache_dir);
        let record = f.normalizer.normalize_profile(&data, "dummy", &layout).await;
        assert_eq!(record.img_path, "assets/tw_default_profile.png");
        assert_eq!(record.id, "dummy");
        assert_eq!(record.lang, UNKNOWN_LANG);
        assert!(f.fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profile_batch_layout() {
        let f = fixture(false);
        let layout = ImageLayout::batch(f.cache_dir.join("full"), f.cache_dir.join("resize"));
        let record = f.normalizer.normalize_profile(&user(), "783214", &layout).await;
        assert_eq!(
            record.img_path,
            f.cache_dir.join("resize/783214_224x224.jpg").to_string_lossy()
        );
        {
            let calls = f.fetcher.calls.lock().unwrap();
            assert_eq!(calls[0].2, Some(f.cache_dir.join("full/783214.jpg")));
        }

        // second pass reuses the resized file
        f.normalizer.normalize_profile(&user(), "783214", &layout).await;
        assert_eq!(f.fetcher.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_get_attrib_missing_is_empty() {
        let data = json!({"name": "A", "followers": 3, "bio": null});
        assert_eq!(get_attrib(&data, "name"), "A");
        assert_eq!(get_attrib(&data, "followers"), "3");
        assert_eq!(get_attrib(&data, "bio"), "");
        assert_eq!(get_attrib(&data, "screen_name"), "");
    }

    #[test]
    fn test_user_id_sources() {
        assert_eq!(user_id(&json!({"id_str": "5", "id": 6})), Some("5".to_string()));
        assert_eq!(user_id(&json!({"id": 6})), Some("6".to_string()));
        assert_eq!(user_id(&json!({"id": ""})), None);
        assert_eq!(user_id(&json!({})), None);
    }
}
