//! Configuration types for ani-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::MediaType;

/// A single RSS feed subscription
///
/// The configuration file accepts either a plain URL string or the full
/// object form; both deserialize into this struct (the string form gets
/// empty filters and the default media type).
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FeedEntry {
    /// Feed URL
    pub url: String,

    /// Newline-separated keywords; items whose title contains any of them
    /// (case-insensitive) are filtered out
    #[serde(default)]
    pub blocked_keywords: String,

    /// Newline-separated regex patterns, ORed together
    #[serde(default)]
    pub blocked_regex: String,

    /// Which library branch items from this feed belong to
    #[serde(default)]
    pub media_type: MediaType,
}

impl FeedEntry {
    /// Feed entry with a bare URL and no filters
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            blocked_keywords: String::new(),
            blocked_regex: String::new(),
            media_type: MediaType::default(),
        }
    }
}

// fixed_urls historically held plain URL strings; newer configs use objects.
// Accept both and canonicalise to the object form at load.
impl<'de> Deserialize<'de> for FeedEntry {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Url(String),
            Full {
                url: String,
                #[serde(default)]
                blocked_keywords: String,
                #[serde(default)]
                blocked_regex: String,
                #[serde(default)]
                media_type: MediaType,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Url(url) => FeedEntry::from_url(url),
            Raw::Full {
                url,
                blocked_keywords,
                blocked_regex,
                media_type,
            } => FeedEntry {
                url,
                blocked_keywords,
                blocked_regex,
                media_type,
            },
        })
    }
}

/// RSS subscription settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RssConfig {
    /// Configured feeds (plain URLs or full objects)
    #[serde(default)]
    pub fixed_urls: Vec<FeedEntry>,

    /// Seconds between scheduled checks (minimum 60)
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            fixed_urls: Vec::new(),
            check_interval: default_check_interval(),
        }
    }
}

/// qBittorrent connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// WebUI base URL
    #[serde(default = "default_qbit_url")]
    pub base_url: String,

    /// WebUI username
    #[serde(default)]
    pub username: String,

    /// WebUI password
    #[serde(default)]
    pub password: String,

    /// Directory torrents are saved under
    #[serde(default = "default_download_path")]
    pub base_download_path: String,

    /// Category assigned to submitted torrents
    #[serde(default = "default_qbit_category")]
    pub category: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_qbit_url(),
            username: String::new(),
            password: String::new(),
            base_download_path: default_download_path(),
            category: default_qbit_category(),
        }
    }
}

/// One credential in an upstream key pool
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Secret key value
    pub api_key: String,

    /// Requests-per-minute budget (0 = unbounded)
    #[serde(default)]
    pub rpm: u32,

    /// Requests-per-day budget (0 = unbounded)
    #[serde(default)]
    pub rpd: u32,

    /// Whether the key participates in rotation
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Per-purpose AI task settings (title_parse / multi_file_rename / subtitle_match)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiTaskConfig {
    /// OpenAI-compatible base URL (e.g. `https://api.openai.com/v1`)
    #[serde(default)]
    pub base_url: String,

    /// Model name
    #[serde(default)]
    pub model: String,

    /// Single key; ignored when `key_pool` is non-empty
    #[serde(default)]
    pub api_key: Option<String>,

    /// Key pool; takes precedence over `api_key`
    #[serde(default)]
    pub key_pool: Vec<KeyEntry>,

    /// HTTP timeout in seconds (10..=600)
    #[serde(default = "default_ai_timeout")]
    pub timeout: u64,

    /// Attempts per call
    #[serde(default = "default_ai_retries")]
    pub retries: u32,

    /// Pass-through request fields; reserved fields are never overwritten
    #[serde(default)]
    pub extra_body: Option<serde_json::Value>,
}

impl Default for AiTaskConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: String::new(),
            api_key: None,
            key_pool: Vec::new(),
            timeout: default_ai_timeout(),
            retries: default_ai_retries(),
            extra_body: None,
        }
    }
}

impl AiTaskConfig {
    /// Whether this task has any usable credential configured
    pub fn has_keys(&self) -> bool {
        self.key_pool.iter().any(|k| k.enabled && !k.api_key.is_empty())
            || self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Cooldown and breaker thresholds shared across the key pools
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Consecutive errors before long cooldown (1..=1000)
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Single-error cooldown in seconds
    #[serde(default = "default_short_cooldown")]
    pub short_cooldown_seconds: u64,

    /// Escalating long-cooldown ladder in seconds
    #[serde(default = "default_long_ladder")]
    pub long_cooldown_ladder: Vec<u64>,

    /// How long a tripped breaker stays open
    #[serde(default = "default_breaker_open")]
    pub breaker_open_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: default_max_consecutive_errors(),
            short_cooldown_seconds: default_short_cooldown(),
            long_cooldown_ladder: default_long_ladder(),
            breaker_open_seconds: default_breaker_open(),
        }
    }
}

/// AI upstream settings, one sub-config per purpose
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AiConfig {
    /// Title parsing task
    #[serde(default)]
    pub title_parse: AiTaskConfig,

    /// Multi-file rename task
    #[serde(default)]
    pub multi_file_rename: AiTaskConfig,

    /// Subtitle matching task
    #[serde(default)]
    pub subtitle_match: AiTaskConfig,

    /// Shared cooldown/breaker thresholds
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

/// Settings driving prompt construction and batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiProcessingConfig {
    /// Language preference order for choosing the clean title
    #[serde(default = "default_language_priority")]
    pub language_priority: Vec<String>,

    /// Files per rename batch (1..=100)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Retries per rename batch
    #[serde(default = "default_batch_retries")]
    pub batch_processing_retries: u32,

    /// Write a JSON trace record for every AI call
    #[serde(default)]
    pub debug_trace: bool,

    /// Directory trace records are written into
    #[serde(default = "default_trace_dir")]
    pub trace_dir: PathBuf,

    /// Trace files kept before oldest-first eviction
    #[serde(default = "default_trace_max_files")]
    pub trace_max_files: usize,
}

impl Default for AiProcessingConfig {
    fn default() -> Self {
        Self {
            language_priority: default_language_priority(),
            max_batch_size: default_max_batch_size(),
            batch_processing_retries: default_batch_retries(),
            debug_trace: false,
            trace_dir: default_trace_dir(),
            trace_max_files: default_trace_max_files(),
        }
    }
}

/// Library root paths, one per (media type x category)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Anime series root
    #[serde(default = "default_anime_tv")]
    pub anime_tv: PathBuf,

    /// Anime film root
    #[serde(default = "default_anime_movie")]
    pub anime_movie: PathBuf,

    /// Live-action series root
    #[serde(default = "default_live_tv")]
    pub live_action_tv: PathBuf,

    /// Live-action film root
    #[serde(default = "default_live_movie")]
    pub live_action_movie: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            anime_tv: default_anime_tv(),
            anime_movie: default_anime_movie(),
            live_action_tv: default_live_tv(),
            live_action_movie: default_live_movie(),
        }
    }
}

impl LibraryConfig {
    /// Resolve the library root for a media type and category
    pub fn root_for(&self, media_type: MediaType, category: crate::types::Category) -> &PathBuf {
        use crate::types::Category;
        match (media_type, category) {
            (MediaType::Anime, Category::Tv) => &self.anime_tv,
            (MediaType::Anime, Category::Movie) => &self.anime_movie,
            (MediaType::LiveAction, Category::Tv) => &self.live_action_tv,
            (MediaType::LiveAction, Category::Movie) => &self.live_action_movie,
        }
    }
}

/// Container path-prefix translation between the downloader's mount and ours
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathConversionConfig {
    /// Whether translation is applied at the boundary
    #[serde(default)]
    pub enabled: bool,

    /// Prefix as the downloader reports it
    #[serde(default)]
    pub source_base_path: String,

    /// Prefix as this process sees it
    #[serde(default)]
    pub target_base_path: String,
}

/// Bind address for an HTTP surface
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BindConfig {
    /// Host to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    pub port: u16,
}

/// Notification channel -> webhook URL map
///
/// An unset channel makes sends to it a successful no-op.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Master switch
    #[serde(default)]
    pub enabled: bool,

    /// RSS milestone channel
    #[serde(default)]
    pub rss_webhook_url: Option<String>,

    /// Hardlink/library channel
    #[serde(default)]
    pub hardlink_webhook_url: Option<String>,

    /// Download lifecycle channel
    #[serde(default)]
    pub download_webhook_url: Option<String>,
}

impl NotificationConfig {
    /// Look up the URL for a channel name; None disables that channel
    pub fn url_for(&self, channel: &str) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        let url = match channel {
            "rss" => self.rss_webhook_url.as_deref(),
            "hardlink" => self.hardlink_webhook_url.as_deref(),
            "download" => self.download_webhook_url.as_deref(),
            _ => None,
        };
        url.filter(|u| !u.is_empty())
    }
}

/// TVDB metadata provider settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TvdbConfig {
    /// Whether TVDB lookups are attempted at all
    #[serde(default)]
    pub enabled: bool,

    /// v4 API key
    #[serde(default)]
    pub api_key: String,

    /// API base URL
    #[serde(default = "default_tvdb_url")]
    pub base_url: String,
}

impl Default for TvdbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: default_tvdb_url(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the orchestrator
///
/// A flat JSON document; every section has working defaults so a minimal
/// config only needs downloader credentials and at least one AI key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// RSS subscriptions and check cadence
    #[serde(default)]
    pub rss: RssConfig,

    /// qBittorrent connection
    #[serde(default)]
    pub downloader: DownloaderConfig,

    /// AI upstream tasks and rate limits
    #[serde(default)]
    pub ai: AiConfig,

    /// Prompt/batching behaviour
    #[serde(default)]
    pub ai_processing: AiProcessingConfig,

    /// Library root paths
    #[serde(default)]
    pub library: LibraryConfig,

    /// Container path translation
    #[serde(default)]
    pub path_conversion: PathConversionConfig,

    /// Webhook HTTP surface bind address
    #[serde(default = "default_webhook_bind")]
    pub webhook: BindConfig,

    /// Web UI bind address (served externally; recorded here for the composition root)
    #[serde(default = "default_webui_bind")]
    pub webui: BindConfig,

    /// Notification channels
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// TVDB metadata provider
    #[serde(default)]
    pub tvdb: TvdbConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rss: RssConfig::default(),
            downloader: DownloaderConfig::default(),
            ai: AiConfig::default(),
            ai_processing: AiProcessingConfig::default(),
            library: LibraryConfig::default(),
            path_conversion: PathConversionConfig::default(),
            webhook: default_webhook_bind(),
            webui: default_webui_bind(),
            notifications: NotificationConfig::default(),
            tvdb: TvdbConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file '{}': {e}", path.display()),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse config file '{}': {e}", path.display()),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        for feed in &self.rss.fixed_urls {
            url::Url::parse(&feed.url).map_err(|e| Error::Config {
                message: format!("invalid RSS feed URL '{}': {e}", feed.url),
                key: Some("rss.fixed_urls".into()),
            })?;
        }

        url::Url::parse(&self.downloader.base_url).map_err(|e| Error::Config {
            message: format!(
                "invalid downloader base URL '{}': {e}",
                self.downloader.base_url
            ),
            key: Some("downloader.base_url".into()),
        })?;

        if self.rss.check_interval < 60 {
            return Err(Error::Config {
                message: format!(
                    "rss.check_interval must be at least 60 seconds, got {}",
                    self.rss.check_interval
                ),
                key: Some("rss.check_interval".into()),
            });
        }

        for (name, task) in [
            ("title_parse", &self.ai.title_parse),
            ("multi_file_rename", &self.ai.multi_file_rename),
            ("subtitle_match", &self.ai.subtitle_match),
        ] {
            if !(10..=600).contains(&task.timeout) {
                return Err(Error::Config {
                    message: format!(
                        "ai.{name}.timeout must be within 10..=600 seconds, got {}",
                        task.timeout
                    ),
                    key: Some(format!("ai.{name}.timeout")),
                });
            }
        }

        let limits = &self.ai.rate_limits;
        if !(1..=1000).contains(&limits.max_consecutive_errors) {
            return Err(Error::Config {
                message: format!(
                    "ai.rate_limits.max_consecutive_errors must be within 1..=1000, got {}",
                    limits.max_consecutive_errors
                ),
                key: Some("ai.rate_limits.max_consecutive_errors".into()),
            });
        }
        if limits.long_cooldown_ladder.is_empty() {
            return Err(Error::Config {
                message: "ai.rate_limits.long_cooldown_ladder must not be empty".into(),
                key: Some("ai.rate_limits.long_cooldown_ladder".into()),
            });
        }

        if !(1..=100).contains(&self.ai_processing.max_batch_size) {
            return Err(Error::Config {
                message: format!(
                    "ai_processing.max_batch_size must be within 1..=100, got {}",
                    self.ai_processing.max_batch_size
                ),
                key: Some("ai_processing.max_batch_size".into()),
            });
        }

        if self.path_conversion.enabled && self.path_conversion.source_base_path.is_empty() {
            return Err(Error::Config {
                message: "path_conversion.source_base_path must be set when conversion is enabled"
                    .into(),
                key: Some("path_conversion.source_base_path".into()),
            });
        }

        Ok(())
    }
}

fn default_check_interval() -> u64 {
    3600
}

fn default_qbit_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_download_path() -> String {
    "/downloads/ani-dl/".to_string()
}

fn default_qbit_category() -> String {
    "ani-dl".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ai_timeout() -> u64 {
    30
}

fn default_ai_retries() -> u32 {
    3
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_short_cooldown() -> u64 {
    30
}

fn default_long_ladder() -> Vec<u64> {
    vec![60, 120, 180]
}

fn default_breaker_open() -> u64 {
    300
}

fn default_language_priority() -> Vec<String> {
    vec!["中文".to_string(), "English".to_string(), "日本語".to_string()]
}

fn default_max_batch_size() -> usize {
    30
}

fn default_batch_retries() -> u32 {
    2
}

fn default_trace_dir() -> PathBuf {
    PathBuf::from("logs/ai_trace")
}

fn default_trace_max_files() -> usize {
    50
}

fn default_anime_tv() -> PathBuf {
    PathBuf::from("/library/anime/tv")
}

fn default_anime_movie() -> PathBuf {
    PathBuf::from("/library/anime/movies")
}

fn default_live_tv() -> PathBuf {
    PathBuf::from("/library/live-action/tv")
}

fn default_live_movie() -> PathBuf {
    PathBuf::from("/library/live-action/movies")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_bind() -> BindConfig {
    BindConfig {
        host: default_host(),
        port: 5001,
    }
}

fn default_webui_bind() -> BindConfig {
    BindConfig {
        host: default_host(),
        port: 5000,
    }
}

fn default_tvdb_url() -> String {
    "https://api4.thetvdb.com/v4".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/ani-dl.db")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_urls_accepts_plain_strings() {
        let json = r#"{"fixed_urls": ["https://example.com/rss"], "check_interval": 3600}"#;
        let rss: RssConfig = serde_json::from_str(json).unwrap();

        assert_eq!(rss.fixed_urls.len(), 1);
        assert_eq!(rss.fixed_urls[0].url, "https://example.com/rss");
        assert_eq!(rss.fixed_urls[0].blocked_keywords, "");
        assert_eq!(rss.fixed_urls[0].media_type, MediaType::Anime);
    }

    #[test]
    fn fixed_urls_accepts_object_form() {
        let json = r#"{
            "fixed_urls": [
                {"url": "https://example.com/rss", "blocked_keywords": "720p\nHEVC", "media_type": "live_action"}
            ]
        }"#;
        let rss: RssConfig = serde_json::from_str(json).unwrap();

        assert_eq!(rss.fixed_urls[0].blocked_keywords, "720p\nHEVC");
        assert_eq!(rss.fixed_urls[0].media_type, MediaType::LiveAction);
    }

    #[test]
    fn fixed_urls_accepts_mixed_forms() {
        let json = r#"{
            "fixed_urls": [
                "https://a.example/rss",
                {"url": "https://b.example/rss", "blocked_regex": "\\b720p\\b"}
            ]
        }"#;
        let rss: RssConfig = serde_json::from_str(json).unwrap();

        assert_eq!(rss.fixed_urls.len(), 2);
        assert_eq!(rss.fixed_urls[0].url, "https://a.example/rss");
        assert_eq!(rss.fixed_urls[1].blocked_regex, "\\b720p\\b");
    }

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn check_interval_below_minimum_is_rejected() {
        let mut config = Config::default();
        config.rss.check_interval = 30;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("check_interval"));
    }

    #[test]
    fn ai_timeout_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.ai.title_parse.timeout = 5;
        assert!(config.validate().is_err());

        config.ai.title_parse.timeout = 601;
        assert!(config.validate().is_err());

        config.ai.title_parse.timeout = 600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn batch_size_above_cap_is_rejected() {
        let mut config = Config::default();
        config.ai_processing.max_batch_size = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_feed_url_is_rejected() {
        let mut config = Config::default();
        config.rss.fixed_urls = vec![FeedEntry::from_url("not a url")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid RSS feed URL"));
    }

    #[test]
    fn enabled_path_conversion_requires_source_prefix() {
        let mut config = Config::default();
        config.path_conversion.enabled = true;
        assert!(config.validate().is_err());

        config.path_conversion.source_base_path = "/downloads".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn notification_channel_lookup_respects_master_switch() {
        let mut notif = NotificationConfig {
            enabled: false,
            rss_webhook_url: Some("https://hooks.example/rss".into()),
            ..Default::default()
        };
        assert_eq!(notif.url_for("rss"), None);

        notif.enabled = true;
        assert_eq!(notif.url_for("rss"), Some("https://hooks.example/rss"));
        assert_eq!(notif.url_for("hardlink"), None);
        assert_eq!(notif.url_for("bogus"), None);
    }

    #[test]
    fn task_config_has_keys_prefers_pool() {
        let mut task = AiTaskConfig::default();
        assert!(!task.has_keys());

        task.api_key = Some("sk-x".into());
        assert!(task.has_keys());

        task.api_key = None;
        task.key_pool = vec![KeyEntry {
            name: "k1".into(),
            api_key: "sk-y".into(),
            rpm: 10,
            rpd: 100,
            enabled: false,
        }];
        assert!(!task.has_keys(), "disabled pool entries do not count");

        task.key_pool[0].enabled = true;
        assert!(task.has_keys());
    }
}
