use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub subtitles: SubtitlesConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Messaging bridge connection and the single destination every message goes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Destination chat / group identifier, e.g. `1203634...@g.us`.
    #[serde(default)]
    pub destination: String,
    /// Name the bridge presents to the messaging network for this device.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Extra attempts for the final completed/failed edit before giving up.
    #[serde(default = "default_final_retries")]
    pub final_retries: u32,
    /// Bound on every bridge call except file uploads.
    #[serde(default = "default_bridge_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Bound on multipart file uploads; 0 means unbounded.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    /// Rotation order. The controller cycles through these round-robin.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Must stay below `pipeline.cycle_pace_secs`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Transfer option qualities in order of preference.
    #[serde(default = "default_preferred_qualities")]
    pub preferred_qualities: Vec<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Explicit aria2c binary. Falls back to ARIA2C_PATH, beside-exe, then PATH.
    #[serde(default)]
    pub aria2c_path: Option<PathBuf>,
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
    #[serde(default = "default_trackers")]
    pub trackers: Vec<String>,
    /// Extensions (without dot, case-insensitive) accepted as a playable payload.
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_cycle_pace_secs")]
    pub cycle_pace_secs: u64,
    /// Sleep after a failed scan. Must be longer than the cycle pace.
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_success_cooldown_secs")]
    pub success_cooldown_secs: u64,
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    #[serde(default)]
    pub record_policy: RecordPolicy,
    /// Optional footer line appended to announcements.
    #[serde(default)]
    pub signature: Option<String>,
}

/// When a ledger record is written for a handled item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Failed items stay unrecorded and are retried on a later pass.
    #[default]
    OnSuccessOnly,
    /// Every handled item is recorded, failed or not.
    OnAttempt,
}

impl RecordPolicy {
    pub fn should_record(self, delivered: bool) -> bool {
        match self {
            RecordPolicy::OnSuccessOnly => delivered,
            RecordPolicy::OnAttempt => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitlesConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the subtitle search service (`/search`, `/download`).
    #[serde(default)]
    pub base_url: String,
}

/// Local directories. All default to subfolders of the data dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Per-acquisition scratch dir handed to aria2c; wiped around every run.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Payloads are moved here out of the scratch dir until delivered.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    /// Opaque session credential store owned by the bridge.
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: PathBuf,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            destination: String::new(),
            client_name: default_client_name(),
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_min_ms: default_reconnect_min_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            final_retries: default_final_retries(),
            request_timeout_secs: default_bridge_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            categories: default_categories(),
            sort_by: default_sort_by(),
            limit: default_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            preferred_qualities: default_preferred_qualities(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            aria2c_path: None,
            summary_interval_secs: default_summary_interval_secs(),
            trackers: default_trackers(),
            media_extensions: default_media_extensions(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycle_pace_secs: default_cycle_pace_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            success_cooldown_secs: default_success_cooldown_secs(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            record_policy: RecordPolicy::default(),
            signature: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            staging_dir: default_staging_dir(),
            ledger_dir: default_ledger_dir(),
            credentials_dir: default_credentials_dir(),
        }
    }
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_client_name() -> String {
    "reelcast".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconnect_min_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_final_retries() -> u32 {
    3
}

fn default_bridge_timeout_secs() -> u64 {
    15
}

fn default_upload_timeout_secs() -> u64 {
    0
}

fn default_catalog_url() -> String {
    "https://movies-api.accel.li/api/v2/list_movies.json".to_string()
}

fn default_categories() -> Vec<String> {
    [
        "horror",
        "comedy",
        "action",
        "sci-fi",
        "thriller",
        "animation",
        "adventure",
        "crime",
        "fantasy",
        "mystery",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sort_by() -> String {
    "latest".to_string()
}

fn default_limit() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    4
}

fn default_preferred_qualities() -> Vec<String> {
    vec!["1080p".to_string(), "720p".to_string()]
}

fn default_summary_interval_secs() -> u64 {
    5
}

fn default_trackers() -> Vec<String> {
    vec!["udp://tracker.opentrackr.org:1337/announce".to_string()]
}

fn default_media_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "mkv".to_string()]
}

fn default_cycle_pace_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_success_cooldown_secs() -> u64 {
    30 * 60
}

fn default_failure_cooldown_secs() -> u64 {
    60
}

fn default_scratch_dir() -> PathBuf {
    platform::data_dir().join("downloads")
}

fn default_staging_dir() -> PathBuf {
    platform::data_dir().join("outbox")
}

fn default_ledger_dir() -> PathBuf {
    platform::data_dir().join("sent")
}

fn default_credentials_dir() -> PathBuf {
    platform::data_dir().join("auth")
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when uploads are unbounded.
    pub fn upload_timeout(&self) -> Option<Duration> {
        (self.upload_timeout_secs > 0).then(|| Duration::from_secs(self.upload_timeout_secs))
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn cycle_pace(&self) -> Duration {
        Duration::from_secs(self.cycle_pace_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn success_cooldown(&self) -> Duration {
        Duration::from_secs(self.success_cooldown_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// `REELCAST_CONFIG` overrides the default `<config_dir>/config.toml`.
    pub fn config_path() -> PathBuf {
        match std::env::var_os("REELCAST_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => platform::config_dir().join("config.toml"),
        }
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel.destination.trim().is_empty() {
            anyhow::bail!(
                "channel.destination is empty; set it in {}",
                Self::config_path().display()
            );
        }
        if self.channel.request_timeout_secs == 0 {
            anyhow::bail!("channel.request_timeout_secs must be greater than zero");
        }
        if self.catalog.categories.is_empty() {
            anyhow::bail!("catalog.categories must list at least one category");
        }
        if self.catalog.request_timeout_secs >= self.pipeline.cycle_pace_secs {
            anyhow::bail!(
                "catalog.request_timeout_secs ({}) must be shorter than pipeline.cycle_pace_secs ({})",
                self.catalog.request_timeout_secs,
                self.pipeline.cycle_pace_secs
            );
        }
        if self.pipeline.error_backoff_secs <= self.pipeline.cycle_pace_secs {
            anyhow::bail!(
                "pipeline.error_backoff_secs ({}) must be longer than pipeline.cycle_pace_secs ({})",
                self.pipeline.error_backoff_secs,
                self.pipeline.cycle_pace_secs
            );
        }
        if self.transfer.media_extensions.is_empty() {
            anyhow::bail!("transfer.media_extensions must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.channel.destination = "120363000000000000@g.us".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog.categories.len(), 10);
        assert_eq!(config.catalog.categories[0], "horror");
        assert_eq!(config.catalog.limit, 5);
        assert_eq!(config.pipeline.success_cooldown(), Duration::from_secs(1800));
        assert!(config.paths.ledger_dir.ends_with("reelcast/sent"));
        assert!(config.catalog.base_url.starts_with("https://"));
        assert!(!config.subtitles.enabled);
    }

    #[test]
    fn test_defaults_pass_validation_once_destination_is_set() {
        assert!(Config::default().validate().is_err());
        valid().validate().unwrap();
    }

    #[test]
    fn test_timeout_must_be_shorter_than_pace() {
        let mut config = valid();
        config.catalog.request_timeout_secs = config.pipeline.cycle_pace_secs;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("request_timeout_secs"), "{err}");
    }

    #[test]
    fn test_error_backoff_must_exceed_pace() {
        let mut config = valid();
        config.pipeline.error_backoff_secs = config.pipeline.cycle_pace_secs;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("error_backoff_secs"), "{err}");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [channel]
            destination = "abc@g.us"

            [catalog]
            categories = ["drama"]
            "#,
        )
        .unwrap();
        assert_eq!(config.channel.destination, "abc@g.us");
        assert_eq!(config.channel.client_name, "reelcast");
        assert_eq!(config.catalog.categories, vec!["drama".to_string()]);
        assert_eq!(config.catalog.sort_by, "latest");
        assert_eq!(config.transfer.media_extensions, vec!["mp4", "mkv"]);
    }

    #[test]
    fn test_bridge_timeouts() {
        let config = valid();
        assert_eq!(config.channel.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.channel.upload_timeout(), None);

        let mut config = valid();
        config.channel.upload_timeout_secs = 600;
        assert_eq!(config.channel.upload_timeout(), Some(Duration::from_secs(600)));
        config.channel.request_timeout_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("channel.request_timeout_secs"), "{err}");
    }

    #[test]
    fn test_record_policy() {
        assert!(RecordPolicy::OnSuccessOnly.should_record(true));
        assert!(!RecordPolicy::OnSuccessOnly.should_record(false));
        assert!(RecordPolicy::OnAttempt.should_record(false));

        let config: Config = toml::from_str("[pipeline]\nrecord_policy = \"on_attempt\"\n").unwrap();
        assert_eq!(config.pipeline.record_policy, RecordPolicy::OnAttempt);
        assert_eq!(valid().pipeline.record_policy, RecordPolicy::OnSuccessOnly);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = valid();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.channel.destination, config.channel.destination);
        assert_eq!(back.paths.scratch_dir, config.paths.scratch_dir);
    }
}
