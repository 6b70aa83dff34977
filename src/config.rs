use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the lesson-grabber pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// URL of the portal login form
    pub login_url: String,

    /// Base URL for video pages; the video id and a trailing slash are appended
    pub video_url_base: String,

    /// Regex the manifest URL must match, anchored at the start of the URL
    #[serde(default = "default_manifest_pattern")]
    pub manifest_url_pattern: String,

    /// Number of retries per (video id, version) unit after the first attempt
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Directory the YAML report is written to
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Run the browser without a visible window
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// User agent applied to every page
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-operation timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Fixed waits between pipeline steps
    #[serde(default)]
    pub waits: WaitConfig,

    /// Ordered processing rules; each covers an id range and a version list
    #[serde(default)]
    pub rules: Vec<ProcessingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Page navigation timeout in milliseconds
    pub navigation_ms: u64,

    /// Element lookup timeout in milliseconds
    pub element_ms: u64,

    /// How long to wait for the manifest URL to appear on the network
    pub manifest_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// How long playback is left running after the start keypress, in seconds
    pub playback_wait_secs: u64,

    /// Pause between failed attempts of the same unit, in seconds
    pub retry_backoff_secs: u64,
}

/// One declarative processing rule: an inclusive id range times a version list.
///
/// An absent or empty `versions` array means the videos in this range have no
/// version dimension and are processed exactly once per id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRule {
    pub id_range: IdRange,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdRange {
    pub start: u32,
    pub end: u32,
}

/// Portal login credentials, kept in a separate file that stays out of
/// version control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn default_manifest_pattern() -> String {
    r"^https://.*_9\.m3u8".to_string()
}

fn default_retry_count() -> u32 {
    2
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("urls")
}

fn default_headless() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/114.0.0.0 Safari/537.36"
        .to_string()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 20_000,
            element_ms: 15_000,
            manifest_wait_ms: 15_000,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            playback_wait_secs: 60,
            retry_backoff_secs: 3,
        }
    }
}

impl IdRange {
    /// Inclusive iteration over the declared ids.
    pub fn ids(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl ProcessingRule {
    /// Whether this rule declares a real version dimension.
    pub fn has_versions(&self) -> bool {
        self.versions.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Version keys to process for each id in this rule. The sentinel form
    /// (no declared versions) yields a single `None` key.
    pub fn version_keys(&self) -> Vec<Option<u32>> {
        match &self.versions {
            Some(versions) if !versions.is_empty() => {
                versions.iter().copied().map(Some).collect()
            }
            _ => vec![None],
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, or probe the usual locations.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = ["lesson-grabber.toml", "config/lesson-grabber.toml"];
        for candidate in &config_paths {
            if Path::new(candidate).exists() {
                return Self::from_file(Path::new(candidate));
            }
        }

        Err(anyhow!(
            "no configuration file found (looked for {})",
            config_paths.join(", ")
        ))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Build the page URL for one (video id, version) unit.
    pub fn video_url(&self, video_id: u32, version: Option<u32>) -> String {
        let mut url = format!("{}{}/", self.video_url_base, video_id);
        if let Some(version) = version {
            url.push_str(&format!("?ver={}", version));
        }
        url
    }

    /// Compiled manifest URL pattern.
    pub fn manifest_pattern(&self) -> Result<Regex> {
        Regex::new(&self.manifest_url_pattern)
            .with_context(|| format!("invalid manifest_url_pattern: {}", self.manifest_url_pattern))
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.navigation_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.element_ms)
    }

    pub fn manifest_wait(&self) -> Duration {
        Duration::from_millis(self.timeouts.manifest_wait_ms)
    }

    pub fn playback_wait(&self) -> Duration {
        Duration::from_secs(self.waits.playback_wait_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.waits.retry_backoff_secs)
    }

    /// Validate configuration before any browser work starts.
    pub fn validate(&self) -> Result<()> {
        if self.login_url.is_empty() {
            return Err(anyhow!("login_url must not be empty"));
        }

        if self.video_url_base.is_empty() {
            return Err(anyhow!("video_url_base must not be empty"));
        }

        self.manifest_pattern()?;

        for rule in &self.rules {
            if rule.id_range.start > rule.id_range.end {
                return Err(anyhow!(
                    "rule id_range start {} is greater than end {}",
                    rule.id_range.start,
                    rule.id_range.end
                ));
            }
        }

        if self.rules.is_empty() {
            tracing::warn!("No processing rules configured; nothing will be extracted");
        }

        Ok(())
    }
}

impl Credentials {
    /// Load credentials from an explicit path, or probe the usual locations.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidates = ["credentials.toml", "config/credentials.toml"];

        let path = match path {
            Some(path) => path.to_path_buf(),
            None => candidates
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
                .ok_or_else(|| {
                    anyhow!(
                        "no credentials file found (looked for {})",
                        candidates.join(", ")
                    )
                })?,
        };

        let credentials_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read credentials file {}", path.display()))?;
        let credentials: Credentials = toml::from_str(&credentials_str)
            .with_context(|| format!("failed to parse credentials file {}", path.display()))?;

        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(anyhow!("credentials must include username and password"));
        }

        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            login_url = "https://portal.example/login/"
            video_url_base = "https://portal.example/videos/"

            [[rules]]
            id_range = { start = 1, end = 3 }

            [[rules]]
            id_range = { start = 10, end = 10 }
            versions = [1, 2, 3]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = minimal_config();
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.timeouts.manifest_wait_ms, 15_000);
        assert_eq!(config.waits.retry_backoff_secs, 3);
        assert!(config.headless);
        assert_eq!(config.manifest_url_pattern, r"^https://.*_9\.m3u8");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_version_sentinel() {
        let config = minimal_config();
        assert!(!config.rules[0].has_versions());
        assert_eq!(config.rules[0].version_keys(), vec![None]);

        assert!(config.rules[1].has_versions());
        assert_eq!(
            config.rules[1].version_keys(),
            vec![Some(1), Some(2), Some(3)]
        );
    }

    #[test]
    fn test_video_url_building() {
        let config = minimal_config();
        assert_eq!(config.video_url(5, None), "https://portal.example/videos/5/");
        assert_eq!(
            config.video_url(5, Some(2)),
            "https://portal.example/videos/5/?ver=2"
        );
    }

    #[test]
    fn test_invalid_range_rejected() {
        let mut config = minimal_config();
        config.rules[0].id_range = IdRange { start: 9, end: 3 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manifest_pattern_matches_convention() {
        let config = minimal_config();
        let pattern = config.manifest_pattern().unwrap();
        assert!(pattern.is_match("https://cdn.example/streams/abc_9.m3u8"));
        assert!(!pattern.is_match("https://cdn.example/streams/abc_9.mp4"));
        assert!(!pattern.is_match("http://cdn.example/streams/abc_9.m3u8"));
    }
}
