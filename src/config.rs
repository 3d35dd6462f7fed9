use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// RUNNING searches without progress for this long are force-failed
    pub stale_after_secs: u64,
    /// Retries for a retryable scraper error before the date step fails
    pub max_retries: u32,
    /// Linear backoff base between retries
    pub retry_backoff_ms: u64,
    /// Pause between lazy-mode jobs
    pub lazy_mode_delay_ms: u64,
    pub stale_sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 600,
            max_retries: 3,
            retry_backoff_ms: 500,
            lazy_mode_delay_ms: 1500,
            stale_sweep_interval_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn lazy_mode_delay(&self) -> Duration {
        Duration::from_millis(self.lazy_mode_delay_ms)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// CSS selector matching one element per offered price
    pub price_selector: String,
    /// Attribute on the price element holding the night count, if any
    pub nights_attribute: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            price_selector: "[data-testid=\"price-and-discounted-price\"]".to_string(),
            nights_attribute: "data-nights".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub channel_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { snapshot_path: PathBuf::from("data/rate_shopper.json") }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertySeed {
    pub name: String,
    pub url: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_bundle_size")]
    pub max_bundle_size: u32,
    #[serde(default)]
    pub main: bool,
}

fn default_platform() -> String {
    "booking".to_string()
}

fn default_bundle_size() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotelSeed {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertySeed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub scraper: ScraperConfig,
    pub progress: ProgressConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub hotels: Vec<HotelSeed>,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&s).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).context("parse rate-shopper config")?;
        Ok(cfg)
    }

    /// Missing file means defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn hotel(&self, name_or_id: &str) -> Option<&HotelSeed> {
        self.hotels
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name_or_id) || h.id.to_string() == name_or_id)
    }
}
