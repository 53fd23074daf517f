/// Configuration — loaded from firewatch.toml (working directory) with
/// env-var overrides. Env format: FIREWATCH__SECTION__KEY.
///
/// One immutable struct built at startup and passed by reference into every
/// component; there is no other global state.
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Per-download timeout.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on consecutive skips (duplicates, network errors) before
    /// a tick gives up with "no camera available".
    #[serde(default = "default_max_skips")]
    pub max_skips: u32,
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_skips() -> u32 {
    100
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_skips: default_max_skips(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Prediction service endpoint.
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_classify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_classifier_endpoint() -> String {
    "http://127.0.0.1:8501/v1/models/smoke:classify".to_string()
}
fn default_classify_timeout_secs() -> u64 {
    120
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            timeout_secs: default_classify_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmenterConfig {
    /// Minimum tile edge in pixels.
    #[serde(default = "default_min_tile_px")]
    pub min_tile_px: u32,
    /// Tile edge as a fraction of image height.
    #[serde(default = "default_tile_height_fraction")]
    pub tile_height_fraction: f32,
}

fn default_min_tile_px() -> u32 {
    150
}
fn default_tile_height_fraction() -> f32 {
    0.25
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_tile_px: default_min_tile_px(),
            tile_height_fraction: default_tile_height_fraction(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "firewatch.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// Artifact store endpoint for detection image uploads (multipart POST).
    /// Uploads are best-effort; unset means no uploads.
    pub artifact_endpoint: Option<String>,
    /// Directory receiving positive-scoring crops for future training.
    pub positives_dir: Option<String>,
    /// Local image archive (filename-encoded camera + timestamp), used by
    /// backfill mode and for alert-email temporal context.
    pub archive_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Repeat alerts for the same camera are withheld for this long.
    #[serde(default = "default_suppress_secs")]
    pub suppress_secs: i64,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// SMS gateway (JSON POST). Unset disables SMS.
    pub sms_gateway_url: Option<String>,
}

fn default_suppress_secs() -> i64 {
    2 * 60 * 60
}
fn default_from_address() -> String {
    "firewatch-alerts@localhost".to_string()
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            suppress_secs: default_suppress_secs(),
            from_address: default_from_address(),
            sms_gateway_url: None,
        }
    }
}

/// Load configuration from firewatch.toml + environment variable overrides.
pub fn load_config() -> Result<AppConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name("firewatch").required(false))
        .add_source(
            config::Environment::with_prefix("FIREWATCH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(cfg.try_deserialize::<AppConfig>()?)
}
