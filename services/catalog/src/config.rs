use crate::data_division::DataDivision;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// CDN signing configuration
    pub cdn: CdnConfig,
    /// Object key layout inside the bucket
    #[serde(default)]
    pub layout: StorageLayout,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 bucket holding scenario media and archives
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// CDN distribution and signing key
#[derive(Debug, Clone, Deserialize)]
pub struct CdnConfig {
    /// Distribution domain including scheme and trailing slash,
    /// e.g. `https://d111111abcdef8.cloudfront.net/`
    pub distribution_domain: String,
    /// Public key id registered with the distribution
    pub key_pair_id: String,
    /// PEM file holding the signing key
    pub private_key_path: String,
    /// Lifetime of data/ML download URLs
    #[serde(default = "default_download_expiry_hours")]
    pub download_expiry_hours: u64,
    /// Lifetime of video/thumbnail URLs
    #[serde(default = "default_media_expiry_minutes")]
    pub media_expiry_minutes: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

/// Where scenario objects live in the bucket and how they are named.
///
/// Keys follow `{prefix_path}{uuid}{format_path}/...` for media and
/// `{prefix_path}{uuid}{scenario_path}/{uuid}{suffix}` for archives.
/// Built once at startup and shared read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageLayout {
    #[serde(default = "default_prefix_path")]
    pub prefix_path: String,
    /// Directory holding video and thumbnail
    #[serde(default = "default_format_path")]
    pub format_path: String,
    /// Directory holding scenario data archives
    #[serde(default = "default_scenario_path")]
    pub scenario_path: String,
    /// Directory holding machine-learning archives
    #[serde(default = "default_ml_path")]
    pub ml_path: String,
    #[serde(default = "default_video_suffix")]
    pub video_suffix: String,
    #[serde(default = "default_thumbnail_suffix")]
    pub thumbnail_suffix: String,
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
    #[serde(default)]
    pub division_suffixes: DivisionSuffixes,
}

/// File name suffix (from the first `_`) of each data division
#[derive(Debug, Clone, Deserialize)]
pub struct DivisionSuffixes {
    #[serde(default = "default_open_drive_suffix")]
    pub open_drive: String,
    #[serde(default = "default_vehicle_trajectory_suffix")]
    pub vehicle_trajectory: String,
    #[serde(default = "default_sdmg_scenario_suffix")]
    pub sdmg_scenario: String,
    #[serde(default = "default_open_scenario_suffix")]
    pub open_scenario: String,
    #[serde(default = "default_machine_learning_suffix")]
    pub machine_learning: String,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Header carrying the caller identity resolved by the identity layer
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

// Default value functions
fn default_service_name() -> String {
    "catalog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_download_expiry_hours() -> u64 {
    1
}

fn default_media_expiry_minutes() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_prefix_path() -> String {
    "scenario/".to_string()
}

fn default_format_path() -> String {
    "/format".to_string()
}

fn default_scenario_path() -> String {
    "/scenario".to_string()
}

fn default_ml_path() -> String {
    "/ml_img".to_string()
}

fn default_video_suffix() -> String {
    ".mp4".to_string()
}

fn default_thumbnail_suffix() -> String {
    ".jpeg".to_string()
}

fn default_archive_suffix() -> String {
    ".zip".to_string()
}

fn default_open_drive_suffix() -> String {
    "_opendrive.zip".to_string()
}

fn default_vehicle_trajectory_suffix() -> String {
    "_vehicletrajectory.zip".to_string()
}

fn default_sdmg_scenario_suffix() -> String {
    "_sdmgscenario.zip".to_string()
}

fn default_open_scenario_suffix() -> String {
    "_openscenario.zip".to_string()
}

fn default_machine_learning_suffix() -> String {
    "_ml_img.zip".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "catalog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/catalog/catalog").required(false))
            // Override with environment variables
            // CATALOG__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl CdnConfig {
    /// Lifetime of a data/ML archive download URL
    pub fn download_expiry(&self) -> Duration {
        Duration::from_secs(self.download_expiry_hours.saturating_mul(3600))
    }

    /// Lifetime of a video/thumbnail streaming URL
    pub fn media_expiry(&self) -> Duration {
        Duration::from_secs(self.media_expiry_minutes.saturating_mul(60))
    }
}

impl StorageLayout {
    /// Key prefix of the video/thumbnail directory of a scenario
    pub fn media_prefix(&self, uuid: &str) -> String {
        format!("{}{}{}", self.prefix_path, uuid, self.format_path)
    }

    /// Key prefix of the scenario archive directory of a scenario
    pub fn scenario_prefix(&self, uuid: &str) -> String {
        format!("{}{}{}", self.prefix_path, uuid, self.scenario_path)
    }

    /// Key prefix of the machine-learning archive directory of a scenario
    pub fn ml_prefix(&self, uuid: &str) -> String {
        format!("{}{}{}", self.prefix_path, uuid, self.ml_path)
    }

    /// Configured file suffix of a division
    pub fn suffix_for(&self, division: DataDivision) -> &str {
        let s = &self.division_suffixes;
        match division {
            DataDivision::OpenDrive => &s.open_drive,
            DataDivision::VehicleTrajectory => &s.vehicle_trajectory,
            DataDivision::SdmgScenario => &s.sdmg_scenario,
            DataDivision::OpenScenario => &s.open_scenario,
            DataDivision::MachineLearning => &s.machine_learning,
        }
    }

    /// Directory (relative to the scenario root) holding a division's archive
    pub fn content_path_for(&self, division: DataDivision) -> &str {
        match division {
            DataDivision::MachineLearning => &self.ml_path,
            _ => &self.scenario_path,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            prefix_path: default_prefix_path(),
            format_path: default_format_path(),
            scenario_path: default_scenario_path(),
            ml_path: default_ml_path(),
            video_suffix: default_video_suffix(),
            thumbnail_suffix: default_thumbnail_suffix(),
            archive_suffix: default_archive_suffix(),
            division_suffixes: DivisionSuffixes::default(),
        }
    }
}

impl Default for DivisionSuffixes {
    fn default() -> Self {
        Self {
            open_drive: default_open_drive_suffix(),
            vehicle_trajectory: default_vehicle_trajectory_suffix(),
            sdmg_scenario: default_sdmg_scenario_suffix(),
            open_scenario: default_open_scenario_suffix(),
            machine_learning: default_machine_learning_suffix(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            user_header: default_user_header(),
        }
    }
}
