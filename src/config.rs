//! Pocketstream Configuration
//!
//! All settings are collected into one [`PocketstreamConfig`] at startup:
//! an optional TOML file is read first, then environment variables are
//! overlaid, then the result is validated. Components receive the parts
//! they need by reference and never read the environment themselves.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Placeholder printed in place of secrets
const REDACTED: &str = "****";

/// Main Pocketstream configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PocketstreamConfig {
    /// Garage bootstrap configuration
    #[serde(default)]
    pub garage: GarageConfig,

    /// Litestream replication configuration
    #[serde(default)]
    pub litestream: LitestreamConfig,

    /// Application server configuration
    #[serde(default)]
    pub app: AppConfig,

    /// Gateway API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Garage cluster bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarageConfig {
    /// Path to the garage binary
    #[serde(default = "default_garage_bin")]
    pub binary: PathBuf,

    /// Marker file recording a completed bootstrap
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,

    /// Zone assigned to this node
    #[serde(default)]
    pub zone: String,

    /// Capacity hint assigned to this node
    #[serde(default)]
    pub capacity: String,

    /// Layout version to apply
    #[serde(default = "default_layout_version")]
    pub layout_version: String,

    /// Access key id to import
    #[serde(default)]
    pub access_key: String,

    /// Secret for the access key
    #[serde(default)]
    pub secret_key: String,

    /// Pass `--yes` to `key import`
    #[serde(default)]
    pub key_import_yes: bool,

    /// Buckets to create and grant to the access key
    #[serde(default)]
    pub buckets: Vec<String>,

    /// Bucket permissions granted to the access key
    #[serde(default)]
    pub permissions: BucketPermissions,

    /// Readiness poll interval in milliseconds
    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,

    /// Give up waiting for readiness after this many seconds (unset = never)
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,

    /// Grace period between SIGTERM and SIGKILL when stopping the server
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

/// Permission flags passed to `bucket allow`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPermissions {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub owner: bool,
}

/// Kind of replica target Litestream ships to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaKind {
    #[default]
    File,
    S3,
}

impl FromStr for ReplicaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(ReplicaKind::File),
            "s3" => Ok(ReplicaKind::S3),
            other => Err(Error::UnsupportedReplicaType(other.to_string())),
        }
    }
}

impl fmt::Display for ReplicaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaKind::File => f.write_str("file"),
            ReplicaKind::S3 => f.write_str("s3"),
        }
    }
}

/// Litestream replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LitestreamConfig {
    /// Path to the litestream binary
    #[serde(default = "default_litestream_bin")]
    pub binary: PathBuf,

    /// Where the generated litestream.yml lives
    #[serde(default = "default_litestream_config_path")]
    pub config_path: PathBuf,

    /// Replicated SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Replica target kind
    #[serde(default)]
    pub replica_type: ReplicaKind,

    /// Replica directory for `file` replicas
    #[serde(default)]
    pub backup_path: Option<PathBuf>,

    /// Litestream metadata directory
    #[serde(default)]
    pub meta_path: Option<PathBuf>,

    /// S3 bucket
    #[serde(default)]
    pub bucket: Option<String>,

    /// Path prefix inside the S3 bucket
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub skip_verify: bool,

    #[serde(default)]
    pub force_path_style: bool,

    /// Server-side encryption mode
    #[serde(default)]
    pub sse: Option<String>,

    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,

    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: String,

    #[serde(default = "default_retention")]
    pub retention: String,

    #[serde(default = "default_max_wal_bytes")]
    pub max_wal_bytes: String,

    #[serde(default = "default_compress")]
    pub compress: String,

    #[serde(default)]
    pub monitor_interval: Option<String>,

    /// Litestream's own checkpoint interval (written into litestream.yml)
    #[serde(default)]
    pub checkpoint_interval: Option<String>,

    #[serde(default)]
    pub busy_timeout: Option<String>,

    #[serde(default)]
    pub min_checkpoint_page_count: Option<u32>,

    #[serde(default)]
    pub max_checkpoint_page_count: Option<u32>,

    /// Period of the forced WAL checkpoint task, in seconds
    #[serde(default = "default_force_checkpoint_secs")]
    pub force_checkpoint_secs: u64,

    /// Period of the replication health task, in seconds
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Upper bound on one `db list` health query, in seconds
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
}

/// Deployment profile of the application server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Local,
    Docker,
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Profile::Docker),
            "local" | "" => Ok(Profile::Local),
            other => Err(Error::Config(format!("unknown profile: {}", other))),
        }
    }
}

/// Application server (PocketBase) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the application binary
    #[serde(default = "default_app_bin")]
    pub binary: PathBuf,

    /// Internal address the application listens on
    #[serde(default = "default_app_http")]
    pub http_address: String,

    #[serde(default = "default_admin_email")]
    pub admin_email: String,

    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    /// 32 hex characters when set
    #[serde(default)]
    pub encryption_key: Option<String>,

    #[serde(default)]
    pub profile: Profile,
}

/// Gateway API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Public gateway bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_garage_bin() -> PathBuf {
    PathBuf::from("/usr/local/bin/garage")
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("/var/lib/garage/.initialized")
}

fn default_layout_version() -> String {
    "1".to_string()
}

fn default_ready_interval_ms() -> u64 {
    1000
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_litestream_bin() -> PathBuf {
    PathBuf::from("/litestream")
}

fn default_litestream_config_path() -> PathBuf {
    PathBuf::from("/tmp/litestream.yml")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/pb_data/data.db")
}

fn default_sync_interval() -> String {
    "5m".to_string()
}

fn default_snapshot_interval() -> String {
    "6h".to_string()
}

fn default_retention() -> String {
    "168h".to_string()
}

fn default_max_wal_bytes() -> String {
    "512MB".to_string()
}

fn default_compress() -> String {
    "gzip".to_string()
}

fn default_force_checkpoint_secs() -> u64 {
    30
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_health_check_timeout_secs() -> u64 {
    5
}

fn default_app_bin() -> PathBuf {
    PathBuf::from("/pocketbase")
}

fn default_app_http() -> String {
    "127.0.0.1:8091".to_string()
}

fn default_admin_email() -> String {
    "admin@example.com".to_string()
}

fn default_admin_password() -> String {
    "admin123".to_string()
}

fn default_api_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for GarageConfig {
    fn default() -> Self {
        Self {
            binary: default_garage_bin(),
            marker_path: default_marker_path(),
            zone: String::new(),
            capacity: String::new(),
            layout_version: default_layout_version(),
            access_key: String::new(),
            secret_key: String::new(),
            key_import_yes: false,
            buckets: Vec::new(),
            permissions: BucketPermissions::default(),
            ready_interval_ms: default_ready_interval_ms(),
            ready_timeout_secs: None,
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl Default for LitestreamConfig {
    fn default() -> Self {
        Self {
            binary: default_litestream_bin(),
            config_path: default_litestream_config_path(),
            db_path: default_db_path(),
            replica_type: ReplicaKind::File,
            backup_path: None,
            meta_path: None,
            bucket: None,
            path: None,
            access_key_id: None,
            secret_access_key: None,
            region: None,
            endpoint: None,
            skip_verify: false,
            force_path_style: false,
            sse: None,
            sync_interval: default_sync_interval(),
            snapshot_interval: default_snapshot_interval(),
            retention: default_retention(),
            max_wal_bytes: default_max_wal_bytes(),
            compress: default_compress(),
            monitor_interval: None,
            checkpoint_interval: None,
            busy_timeout: None,
            min_checkpoint_page_count: None,
            max_checkpoint_page_count: None,
            force_checkpoint_secs: default_force_checkpoint_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binary: default_app_bin(),
            http_address: default_app_http(),
            admin_email: default_admin_email(),
            admin_password: default_admin_password(),
            encryption_key: None,
            profile: Profile::Local,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Snapshot of environment variables with typed accessors.
///
/// Empty values are treated the same as unset ones.
struct EnvVars(HashMap<String, String>);

impl EnvVars {
    fn string(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.string(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }

    fn number<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, raw))),
            None => Ok(None),
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.string(key).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Assign `$target` when the variable is present
macro_rules! overlay {
    ($target:expr, $value:expr) => {
        if let Some(v) = $value {
            $target = v;
        }
    };
}

impl PocketstreamConfig {
    /// Load configuration: optional TOML file, process environment, validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file (no environment overlay)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (no environment overlay)
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from environment variables
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = EnvVars(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );

        let garage = &mut self.garage;
        overlay!(garage.binary, env.path("GARAGE_BIN"));
        overlay!(garage.marker_path, env.path("GARAGE_MARKER_PATH"));
        overlay!(garage.zone, env.string("GARAGE_ZONE"));
        overlay!(garage.capacity, env.string("GARAGE_CAPACITY"));
        overlay!(garage.layout_version, env.string("GARAGE_LAYOUT_VERSION"));
        overlay!(garage.access_key, env.string("GARAGE_ACCESS_KEY"));
        overlay!(garage.secret_key, env.string("GARAGE_SECRET_KEY"));
        overlay!(garage.key_import_yes, env.flag("GARAGE_KEY_IMPORT_YES"));
        overlay!(garage.permissions.read, env.flag("GARAGE_BUCKET_ALLOW_READ"));
        overlay!(garage.permissions.write, env.flag("GARAGE_BUCKET_ALLOW_WRITE"));
        overlay!(garage.permissions.owner, env.flag("GARAGE_BUCKET_ALLOW_OWNER"));
        overlay!(garage.ready_interval_ms, env.number("GARAGE_READY_INTERVAL_MS")?);
        overlay!(garage.stop_grace_secs, env.number("GARAGE_STOP_GRACE_SECS")?);
        if let Some(secs) = env.number("GARAGE_READY_TIMEOUT_SECS")? {
            garage.ready_timeout_secs = Some(secs);
        }
        match env.list("GARAGE_BUCKETS") {
            Some(buckets) => garage.buckets = buckets,
            None => {
                let legacy: Vec<String> = ["S3_BUCKET", "LITESTREAM_BUCKET"]
                    .iter()
                    .filter_map(|key| env.string(key))
                    .collect();
                if !legacy.is_empty() {
                    garage.buckets = legacy;
                }
            }
        }

        let ls = &mut self.litestream;
        overlay!(ls.binary, env.path("LITESTREAM_BIN"));
        overlay!(ls.config_path, env.path("LITESTREAM_CONFIG_PATH"));
        overlay!(ls.db_path, env.path("LITESTREAM_DB_PATH"));
        if let Some(kind) = env.string("LITESTREAM_REPLICA_TYPE") {
            ls.replica_type = kind.parse()?;
        }
        if let Some(path) = env.path("LITESTREAM_BACKUP_PATH") {
            ls.backup_path = Some(path);
        }
        if let Some(path) = env.path("LITESTREAM_META_PATH") {
            ls.meta_path = Some(path);
        }
        if let Some(v) = env.string("LITESTREAM_BUCKET") {
            ls.bucket = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_PATH") {
            ls.path = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_ACCESS_KEY_ID") {
            ls.access_key_id = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_SECRET_ACCESS_KEY") {
            ls.secret_access_key = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_REGION") {
            ls.region = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_ENDPOINT") {
            ls.endpoint = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_SSE") {
            ls.sse = Some(v);
        }
        overlay!(ls.skip_verify, env.flag("LITESTREAM_SKIP_VERIFY"));
        overlay!(ls.force_path_style, env.flag("LITESTREAM_FORCE_PATH_STYLE"));
        overlay!(ls.sync_interval, env.string("LITESTREAM_SYNC_INTERVAL"));
        overlay!(ls.snapshot_interval, env.string("LITESTREAM_SNAPSHOT_INTERVAL"));
        overlay!(ls.retention, env.string("LITESTREAM_RETENTION"));
        overlay!(ls.max_wal_bytes, env.string("LITESTREAM_MAX_WAL_BYTES"));
        overlay!(ls.compress, env.string("LITESTREAM_COMPRESS"));
        if let Some(v) = env.string("LITESTREAM_MONITOR_INTERVAL") {
            ls.monitor_interval = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_CHECKPOINT_INTERVAL") {
            ls.checkpoint_interval = Some(v);
        }
        if let Some(v) = env.string("LITESTREAM_BUSY_TIMEOUT") {
            ls.busy_timeout = Some(v);
        }
        if let Some(v) = env.number("LITESTREAM_MIN_CHECKPOINT_PAGE_COUNT")? {
            ls.min_checkpoint_page_count = Some(v);
        }
        if let Some(v) = env.number("LITESTREAM_MAX_CHECKPOINT_PAGE_COUNT")? {
            ls.max_checkpoint_page_count = Some(v);
        }
        overlay!(ls.force_checkpoint_secs, env.number("CHECKPOINT_INTERVAL_SECS")?);
        overlay!(ls.health_check_interval_secs, env.number("HEALTH_CHECK_INTERVAL_SECS")?);
        overlay!(ls.health_check_timeout_secs, env.number("HEALTH_CHECK_TIMEOUT_SECS")?);

        let app = &mut self.app;
        overlay!(app.binary, env.path("POCKETBASE_BIN"));
        overlay!(app.http_address, env.string("POCKETBASE_HTTP"));
        overlay!(app.admin_email, env.string("POCKETBASE_ADMIN_EMAIL"));
        overlay!(app.admin_password, env.string("POCKETBASE_ADMIN_PASSWORD"));
        if let Some(key) = env.string("POCKETBASE_ENCRYPTION_KEY") {
            app.encryption_key = Some(key);
        }
        if let Some(profile) = env.string("APP_PROFILE").or_else(|| env.string("PROFILE")) {
            app.profile = profile.parse()?;
        }

        overlay!(self.api.bind_address, env.string("API_BIND_ADDRESS"));
        overlay!(self.logging.level, env.string("LOG_LEVEL"));
        overlay!(self.logging.format, env.string("LOG_FORMAT"));

        Ok(())
    }

    /// Validate the configuration shared by every subcommand
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = &self.app.encryption_key {
            if !is_valid_encryption_key(key) {
                return Err(Error::InvalidEncryptionKey);
            }
        }

        if self.litestream.db_path.as_os_str().is_empty() {
            return Err(Error::Config("litestream.db_path cannot be empty".into()));
        }

        if self.api.bind_address.is_empty() {
            return Err(Error::Config("api.bind_address cannot be empty".into()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(Error::Config(format!(
                "logging.format must be 'pretty' or 'json', got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Copy of the configuration with every secret masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.garage.secret_key.is_empty() {
            copy.garage.secret_key = REDACTED.to_string();
        }
        if copy.litestream.secret_access_key.is_some() {
            copy.litestream.secret_access_key = Some(REDACTED.to_string());
        }
        copy.app.admin_password = REDACTED.to_string();
        if copy.app.encryption_key.is_some() {
            copy.app.encryption_key = Some(REDACTED.to_string());
        }
        copy
    }
}

impl GarageConfig {
    /// Validate the settings the bootstrap sequence depends on
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("GARAGE_ZONE", &self.zone),
            ("GARAGE_CAPACITY", &self.capacity),
            ("GARAGE_ACCESS_KEY", &self.access_key),
            ("GARAGE_SECRET_KEY", &self.secret_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must be set", name)));
            }
        }

        if self.buckets.is_empty() {
            return Err(Error::Config(
                "at least one bucket must be configured (GARAGE_BUCKETS, S3_BUCKET or LITESTREAM_BUCKET)".into(),
            ));
        }

        if self.ready_interval_ms == 0 {
            return Err(Error::Config("garage.ready_interval_ms must be positive".into()));
        }

        Ok(())
    }

    /// Readiness poll interval as Duration
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    /// Optional readiness deadline as Duration
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    /// Stop grace period as Duration
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl LitestreamConfig {
    /// Forced checkpoint period as Duration
    pub fn force_checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.force_checkpoint_secs.max(1))
    }

    /// Health check period as Duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    /// Health query bound as Duration
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs.max(1))
    }
}

/// Encryption keys are 16 random bytes in hex: exactly 32 hex characters
pub fn is_valid_encryption_key(key: &str) -> bool {
    key.len() == 32 && hex::decode(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> PocketstreamConfig {
        let mut config = PocketstreamConfig::default();
        config
            .apply_env(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let config = PocketstreamConfig::default();
        assert_eq!(config.garage.marker_path, PathBuf::from("/var/lib/garage/.initialized"));
        assert_eq!(config.garage.ready_interval(), Duration::from_secs(1));
        assert!(config.garage.ready_timeout().is_none());
        assert_eq!(config.litestream.config_path, PathBuf::from("/tmp/litestream.yml"));
        assert_eq!(config.litestream.replica_type, ReplicaKind::File);
        assert_eq!(config.litestream.sync_interval, "5m");
        assert_eq!(config.litestream.retention, "168h");
        assert_eq!(config.litestream.force_checkpoint_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let config = env(&[
            ("GARAGE_ZONE", "dc1"),
            ("GARAGE_CAPACITY", "1"),
            ("GARAGE_ACCESS_KEY", "AKIA_TEST"),
            ("GARAGE_SECRET_KEY", "s3cr3t"),
            ("GARAGE_BUCKET_ALLOW_READ", "true"),
            ("GARAGE_BUCKET_ALLOW_WRITE", "TRUE"),
            ("GARAGE_BUCKET_ALLOW_OWNER", "false"),
            ("S3_BUCKET", "app"),
            ("LITESTREAM_BUCKET", "backup"),
            ("LITESTREAM_REPLICA_TYPE", "s3"),
            ("CHECKPOINT_INTERVAL_SECS", "10"),
        ]);

        assert_eq!(config.garage.zone, "dc1");
        assert_eq!(config.garage.buckets, vec!["app", "backup"]);
        assert_eq!(
            config.garage.permissions,
            BucketPermissions { read: true, write: true, owner: false }
        );
        assert_eq!(config.litestream.replica_type, ReplicaKind::S3);
        assert_eq!(config.litestream.bucket.as_deref(), Some("backup"));
        assert_eq!(config.litestream.force_checkpoint_secs, 10);
        assert!(config.garage.validate().is_ok());
    }

    #[test]
    fn test_explicit_bucket_list_wins() {
        let config = env(&[
            ("GARAGE_BUCKETS", "one, two ,,three"),
            ("S3_BUCKET", "ignored"),
        ]);
        assert_eq!(config.garage.buckets, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = env(&[("GARAGE_LAYOUT_VERSION", ""), ("S3_BUCKET", "")]);
        assert_eq!(config.garage.layout_version, "1");
        assert!(config.garage.buckets.is_empty());
    }

    #[test]
    fn test_unsupported_replica_type() {
        let mut config = PocketstreamConfig::default();
        let err = config
            .apply_env([("LITESTREAM_REPLICA_TYPE", "gcs")])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedReplicaType(ref t) if t == "gcs"));
    }

    #[test]
    fn test_bad_number() {
        let mut config = PocketstreamConfig::default();
        let err = config
            .apply_env([("GARAGE_READY_TIMEOUT_SECS", "soon")])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_garage_validation_requires_credentials() {
        let config = env(&[("GARAGE_ZONE", "dc1"), ("GARAGE_CAPACITY", "1")]);
        let err = config.garage.validate().unwrap_err();
        assert!(err.to_string().contains("GARAGE_ACCESS_KEY"));
    }

    #[test]
    fn test_encryption_key_validation() {
        assert!(is_valid_encryption_key("0123456789abcdef0123456789ABCDEF"));
        assert!(!is_valid_encryption_key("0123456789abcdef"));
        assert!(!is_valid_encryption_key("0123456789abcdef0123456789abcdeg"));

        let config = env(&[("POCKETBASE_ENCRYPTION_KEY", "not-hex")]);
        assert!(matches!(config.validate(), Err(Error::InvalidEncryptionKey)));
    }

    #[test]
    fn test_parse_toml_then_env() {
        let toml = r#"
[garage]
zone = "dc2"
capacity = "2"
buckets = ["media"]

[garage.permissions]
read = true

[litestream]
replica_type = "s3"
bucket = "replicas"

[api]
bind_address = "127.0.0.1:9000"
"#;

        let mut config = PocketstreamConfig::from_toml(toml).unwrap();
        assert_eq!(config.garage.zone, "dc2");
        assert!(config.garage.permissions.read);
        assert_eq!(config.litestream.replica_type, ReplicaKind::S3);

        config.apply_env([("GARAGE_ZONE", "dc9")]).unwrap();
        assert_eq!(config.garage.zone, "dc9");
        assert_eq!(config.garage.buckets, vec!["media"]);
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let config = env(&[
            ("GARAGE_SECRET_KEY", "s3cr3t"),
            ("LITESTREAM_SECRET_ACCESS_KEY", "hidden"),
        ]);
        let shown = toml::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("s3cr3t"));
        assert!(!shown.contains("hidden"));
        assert!(!shown.contains("admin123"));
    }
}
