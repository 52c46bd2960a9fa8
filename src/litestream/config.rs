//! Litestream configuration synthesis.
//!
//! The YAML document is modelled as plain serde structs and rendered with
//! `serde_saphyr`. A file that already exists at the target path is never
//! touched: operators may mount their own configuration there.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{LitestreamConfig, ReplicaKind};
use crate::error::{Error, Result};

/// Compaction levels written into every generated config
const LEVEL_INTERVALS: [&str; 3] = ["5m", "1h", "24h"];

/// Top-level Litestream configuration document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LitestreamFile {
    pub levels: Vec<Level>,
    pub snapshot: SnapshotPolicy,
    pub dbs: Vec<DatabaseEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Level {
    pub interval: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotPolicy {
    pub interval: String,
    pub retention: String,
}

/// One replicated database
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseEntry {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_checkpoint_page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_checkpoint_page_count: Option<u32>,
    pub replica: Replica,
}

/// Replica destination, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Replica {
    File(FileReplica),
    S3(S3Replica),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileReplica {
    pub path: PathBuf,
    pub sync_interval: String,
    pub snapshot_interval: String,
    pub retention: String,
    pub max_wal_bytes: String,
    pub compress: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct S3Replica {
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub skip_verify: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub force_path_style: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sse: Option<String>,
    pub sync_interval: String,
    pub snapshot_interval: String,
    pub retention: String,
    pub max_wal_bytes: String,
    pub compress: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// What [`write_once`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyPresent,
}

impl LitestreamFile {
    /// Build the document for a single database from configuration
    pub fn from_config(config: &LitestreamConfig) -> Result<Self> {
        let replica = match config.replica_type {
            ReplicaKind::File => {
                let path = config.backup_path.clone().ok_or_else(|| {
                    Error::Config("LITESTREAM_BACKUP_PATH is required for file replicas".into())
                })?;
                Replica::File(FileReplica {
                    path,
                    sync_interval: config.sync_interval.clone(),
                    snapshot_interval: config.snapshot_interval.clone(),
                    retention: config.retention.clone(),
                    max_wal_bytes: config.max_wal_bytes.clone(),
                    compress: config.compress.clone(),
                })
            }
            ReplicaKind::S3 => {
                let bucket = config.bucket.clone().ok_or_else(|| {
                    Error::Config("LITESTREAM_BUCKET is required for s3 replicas".into())
                })?;
                Replica::S3(S3Replica {
                    bucket,
                    path: config.path.clone(),
                    access_key_id: config.access_key_id.clone(),
                    secret_access_key: config.secret_access_key.clone(),
                    region: config.region.clone(),
                    endpoint: config.endpoint.clone(),
                    skip_verify: config.skip_verify,
                    force_path_style: config.force_path_style,
                    sse: config.sse.clone(),
                    sync_interval: config.sync_interval.clone(),
                    snapshot_interval: config.snapshot_interval.clone(),
                    retention: config.retention.clone(),
                    max_wal_bytes: config.max_wal_bytes.clone(),
                    compress: config.compress.clone(),
                })
            }
        };

        Ok(Self {
            levels: LEVEL_INTERVALS
                .iter()
                .map(|interval| Level {
                    interval: interval.to_string(),
                })
                .collect(),
            snapshot: SnapshotPolicy {
                interval: config.snapshot_interval.clone(),
                retention: config.retention.clone(),
            },
            dbs: vec![DatabaseEntry {
                path: config.db_path.clone(),
                meta_path: config.meta_path.clone().or_else(|| config.backup_path.clone()),
                monitor_interval: config.monitor_interval.clone(),
                checkpoint_interval: config.checkpoint_interval.clone(),
                busy_timeout: config.busy_timeout.clone(),
                min_checkpoint_page_count: config.min_checkpoint_page_count,
                max_checkpoint_page_count: config.max_checkpoint_page_count,
                replica,
            }],
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).map_err(|e| Error::ConfigRender(e.to_string()))
    }
}

/// Write the Litestream config unless one is already present.
///
/// An existing file is authoritative, so it is checked before the document
/// is even built: a mounted config does not need the replica settings.
pub fn synthesize(config: &LitestreamConfig) -> Result<WriteOutcome> {
    if config.config_path.exists() {
        tracing::info!(
            "Using existing litestream config at {}",
            config.config_path.display()
        );
        return Ok(WriteOutcome::AlreadyPresent);
    }

    let document = LitestreamFile::from_config(config)?;
    let outcome = write_once(&config.config_path, &document.to_yaml()?)?;
    if outcome == WriteOutcome::Written {
        tracing::info!(
            replica = %config.replica_type,
            "Generated litestream config at {}",
            config.config_path.display()
        );
    }
    Ok(outcome)
}

/// Create `path` with `contents`, never overwriting.
///
/// The file may carry replica credentials, so it is created owner-only.
pub fn write_once(path: &Path, contents: &str) -> Result<WriteOutcome> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Ok(WriteOutcome::AlreadyPresent)
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(WriteOutcome::Written)
}
