//! Daemon configuration.
//!
//! Settings come from an optional TOML file (`--config`), then command-line
//! flags override them:
//!
//! ```toml
//! paths = ["/var/lib/cassandra/data"]
//! recursive = true
//! prefix = "backups/"
//!
//! [store]
//! bucket = "sstables"
//! region = "eu-west-1"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use tablevault_service::{DEFAULT_TRANSIENT_MARKER, MAX_WALK_INTERVAL};
use tablevault_transfer::{MAX_SINGLE_OBJECT_SIZE, MIN_PART_SIZE};
use tablevault_uploader::DEFAULT_SEPARATOR;

use crate::cli::Cli;

pub const MIB: u64 = 1024 * 1024;

/// Object store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub path_style: bool,

    /// Server-side encryption (AES256).
    #[serde(default)]
    pub sse: bool,

    /// Falls back to `AWS_ACCESS_KEY_ID` when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Falls back to `AWS_SECRET_ACCESS_KEY` when unset.
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            path_style: false,
            sse: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directories to back up.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub recursive: bool,

    #[serde(default)]
    pub auto_add: bool,

    /// Also treat close-after-write events as finalized files.
    #[serde(default)]
    pub listen_close_write: bool,

    /// Prefix of every remote key.
    #[serde(default)]
    pub prefix: String,

    /// Host name used in remote keys (this machine's by default).
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_separator")]
    pub separator: String,

    /// Number of upload workers.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Largest single-request upload, in MiB.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Multipart chunk size, in MiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Attempts per file.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds between reconciliation walks.
    #[serde(default = "default_walk_interval")]
    pub walk_interval: u64,

    /// Walk all roots at startup.
    #[serde(default)]
    pub backup: bool,

    #[serde(default)]
    pub include: Option<String>,

    #[serde(default)]
    pub exclude: Option<String>,

    #[serde(default = "default_transient_marker")]
    pub transient_marker: String,

    /// Use the in-process store (dry run).
    #[serde(default)]
    pub memory_store: bool,

    #[serde(default)]
    pub store: StoreSettings,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.into()
}

fn default_threads() -> usize {
    4
}

fn default_max_upload_size() -> u64 {
    4096
}

fn default_chunk_size() -> u64 {
    256
}

fn default_retries() -> u32 {
    3
}

fn default_walk_interval() -> u64 {
    3600
}

fn default_transient_marker() -> String {
    DEFAULT_TRANSIENT_MARKER.into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            recursive: false,
            auto_add: false,
            listen_close_write: false,
            prefix: String::new(),
            name: None,
            separator: default_separator(),
            threads: default_threads(),
            max_upload_size: default_max_upload_size(),
            chunk_size: default_chunk_size(),
            retries: default_retries(),
            walk_interval: default_walk_interval(),
            backup: false,
            include: None,
            exclude: None,
            transient_marker: default_transient_marker(),
            memory_store: false,
            store: StoreSettings::default(),
        }
    }
}

impl Config {
    /// Builds the effective configuration from the optional file and flags.
    pub fn load(cli: Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("invalid {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file read");
        Ok(config)
    }

    /// Overrides file settings with the flags that were given.
    pub fn apply_cli(&mut self, cli: Cli) {
        if !cli.paths.is_empty() {
            self.paths = cli.paths;
        }
        self.recursive |= cli.recursive;
        self.auto_add |= cli.auto_add;
        self.listen_close_write |= cli.listen_close_write;
        self.backup |= cli.backup;
        self.memory_store |= cli.memory_store;
        self.store.path_style |= cli.path_style;
        self.store.sse |= cli.sse;

        if let Some(v) = cli.bucket {
            self.store.bucket = v;
        }
        if let Some(v) = cli.region {
            self.store.region = v;
        }
        if let Some(v) = cli.endpoint {
            self.store.endpoint = Some(v);
        }
        if let Some(v) = cli.prefix {
            self.prefix = v;
        }
        if let Some(v) = cli.name {
            self.name = Some(v);
        }
        if let Some(v) = cli.separator {
            self.separator = v;
        }
        if let Some(v) = cli.threads {
            self.threads = v;
        }
        if let Some(v) = cli.max_upload_size {
            self.max_upload_size = v;
        }
        if let Some(v) = cli.chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = cli.retries {
            self.retries = v;
        }
        if let Some(v) = cli.walk_interval {
            self.walk_interval = v;
        }
        if let Some(v) = cli.include {
            self.include = Some(v);
        }
        if let Some(v) = cli.exclude {
            self.exclude = Some(v);
        }
        if let Some(v) = cli.transient_marker {
            self.transient_marker = v;
        }
    }

    /// Rejects settings the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.paths.is_empty() {
            bail!("no directories to watch");
        }
        if self.threads == 0 {
            bail!("threads must be at least 1");
        }
        if self.retries == 0 {
            bail!("retries must be at least 1");
        }
        if self.walk_interval == 0 {
            bail!("walk interval must be at least 1 second");
        }
        if self.walk_interval > MAX_WALK_INTERVAL.as_secs() {
            bail!(
                "walk interval {} s exceeds the maximum of {} s",
                self.walk_interval,
                MAX_WALK_INTERVAL.as_secs()
            );
        }
        if self.chunk_size_bytes() < MIN_PART_SIZE {
            bail!(
                "chunk size {} MiB is below the store minimum of {} MiB",
                self.chunk_size,
                MIN_PART_SIZE / MIB
            );
        }
        if self.max_upload_size_bytes() > MAX_SINGLE_OBJECT_SIZE {
            bail!(
                "max upload size {} MiB exceeds the single-request limit of {} MiB",
                self.max_upload_size,
                MAX_SINGLE_OBJECT_SIZE / MIB
            );
        }
        if !self.memory_store && self.store.bucket.is_empty() {
            bail!("no bucket configured (use --bucket or --memory-store)");
        }
        Ok(())
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size.saturating_mul(MIB)
    }

    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size.saturating_mul(MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn valid() -> Config {
        Config {
            paths: vec!["/data".into()],
            store: StoreSettings {
                bucket: "b".into(),
                ..StoreSettings::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.threads, 4);
        assert_eq!(config.max_upload_size, 4096);
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.retries, 3);
        assert_eq!(config.walk_interval, 3600);
        assert_eq!(config.separator, ":");
        assert_eq!(config.transient_marker, "-tmp");
        assert_eq!(config.store.region, "us-east-1");
        assert!(!config.listen_close_write);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            prefix: "backups/".into(),
            name: Some("node1".into()),
            recursive: true,
            exclude: Some("/system/".into()),
            ..valid()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            paths = ["/var/lib/cassandra/data"]
            threads = 2

            [store]
            bucket = "sstables"
            endpoint = "http://localhost:9000"
            path_style = true
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.store.bucket, "sstables");
        assert_eq!(config.store.region, "us-east-1");
        assert!(config.store.path_style);
        config.validate().unwrap();
    }

    #[test]
    fn flags_override_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tablevault.toml");
        std::fs::write(
            &path,
            "paths = [\"/from/file\"]\nthreads = 2\nprefix = \"file/\"\n[store]\nbucket = \"file-bucket\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "tablevault",
            "--config",
            path.to_str().unwrap(),
            "-t",
            "6",
            "--bucket",
            "flag-bucket",
        ])
        .unwrap();
        let config = Config::load(cli).unwrap();

        assert_eq!(config.threads, 6);
        assert_eq!(config.store.bucket, "flag-bucket");
        assert_eq!(config.prefix, "file/");
        assert_eq!(config.paths, vec![PathBuf::from("/from/file")]);
    }

    #[test]
    fn validation_rejects_unusable_values() {
        valid().validate().unwrap();

        let bad = [
            Config {
                paths: vec![],
                ..valid()
            },
            Config {
                threads: 0,
                ..valid()
            },
            Config {
                chunk_size: 4,
                ..valid()
            },
            Config {
                max_upload_size: 5121,
                ..valid()
            },
            Config {
                retries: 0,
                ..valid()
            },
            Config {
                walk_interval: 0,
                ..valid()
            },
            Config {
                walk_interval: u64::MAX,
                ..valid()
            },
            Config {
                store: StoreSettings::default(),
                ..valid()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn longest_walk_interval_is_accepted() {
        let config = Config {
            walk_interval: MAX_WALK_INTERVAL.as_secs(),
            ..valid()
        };
        config.validate().unwrap();
    }

    #[test]
    fn memory_store_needs_no_bucket() {
        let config = Config {
            memory_store: true,
            store: StoreSettings::default(),
            ..valid()
        };
        config.validate().unwrap();
    }
}
