//! Wires configuration, store, uploader and service together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tablevault_service::{FilterRules, ServiceConfig, TaskRunner};
use tablevault_store::{MemoryStore, S3Config, S3Connector, StoreConnector};
use tablevault_transfer::{ChunkPlanner, SystemMemory};
use tablevault_uploader::{KeyScheme, RetryPolicy, TaskProcessor, Uploader};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, StoreSettings};

/// Runs the daemon until Ctrl-C, a fatal worker error, or (with `once`) the
/// end of a single pass.
pub async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let connector = connector(&config)?;
    let runner = task_runner(&config, connector);
    let service_config = service_config(&config)?;

    tracing::info!(
        host = %service_config.keys.host(),
        prefix = %config.prefix,
        recursive = config.recursive,
        "backing up {} director{}",
        config.paths.len(),
        if config.paths.len() == 1 { "y" } else { "ies" }
    );

    if once {
        let report = tablevault_service::run_single_pass(service_config, runner).await?;
        if report.dropped > 0 {
            anyhow::bail!("{} file(s) could not be uploaded", report.dropped);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal_cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, shutting down");
                signal_cancel.cancel();
            }
        }
    });

    let report = tablevault_service::run(service_config, runner, cancel.clone()).await;
    cancel.cancel();

    let report = report?;
    tracing::info!(
        uploaded = report.uploaded,
        skipped = report.skipped,
        dropped = report.dropped,
        "service stopped"
    );
    Ok(())
}

fn connector(config: &Config) -> anyhow::Result<Arc<dyn StoreConnector>> {
    if config.memory_store {
        tracing::warn!("using the in-memory store, nothing leaves this machine");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let s3 = s3_config(&config.store)?;
    tracing::info!(bucket = %s3.bucket, region = %s3.region, "using S3 store");
    Ok(Arc::new(S3Connector::new(&s3)?))
}

fn s3_config(settings: &StoreSettings) -> anyhow::Result<S3Config> {
    let access_key_id = match &settings.access_key_id {
        Some(key) => key.clone(),
        None => std::env::var("AWS_ACCESS_KEY_ID").context("AWS_ACCESS_KEY_ID is not set")?,
    };
    let secret_access_key = match &settings.secret_access_key {
        Some(secret) => secret.clone(),
        None => std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY is not set")?,
    };

    Ok(S3Config {
        bucket: settings.bucket.clone(),
        region: settings.region.clone(),
        endpoint: settings.endpoint.clone(),
        path_style: settings.path_style,
        access_key_id,
        secret_access_key,
        sse: settings.sse,
    })
}

fn task_runner(config: &Config, connector: Arc<dyn StoreConnector>) -> Arc<dyn TaskRunner> {
    let planner = ChunkPlanner::new(
        config.max_upload_size_bytes(),
        config.chunk_size_bytes(),
        Arc::new(SystemMemory),
    );
    Arc::new(TaskProcessor::new(
        Uploader::new(planner),
        connector,
        RetryPolicy::new(config.retries),
    ))
}

fn service_config(config: &Config) -> anyhow::Result<ServiceConfig> {
    let rules = FilterRules::new(
        &config.transient_marker,
        config.include.as_deref(),
        config.exclude.as_deref(),
    )?;
    Ok(ServiceConfig {
        roots: config.paths.clone(),
        recursive: config.recursive,
        auto_add: config.auto_add,
        close_write: config.listen_close_write,
        workers: config.threads,
        walk_interval: Duration::from_secs(config.walk_interval),
        walk_at_start: config.backup,
        rules,
        keys: KeyScheme::for_this_host(&config.prefix, config.name.as_deref(), &config.separator),
    })
}
