//! `relay-worker` -- runs a ComfyUI job through the relay locally.
//!
//! Waits for the ComfyUI backend to become reachable, reads one job
//! record (`{"id": ..., "input": {...}}`) from disk and runs it in the
//! configured mode. Incremental mode prints one JSON event per line as
//! events arrive; buffered mode prints a single JSON array at the end.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default           | Description                          |
//! |---------------------------|----------|-------------------|--------------------------------------|
//! | `COMFY_HOST`              | no       | `127.0.0.1:3021`  | ComfyUI `host:port`                  |
//! | `NOSTREAMING`             | no       | --                | `true`/`1`/`t` selects buffered mode |
//! | `TEST_INPUT_PATH`         | no       | `test_input.json` | Job record to run                    |
//! | `STREAM_TIMEOUT_SECS`     | no       | `120`             | `0` disables the stream timeout      |
//! | `BUCKET_*`                | no       | --                | Object storage; see `RelayConfig`    |

use anyhow::Context;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_comfyui::readiness::{wait_for_service, DEFAULT_PROBE_INTERVAL};
use relay_core::config::{RelayConfig, RunMode};
use relay_worker::JobHandler;

/// Job id assigned to records that do not carry one.
const LOCAL_JOB_ID: &str = "local_test";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=info,relay_comfyui=info,relay_cloud=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    tracing::info!(host = %config.host, mode = ?config.mode, "Starting relay-worker");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let probe = reqwest::Client::new();
    if !wait_for_service(&probe, &config.api_url(), DEFAULT_PROBE_INTERVAL, &cancel).await {
        return Ok(());
    }
    tracing::info!("ComfyUI service is ready");

    let http = reqwest::Client::builder()
        .timeout(config.submit_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let handler = JobHandler::from_config(&config, http).await;

    let job = read_job(&config).await?;

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::warn!("Job abandoned on shutdown");
            Ok(())
        }
        result = run(&handler, config.mode, job) => result,
    }
}

async fn read_job(config: &RelayConfig) -> anyhow::Result<serde_json::Value> {
    let path = &config.test_input_path;
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read job record from {}", path.display()))?;
    let mut job: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    if let Some(record) = job.as_object_mut() {
        record
            .entry("id")
            .or_insert_with(|| serde_json::Value::String(LOCAL_JOB_ID.to_string()));
    }
    Ok(job)
}

async fn run(handler: &JobHandler, mode: RunMode, job: serde_json::Value) -> anyhow::Result<()> {
    match mode {
        RunMode::Buffered => {
            let outputs = handler.run_buffered(job).await?;
            println!("{}", serde_json::to_string(&outputs)?);
        }
        RunMode::Incremental => {
            let events = handler.run_incremental(job);
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                println!("{}", event?);
            }
        }
    }
    Ok(())
}
