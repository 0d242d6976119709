//! Job entry points.
//!
//! [`JobHandler`] drives one job through the event stream and the
//! materializer. It offers two entry points, selected once per process:
//!
//! - [`JobHandler::run_buffered`] collects every event and returns them
//!   together; a propagated fault discards the partial buffer.
//! - [`JobHandler::run_incremental`] yields each event as soon as it is
//!   ready; events already yielded stay with the caller after a fault.

use std::sync::Arc;

use futures::{Stream, StreamExt, TryStreamExt};
use relay_cloud::Uploader;
use relay_comfyui::{ComfyUIApi, ComfyUIBridge, ComfyUIClient, EventStream, StreamError, StreamEvent};
use relay_core::config::RelayConfig;
use relay_core::types::JobRecord;

use crate::materialize::{MaterializeError, Materializer};

/// Faults that abort a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The record is not `{"id": ..., "input": ...}`.
    #[error("Invalid job record: {0}")]
    InvalidJob(#[source] serde_json::Error),

    /// The event stream ended with a fault.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// An event's files could not be materialized.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

/// Runs jobs against one ComfyUI instance.
#[derive(Clone)]
pub struct JobHandler {
    bridge: ComfyUIBridge,
    materializer: Materializer,
}

impl JobHandler {
    pub fn new(bridge: ComfyUIBridge, materializer: Materializer) -> Self {
        Self {
            bridge,
            materializer,
        }
    }

    /// Wire up every component from configuration.
    ///
    /// `http` is the process-wide client used for submissions.
    pub async fn from_config(config: &RelayConfig, http: reqwest::Client) -> Self {
        let api = Arc::new(ComfyUIApi::with_client(http, config.api_url()));
        let client = ComfyUIClient::new(config.ws_url(), config.connect_timeout);
        let bridge = ComfyUIBridge::new(client, api, config.stream_timeout);

        let uploader = Uploader::from_settings(config.storage.as_ref()).await;
        let materializer = Materializer::new(config.dirs.clone(), uploader);

        Self::new(bridge, materializer)
    }

    /// Run a job to completion and return every event in order.
    pub async fn run_buffered(&self, raw: serde_json::Value) -> Result<Vec<serde_json::Value>, JobError> {
        let outputs: Vec<serde_json::Value> = self.run_incremental(raw).try_collect().await?;
        tracing::info!(events = outputs.len(), "Job finished");
        Ok(outputs)
    }

    /// Run a job, yielding each materialized event as it becomes ready.
    ///
    /// The stream ends after the job's completion event, a synthetic
    /// error event, or the first `Err`.
    pub fn run_incremental(
        &self,
        raw: serde_json::Value,
    ) -> impl Stream<Item = Result<serde_json::Value, JobError>> + Send + 'static {
        tracing::info!(job = %raw, "Job received by handler");

        let job: JobRecord = match serde_json::from_value(raw) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(error = %e, "Rejecting malformed job record");
                return futures::stream::once(async move { Err(JobError::InvalidJob(e)) })
                    .right_stream();
            }
        };

        let pipeline = Pipeline {
            events: self.bridge.stream(job.input),
            materializer: self.materializer.clone(),
            job_id: job.id,
        };

        futures::stream::unfold(Some(pipeline), |state| async move {
            let mut pipeline = state?;
            let item = pipeline.next_output().await?;
            let next = item.is_ok().then_some(pipeline);
            Some((item, next))
        })
        .left_stream()
    }
}

/// Per-job state threaded through the incremental stream.
struct Pipeline {
    events: EventStream,
    materializer: Materializer,
    job_id: String,
}

impl Pipeline {
    async fn next_output(&mut self) -> Option<Result<serde_json::Value, JobError>> {
        let event = match self.events.next_event().await? {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Job stream failed");
                return Some(Err(e.into()));
            }
        };

        let result = self
            .materializer
            .materialize(&self.job_id, event)
            .await
            .map(StreamEvent::into_value)
            .map_err(|e| {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to materialize event");
                JobError::from(e)
            });
        Some(result)
    }
}
