//! Startup readiness wait for a ComfyUI instance.
//!
//! The relay must not accept jobs before the backend answers HTTP.
//! [`wait_for_service`] polls the base URL at a fixed interval until
//! any response arrives (an error status still counts as reachable) or
//! the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Pause between readiness probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Timeout for a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Poll `url` until the service responds.
///
/// Returns `true` once any HTTP response is received, or `false` if
/// `cancel` fires first.
pub async fn wait_for_service(
    client: &reqwest::Client,
    url: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> bool {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(url, "Readiness wait cancelled");
                return false;
            }
            result = client.get(url).timeout(PROBE_TIMEOUT).send() => {
                match result {
                    Ok(response) => {
                        tracing::info!(
                            url,
                            attempt,
                            status = response.status().as_u16(),
                            "Service is reachable",
                        );
                        return true;
                    }
                    Err(e) => {
                        tracing::debug!(url, attempt, error = %e, "Service not ready yet, retrying");
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
