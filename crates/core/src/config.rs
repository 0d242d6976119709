//! Process-level configuration for the relay.
//!
//! Everything is read from environment variables once at startup and then
//! passed explicitly into the components that need it. Use
//! [`RelayConfig::from_env`] in binaries and [`RelayConfig::from_lookup`]
//! in tests.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default backend address (`host:port`).
pub const DEFAULT_HOST: &str = "127.0.0.1:3021";

pub const DEFAULT_OUTPUT_DIR: &str = "/ComfyUI/output";
pub const DEFAULT_TEMP_DIR: &str = "/ComfyUI/temp";
pub const DEFAULT_INPUT_DIR: &str = "/ComfyUI/input";

/// Wall-clock bound on a single job's event stream.
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;

/// Bound on the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Generation jobs are slow to queue on a busy backend.
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 600;

/// Region used for request signing when none is configured.
pub const DEFAULT_BUCKET_REGION: &str = "us-east-1";

/// Job record consumed by the local runner.
pub const DEFAULT_TEST_INPUT_PATH: &str = "test_input.json";

/// Values of `NOSTREAMING` that select buffered mode.
const TRUTHY: &[&str] = &["true", "1", "t"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How job results are handed back to the invoking framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Collect every event and return them as one sequence.
    Buffered,
    /// Release each event as soon as it has been materialized.
    Incremental,
}

/// Local directories the backend writes files into, keyed by file type.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub output: PathBuf,
    pub temp: PathBuf,
    pub input: PathBuf,
}

impl Default for OutputDirs {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT_DIR),
            temp: PathBuf::from(DEFAULT_TEMP_DIR),
            input: PathBuf::from(DEFAULT_INPUT_DIR),
        }
    }
}

/// Object storage settings. Present only when every required value is set.
#[derive(Clone)]
pub struct StorageSettings {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .finish()
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Backend `host:port`, shared by the HTTP and WebSocket endpoints.
    pub host: String,
    pub dirs: OutputDirs,
    pub mode: RunMode,
    /// `None` disables the stream wall-clock timeout.
    pub stream_timeout: Option<Duration>,
    /// `None` leaves the WebSocket handshake unbounded.
    pub connect_timeout: Option<Duration>,
    pub submit_timeout: Duration,
    /// `None` selects the local fallback upload path.
    pub storage: Option<StorageSettings>,
    pub test_input_path: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            dirs: OutputDirs::default(),
            mode: RunMode::Incremental,
            stream_timeout: Some(Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS)),
            connect_timeout: Some(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            submit_timeout: Duration::from_secs(DEFAULT_SUBMIT_TIMEOUT_SECS),
            storage: None,
            test_input_path: PathBuf::from(DEFAULT_TEST_INPUT_PATH),
        }
    }
}

impl RelayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mode = match get("NOSTREAMING") {
            Some(v) if TRUTHY.contains(&v.as_str()) => RunMode::Buffered,
            _ => RunMode::Incremental,
        };

        let stream_timeout = optional_secs(
            get("STREAM_TIMEOUT_SECS"),
            "STREAM_TIMEOUT_SECS",
            DEFAULT_STREAM_TIMEOUT_SECS,
        )?;
        let connect_timeout = optional_secs(
            get("CONNECT_TIMEOUT_SECS"),
            "CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?;
        let submit_timeout = Duration::from_secs(parse_secs(
            get("SUBMIT_TIMEOUT_SECS"),
            "SUBMIT_TIMEOUT_SECS",
            DEFAULT_SUBMIT_TIMEOUT_SECS,
        )?);

        let storage = match (
            get("BUCKET_ENDPOINT_URL"),
            get("BUCKET_ACCESS_KEY_ID"),
            get("BUCKET_SECRET_ACCESS_KEY"),
            get("BUCKET_NAME"),
        ) {
            (Some(endpoint_url), Some(access_key_id), Some(secret_access_key), Some(bucket_name)) => {
                Some(StorageSettings {
                    endpoint_url,
                    access_key_id,
                    secret_access_key,
                    bucket_name,
                    region: get("BUCKET_REGION")
                        .unwrap_or_else(|| DEFAULT_BUCKET_REGION.to_string()),
                })
            }
            _ => None,
        };

        Ok(Self {
            host: get("COMFY_HOST").unwrap_or(defaults.host),
            dirs: OutputDirs {
                output: get("COMFY_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.dirs.output),
                temp: get("COMFY_TEMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.dirs.temp),
                input: get("COMFY_INPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.dirs.input),
            },
            mode,
            stream_timeout,
            connect_timeout,
            submit_timeout,
            storage,
            test_input_path: get("TEST_INPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.test_input_path),
        })
    }

    /// HTTP base URL of the backend, e.g. `http://127.0.0.1:3021`.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.host)
    }

    /// WebSocket base URL of the backend, e.g. `ws://127.0.0.1:3021`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.host)
    }
}

fn parse_secs(value: Option<String>, key: &str, default: u64) -> Result<u64, CoreError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| {
            CoreError::Validation(format!("{key} must be a whole number of seconds, got '{v}'"))
        }),
    }
}

/// Like [`parse_secs`], but `0` means "no timeout".
fn optional_secs(
    value: Option<String>,
    key: &str,
    default: u64,
) -> Result<Option<Duration>, CoreError> {
    let secs = parse_secs(value, key, default)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
