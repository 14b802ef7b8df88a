//! Runtime configuration for the streaming bridge.
//!
//! Defaults mirror the original deployment (an unbuffered Python worker);
//! everything can be overridden through environment variables or CLI flags.

use std::time::Duration;

/// Environment variable naming the worker program.
pub const WORKER_CMD_ENV: &str = "PLANSTREAM_WORKER_CMD";
/// Environment variable holding whitespace-separated worker arguments.
pub const WORKER_ARGS_ENV: &str = "PLANSTREAM_WORKER_ARGS";
/// Environment variable overriding the idle timeout, in seconds.
pub const IDLE_TIMEOUT_ENV: &str = "PLANSTREAM_IDLE_TIMEOUT_SECS";
/// Environment variable overriding the maximum buffered line length, in bytes.
pub const MAX_LINE_ENV: &str = "PLANSTREAM_MAX_LINE_BYTES";

const DEFAULT_WORKER_CMD: &str = "python3";
// The -u flag is mandatory for a Python worker: without it stdout is block
// buffered and lines arrive only when the buffer fills, not when written.
const DEFAULT_WORKER_ARGS: &str = "-u agent_brain.py";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Settings shared by every request the server handles.
#[derive(Debug, Clone)]
pub struct Config {
    /// Program invoked once per request, with the topic appended as the
    /// final positional argument.
    pub worker_cmd: String,
    /// Arguments placed before the topic. Expected to include whatever
    /// unbuffering flag the worker runtime needs.
    pub worker_args: Vec<String>,
    /// Kill the worker if its stdout stays silent this long.
    pub idle_timeout: Duration,
    /// Upper bound on one buffered output line.
    pub max_line_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_cmd: DEFAULT_WORKER_CMD.to_string(),
            worker_args: split_args(DEFAULT_WORKER_ARGS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_line_len: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_cmd: std::env::var(WORKER_CMD_ENV).unwrap_or(defaults.worker_cmd),
            worker_args: std::env::var(WORKER_ARGS_ENV)
                .map(|raw| split_args(&raw))
                .unwrap_or(defaults.worker_args),
            idle_timeout: std::env::var(IDLE_TIMEOUT_ENV)
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_line_len: std::env::var(MAX_LINE_ENV)
                .ok()
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(defaults.max_line_len),
        }
    }
}

/// Split a whitespace-separated argument string, dropping empty pieces.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
