//! Worker process adapter.
//!
//! One [`WorkerHandle`] owns one generation worker: the child process, its
//! stdout pipe read as raw chunks, and a background task draining stderr into
//! the local log. Stderr is operator-facing only and never reaches the
//! remote caller. `kill_on_drop` guarantees the process and its pipes are
//! released on every abandonment path, including client disconnects.

use std::process::{ExitStatus, Stdio};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::config::Config;
use crate::errors::WorkerError;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A live worker process. At most one exists per in-flight request; workers
/// are never pooled or reused.
#[derive(Debug)]
pub struct WorkerHandle {
    child: Child,
    stdout: ChildStdout,
    buf: BytesMut,
}

impl WorkerHandle {
    /// Spawn the configured worker with `topic` as its sole positional
    /// argument.
    pub fn spawn(config: &Config, topic: &str) -> Result<Self, WorkerError> {
        let mut child = Command::new(&config.worker_cmd)
            .args(&config.worker_args)
            .arg(topic)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::SpawnFailed {
                program: config.worker_cmd.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(WorkerError::StdoutUnavailable)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        tracing::info!(worker = %config.worker_cmd, topic, "spawned generation worker");

        Ok(Self {
            child,
            stdout,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        })
    }

    /// Read the next raw chunk of stdout. Chunks are not line-aligned; they
    /// arrive as soon as the worker writes. `None` means end of output.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        self.buf.clear();
        self.buf.reserve(READ_CHUNK_SIZE);
        let n = self.stdout.read_buf(&mut self.buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(self.buf.split().freeze()))
        }
    }

    /// Reap the worker and return its exit status.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Force-kill the worker and reap it. Used when the caller disconnects,
    /// the idle timeout fires, or the output violates frame bounds.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already exited is the common case here.
            tracing::debug!(error = %e, "worker kill was a no-op");
        }
        if let Err(e) = self.child.wait().await {
            tracing::warn!(error = %e, "failed to reap worker after kill");
        }
    }
}

/// Map an exit status to the code carried by a failure event.
/// A signal-terminated worker has no code; report -1.
pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::warn!(target: "planstream::worker", "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed reading worker stderr");
                break;
            }
        }
    }
}
