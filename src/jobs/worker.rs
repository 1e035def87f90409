//! Job workers.
//!
//! A worker runs one job execution off the transport's dispatch thread and
//! reports how it went. It does not retry; a failure aborts the agent.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::protocol::JobExecution;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeWorker;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("job document is not a command: {0}")]
    InvalidDocument(#[source] serde_json::Error),

    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exited {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("{program} timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait JobWorker: Send + Sync + 'static {
    /// Performs the job described by `execution`.
    async fn execute(&self, execution: &JobExecution) -> Result<(), Error>;
}

/// The part of a job document the command worker understands.
#[derive(Deserialize, Debug, Default)]
struct CommandDocument {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

/// Runs `{"command": "...", "args": [...]}` job documents as subprocesses.
/// Documents without a command complete immediately.
#[derive(Debug, Clone, Default)]
pub struct CommandWorker {
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

impl CommandWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kills the child and fails the job when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }
}

#[async_trait]
impl JobWorker for CommandWorker {
    #[tracing::instrument(skip_all, fields(job_id = %execution.job_id), err)]
    async fn execute(&self, execution: &JobExecution) -> Result<(), Error> {
        let document = match &execution.job_document {
            serde_json::Value::Null => CommandDocument::default(),
            value => CommandDocument::deserialize(value).map_err(Error::InvalidDocument)?,
        };
        let Some(program) = document.command else {
            tracing::info!("job document has no command, nothing to run");
            return Ok(());
        };

        tracing::info!(%program, args = ?document.args, "starting local work on job");
        let mut cmd = Command::new(&program);
        cmd.args(&document.args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, cmd.status()).await {
                Ok(status) => status,
                Err(_elapsed) => return Err(Error::TimedOut { program, timeout }),
            },
            None => cmd.status().await,
        };
        let status = status.map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;

        if !status.success() {
            return Err(Error::Exited { program, status });
        }
        tracing::info!("done working on job");
        Ok(())
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
