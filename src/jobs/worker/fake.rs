//! Fake job worker for testing

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use super::{Error, JobWorker};
use crate::jobs::protocol::JobExecution;

#[derive(Default)]
struct FakeWorkerState {
    started: Vec<String>,
    finished: Vec<String>,
    failing: HashSet<String>,
    running: usize,
    max_running: usize,
}

/// Records the jobs it is asked to run. When gated, every job blocks until
/// the test calls [`FakeWorker::release`].
#[derive(Clone)]
pub struct FakeWorker {
    state: Arc<Mutex<FakeWorkerState>>,
    gate: Option<Arc<Semaphore>>,
    changed: Arc<Notify>,
}

impl Default for FakeWorker {
    fn default() -> Self {
        FakeWorker {
            state: Arc::new(Mutex::new(FakeWorkerState::default())),
            gate: None,
            changed: Arc::new(Notify::new()),
        }
    }
}

impl FakeWorker {
    /// A worker that completes every job immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// A worker whose jobs wait for [`FakeWorker::release`].
    pub fn gated() -> Self {
        FakeWorker {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Lets one held job finish.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn fail_job(&self, job_id: &str) {
        self.state.lock().failing.insert(job_id.to_string());
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.state.lock().finished.clone()
    }

    /// Highest number of jobs that ever ran at the same time.
    pub fn max_running(&self) -> usize {
        self.state.lock().max_running
    }

    /// Waits until `count` jobs have started. False after a second without.
    pub async fn wait_started(&self, count: usize) -> bool {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if self.state.lock().started.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), wait).await.is_ok()
    }
}

#[async_trait]
impl JobWorker for FakeWorker {
    async fn execute(&self, execution: &JobExecution) -> Result<(), Error> {
        {
            let mut state = self.state.lock();
            state.started.push(execution.job_id.clone());
            state.running += 1;
            state.max_running = state.max_running.max(state.running);
        }
        self.changed.notify_waiters();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let fail = {
            let mut state = self.state.lock();
            state.running -= 1;
            state.finished.push(execution.job_id.clone());
            state.failing.contains(&execution.job_id)
        };
        self.changed.notify_waiters();

        if fail {
            return Err(Error::Failed(format!("job {} failed", execution.job_id)));
        }
        Ok(())
    }
}
