//! Job coordinator.
//!
//! Drives the "start next job / job finished" cycle against the job service.
//! All state lives in one [`CoordinatorState`] behind one mutex. The lock is
//! only held to read or change that state: publishes and the worker run as
//! tasks on the runtime, never under the lock and never on the transport's
//! dispatch thread.
//!
//! ```text
//!   Idle ──trigger──▶ Starting ──accepted(execution)──▶ Working
//!    ▲                   │                                 │
//!    └──accepted(none)───┘◀────────update accepted─────────┘
//! ```
//!
//! A trigger that arrives while not idle sets a latch instead; the latch is
//! a bool, so any burst of triggers yields exactly one new start request
//! once the current job is done. Once a disconnect is requested no new start
//! request goes out, but a running job still finishes and reports its status
//! before the connection is closed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::transport::Transport;

use super::client::{JobRejection, JobsClient};
use super::protocol::{
    JobExecution, JobStatus, NextJobExecutionChangedEvent, RejectedError,
    StartNextJobExecutionResponse, StartNextPendingJobExecutionRequest,
    UpdateJobExecutionRequest, UpdateJobExecutionResponse,
};
use super::worker::{self, JobWorker};
use super::Error;

/// Upper bound on closing the broker connection during teardown.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A start-next request is out and its answer has not arrived.
    Starting,
    /// A worker runs the job, or its status update awaits acknowledgement.
    Working { job_id: String },
}

/// Why the coordinator gave up.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AbortCause {
    #[error("request to start next pending job rejected with {0}")]
    StartRejected(RejectedError),

    #[error("request to update status of job {job_id} rejected with {error}")]
    UpdateRejected { job_id: String, error: RejectedError },

    #[error("job {job_id} failed: {reason}")]
    WorkerFailed { job_id: String, reason: String },

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("subscription setup failed: {0}")]
    SetupFailed(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("server rejected resubscribe to topic {0}")]
    ResubscribeRejected(String),
}

/// How a coordinator run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Disconnected on request with nothing going wrong.
    Finished,
    Aborted(AbortCause),
}

#[derive(Debug)]
struct CoordinatorState {
    phase: Phase,
    next_job_waiting: bool,
    /// The status update of the job in flight has been handed to the client.
    update_sent: bool,
    disconnect_requested: bool,
    teardown_started: bool,
    abort_cause: Option<AbortCause>,
}

impl CoordinatorState {
    /// Moves `Idle → Starting` if allowed. The caller publishes the request.
    fn claim_start(&mut self) -> bool {
        if self.phase != Phase::Idle {
            tracing::debug!(phase = ?self.phase, "nevermind, already working on a job");
            return false;
        }
        if self.disconnect_requested {
            tracing::info!("nevermind, disconnecting");
            return false;
        }
        self.phase = Phase::Starting;
        self.next_job_waiting = false;
        true
    }

    fn outcome(&self) -> Outcome {
        match &self.abort_cause {
            Some(cause) => Outcome::Aborted(cause.clone()),
            None => Outcome::Finished,
        }
    }
}

/// What an abort means for the job in flight.
#[derive(Debug)]
enum Ends {
    /// Nothing is known about the job in flight; let it drain.
    Nothing,
    /// The outstanding start request will get no (further) answer.
    Start,
    /// The named job will make no further progress.
    Job(String),
    /// The status update already sent will get no usable answer.
    Update,
}

struct Inner<T, W> {
    state: Mutex<CoordinatorState>,
    client: JobsClient<T>,
    worker: Arc<W>,
    runtime: Handle,
    done: watch::Sender<Option<Outcome>>,
}

/// Shared handle to the coordinator. Clones drive the same state.
pub struct Coordinator<T, W> {
    inner: Arc<Inner<T, W>>,
}

impl<T, W> Clone for Coordinator<T, W> {
    fn clone(&self) -> Self {
        Coordinator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, W: JobWorker> Coordinator<T, W> {
    /// `runtime` runs the publishes and the worker; callbacks may arrive on
    /// threads outside of it.
    pub fn new(client: JobsClient<T>, worker: W, runtime: Handle) -> Self {
        let (done, _) = watch::channel(None);
        Coordinator {
            inner: Arc::new(Inner {
                state: Mutex::new(CoordinatorState {
                    phase: Phase::Idle,
                    next_job_waiting: false,
                    update_sent: false,
                    disconnect_requested: false,
                    teardown_started: false,
                    abort_cause: None,
                }),
                client,
                worker: Arc::new(worker),
                runtime,
                done,
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase.clone()
    }

    pub fn is_next_job_waiting(&self) -> bool {
        self.inner.state.lock().next_job_waiting
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.inner.state.lock().disconnect_requested
    }

    /// Subscribes to every job topic, waits for the broker to confirm each
    /// subscription, then makes the first attempt to start a job.
    #[tracing::instrument(skip_all, fields(thing_name = self.inner.client.topics().thing_name()))]
    pub async fn start(&self) -> Result<(), Error> {
        if let Err(e) = self.subscribe_all().await {
            self.abort(AbortCause::SetupFailed(e.to_string()));
            return Err(e);
        }
        self.try_start_next_job();
        Ok(())
    }

    async fn subscribe_all(&self) -> Result<(), Error> {
        let client = &self.inner.client;

        tracing::info!("subscribing to next changed events");
        let this = self.clone();
        client
            .subscribe_job_changed(move |event| this.on_next_job_changed(event))
            .await?;

        tracing::info!("subscribing to start responses");
        let (accepted, rejected) = (self.clone(), self.clone());
        client
            .subscribe_start_responses(
                move |rsp| accepted.on_start_accepted(rsp),
                move |rsp| rejected.on_start_rejected(rsp),
            )
            .await?;

        tracing::info!("subscribing to update responses");
        let (accepted, rejected) = (self.clone(), self.clone());
        client
            .subscribe_update_responses(
                move |rsp| accepted.on_update_accepted(rsp),
                move |rsp| rejected.on_update_rejected(rsp),
            )
            .await?;

        Ok(())
    }

    /// Starts the next job unless one is in flight or a disconnect is pending.
    pub fn try_start_next_job(&self) {
        tracing::info!("trying to start the next job");
        let start = self.inner.state.lock().claim_start();
        if start {
            self.publish_start();
        }
    }

    pub fn on_next_job_changed(&self, event: Result<NextJobExecutionChangedEvent, Error>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => return self.fail(AbortCause::Malformed(e.to_string()), Ends::Nothing),
        };
        let Some(execution) = event.execution else {
            tracing::info!("next job execution changed to none, waiting for further jobs");
            return;
        };
        tracing::info!(
            job_id = %execution.job_id,
            job_document = %execution.job_document,
            "next job execution changed"
        );

        let start = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Idle {
                state.claim_start()
            } else {
                state.next_job_waiting = true;
                false
            }
        };
        if start {
            self.publish_start();
        }
    }

    pub fn on_start_accepted(&self, response: Result<StartNextJobExecutionResponse, Error>) {
        let response = match response {
            Ok(response) => response,
            Err(e) => return self.fail(AbortCause::Malformed(e.to_string()), Ends::Start),
        };

        let Some(execution) = response.execution else {
            if self.done_working(|phase| *phase == Phase::Starting) {
                tracing::info!("start request accepted, but there are no jobs to be done");
            } else {
                tracing::debug!("ignoring duplicate start response");
            }
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Starting {
                tracing::debug!(
                    phase = ?state.phase,
                    job_id = %execution.job_id,
                    "ignoring duplicate start response"
                );
                return;
            }
            state.phase = Phase::Working {
                job_id: execution.job_id.clone(),
            };
            state.update_sent = false;
        }

        tracing::info!(
            job_id = %execution.job_id,
            job_document = %execution.job_document,
            "start request accepted"
        );
        self.spawn_worker(execution);
    }

    pub fn on_start_rejected(&self, rejected: Result<RejectedError, Error>) {
        match rejected {
            Ok(rejected) => self.fail(AbortCause::StartRejected(rejected), Ends::Start),
            Err(e) => self.fail(AbortCause::Malformed(e.to_string()), Ends::Start),
        }
    }

    pub fn on_update_accepted(&self, response: Result<UpdateJobExecutionResponse, Error>) {
        let response = match response {
            Ok(response) => response,
            Err(e) => return self.fail(AbortCause::Malformed(e.to_string()), Ends::Update),
        };

        let current = |phase: &Phase| {
            matches!(phase, Phase::Working { job_id } if *job_id == response.job_id)
        };
        if self.done_working(current) {
            tracing::info!(job_id = %response.job_id, "request to update job was accepted");
        } else {
            tracing::debug!(
                job_id = %response.job_id,
                "ignoring update response for a job not in flight"
            );
        }
    }

    pub fn on_update_rejected(&self, rejection: Result<JobRejection, Error>) {
        match rejection {
            Ok(JobRejection { job_id, error }) => self.fail(
                AbortCause::UpdateRejected {
                    job_id: job_id.clone(),
                    error,
                },
                Ends::Job(job_id),
            ),
            Err(e) => self.fail(AbortCause::Malformed(e.to_string()), Ends::Update),
        }
    }

    /// The broker connection came back with all subscriptions in place.
    /// Answers may have been lost while it was down.
    pub fn on_connection_resumed(&self) {
        let start = {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Starting => !state.disconnect_requested,
                Phase::Idle => state.claim_start(),
                Phase::Working { .. } => {
                    state.next_job_waiting = true;
                    false
                }
            }
        };
        if start {
            tracing::info!("connection resumed, asking for the next job again");
            self.publish_start();
        }
    }

    /// Asks for a graceful shutdown: no new jobs are started and the
    /// connection closes once the job in flight is done. Returns false if a
    /// disconnect had already been requested.
    pub fn request_disconnect(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.disconnect_requested {
                return false;
            }
            state.disconnect_requested = true;
        }
        tracing::info!("disconnect requested");
        self.maybe_teardown();
        true
    }

    /// Fatal error: logs `cause` and disconnects once pending work drained.
    pub fn abort(&self, cause: AbortCause) {
        self.fail(cause, Ends::Nothing)
    }

    /// Waits until the connection was closed.
    pub async fn finished(&self) -> Outcome {
        let mut rx = self.inner.done.subscribe();
        let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Outcome::Finished)
    }

    /// Closes the connection now, whatever is still in flight.
    pub async fn force_close(&self) -> Outcome {
        let (start, outcome) = {
            let mut state = self.inner.state.lock();
            state.disconnect_requested = true;
            let start = !state.teardown_started;
            state.teardown_started = true;
            (start, state.outcome())
        };
        if start {
            tracing::warn!("closing the connection with work still in flight");
            self.teardown(outcome).await;
        }
        self.finished().await
    }

    fn fail(&self, cause: AbortCause, ends: Ends) {
        tracing::error!(%cause, "exiting due to error");
        let first = {
            let mut state = self.inner.state.lock();
            if state.abort_cause.is_none() {
                state.abort_cause = Some(cause);
            }
            match ends {
                Ends::Nothing => {}
                Ends::Start => {
                    if state.phase == Phase::Starting {
                        state.phase = Phase::Idle;
                    }
                }
                Ends::Job(job_id) => {
                    if matches!(&state.phase, Phase::Working { job_id: current } if *current == job_id) {
                        state.phase = Phase::Idle;
                    }
                }
                Ends::Update => {
                    if state.update_sent && matches!(state.phase, Phase::Working { .. }) {
                        state.phase = Phase::Idle;
                    }
                }
            }
            let first = !state.disconnect_requested;
            state.disconnect_requested = true;
            first
        };
        if first {
            tracing::info!("disconnecting");
        }
        self.maybe_teardown();
    }

    /// Returns to idle if `in_flight` holds for the current phase, starting
    /// the next job when one was latched meanwhile.
    fn done_working(&self, in_flight: impl FnOnce(&Phase) -> bool) -> bool {
        let start = {
            let mut state = self.inner.state.lock();
            if !in_flight(&state.phase) {
                return false;
            }
            state.phase = Phase::Idle;
            let start = state.next_job_waiting && state.claim_start();
            if state.disconnect_requested {
                state.next_job_waiting = false;
            }
            start
        };
        if start {
            self.publish_start();
        }
        self.maybe_teardown();
        true
    }

    fn maybe_teardown(&self) {
        let outcome = {
            let mut state = self.inner.state.lock();
            if !state.disconnect_requested || state.teardown_started || state.phase != Phase::Idle {
                return;
            }
            state.teardown_started = true;
            state.outcome()
        };
        let this = self.clone();
        self.inner.runtime.spawn(async move { this.teardown(outcome).await });
    }

    async fn teardown(&self, outcome: Outcome) {
        let transport = self.inner.client.transport();
        match tokio::time::timeout(DISCONNECT_TIMEOUT, transport.disconnect()).await {
            Ok(Ok(())) => tracing::info!("disconnected"),
            Ok(Err(e)) => tracing::warn!(error = %e, "disconnect failed"),
            Err(_) => tracing::warn!("disconnect timed out"),
        }
        self.inner.done.send_replace(Some(outcome));
    }

    fn publish_start(&self) {
        let this = self.clone();
        self.inner.runtime.spawn(async move {
            tracing::info!("publishing request to start next job");
            let request = StartNextPendingJobExecutionRequest {
                client_token: Some(uuid::Uuid::now_v7().to_string()),
                ..Default::default()
            };
            if let Err(e) = this.inner.client.request_start_next_job(&request).await {
                this.fail(AbortCause::PublishFailed(e.to_string()), Ends::Start);
            }
        });
    }

    fn publish_update(
        &self,
        job_id: String,
        status: JobStatus,
        details: Option<BTreeMap<String, String>>,
    ) {
        {
            let mut state = self.inner.state.lock();
            if matches!(&state.phase, Phase::Working { job_id: current } if *current == job_id) {
                state.update_sent = true;
            }
        }
        let this = self.clone();
        self.inner.runtime.spawn(async move {
            tracing::info!(%job_id, %status, "publishing request to update job status");
            let mut request = UpdateJobExecutionRequest::new(job_id.clone(), status);
            request.status_details = details;
            request.client_token = Some(uuid::Uuid::now_v7().to_string());
            if let Err(e) = this.inner.client.request_update_job_status(&request).await {
                this.fail(AbortCause::PublishFailed(e.to_string()), Ends::Job(job_id));
            }
        });
    }

    fn spawn_worker(&self, execution: JobExecution) {
        let this = self.clone();
        self.inner.runtime.spawn(async move {
            let job_id = execution.job_id.clone();
            let worker = Arc::clone(&this.inner.worker);
            // A second task so a panicking worker still reports back.
            let run = tokio::spawn(async move { worker.execute(&execution).await });
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(worker::Error::Failed(format!("worker panicked: {e}"))),
            };
            this.on_worker_done(job_id, result);
        });
    }

    fn on_worker_done(&self, job_id: String, result: Result<(), worker::Error>) {
        match result {
            Ok(()) => {
                tracing::info!(%job_id, "done working on job");
                self.publish_update(job_id, JobStatus::Succeeded, None);
            }
            Err(e) => {
                let reason = e.to_string();
                self.abort(AbortCause::WorkerFailed {
                    job_id: job_id.clone(),
                    reason: reason.clone(),
                });
                let details = BTreeMap::from([("reason".to_string(), reason)]);
                self.publish_update(job_id, JobStatus::Failed, Some(details));
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
