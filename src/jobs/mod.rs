//! Remote job execution.
//!
//! The device asks the cloud job service for its next pending job, runs it
//! locally and reports the outcome. [`Coordinator`] owns the state machine,
//! [`JobsClient`] speaks the request/response protocol and a [`JobWorker`]
//! does the actual work.

pub mod client;
pub mod coordinator;
pub mod protocol;
pub mod worker;

pub use client::{JobRejection, JobsClient};
pub use coordinator::{AbortCause, Coordinator, Outcome, Phase};
pub use protocol::{JobExecution, JobStatus, JobTopics, RejectedError};
pub use worker::{CommandWorker, JobWorker};

#[cfg(any(test, feature = "test-support"))]
pub use worker::FakeWorker;

use crate::transport;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] transport::Error),

    #[error("invalid thing name {0:?}")]
    InvalidThingName(String),

    #[error("encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode message on {topic}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message on unexpected topic {0}")]
    UnexpectedTopic(String),
}
