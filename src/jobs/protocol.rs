//! Wire types of the cloud job service.
//!
//! Topics are scoped by thing name under `$aws/things/{thing}/jobs`. Every
//! payload is JSON with camelCase field names.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Error;

/// Free-form key/value details attached to a job execution status.
pub type StatusDetails = BTreeMap<String, String>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
    Removed,
    Canceled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Rejected => "REJECTED",
            JobStatus::Removed => "REMOVED",
            JobStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// One unit of remote-triggered work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub job_id: String,
    /// Opaque task description; its meaning is up to the worker.
    #[serde(default)]
    pub job_document: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thing_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_number: Option<i64>,
}

impl JobExecution {
    pub fn new(job_id: impl Into<String>, job_document: serde_json::Value) -> Self {
        JobExecution {
            job_id: job_id.into(),
            job_document,
            status: None,
            thing_name: None,
            status_details: None,
            version_number: None,
            execution_number: None,
        }
    }
}

/// Sent on `notify-next` whenever the next pending execution changes.
/// `execution` is absent when nothing is pending.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NextJobExecutionChangedEvent {
    #[serde(default)]
    pub execution: Option<JobExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartNextPendingJobExecutionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_in_minutes: Option<i64>,
}

/// Accepted response to a start-next request. `execution` is absent when no
/// job was pending.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartNextJobExecutionResponse {
    #[serde(default)]
    pub execution: Option<JobExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobExecutionRequest {
    /// Carried in the topic, not in the payload.
    #[serde(skip)]
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl UpdateJobExecutionRequest {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        UpdateJobExecutionRequest {
            job_id: job_id.into(),
            status,
            status_details: None,
            expected_version: None,
            execution_number: None,
            client_token: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionState {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
}

/// Accepted response to an update. The job id comes from the response topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobExecutionResponse {
    #[serde(skip)]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<JobExecutionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_document: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Payload of every `.../rejected` topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RejectedError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl fmt::Display for RejectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code:'{}' message:'{}'", self.code, self.message)
    }
}

/// Topic names for one thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTopics {
    thing_name: String,
    prefix: String,
}

impl JobTopics {
    pub fn new(thing_name: &str) -> Result<JobTopics, Error> {
        if thing_name.is_empty() || thing_name.contains(['/', '+', '#']) {
            return Err(Error::InvalidThingName(thing_name.to_string()));
        }
        Ok(JobTopics {
            thing_name: thing_name.to_string(),
            prefix: format!("$aws/things/{thing_name}/jobs"),
        })
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    pub fn notify_next(&self) -> String {
        format!("{}/notify-next", self.prefix)
    }

    pub fn start_next(&self) -> String {
        format!("{}/start-next", self.prefix)
    }

    pub fn start_next_accepted(&self) -> String {
        format!("{}/start-next/accepted", self.prefix)
    }

    pub fn start_next_rejected(&self) -> String {
        format!("{}/start-next/rejected", self.prefix)
    }

    pub fn update(&self, job_id: &str) -> String {
        format!("{}/{}/update", self.prefix, job_id)
    }

    /// Pass `"+"` to cover every job id.
    pub fn update_accepted(&self, job_id: &str) -> String {
        format!("{}/{}/update/accepted", self.prefix, job_id)
    }

    pub fn update_rejected(&self, job_id: &str) -> String {
        format!("{}/{}/update/rejected", self.prefix, job_id)
    }

    /// Extracts the job id from an `.../{jobId}/update/{accepted,rejected}` topic.
    pub fn job_id_from_update_response<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let (job_id, suffix) = rest.split_once('/')?;
        match suffix {
            "update/accepted" | "update/rejected" if !job_id.is_empty() => Some(job_id),
            _ => None,
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(value).map_err(Error::Encode)
}

pub fn decode<'a, T: Deserialize<'a>>(topic: &str, payload: &'a [u8]) -> Result<T, Error> {
    serde_json::from_slice(payload).map_err(|source| Error::Decode {
        topic: topic.to_string(),
        source,
    })
}

/// Decodes an update-accepted message, taking the job id from its topic.
pub fn decode_update_accepted(
    topics: &JobTopics,
    topic: &str,
    payload: &[u8],
) -> Result<UpdateJobExecutionResponse, Error> {
    let job_id = topics
        .job_id_from_update_response(topic)
        .ok_or_else(|| Error::UnexpectedTopic(topic.to_string()))?;
    let mut response: UpdateJobExecutionResponse = decode(topic, payload)?;
    response.job_id = job_id.to_string();
    Ok(response)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
