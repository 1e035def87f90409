//! Request/response client for the job service.
//!
//! Publishes start-next and update requests and routes the broker's
//! accepted/rejected answers to callbacks. It keeps no state of its own.
//!
//! Subscribe before publishing: a response that arrives before its
//! subscription took effect is lost.

use std::sync::Arc;

use crate::transport::{MessageHandler, QoS, Transport};

use super::protocol::{
    self, JobTopics, NextJobExecutionChangedEvent, RejectedError,
    StartNextJobExecutionResponse, StartNextPendingJobExecutionRequest,
    UpdateJobExecutionRequest, UpdateJobExecutionResponse,
};
use super::Error;

/// A rejected update, with the job id taken from the response topic.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRejection {
    pub job_id: String,
    pub error: RejectedError,
}

pub struct JobsClient<T> {
    transport: Arc<T>,
    topics: JobTopics,
}

impl<T> Clone for JobsClient<T> {
    fn clone(&self) -> Self {
        JobsClient {
            transport: Arc::clone(&self.transport),
            topics: self.topics.clone(),
        }
    }
}

impl<T: Transport> JobsClient<T> {
    pub fn new(transport: Arc<T>, thing_name: &str) -> Result<JobsClient<T>, Error> {
        Ok(JobsClient {
            transport,
            topics: JobTopics::new(thing_name)?,
        })
    }

    pub fn topics(&self) -> &JobTopics {
        &self.topics
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Resolves when the broker acknowledged the publish, not when a job starts.
    #[tracing::instrument(skip_all, fields(thing_name = self.topics.thing_name()), err)]
    pub async fn request_start_next_job(
        &self,
        request: &StartNextPendingJobExecutionRequest,
    ) -> Result<(), Error> {
        let payload = protocol::encode(request)?;
        self.transport
            .publish(&self.topics.start_next(), payload, QoS::AtLeastOnce)
            .await?;
        tracing::info!("published request to start the next job");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(job_id = %request.job_id, status = %request.status), err)]
    pub async fn request_update_job_status(
        &self,
        request: &UpdateJobExecutionRequest,
    ) -> Result<(), Error> {
        let payload = protocol::encode(request)?;
        self.transport
            .publish(&self.topics.update(&request.job_id), payload, QoS::AtLeastOnce)
            .await?;
        tracing::info!("published request to update the job");
        Ok(())
    }

    /// Subscribes to next-job-changed events.
    pub async fn subscribe_job_changed<F>(&self, on_event: F) -> Result<(), Error>
    where
        F: Fn(Result<NextJobExecutionChangedEvent, Error>) + Send + Sync + 'static,
    {
        let handler: MessageHandler =
            Arc::new(move |topic, payload| on_event(protocol::decode(topic, payload)));
        self.transport
            .subscribe(&self.topics.notify_next(), QoS::AtLeastOnce, handler)
            .await?;
        Ok(())
    }

    /// Subscribes to both answers of a start-next request.
    pub async fn subscribe_start_responses<A, R>(
        &self,
        on_accepted: A,
        on_rejected: R,
    ) -> Result<(), Error>
    where
        A: Fn(Result<StartNextJobExecutionResponse, Error>) + Send + Sync + 'static,
        R: Fn(Result<RejectedError, Error>) + Send + Sync + 'static,
    {
        let accepted: MessageHandler =
            Arc::new(move |topic, payload| on_accepted(protocol::decode(topic, payload)));
        let rejected: MessageHandler =
            Arc::new(move |topic, payload| on_rejected(protocol::decode(topic, payload)));

        let accepted_topic = self.topics.start_next_accepted();
        let rejected_topic = self.topics.start_next_rejected();
        tokio::try_join!(
            self.transport
                .subscribe(&accepted_topic, QoS::AtLeastOnce, accepted),
            self.transport
                .subscribe(&rejected_topic, QoS::AtLeastOnce, rejected),
        )?;
        Ok(())
    }

    /// Subscribes to both answers of update requests for any job id.
    pub async fn subscribe_update_responses<A, R>(
        &self,
        on_accepted: A,
        on_rejected: R,
    ) -> Result<(), Error>
    where
        A: Fn(Result<UpdateJobExecutionResponse, Error>) + Send + Sync + 'static,
        R: Fn(Result<JobRejection, Error>) + Send + Sync + 'static,
    {
        let topics = self.topics.clone();
        let accepted: MessageHandler = Arc::new(move |topic, payload| {
            on_accepted(protocol::decode_update_accepted(&topics, topic, payload))
        });

        let topics = self.topics.clone();
        let rejected: MessageHandler = Arc::new(move |topic, payload| {
            let rejection = topics
                .job_id_from_update_response(topic)
                .ok_or_else(|| Error::UnexpectedTopic(topic.to_string()))
                .and_then(|job_id| {
                    Ok(JobRejection {
                        job_id: job_id.to_string(),
                        error: protocol::decode(topic, payload)?,
                    })
                });
            on_rejected(rejection)
        });

        let accepted_topic = self.topics.update_accepted("+");
        let rejected_topic = self.topics.update_rejected("+");
        tokio::try_join!(
            self.transport
                .subscribe(&accepted_topic, QoS::AtLeastOnce, accepted),
            self.transport
                .subscribe(&rejected_topic, QoS::AtLeastOnce, rejected),
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
