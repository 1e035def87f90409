//! Publishing loop for sensor readings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::transport::{QoS, Transport};

use super::{Error, Packet, TelemetryMessage};

/// What a publishing loop did with its input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: usize,
    /// Lines that did not parse into a message.
    pub invalid: usize,
    /// Messages the transport failed to publish.
    pub failed: usize,
}

impl PublishStats {
    fn record(&mut self, result: Result<(), Error>) {
        match result {
            Ok(()) => self.published += 1,
            Err(e) => {
                self.failed += 1;
                tracing::warn!(error = %e, failed = self.failed, "dropping message");
            }
        }
    }
}

pub struct TelemetryPublisher<T> {
    transport: Arc<T>,
    topic: String,
    received: Arc<AtomicUsize>,
}

impl<T: Transport> TelemetryPublisher<T> {
    pub fn new(transport: Arc<T>, topic: impl Into<String>) -> Self {
        TelemetryPublisher {
            transport,
            topic: topic.into(),
            received: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages seen on the echo subscription so far.
    pub fn received_count(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    #[tracing::instrument(skip_all, fields(topic = %self.topic), err)]
    pub async fn publish(&self, message: &TelemetryMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;
        tracing::info!(?message, "publishing message");
        self.transport
            .publish(&self.topic, payload, QoS::AtLeastOnce)
            .await?;
        Ok(())
    }

    /// Subscribes to our own topic and logs what the broker sends back.
    pub async fn subscribe_echo(&self) -> Result<(), Error> {
        let received = Arc::clone(&self.received);
        let granted = self
            .transport
            .subscribe(
                &self.topic,
                QoS::AtLeastOnce,
                Arc::new(move |topic, payload| {
                    let count = received.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(
                        topic,
                        payload = %String::from_utf8_lossy(payload),
                        count,
                        "received message"
                    );
                }),
            )
            .await?;
        tracing::info!(topic = %self.topic, ?granted, "subscribed");
        Ok(())
    }

    /// Publishes one message per packet line until `reader` is exhausted.
    /// Lines that do not parse are skipped.
    pub async fn run_lines<R>(&self, reader: R) -> Result<PublishStats, Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut stats = PublishStats::default();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message = match Packet::parse(&line)
                .map_err(Error::from)
                .and_then(|packet| TelemetryMessage::from_packet(&packet))
            {
                Ok(message) => message,
                Err(e) => {
                    stats.invalid += 1;
                    tracing::warn!(%line, error = %e, "skipping packet");
                    continue;
                }
            };
            stats.record(self.publish(&message).await);
        }
        Ok(stats)
    }

    /// Publishes fake temperature samples, one every `interval`.
    pub async fn run_samples<I>(
        &self,
        device_id: &str,
        samples: I,
        interval: Duration,
    ) -> Result<PublishStats, Error>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut stats = PublishStats::default();
        for value in samples {
            let message = TelemetryMessage::temperature(device_id, value);
            stats.record(self.publish(&message).await);
            tokio::time::sleep(interval).await;
        }
        Ok(stats)
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
