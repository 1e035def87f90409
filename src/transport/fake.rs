//! Fake transport for testing

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ConnectAck, Error, MessageHandler, QoS, ResubscribeResult, Subscriptions, Transport};

/// A message the fake transport was asked to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Default)]
struct FakeState {
    published: Vec<Published>,
    connect_calls: usize,
    disconnect_calls: usize,
    failing_connects: usize,
    fail_publishes: bool,
    rejected_filters: HashSet<String>,
    session_present: bool,
}

/// In-memory transport that records what it is asked to do and lets tests
/// inject inbound messages as if the broker had sent them.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    subscriptions: Arc<Subscriptions>,
    published_notify: Arc<Notify>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an inbound message to every matching subscription handler.
    pub fn deliver(&self, topic: &str, payload: impl AsRef<[u8]>) -> usize {
        self.subscriptions.dispatch(topic, payload.as_ref())
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.subscriptions
            .filters()
            .into_iter()
            .map(|(filter, _)| filter)
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.state.lock().failing_connects = n;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    pub fn reject_subscription(&self, filter: &str) {
        self.state.lock().rejected_filters.insert(filter.to_string());
    }

    pub fn set_session_present(&self, present: bool) {
        self.state.lock().session_present = present;
    }

    /// Waits until at least `count` messages were published to `topic`.
    /// Returns false if that did not happen within a second.
    pub async fn wait_for_publishes(&self, topic: &str, count: usize) -> bool {
        let wait = async {
            loop {
                let notified = self.published_notify.notified();
                if self.published_to(topic).len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), wait).await.is_ok()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<ConnectAck, Error> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(Error::Other("connection refused".to_string()));
        }
        Ok(ConnectAck {
            session_present: state.session_present,
        })
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.state.lock().disconnect_calls += 1;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Error> {
        {
            let mut state = self.state.lock();
            if state.fail_publishes {
                return Err(Error::NotConnected);
            }
            state.published.push(Published {
                topic: topic.to_string(),
                payload,
                qos,
            });
        }
        self.published_notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<QoS, Error> {
        if self.state.lock().rejected_filters.contains(filter) {
            return Err(Error::SubscribeRejected(filter.to_string()));
        }
        self.subscriptions.insert(filter, qos, handler);
        Ok(qos)
    }

    async fn resubscribe_existing_topics(&self) -> Result<Vec<ResubscribeResult>, Error> {
        let state = self.state.lock();
        Ok(self
            .subscriptions
            .filters()
            .into_iter()
            .map(|(topic, qos)| {
                let granted = (!state.rejected_filters.contains(&topic)).then_some(qos);
                ResubscribeResult { topic, granted }
            })
            .collect())
    }
}
