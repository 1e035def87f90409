//! Transport contract.
//!
//! The job logic never talks to paho directly. It sees a [`Transport`]: an
//! MQTT connection that can connect, publish, subscribe with a callback and
//! resubscribe after a session was lost. [`crate::mq::MqttTransport`] is the
//! real implementation; tests use the fake one.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeTransport, Published};

/// Callback invoked with `(topic, payload)` for every inbound message that
/// matches a subscription. Runs on the transport's dispatch thread, so it
/// must not block.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Receiving end of the connection lifecycle notifications.
pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_i32(self) -> i32 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Maps a granted QoS code to a [`QoS`]. Codes above 2 (0x80 is the
    /// broker's "failure") yield `None`.
    pub fn from_i32(code: i32) -> Option<QoS> {
        match code {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// Result of a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAck {
    pub session_present: bool,
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection was lost unexpectedly.
    Interrupted { error: String },
    /// An interrupted connection came back.
    Resumed { session_present: bool },
}

/// Outcome of resubscribing a single topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResubscribeResult {
    pub topic: String,
    /// `None` when the broker refused the subscription.
    pub granted: Option<QoS>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<ConnectAck, Error>;

    async fn disconnect(&self) -> Result<(), Error>;

    /// Resolves once the broker acknowledged the publish (PUBACK for QoS 1).
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Error>;

    /// Resolves once the broker confirmed the subscription, with the granted QoS.
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<QoS, Error>;

    /// Subscribes again to every filter registered through [`Transport::subscribe`].
    async fn resubscribe_existing_topics(&self) -> Result<Vec<ResubscribeResult>, Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("mqtt: {0}")]
    Mqtt(#[from] paho_mqtt::Error),

    #[error("not connected")]
    NotConnected,

    #[error("subscription to {0} was rejected by the broker")]
    SubscribeRejected(String),

    #[error("connection attempts exhausted after {attempts} tries: {last}")]
    ConnectExhausted { attempts: u32, last: Box<Error> },

    #[error("{0}")]
    Other(String),
}

/// Whether an MQTT topic filter (with `+` and `#` wildcards) matches a topic.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Subscription {
    filter: String,
    qos: QoS,
    handler: MessageHandler,
}

/// Registry of active subscriptions, shared by transport implementations to
/// route inbound messages and to remember what to resubscribe.
#[derive(Default)]
pub struct Subscriptions {
    entries: Mutex<Vec<Subscription>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; a second registration for the same filter replaces the first.
    pub fn insert(&self, filter: &str, qos: QoS, handler: MessageHandler) {
        let mut entries = self.entries.lock();
        entries.retain(|s| s.filter != filter);
        entries.push(Subscription {
            filter: filter.to_string(),
            qos,
            handler,
        });
    }

    pub fn remove(&self, filter: &str) {
        self.entries.lock().retain(|s| s.filter != filter);
    }

    /// Filters and their requested QoS, in registration order.
    pub fn filters(&self) -> Vec<(String, QoS)> {
        self.entries
            .lock()
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect()
    }

    /// Invokes every handler whose filter matches `topic`. Returns how many ran.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        // Handlers may subscribe or publish, so never call them under the lock.
        let handlers: Vec<MessageHandler> = self
            .entries
            .lock()
            .iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            handler(topic, payload);
        }
        handlers.len()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
