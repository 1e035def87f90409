//! Connection glue around a [`Transport`]: bounded connect retries and the
//! reaction to interrupted/resumed notifications.

use std::sync::Arc;
use std::time::Duration;

use crate::transport::{ConnectAck, ConnectionEvent, ConnectionEvents, Error, Transport};

/// Default number of connect attempts before giving up.
pub const CONNECT_ATTEMPTS: u32 = 6;

/// Default pause between two connect attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Connects, retrying up to `attempts` times with a fixed `delay`.
#[tracing::instrument(skip(transport), err)]
pub async fn connect_with_retry<T: Transport>(
    transport: &T,
    attempts: u32,
    delay: Duration,
) -> Result<ConnectAck, Error> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match transport.connect().await {
            Ok(ack) => return Ok(ack),
            Err(e) if attempt >= attempts => {
                return Err(Error::ConnectExhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "connection failed, retrying");
                if let Err(e) = transport.disconnect().await {
                    tracing::debug!(error = %e, "cleanup after failed connect");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Watches connection notifications until the transport goes away.
///
/// When a connection resumes without its session, every topic is
/// resubscribed before `on_resumed` runs. A topic the broker refuses ends
/// supervision with [`Error::SubscribeRejected`].
pub async fn supervise<T, F>(
    transport: Arc<T>,
    mut events: ConnectionEvents,
    on_resumed: F,
) -> Result<(), Error>
where
    T: Transport,
    F: Fn() + Send,
{
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Interrupted { error } => {
                tracing::warn!(%error, "connection interrupted");
            }
            ConnectionEvent::Resumed { session_present } => {
                tracing::info!(session_present, "connection resumed");
                if !session_present {
                    tracing::info!("session did not persist, resubscribing to existing topics");
                    let results = transport.resubscribe_existing_topics().await?;
                    tracing::info!(?results, "resubscribe results");
                    if let Some(refused) = results.into_iter().find(|r| r.granted.is_none()) {
                        return Err(Error::SubscribeRejected(refused.topic));
                    }
                }
                on_resumed();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
