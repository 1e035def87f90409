//! Message queue.
//!
//! The paho-mqtt backed [`Transport`] that connects the edge device to the
//! cloud broker over mutual TLS.

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::global::get_text_map_propagator;
use paho_mqtt::async_client::AsyncClient as MqttClient;
use paho_mqtt::{
    MessageBuilder as MqttMessageBuilder, Properties as MqttProps, Property, PropertyCode,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::transport::{
    ConnectAck, ConnectionEvent, ConnectionEvents, Error, MessageHandler, QoS, ResubscribeResult,
    Subscriptions, Transport,
};

const SESSION_EXPIRY_SECS: i32 = 3600;

const ALPN_PROTOS: &[&str] = &["x-amzn-mqtt-ca"];

/// Protocol level spoken to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MqttVersion {
    #[default]
    V311,
    /// MQTT 5 also carries the per-message properties (content type, ids,
    /// trace context).
    V5,
}

/// Certificate files for mutual TLS.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    /// Sent as the `device_id` user property on MQTT 5.
    pub device_id: String,
    pub tls: Option<TlsFiles>,
    pub version: MqttVersion,
    pub keep_alive: Duration,
    pub clean_session: bool,
    /// Delay between reconnect attempts after the connection was lost.
    pub reconnect_delay: Duration,
}

impl MqttOptions {
    pub fn new(endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        MqttOptions {
            endpoint: endpoint.into(),
            port: 8883,
            device_id: client_id.clone(),
            client_id,
            tls: None,
            version: MqttVersion::default(),
            keep_alive: Duration::from_secs(30),
            clean_session: false,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn server_uri(&self) -> String {
        let scheme = if self.tls.is_some() { "ssl" } else { "tcp" };
        format!("{}://{}:{}", scheme, self.endpoint, self.port)
    }

    /// MQTT over TLS on 443 needs ALPN to reach the broker.
    pub fn alpn_protos(&self) -> Option<&'static [&'static str]> {
        (self.tls.is_some() && self.port == 443).then_some(ALPN_PROTOS)
    }

    /// Seconds an MQTT 5 broker keeps a persistent session after we leave.
    pub fn session_expiry(&self) -> Option<i32> {
        (self.version == MqttVersion::V5 && !self.clean_session).then_some(SESSION_EXPIRY_SECS)
    }
}

/// Connection to the cloud broker.
pub struct MqttTransport {
    client: MqttClient,
    options: MqttOptions,
    subscriptions: Arc<Subscriptions>,
    closing: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Creates the client and wires the paho callbacks.
    ///
    /// Must be called from within a tokio runtime: reconnects after a lost
    /// connection run on it. The returned receiver yields the
    /// interrupted/resumed notifications.
    pub fn new(options: MqttOptions) -> Result<(MqttTransport, ConnectionEvents), Error> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("no tokio runtime for the MQTT client: {e}")))?;

        let mqtt_version = match options.version {
            MqttVersion::V311 => paho_mqtt::MQTT_VERSION_3_1_1,
            MqttVersion::V5 => paho_mqtt::MQTT_VERSION_5,
        };
        let client = MqttClient::new(
            paho_mqtt::CreateOptionsBuilder::new()
                .server_uri(options.server_uri())
                .client_id(&options.client_id)
                .mqtt_version(mqtt_version)
                .finalize(),
        )?;

        let subscriptions = Arc::new(Subscriptions::new());
        let closing = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let routes = Arc::clone(&subscriptions);
        client.set_message_callback(move |_cli, msg| {
            let Some(msg) = msg else {
                return;
            };
            if routes.dispatch(msg.topic(), msg.payload()) == 0 {
                tracing::debug!(topic = msg.topic(), "message without a matching subscription");
            }
        });

        let reconnect_delay = options.reconnect_delay;
        let stop = Arc::clone(&closing);
        client.set_connection_lost_callback(move |cli| {
            tracing::warn!("connection to the MQTT broker lost");
            let _ = events_tx.send(ConnectionEvent::Interrupted {
                error: "connection lost".to_string(),
            });

            let cli = cli.clone();
            let events_tx = events_tx.clone();
            let stop = Arc::clone(&stop);
            runtime.spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    match cli.reconnect().await {
                        Ok(rsp) => {
                            let session_present = rsp
                                .connect_response()
                                .map(|c| c.session_present)
                                .unwrap_or(false);
                            tracing::info!(session_present, "reconnected to the MQTT broker");
                            let _ = events_tx.send(ConnectionEvent::Resumed { session_present });
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "reconnect failed, retrying");
                            tokio::time::sleep(reconnect_delay).await;
                        }
                    }
                }
            });
        });

        Ok((
            MqttTransport {
                client,
                options,
                subscriptions,
                closing,
            },
            events_rx,
        ))
    }

    fn connect_options(&self) -> Result<paho_mqtt::ConnectOptions, Error> {
        let mut builder = match self.options.version {
            MqttVersion::V311 => {
                let mut builder = paho_mqtt::ConnectOptionsBuilder::new();
                builder.clean_session(self.options.clean_session);
                builder
            }
            MqttVersion::V5 => {
                let mut builder = paho_mqtt::ConnectOptionsBuilder::new_v5();
                builder.clean_start(self.options.clean_session);
                if let Some(expiry) = self.options.session_expiry() {
                    let mut props = MqttProps::new();
                    props.push_int(PropertyCode::SessionExpiryInterval, expiry)?;
                    builder.properties(props);
                }
                builder
            }
        };
        builder.keep_alive_interval(self.options.keep_alive);

        if let Some(tls) = &self.options.tls {
            let mut ssl = paho_mqtt::SslOptionsBuilder::new();
            ssl.trust_store(&tls.ca_file)?;
            ssl.key_store(&tls.cert_file)?;
            ssl.private_key(&tls.key_file)?;
            if let Some(protos) = self.options.alpn_protos() {
                ssl.alpn_protos(protos);
            }
            builder.ssl_options(ssl.finalize());
        }

        Ok(builder.finalize())
    }

    fn message_properties(&self) -> Result<MqttProps, paho_mqtt::Error> {
        let message_id = uuid::Uuid::now_v7().to_string();
        let emitted_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);

        let mut props = MqttProps::new();
        props.push(Property::new_string(PropertyCode::ContentType, "application/json")?)?;
        props.push(Property::new_string_pair(PropertyCode::UserProperty, "message_id", &message_id)?)?;
        props.push(Property::new_string_pair(PropertyCode::UserProperty, "device_id", &self.options.device_id)?)?;
        props.push(Property::new_string_pair(PropertyCode::UserProperty, "emitted_at", &emitted_at)?)?;

        // tracing information
        let ctx = tracing::Span::current().context();
        get_text_map_propagator(|propagator| {
            propagator.inject_context(&ctx, &mut MqttCarrierInjector(&mut props))
        });

        Ok(props)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    #[tracing::instrument(err)]
    async fn connect(&self) -> Result<ConnectAck, Error> {
        tracing::info!(server_uri = %self.options.server_uri(), "connect to the MQTT broker");
        self.closing.store(false, Ordering::SeqCst);

        let connection_info = self.client.connect(self.connect_options()?).await;
        let rsp = match connection_info {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::error!(error = ?e, "failed to connect to the MQTT broker");
                return Err(e.into());
            }
        };

        let session_present = rsp
            .connect_response()
            .map(|c| c.session_present)
            .unwrap_or(false);
        tracing::info!(session_present, "connected to the MQTT broker");
        Ok(ConnectAck { session_present })
    }

    #[tracing::instrument(err)]
    async fn disconnect(&self) -> Result<(), Error> {
        self.closing.store(true, Ordering::SeqCst);
        if !self.client.is_connected() {
            tracing::info!("already disconnected");
            return Ok(());
        }
        self.client.disconnect(None).await?;
        tracing::info!("disconnected from the MQTT broker");
        Ok(())
    }

    #[tracing::instrument(skip(payload), fields(bytes = payload.len()), err)]
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Error> {
        let mut message = MqttMessageBuilder::new()
            .topic(topic)
            .payload(payload)
            .qos(qos.as_i32());
        if self.options.version == MqttVersion::V5 {
            message = message.properties(self.message_properties()?);
        }
        let message = message.finalize();

        tracing::debug!(?message, "publishing to the MQTT broker");
        self.client.publish(message).await?;
        Ok(())
    }

    #[tracing::instrument(skip(handler), err)]
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<QoS, Error> {
        // Register first: the broker may deliver before the SUBACK resolves.
        self.subscriptions.insert(filter, qos, handler);

        let granted = match self.client.subscribe(filter, qos.as_i32()).await {
            Ok(rsp) => rsp.subscribe_response().and_then(QoS::from_i32),
            Err(e) => {
                self.subscriptions.remove(filter);
                return Err(e.into());
            }
        };

        match granted {
            Some(granted) => {
                tracing::info!(?granted, "subscribed");
                Ok(granted)
            }
            None => {
                self.subscriptions.remove(filter);
                Err(Error::SubscribeRejected(filter.to_string()))
            }
        }
    }

    async fn resubscribe_existing_topics(&self) -> Result<Vec<ResubscribeResult>, Error> {
        let mut results = Vec::new();
        for (topic, qos) in self.subscriptions.filters() {
            let rsp = self.client.subscribe(&topic, qos.as_i32()).await?;
            let granted = rsp.subscribe_response().and_then(QoS::from_i32);
            results.push(ResubscribeResult { topic, granted });
        }
        Ok(results)
    }
}

#[cfg(test)]
#[path = "mq_tests.rs"]
mod tests;

impl Debug for MqttTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("client_id", &self.options.client_id)
            .field("server_uri", &self.options.server_uri())
            .finish()
    }
}

pub struct MqttCarrierInjector<'a>(pub &'a mut MqttProps);

impl<'a> opentelemetry::propagation::Injector for MqttCarrierInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        if let Err(e) = self.0.push_string_pair(PropertyCode::UserProperty, key, &value) {
            tracing::warn!(key, error = %e, "cannot attach trace context");
        }
    }
}
