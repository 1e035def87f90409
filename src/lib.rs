//! # IoT Jobs Edge
//!
//! IoT Jobs Edge is the edge component running on a Raspberry Pi next to
//! the sensors. It executes the jobs the cloud's job service queues for this
//! device one at a time ([`jobs::Coordinator`]), and publishes the sensor
//! readings it gets over UART, or fake ones, as
//! [`telemetry::TelemetryMessage`]s.
//!
//! Everything talks to the broker through a [`transport::Transport`]; the
//! paho-mqtt backed one lives in [`mq`].

pub mod config;
pub mod connection;
pub mod jobs;
pub mod mq;
pub mod telemetry;
pub mod transport;
