//! iot-edge - job runner and telemetry publisher for the edge device
//!
//! Entry point for the CLI application.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use iot_jobs_edge_rs::config::{self, EnvFile};
use iot_jobs_edge_rs::connection::{self, CONNECT_ATTEMPTS};
use iot_jobs_edge_rs::jobs::{AbortCause, CommandWorker, Coordinator, JobsClient, Outcome};
use iot_jobs_edge_rs::mq::{MqttOptions, MqttTransport, MqttVersion, TlsFiles};
use iot_jobs_edge_rs::telemetry::{self, packet::Packet, uart, FakeTemperature, TelemetryPublisher};
use iot_jobs_edge_rs::transport::{ConnectionEvents, Error as TransportError, Transport};
use tokio::io::AsyncBufReadExt;
use tokio::runtime::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "iot-edge", version, about)]
struct Cli {
    /// More logging; repeat for more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the jobs queued for this device, one at a time
    Jobs {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Name of the thing the jobs are queued for
        #[arg(long, env = "THING_NAME")]
        thing_name: String,

        /// Kill a job command running longer than this many seconds
        #[arg(long)]
        job_timeout: Option<u64>,

        /// Seconds to wait for the job in flight after a shutdown signal
        #[arg(long, default_value_t = 30)]
        drain_timeout: u64,

        /// Directory job commands run in
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },

    /// Publish the packets a UART device prints
    PublishUart {
        #[command(flatten)]
        broker: BrokerArgs,

        #[arg(long, env = "TOPIC", default_value = "test/temp")]
        topic: String,

        /// Serial device; defaults to the first /dev/ttyACM*
        #[arg(long, env = "UART_PORT")]
        uart_port: Option<PathBuf>,

        /// Subscribe to the topic and log what comes back
        #[arg(long)]
        echo: bool,
    },

    /// Publish a fake temperature walk
    PublishFake {
        #[command(flatten)]
        broker: BrokerArgs,

        #[arg(long, env = "TOPIC", default_value = "test/temp")]
        topic: String,

        /// Seconds between two samples
        #[arg(long, env = "SAMPLE_FREQUENCY", default_value_t = 5)]
        sample_frequency: u64,

        /// Subscribe to the topic and log what comes back
        #[arg(long)]
        echo: bool,
    },

    /// Print the UART packets as JSON, one per line
    ReadUart {
        /// Serial device; defaults to the first /dev/ttyACM*
        #[arg(long, env = "UART_PORT")]
        uart_port: Option<PathBuf>,
    },

    /// Update keys of the .env file: --KEY value [--KEY value ...]
    SetConfig {
        /// File to update; defaults to the nearest .env
        #[arg(long = "env-file")]
        env_file: Option<PathBuf>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        pairs: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
struct BrokerArgs {
    /// Broker host name
    #[arg(long, env = "AWS_ENDPOINT")]
    endpoint: String,

    /// Broker port; 443 connects with ALPN
    #[arg(long, env = "PORT", default_value_t = 8883)]
    port: u16,

    /// Client certificate
    #[arg(long = "cert", env = "CERT_FILE")]
    cert_file: PathBuf,

    /// Client private key
    #[arg(long = "key", env = "PRI_KEY_FILE")]
    key_file: PathBuf,

    /// Root CA the broker's certificate is checked against
    #[arg(long = "ca-file", env = "ROOT_CA_FILE")]
    ca_file: PathBuf,

    /// Client id; defaults to "test" and a fresh UUID
    #[arg(long)]
    client_id: Option<String>,

    #[arg(long, default_value_t = CONNECT_ATTEMPTS)]
    connect_attempts: u32,

    /// Seconds between two connect attempts
    #[arg(long, default_value_t = 10)]
    connect_retry_delay: u64,

    /// Speak MQTT 5 and attach message properties
    #[arg(long)]
    mqtt5: bool,
}

impl BrokerArgs {
    fn options(&self) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("test{}", uuid::Uuid::new_v4()));
        let mut options = MqttOptions::new(&self.endpoint, client_id);
        options.port = self.port;
        options.device_id = telemetry::host_name();
        options.tls = Some(TlsFiles {
            ca_file: self.ca_file.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
        });
        if self.mqtt5 {
            options.version = MqttVersion::V5;
        }
        options
    }

    /// Connects to the broker, retrying as configured.
    async fn connect(&self) -> Result<(Arc<MqttTransport>, ConnectionEvents)> {
        let options = self.options();
        info!(
            uri = %options.server_uri(),
            client_id = %options.client_id,
            "connecting to the broker"
        );
        let (transport, events) =
            MqttTransport::new(options).context("Failed to create the MQTT client")?;
        let transport = Arc::new(transport);
        let ack = connection::connect_with_retry(
            transport.as_ref(),
            self.connect_attempts,
            Duration::from_secs(self.connect_retry_delay),
        )
        .await
        .context("Failed to connect to the broker")?;
        info!(session_present = ack.session_present, "connected");
        Ok((transport, events))
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Settings from .env must be in place before clap reads the environment
    let env_file = config::load_dotenv().context("Failed to load .env")?;

    let cli = Cli::parse();
    setup_logging(cli.verbose);
    if let Some(path) = &env_file {
        info!(path = %path.display(), "loaded environment file");
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the runtime")?;
    runtime.block_on(dispatch(cli.command))
}

async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Jobs {
            broker,
            thing_name,
            job_timeout,
            drain_timeout,
            working_dir,
        } => {
            let worker = CommandWorker::new()
                .with_timeout(job_timeout.map(Duration::from_secs))
                .with_working_dir(working_dir);
            run_jobs(&broker, &thing_name, worker, Duration::from_secs(drain_timeout)).await
        }
        Command::PublishUart {
            broker,
            topic,
            uart_port,
            echo,
        } => {
            let port = resolve_uart_port(uart_port)?;
            let reader = uart::open(&port)
                .await
                .with_context(|| format!("Failed to open {}", port.display()))?;
            run_publisher(&broker, topic, echo, |publisher| async move {
                let stats = publisher.run_lines(reader).await?;
                info!(
                    published = stats.published,
                    invalid = stats.invalid,
                    failed = stats.failed,
                    "UART closed"
                );
                anyhow::Ok(())
            })
            .await
        }
        Command::PublishFake {
            broker,
            topic,
            sample_frequency,
            echo,
        } => {
            let device_id = telemetry::host_name();
            let interval = Duration::from_secs(sample_frequency);
            run_publisher(&broker, topic, echo, |publisher| async move {
                publisher
                    .run_samples(&device_id, FakeTemperature::new(), interval)
                    .await?;
                anyhow::Ok(())
            })
            .await
        }
        Command::ReadUart { uart_port } => read_uart(resolve_uart_port(uart_port)?).await,
        Command::SetConfig { env_file, pairs } => set_config(env_file, &pairs),
    }
}

/// Runs the job coordinator until it finishes, aborts, or a shutdown signal
/// arrives and the job in flight drained.
async fn run_jobs(
    broker: &BrokerArgs,
    thing_name: &str,
    worker: CommandWorker,
    drain_timeout: Duration,
) -> Result<()> {
    let (transport, events) = broker.connect().await?;
    let client =
        JobsClient::new(Arc::clone(&transport), thing_name).context("Invalid thing name")?;
    let coordinator = Coordinator::new(client, worker, Handle::current());

    let supervised = coordinator.clone();
    let resumed = coordinator.clone();
    tokio::spawn(async move {
        let result = connection::supervise(transport, events, move || {
            resumed.on_connection_resumed()
        })
        .await;
        match result {
            Ok(()) => {}
            Err(TransportError::SubscribeRejected(topic)) => {
                supervised.abort(AbortCause::ResubscribeRejected(topic))
            }
            Err(e) => supervised.abort(AbortCause::SetupFailed(e.to_string())),
        }
    });

    coordinator
        .start()
        .await
        .context("Failed to subscribe to the job topics")?;

    let outcome = tokio::select! {
        outcome = coordinator.finished() => outcome,
        signal = shutdown_signal() => {
            info!(signal = signal?, "initiating graceful shutdown");
            coordinator.request_disconnect();
            match tokio::time::timeout(drain_timeout, coordinator.finished()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(?drain_timeout, "job still in flight, closing anyway");
                    coordinator.force_close().await
                }
            }
        }
    };

    match outcome {
        Outcome::Finished => {
            info!("done");
            Ok(())
        }
        Outcome::Aborted(cause) => Err(anyhow!(cause)),
    }
}

/// Connects, optionally subscribes to the echo, then runs `publish` until it
/// returns or a shutdown signal arrives.
async fn run_publisher<F, Fut>(
    broker: &BrokerArgs,
    topic: String,
    echo: bool,
    publish: F,
) -> Result<()>
where
    F: FnOnce(Arc<TelemetryPublisher<MqttTransport>>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let (transport, events) = broker.connect().await?;
    let supervised = Arc::clone(&transport);
    tokio::spawn(async move {
        if let Err(e) = connection::supervise(supervised, events, || {}).await {
            error!(error = %e, "lost the telemetry subscription");
        }
    });

    let publisher = Arc::new(TelemetryPublisher::new(Arc::clone(&transport), topic));
    if echo {
        publisher
            .subscribe_echo()
            .await
            .context("Failed to subscribe to the telemetry topic")?;
    }

    let result = tokio::select! {
        result = publish(Arc::clone(&publisher)) => result,
        signal = shutdown_signal() => {
            info!(signal = signal?, "stopping");
            Ok(())
        }
    };

    info!(received = publisher.received_count(), "disconnecting");
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "disconnect failed");
    }
    result
}

async fn read_uart(port: PathBuf) -> Result<()> {
    let mut lines = uart::open(&port)
        .await
        .with_context(|| format!("Failed to open {}", port.display()))?
        .lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Packet::parse(&line) {
            Ok(packet) => println!("{}", serde_json::to_string(&packet)?),
            Err(e) => warn!(%line, error = %e, "skipping packet"),
        }
    }
    Ok(())
}

fn set_config(env_file: Option<PathBuf>, pairs: &[String]) -> Result<()> {
    let pairs = config::parse_set_args(pairs)?;
    let path = match env_file {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir()?;
            EnvFile::find(&cwd).unwrap_or_else(|| cwd.join(config::ENV_FILE_NAME))
        }
    };

    let mut env = EnvFile::load(&path)?;
    for (key, value) in &pairs {
        env.set(key, value);
    }
    env.save()?;
    info!(path = %path.display(), keys = pairs.len(), "updated environment file");
    Ok(())
}

fn resolve_uart_port(port: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(port) = port {
        return Ok(port);
    }
    match uart::find_port(std::path::Path::new("/dev"))? {
        Some(port) => Ok(port),
        None => bail!("Cannot find UART port"),
    }
}

/// Resolves with the name of the first SIGTERM or SIGINT.
async fn shutdown_signal() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

fn setup_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("iot_jobs_edge_rs=info,iot_edge=info,warn"),
        1 => EnvFilter::new("iot_jobs_edge_rs=debug,iot_edge=debug,warn"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
