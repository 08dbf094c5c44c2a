//! fogctl - command-line client for the fog node local API
//!
//! Runs inside a container next to the fog node: fetches configuration,
//! reads and publishes messages, and can hold both streams open.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use fog_client::{
    ChannelKind, ClientConfig, ClientError, FogApiListener, FogClient, LocalConfigListener, Message,
};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "fogctl")]
#[command(about = "Client for the fog node local API")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fog node host (default: resolve "iofog", then loopback)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Fog node port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Element id of this container (default: $SELFNAME)
    #[arg(long, global = true)]
    element_id: Option<String>,

    /// Use https/wss
    #[arg(long, global = true)]
    tls: bool,

    /// Accept any server certificate
    #[arg(long, global = true, requires = "tls")]
    insecure_tls: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch this container's configuration
    Config,

    /// Fetch messages queued for this container
    Next,

    /// Publish a message over REST
    Push {
        /// Message payload (UTF-8 text)
        #[arg(long)]
        payload: String,

        /// Message attribute, repeatable
        #[arg(long = "attr", value_parser = parse_key_val)]
        attributes: Vec<(String, String)>,
    },

    /// Query messages by time frame and publisher
    Query {
        /// Start of the time frame, milliseconds since the epoch (default: one hour ago)
        #[arg(long)]
        start: Option<i64>,

        /// End of the time frame, milliseconds since the epoch (default: now)
        #[arg(long)]
        end: Option<i64>,

        /// Publisher element id, repeatable
        #[arg(long = "publisher", required = true)]
        publishers: Vec<String>,
    },

    /// Open the control and message streams and log what arrives
    Watch,

    /// Poll the configured local config URL
    Poll {
        /// Seconds between polls (default: from config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("fog_client=info".parse()?)
                .add_directive("fogctl=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.connection)?;
    let client = FogClient::connect(config).await?;

    match cli.command {
        Commands::Config => {
            let listener = CliListener::shared();
            client.fetch_config(listener.clone()).await?;
            listener.finish()?;
        }

        Commands::Next => {
            let listener = CliListener::shared();
            client.fetch_next_message(listener.clone()).await?;
            listener.finish()?;
        }

        Commands::Push {
            payload,
            attributes,
        } => {
            let message = attributes
                .into_iter()
                .fold(Message::new(payload.into_bytes()), |msg, (k, v)| {
                    msg.with_attribute(k, v)
                });
            let listener = CliListener::shared();
            client.push_message(message, listener.clone()).await?;
            listener.finish()?;
        }

        Commands::Query {
            start,
            end,
            publishers,
        } => {
            let now = Utc::now().timestamp_millis();
            let end = end.unwrap_or(now);
            let start = start.unwrap_or(end - 3_600_000);
            let listener = CliListener::shared();
            client
                .fetch_messages_by_query(start, end, publishers, listener.clone())
                .await?;
            listener.finish()?;
        }

        Commands::Watch => watch(&client).await?,

        Commands::Poll { interval } => {
            let handle = client
                .fetch_local_config(Arc::new(ConfigPrinter), interval.map(Duration::from_secs))?;

            tokio::signal::ctrl_c().await?;
            info!("stopping");
            handle.join().await;
        }
    }

    Ok(())
}

fn load_config(args: &ConnectionArgs) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    }
    .apply_env();

    if let Some(host) = &args.host {
        config.host = Some(host.clone());
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(element_id) = &args.element_id {
        config.element_id = Some(element_id.clone());
    }
    config.tls |= args.tls;
    config.insecure_tls |= args.insecure_tls;

    config.validate()?;
    Ok(config)
}

async fn watch(client: &FogClient) -> anyhow::Result<()> {
    info!(element_id = client.element_id(), "opening streams");
    let listener: Arc<dyn FogApiListener> = Arc::new(StreamLogger {
        client: client.clone(),
    });

    tokio::join!(
        client.open_control_channel(Arc::clone(&listener)),
        client.open_message_channel(Arc::clone(&listener)),
    );

    let mut status = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            _ = status.tick() => {
                for kind in ChannelKind::ALL {
                    let stats = client.channel_stats(kind);
                    info!(
                        %kind,
                        state = %stats.state,
                        attempts = stats.attempts,
                        reconnects = stats.reconnects_scheduled,
                        "stream status"
                    );
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` in `{s}`"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_message(message: &Message) {
    let when = DateTime::<Utc>::from_timestamp_millis(message.timestamp)
        .map_or_else(|| message.timestamp.to_string(), |t| t.to_rfc3339());
    println!(
        "[{}] {} {}",
        when,
        message.publisher,
        String::from_utf8_lossy(&message.payload)
    );
    for (key, value) in &message.attributes {
        println!("    {key} = {value}");
    }
}

/// Prints REST results and remembers whether the call failed.
#[derive(Default)]
struct CliListener {
    failed: AtomicBool,
}

impl CliListener {
    fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn finish(&self) -> anyhow::Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            anyhow::bail!("request failed");
        }
        Ok(())
    }
}

impl FogApiListener for CliListener {
    fn on_messages(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            println!("no messages");
        }
        messages.iter().for_each(print_message);
    }

    fn on_messages_query(&self, timeframe_start: i64, timeframe_end: i64, messages: Vec<Message>) {
        println!(
            "{} message(s) between {timeframe_start} and {timeframe_end}",
            messages.len()
        );
        messages.iter().for_each(print_message);
    }

    fn on_message_receipt(&self, message_id: &str, timestamp: i64) {
        println!("published {message_id} at {timestamp}");
    }

    fn on_new_config(&self, config: Value) {
        match serde_json::to_string_pretty(&config) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{config}"),
        }
    }

    fn on_bad_request(&self, reason: &str) {
        error!(reason, "request rejected");
        self.failed.store(true, Ordering::SeqCst);
    }

    fn on_error(&self, error: &ClientError) {
        error!(error = %error, "request failed");
        self.failed.store(true, Ordering::SeqCst);
    }
}

/// Logs stream deliveries and acknowledges config signals by refetching.
struct StreamLogger {
    client: FogClient,
}

impl FogApiListener for StreamLogger {
    fn on_messages(&self, messages: Vec<Message>) {
        messages.iter().for_each(print_message);
    }

    fn on_message_receipt(&self, message_id: &str, timestamp: i64) {
        info!(message_id, timestamp, "receipt");
    }

    fn on_new_config(&self, config: Value) {
        info!(%config, "configuration updated");
    }

    fn on_new_config_signal(&self) {
        info!("configuration changed, refetching");
        let listener: Arc<dyn FogApiListener> = Arc::new(Self {
            client: self.client.clone(),
        });
        drop(self.client.fetch_config(listener));
    }

    fn on_bad_request(&self, reason: &str) {
        warn!(reason, "request rejected");
    }

    fn on_error(&self, error: &ClientError) {
        warn!(error = %error, "stream error");
    }
}

struct ConfigPrinter;

impl LocalConfigListener for ConfigPrinter {
    fn on_new_local_config(&self, config: &Map<String, Value>) {
        match serde_json::to_string_pretty(config) {
            Ok(pretty) => println!("{pretty}"),
            Err(e) => warn!(error = %e, "cannot render local config"),
        }
    }
}
