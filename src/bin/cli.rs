use setnx_lease::{Cancel, Config, Lease, Pool, DEFAULT_PORT};

use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::num::ParseIntError;
use std::str;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;

#[cfg(feature = "otel")]
// To be able to set the XrayPropagator
use opentelemetry::global;
#[cfg(feature = "otel")]
// To configure certain options such as sampling rate
use opentelemetry::sdk::trace as sdktrace;
#[cfg(feature = "otel")]
// The `Ext` traits are to allow the Registry to accept the
// OpenTelemetry-specific types (such as `OpenTelemetryLayer`)
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

#[derive(Parser, Debug)]
#[clap(
    name = "lease-cli",
    version,
    author,
    about = "Issue Redis commands and take single-key leases"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(name = "hostname", long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[clap(long)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping {
        /// Message to ping
        msg: Option<String>,
    },
    /// Get the value of key.
    Get {
        /// Name of key to get
        key: String,
    },
    /// Set key to hold the string value.
    Set {
        /// Name of key to set
        key: String,

        /// Value to set.
        #[clap(parse(from_str = bytes_from_str))]
        value: Bytes,

        /// Expire the value after specified amount of time
        #[clap(parse(try_from_str = duration_from_ms_str))]
        expires: Option<Duration>,
    },
    /// Delete a key.
    Del {
        /// Name of key to delete
        key: String,
    },
    /// Publisher to send a message to a specific channel.
    Publish {
        /// Name of channel
        channel: String,

        #[clap(parse(from_str = bytes_from_str))]
        /// Message to publish
        message: Bytes,
    },
    /// Subscribe a client to a specific channel or channels.
    Subscribe {
        /// Specific channel or channels
        channels: Vec<String>,
    },
    /// Take the lease on a key, hold it and release it.
    Lock {
        /// Name of the key that identifies the resource
        key: String,

        /// Seconds before the store expires the lease
        #[clap(long, default_value_t = 3)]
        ttl: u64,

        /// Milliseconds to keep retrying while the lease is taken
        #[clap(long, default_value_t = 0)]
        wait: u64,

        /// Milliseconds to hold the lease before releasing it
        #[clap(long, default_value_t = 0)]
        hold: u64,
    },
}

/// Entry point for CLI tool.
///
/// `flavor = "current_thread"` is used here to avoid spawning background
/// threads. The CLI tool use case benefits more by being lighter instead of
/// multi-threaded.
#[tokio::main(flavor = "current_thread")]
async fn main() -> setnx_lease::Result<()> {
    set_up_logging()?;

    let cli = Cli::parse();

    let config = Config {
        host: cli.host,
        port: cli.port,
        password: cli.password,
        max_connections: 1,
        ..Config::default()
    };
    let pool = Pool::new(config);

    match cli.command {
        Command::Ping { msg } => {
            let mut client = pool.client().await?;
            let value = client.ping(msg).await?;
            print_value(&value);
        }
        Command::Get { key } => {
            if let Some(value) = pool.get(&key).await? {
                print_value(&value);
            } else {
                println!("(nil)");
            }
        }
        Command::Set {
            key,
            value,
            expires: None,
        } => {
            pool.set(&key, value).await?;
            println!("OK");
        }
        Command::Set {
            key,
            value,
            expires: Some(expires),
        } => {
            pool.set_expires(&key, value, expires).await?;
            println!("OK");
        }
        Command::Del { key } => {
            let deleted = pool.del(&key).await?;
            println!("(integer) {}", deleted);
        }
        Command::Publish { channel, message } => {
            pool.publish(&channel, message).await?;
            println!("Publish OK");
        }
        Command::Subscribe { channels } => {
            if channels.is_empty() {
                return Err("channel(s) must be provided".into());
            }

            // La conexion pasa a modo pub/sub, no se devuelve al pool.
            let mut client = setnx_lease::Client::connect(pool.config().addr()).await?;
            if let Some(password) = &pool.config().password {
                client.auth(password).await?;
            }
            let subscriber = client.subscribe(channels).await?;

            let messages = subscriber.into_stream();
            tokio::pin!(messages);

            while let Some(msg) = messages.next().await {
                let msg = msg?;
                println!("got message from the channel: {}; message = {:?}", msg.channel, msg.content);
            }
        }
        Command::Lock {
            key,
            ttl,
            wait,
            hold,
        } => {
            if ttl == 0 {
                return Err("ttl must be at least one second".into());
            }

            lock(pool, key, Duration::from_secs(ttl), Duration::from_millis(wait), Duration::from_millis(hold)).await?;
        }
    }

    #[cfg(feature = "otel")]
    // Ensure all spans have been shipped.
    opentelemetry::global::shutdown_tracer_provider();

    Ok(())
}

/// Takes the lease, holds it for `hold` and releases it. Ctrl-C abandons
/// both the wait and the hold.
async fn lock(pool: Pool, key: String, ttl: Duration, wait: Duration, hold: Duration) -> setnx_lease::Result<()> {
    let (notify_cancel, _) = broadcast::channel(1);
    let mut cancel = Cancel::new(notify_cancel.subscribe());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = notify_cancel.send(());
        }
    });

    let mut lease = Lease::new(pool, key, ttl);

    match lease.try_acquire_for(wait, &mut cancel).await {
        Ok(true) => {
            println!("OK {}", str::from_utf8(lease.token())?);
        }
        Ok(false) => {
            println!("(busy)");
            return Ok(());
        }
        Err(cancelled) => {
            println!("({})", cancelled);
            return Ok(());
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(hold) => {}
        _ = cancel.recv() => {}
    }

    lease.release().await?;
    println!("released");

    Ok(())
}

fn print_value(value: &Bytes) {
    if let Ok(string) = str::from_utf8(value) {
        println!("\"{}\"", string);
    } else {
        println!("{:?}", value);
    }
}

fn duration_from_ms_str(src: &str) -> Result<Duration, ParseIntError> {
    let ms = src.parse::<u64>()?;
    Ok(Duration::from_millis(ms))
}

fn bytes_from_str(src: &str) -> Bytes {
    Bytes::from(src.to_string())
}

#[cfg(not(feature = "otel"))]
fn set_up_logging() -> setnx_lease::Result<()> {
    use tracing_subscriber::EnvFilter;

    // Filtro desde `RUST_LOG`, por defecto solo errores.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
}

#[cfg(feature = "otel")]
fn set_up_logging() -> Result<(), TryInitError> {
    // Set the global propagator to X-Ray propagator
    // Note: If you need to pass the x-amzn-trace-id across services in the same trace,
    // you will need this line. However, this requires additional code not pictured here.
    // For a full example using hyper, see:
    // https://github.com/open-telemetry/opentelemetry-rust/blob/main/examples/aws-xray/src/server.rs#L14-L26
    global::set_text_map_propagator(opentelemetry_aws::trace::XrayPropagator::default());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(
            sdktrace::config()
                .with_sampler(sdktrace::Sampler::AlwaysOn)
                // Needed in order to convert the trace IDs into an Xray-compatible format
                .with_id_generator(sdktrace::XrayIdGenerator::default()),
        )
        .install_simple()
        .expect("Unable to initialize OtlpPipeline");

    // Create a tracing layer with the configured tracer
    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    // Parse an `EnvFilter` configuration from the `RUST_LOG`
    // environment variable.
    let filter = EnvFilter::from_default_env();

    // Use the tracing subscriber `Registry`, or any other subscriber
    // that impls `LookupSpan`
    tracing_subscriber::registry()
        .with(opentelemetry)
        .with(filter)
        .with(fmt::Layer::default().with_writer(std::io::stderr))
        .try_init()
}
