
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::pedantic)]

//! Load generator: uploads a fixed-size payload to the sink over and over.

use std::time::Duration;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stream_load::{
    config::{self, ClientConfig},
    HttpTransport,
    TransferLoop,
};

/// Arguments of the load generator
#[derive(Debug, Parser)]
#[command(version, about = "Streams a fixed-size payload to the sink in a loop")]
struct Args {
    /// Upload target, `http://<host>:<port>/<path>`
    #[arg(short, long, default_value = "http://127.0.0.1:6666/blah.json")]
    endpoint: String,

    /// Bytes sent per upload
    #[arg(short, long, default_value_t = config::DEFAULT_PAYLOAD_SIZE)]
    size: usize,

    /// Largest chunk handed to the connection at once
    #[arg(long, default_value_t = config::DEFAULT_CHUNK_SIZE as u64,
          value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Milliseconds to pause between uploads
    #[arg(short, long, default_value_t = 200)]
    interval: u64,

    /// Stop after this many uploads instead of running until interrupted
    #[arg(short = 'n', long)]
    iterations: Option<u64>,
}

/// Load generator
#[tokio::main]
async fn main() -> anyhow::Result<()> {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ClientConfig {
        endpoint: args.endpoint,
        payload_size: args.size,
        chunk_size: usize::try_from(args.chunk_size)?,
        interval: Duration::from_millis(args.interval),
        iterations: args.iterations,
    };

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, stopping after current upload");
                token.cancel();
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let token = token.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = signal(SignalKind::terminate()) {
                term.recv().await;
                tracing::info!("SIGTERM received, stopping after current upload");
                token.cancel();
            }
        });
    }

    tracing::info!(endpoint = %config.endpoint, bytes = config.payload_size, "starting transfer loop");
    let transfer_loop = TransferLoop::new(HttpTransport::new(config.chunk_size), config);
    let _ = transfer_loop.run(token).await;
    Ok(())
}
