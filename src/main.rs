
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::pedantic)]

//! Upload sink: accepts streamed POST bodies, reassembles them and answers `Ok.`.
//! Stops on Ctrl-C, SIGTERM, or any input on stdin.

use std::time::Duration;
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stream_load::{
    config::{self, ServerConfig},
    server,
    ConnectionRegistry,
};

/// Arguments of the upload sink
#[derive(Debug, Parser)]
#[command(version, about = "Accepts streamed uploads and acknowledges them")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Seconds a single upload may take before it is aborted
    #[arg(short, long, default_value_t = 120)]
    timeout: u64,

    /// Buffer size for uploads without a usable Content-Length
    #[arg(long, default_value_t = config::DEFAULT_UPLOAD_CAPACITY)]
    fallback_capacity: usize,

    /// Keep running when stdin is closed or receives input
    #[arg(long, default_value_t = false)]
    ignore_stdin: bool,
}

/// Upload sink
#[tokio::main]
async fn main() -> anyhow::Result<()> {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        port: args.port,
        fallback_capacity: args.fallback_capacity,
        connection_timeout: Duration::from_secs(args.timeout),
        ..ServerConfig::default()
    };

    let token = CancellationToken::new();
    spawn_shutdown_watch(token.clone(), !args.ignore_stdin);

    // Start serving
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    server::serve(listener, ConnectionRegistry::new(config), token).await?;
    Ok(())
}

/// Cancel `token` on Ctrl-C, SIGTERM and, when `watch_stdin` is set, on a line or EOF on stdin
fn spawn_shutdown_watch(token: CancellationToken, watch_stdin: bool) {

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
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
                tracing::info!("SIGTERM received, shutting down");
                token.cancel();
            }
        });
    }

    if watch_stdin {
        tokio::spawn(async move {
            let mut line = String::new();
            let _ = BufReader::new(tokio::io::stdin()).read_line(&mut line).await;
            tracing::info!("stdin closed or answered, shutting down");
            token.cancel();
        });
    }
}
