//! courier - publish endpoint と consumer プロセス
//!
//! - `courier serve`: GET/POST `/` で source から batch を取得し topic へ publish
//! - `courier consume`: subscription を pull し、sink へ転送（retry 付き）
//!
//! 設定は環境変数（`courier_core::app::Config`）から読む。

mod observability;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use courier_core::app::{ConsumeLoop, Config, PublishService, router};
use courier_core::impls::HttpSink;
use tokio_util::sync::CancellationToken;

use crate::observability::{LogFormat, init_tracing};

#[derive(Debug, Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bulk publish to Pub/Sub and forward subscriptions to an HTTP sink", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, global = true, default_value = "text", env = "COURIER_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the publish endpoint
    Serve(ServeArgs),
    /// Consume the subscription and forward to the sink until SIGINT/SIGTERM
    Consume,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Bind to 127.0.0.1 only (same as LOCAL_ONLY=true)
    #[arg(long)]
    local_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = Config::from_env().context("read configuration")?;
    match cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::Consume => consume(config).await,
    }
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.port = port;
    }
    config.local_only |= args.local_only;

    let client = reqwest::Client::builder()
        .timeout(config.publish_timeout)
        .build()
        .context("build http client")?;
    // Missing TOPIC_ID etc. is reported per request, not here.
    let service = Arc::new(PublishService::from_config(&config, client));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "publish endpoint listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve publish endpoint")?;
    tracing::info!("publish endpoint stopped");
    Ok(())
}

async fn consume(config: Config) -> Result<()> {
    let subscription = config.require_subscription()?.clone();
    let sink_url = config.require_sink_endpoint()?;
    let broker = config
        .pubsub_broker(reqwest::Client::new())
        .context("configure broker")?;
    let sink = HttpSink::with_default_client(sink_url).context("build sink client")?;

    let consumer = ConsumeLoop::new(Arc::new(broker), Arc::new(sink), config.consume_settings());
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested; finishing in-flight messages");
            cancel.cancel();
        }
    });

    let report = consumer.run(&subscription, cancel).await;
    tracing::info!(received = report.received, "Received {} messages", report.received);
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
