//! Ledger server binary
//!
//! Opens the ledger, guarantees an open settlement window, runs the expiry
//! sweep on an interval and serves the Prometheus registry over HTTP.

use anyhow::Context;
use clearhub_ledger::{Config, Ledger};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting ClearHub ledger server");

    let config = Config::from_env()?;
    let sweep_interval = Duration::from_secs(config.expiry.sweep_interval_secs);
    let metrics_addr = config.metrics_listen_addr.clone();

    let ledger = Arc::new(Ledger::open(config)?);

    // A window must be open before any transfer can commit
    if ledger.open_window_id()?.is_none() {
        let window = ledger.open_window().await?;
        tracing::info!(window_id = %window.window_id, "Opened genesis settlement window");
    }

    // Expiry sweep loop
    {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = ledger.expire_sweep(chrono::Utc::now()).await {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        });
    }

    // Metrics endpoint
    {
        let ledger = ledger.clone();
        let listener = TcpListener::bind(&metrics_addr)
            .await
            .with_context(|| format!("binding metrics listener on {metrics_addr}"))?;
        tracing::info!(addr = %metrics_addr, "Serving metrics");
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    continue;
                };
                let encoder = TextEncoder::new();
                let mut buf = Vec::new();
                if encoder
                    .encode(&ledger.metrics().registry().gather(), &mut buf)
                    .is_err()
                {
                    continue;
                }
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    encoder.format_type(),
                    buf.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&buf).await;
                let _ = socket.shutdown().await;
            }
        });
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}
