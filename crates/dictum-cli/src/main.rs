//! Dictum CLI
//!
//! Usage:
//!   # Relay stdin to the local server, printing transcripts
//!   echo '{"type":"ping"}' | dictum connect --on pong
//!
//!   # Different endpoint, fixed one-second retry, at most three attempts
//!   dictum connect --url ws://10.0.0.5:8765 --fixed-delay --max-reconnect-attempts 3
//!
//!   # Inspect the default rate limit buckets
//!   dictum limits

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Cli, Commands, ConnectArgs};
use dictum_client::{
    ConnectionManager, ConnectionState, StaticTokenProvider, TokenProvider,
    WebSocketTransportFactory,
};
use dictum_core::{Acquire, RateLimiter, RateLimiterConfig, TokioScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Connect(args) => run_connect(args).await,
        Commands::Limits { json } => show_limits(json),
    }
}

async fn run_connect(args: ConnectArgs) -> anyhow::Result<()> {
    let scheduler = Arc::new(TokioScheduler::current());

    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default())?);
    let _refill = limiter.start_refill(scheduler.clone());
    // fail fast on a typo rather than on the first line
    limiter
        .status(&args.category)
        .with_context(|| format!("category must be one of {:?}", limiter.categories()))?;

    let token_provider = args
        .bearer_token
        .clone()
        .map(|token| Arc::new(StaticTokenProvider::new(token)) as Arc<dyn TokenProvider>);

    let manager = ConnectionManager::with_token_provider(
        args.to_config(),
        Arc::new(WebSocketTransportFactory::current()),
        scheduler,
        token_provider,
    )?;

    let (state_tx, mut state_rx) = watch::channel(ConnectionState::Disconnected);
    manager.on_state_change(move |old, new| {
        debug!("Connection {} -> {}", old, new);
        state_tx.send_replace(new);
    });
    manager.on_open(|| info!("Connected"));
    manager.on_close(|| warn!("Connection lost"));
    manager.on_error(|e| error!("[{}] {}", e.severity(), e));

    for kind in &args.message_types {
        manager.on_message(kind.clone(), |msg| match serde_json::to_string(&msg) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Cannot print inbound {} message: {}", msg.kind, e),
        });
    }

    info!("Connecting to {}", manager.url());
    manager.connect()?;

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                manager.close();
                return Ok(());
            }
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow() == ConnectionState::Closed {
                    bail!("gave up connecting to {}", manager.url());
                }
                continue;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };

        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: serde_json::Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping input line that is not JSON: {}", e);
                continue;
            }
        };

        if let Acquire::Deferred(wait) = limiter.acquire(&args.category, 1)? {
            info!(
                "Rate limit reached for '{}', next slot in {}ms",
                wait.category(),
                wait.wait_time_ms()
            );
            wait.await?;
        }

        if let Err(e) = manager.send(&message) {
            if e.is_retryable() {
                warn!("Dropping message: {}", e);
                continue;
            }
            match e {
                dictum_client::Error::ConnectionClosed => {
                    bail!("connection to {} is closed", manager.url())
                }
                other => warn!("Skipping message: {}", other),
            }
        }
    }

    drain(&manager, Duration::from_secs(args.drain_timeout)).await;
    info!("{}", manager.stats());
    info!("{}", limiter.stats());
    manager.close();
    Ok(())
}

/// Give queued frames a chance to go out before closing
async fn drain(manager: &ConnectionManager, timeout: Duration) {
    let drained = tokio::time::timeout(timeout, async {
        while manager.queued_len() > 0 && manager.state() != ConnectionState::Closed {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} frames still queued after {:?}, dropping them",
            manager.queued_len(),
            timeout
        );
    }
}

fn show_limits(json: bool) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(RateLimiterConfig::default())?;

    for category in limiter.categories() {
        let status = limiter.status(&category)?;
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "category": category,
                    "availableTokens": status.available_tokens,
                    "maxTokens": status.capacity,
                    "refillRate": status.refill_rate_per_second,
                    "waitTimeForNext": status.wait_time_for_next_token_ms,
                    "queueLength": status.queued_waiters,
                })
            );
        } else {
            println!(
                "{:<8} {:>5}/{:<5} tokens  refill {:.2}/s",
                category, status.available_tokens, status.capacity, status.refill_rate_per_second
            );
        }
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
