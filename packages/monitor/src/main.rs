//! TraceWatch Monitor
//!
//! Follows the chain, traces every transaction touching the configured token
//! and raises compliance alerts until interrupted.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracewatch_monitor::config::{MonitorConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use tracewatch_monitor::notifier::{LogNotifier, WebhookNotifier};
use tracewatch_monitor::pipeline::AlertSinks;
use tracewatch_monitor::publisher::AlertPublisher;
use tracewatch_monitor::rpc::{ChainRpc, NodeConnection};
use tracewatch_monitor::store::{MemoryAlertStore, RedisAlertStore};
use tracewatch_monitor::Monitor;

/// Token compliance monitor: traces every transaction touching the token
#[derive(Parser, Debug)]
#[command(name = "tracewatch-monitor")]
#[command(about = "Opcode-level compliance monitoring for a single token contract")]
struct Args {
    /// YAML config file; built-in defaults are used when it does not exist
    #[arg(env = ENV_CONFIG_PATH, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MonitorConfig::load_with_env(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;
    info!(
        "Monitoring token {} via {} ({} webhook(s))",
        config.token_address,
        config.node.url,
        config.webhooks.len()
    );

    let mut connection = NodeConnection::new(config.node.clone());
    let rpc: Arc<dyn ChainRpc> = Arc::new(
        connection
            .connect_with_backoff()
            .await
            .context("node unreachable at startup")?,
    );

    let sinks = build_sinks(&config).await?;
    let monitor = Monitor::from_config(rpc, &config, sinks);

    tokio::select! {
        _ = monitor.start_monitoring() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
    }

    let status = monitor.status();
    info!("Stopped at block {:?} ({:?})", status.current_block, status.state);
    Ok(())
}

async fn build_sinks(config: &MonitorConfig) -> anyhow::Result<AlertSinks> {
    let mut sinks = match &config.redis {
        Some(redis_config) => {
            let client = redis::Client::open(redis_config.url.as_str())
                .with_context(|| format!("invalid redis url {}", redis_config.url))?;
            let connection = client
                .get_multiplexed_async_connection()
                .await
                .context("connecting to redis")?;
            info!(
                "Alerts persisted to {} and published on {}",
                redis_config.alerts_key, redis_config.channel
            );
            let store = RedisAlertStore::new(connection.clone(), &redis_config.alerts_key);
            AlertSinks::new(Arc::new(store))
                .with_live(Arc::new(AlertPublisher::new(connection, &redis_config.channel)))
        }
        None => {
            warn!("No redis configured, alerts are kept in memory only");
            AlertSinks::new(Arc::new(MemoryAlertStore::new()))
        }
    };

    sinks = sinks.with_channel(Arc::new(LogNotifier));
    for webhook in &config.webhooks {
        let notifier = WebhookNotifier::new(webhook)
            .with_context(|| format!("building webhook {}", webhook.name))?;
        sinks = sinks.with_channel(Arc::new(notifier));
    }

    Ok(sinks)
}
