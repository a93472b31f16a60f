//! urlmon - URL monitoring service
//!
//! Probes registered URLs on a schedule, records every outcome, alerts on
//! failure streaks and records the sub-resources each page pulls in.

mod alert;
mod config;
mod db;
mod discovery;
mod monitor;
mod probe;
mod scheduler;
mod web;

#[cfg(test)]
mod test_support;

use alert::{AlertManager, SlackNotifier};
use config::ServerConfig;
use db::Store;
use discovery::ResourceDiscoverer;
use monitor::Monitor;
use probe::Prober;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("urlmon=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting urlmon on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    if cfg.slack_webhook_url.is_none() {
        tracing::warn!("SLACK_WEBHOOK_URL not set, alerts will only be logged");
    }

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let notifier = Arc::new(SlackNotifier::new(cfg.slack_webhook_url.clone()));
    let alerts = Arc::new(AlertManager::new(store.clone(), notifier, cfg.alert_policy()));
    let discoverer = Arc::new(ResourceDiscoverer::new(store.clone(), cfg.discovery_config())?);
    let prober = Prober::new(cfg.probe_timeout())?;
    let monitor = Arc::new(Monitor::new(store.clone(), prober, discoverer, alerts));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(store.clone(), monitor.clone()));
    scheduler.start().await?;

    // Start web server
    let server = Server::new(cfg, store, monitor, scheduler);
    server.start().await?;

    Ok(())
}
