use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rota_core::app::SchedulerBuilder;
use rota_core::config::RotaConfig;
use rota_core::domain::RotaError;
use rota_core::impls::LogOnlyBody;

/// rota [config.json]
///
/// Without a config file the defaults are used: only the maintenance
/// coordinator is registered.
#[tokio::main]
async fn main() -> Result<(), RotaError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) config + registry
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "loading config");
            RotaConfig::from_path(&path)?
        }
        None => RotaConfig::default(),
    };
    let registry = config.build_registry()?;

    // (B) bodies: the coordinator, and a log-only body for everything else
    let coordinator = config.coordinator();
    let coordinator_name = coordinator.name().to_string();
    let others: Vec<String> = registry
        .names()
        .into_iter()
        .map(|n| n.to_string())
        .filter(|n| *n != coordinator_name)
        .collect();

    let mut builder = SchedulerBuilder::new(registry)
        .idle_poll(config.idle_poll())
        .retry_policy(config.retry.clone())
        .expect_tasks(&[coordinator_name.as_str()])
        .register(coordinator_name.as_str(), Arc::new(coordinator))?;
    for name in others {
        builder = builder.register(name, Arc::new(LogOnlyBody))?;
    }
    let mut scheduler = builder.build()?;

    // (C) Ctrl-C flips the shutdown flag; tasks stop at their next checkpoint
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => error!(error = %e, "signal handler failed, shutting down"),
        }
        let _ = tx.send(true);
    });

    // (D) run until shutdown, then dump the final task table
    scheduler.run(rx).await;
    println!("{:#}", scheduler.registry().snapshot());
    Ok(())
}
