use ecoflow2mqtt::config::ConfigHolder;
use ecoflow2mqtt::host::{setup_entry, unload_entry, CredentialSource};
use ecoflow2mqtt::models::short_sn;
use ecoflow2mqtt::HybridCoordinator;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() {
    // Initialize logging
    let default_filter = std::env::var("ECOFLOW_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let holder = match ConfigHolder::load() {
        Ok(holder) => holder,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let mut coordinators: Vec<Arc<HybridCoordinator>> = Vec::new();
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    for entry in holder.entries() {
        let coordinator = match setup_entry(&entry).await {
            Ok(coordinator) => coordinator,
            Err(e) => {
                error!("Setup of device ...{} failed: {e}", short_sn(&entry.device().sn));
                continue;
            }
        };

        /* Log every snapshot the coordinator publishes */
        let mut updates = coordinator.subscribe();
        let sn = entry.device().sn;
        threads.push(tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let snapshot = updates.borrow_and_update().clone();
                info!("Device ...{} update: {} fields", short_sn(&sn), snapshot.len());
            }
        }));

        coordinators.push(coordinator);
    }

    if coordinators.is_empty() {
        warn!("No device could be set up, exiting");
        return;
    }

    info!("{} device(s) running, now waiting for a signal to exit", coordinators.len());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                if threads.iter().any(|task| task.is_finished()) {
                    warn!("A device task ended, shutting down");
                    break;
                }
            }
        }
    }

    for coordinator in &coordinators {
        unload_entry(coordinator).await;
    }
    for task in threads.iter_mut() {
        task.abort();
    }
}
