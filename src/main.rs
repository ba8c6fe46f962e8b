//! DETool - local UI server with a system tray
//!
//! Threads:
//! - http-listener: axum accept loop, owned by the lifecycle controller
//! - tray: tray icon and its message loop
//! - main: waits for "Close Server" or Ctrl+C

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use anyhow::{Context, Result};
use crossbeam::channel::bounded;
use detool::config::{self, AppConfig};
use detool::lifecycle::{LifecycleController, ServerConfig};
use detool::tray::{self, ExitRequest, ServerTrayActions};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("DETool starting...");

    let app_config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!("Static files: {:?}", app_config.static_dir);
    tracing::info!("Tag settings: {:?}", app_config.settings_path());

    // Port conflicts are fatal at startup
    let controller = Arc::new(LifecycleController::new(ServerConfig::from(&app_config)));
    controller
        .start()
        .context("Failed to start HTTP server")?;

    let (exit_tx, exit_rx) = bounded::<ExitRequest>(2);

    let interrupt_tx = exit_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(ExitRequest::Interrupt);
    }) {
        tracing::warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let actions =
        ServerTrayActions::new(Arc::clone(&controller), app_config.app_url.clone(), exit_tx);
    std::thread::Builder::new()
        .name("tray".to_string())
        .spawn(move || {
            let icon_dir = config::exe_dir();
            if let Err(e) = tray::run(&actions, icon_dir.as_deref()) {
                tracing::error!("Tray error: {:#}", e);
            }
        })
        .context("Failed to spawn tray thread")?;

    tracing::info!("DETool started. Check system tray.");

    match exit_rx.recv() {
        Ok(ExitRequest::TrayClose) => tracing::info!("Close requested from tray"),
        Ok(ExitRequest::Interrupt) => {
            tracing::info!("Interrupted, shutting down");
            if let Err(e) = controller.shutdown() {
                tracing::error!("Error shutting down server: {}", e);
            }
        }
        Err(_) => tracing::warn!("Exit channel closed"),
    }

    tracing::info!("DETool exiting");
    // The tray thread may still own the icon; do not wait for it
    std::process::exit(0);
}
