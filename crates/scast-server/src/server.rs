use std::sync::Arc;

use tokio::net::UnixListener;
use tracing::{error, info};

use libscast::capability::{CapabilityBroker, HelperCommandSource};
use libscast::process::DisplayServerProcess;
use libscast::{StatusBroker, spawn_session};

use crate::config::ServerConfig;
use crate::connection;

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    // Clean up stale socket
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }

    // Ensure parent directory exists
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write PID file
    let pid_path = scast_protocol::paths::pid_file_path();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_path, std::process::id().to_string())?;

    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), pid = std::process::id(), "scast daemon started");

    let capability = Arc::new(CapabilityBroker::new(HelperCommandSource::new(
        config.grant_cmd.clone(),
    )));
    let display = Arc::new(DisplayServerProcess::new(
        config.display_exec.clone(),
        config.display_args.clone(),
        config.display_port,
        config.ready_timeout(),
    ));
    let status = Arc::new(StatusBroker::default());
    let session = spawn_session(capability, display, Arc::clone(&status));

    // Handle shutdown signals
    let socket_path = config.socket_path.clone();
    let pid_path_clone = pid_path.clone();
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutting down...");
        // Cleanup
        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path_clone);
        std::process::exit(0);
    });

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let session = session.clone();
                let status = Arc::clone(&status);
                tokio::spawn(async move {
                    connection::handle_client(stream, session, status).await;
                });
            }
            Err(e) => {
                error!("accept error: {e}");
            }
        }
    }
}
