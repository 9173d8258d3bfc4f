use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::CaptureToken;
use crate::error::CastError;

/// Status as reported by the process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Running,
    Stopped,
}

/// Opaque handle to the long-running display server process.
///
/// `stop` is idempotent; stopping an already-stopped server succeeds
/// trivially. Sequencing a stop behind an in-flight start is the state
/// machine's responsibility, not the handle's.
pub trait DisplayServer: Send + Sync + 'static {
    fn start(&self, token: &CaptureToken) -> impl Future<Output = Result<(), CastError>> + Send;
    fn stop(&self) -> impl Future<Output = ()> + Send;
    fn query_status(&self) -> impl Future<Output = ServerStatus> + Send;
}

/// Spawns the configured display-server executable and confirms readiness
/// by probing its listening TCP port within a deadline.
pub struct DisplayServerProcess {
    exec: String,
    args: Vec<String>,
    port: u16,
    ready_timeout: Duration,
    child: tokio::sync::Mutex<Option<Child>>,
}

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

impl DisplayServerProcess {
    pub fn new(exec: String, args: Vec<String>, port: u16, ready_timeout: Duration) -> Self {
        Self {
            exec,
            args,
            port,
            ready_timeout,
            child: tokio::sync::Mutex::new(None),
        }
    }

    async fn port_open(&self) -> bool {
        tokio::time::timeout(
            PROBE_INTERVAL,
            TcpStream::connect(("127.0.0.1", self.port)),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
    }
}

impl DisplayServer for DisplayServerProcess {
    async fn start(&self, token: &CaptureToken) -> Result<(), CastError> {
        let mut slot = self.child.lock().await;

        // The server may already be running from an earlier start.
        if let Some(child) = slot.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    debug!("display server already running");
                    return Ok(());
                }
                Ok(Some(status)) => {
                    debug!(?status, "previous display server exited, respawning");
                    *slot = None;
                }
                Err(e) => {
                    warn!(error = %e, "could not poll previous child, respawning");
                    *slot = None;
                }
            }
        }

        let mut child = Command::new(&self.exec)
            .args(&self.args)
            .env("SCAST_CAPTURE_TOKEN", token.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CastError::StartFailed(format!("failed to launch {}: {e}", self.exec))
            })?;

        // Readiness: the port must open before the deadline, with the
        // child still alive.
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(CastError::StartFailed(format!(
                    "display server exited during startup ({status})"
                )));
            }
            if self.port_open().await {
                break;
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(CastError::StartFailed(format!(
                    "not listening on port {} within {:?}",
                    self.port, self.ready_timeout
                )));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }

        info!(exec = %self.exec, port = self.port, pid = ?child.id(), "display server started");
        *slot = Some(child);
        Ok(())
    }

    async fn stop(&self) {
        let mut slot = self.child.lock().await;
        match slot.take() {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "kill on already-dead display server");
                }
                let _ = child.wait().await;
                info!("display server stopped");
            }
            None => {
                debug!("stop with no display server running");
            }
        }
    }

    async fn query_status(&self) -> ServerStatus {
        let mut slot = self.child.lock().await;
        match slot.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => ServerStatus::Running,
                Ok(Some(_)) | Err(_) => {
                    *slot = None;
                    ServerStatus::Stopped
                }
            },
            None => ServerStatus::Stopped,
        }
    }
}
