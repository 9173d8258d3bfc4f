use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use scast_protocol::{Origin, StatusReport};

use crate::broker::StatusBroker;
use crate::capability::{CapabilityBroker, CapabilitySource, CaptureToken, GrantOutcome};
use crate::error::CastError;
use crate::process::{DisplayServer, ServerStatus};

const INBOX_CAPACITY: usize = 64;

/// Authoritative coordinator state for the display server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Starting,
    Running,
    Stopping,
    StartFailed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingPermission => "awaiting_permission",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::StartFailed => "start_failed",
        }
    }

    /// Derived running flag: the server has been told to start and has
    /// not reported a failure or a stop completion.
    pub fn running(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

/// Reply to a start/stop/status command.
pub type CommandReply = Result<StatusReport, CastError>;

type ReplyTx = oneshot::Sender<CommandReply>;

/// Everything the coordinator reacts to, serialized through one inbox:
/// commands from either origin, capability outcomes, process reports.
enum SessionEvent {
    Start { origin: Origin, reply: ReplyTx },
    Stop { origin: Origin, reply: ReplyTx },
    Status { reply: ReplyTx },
    GrantResolved { epoch: u64, outcome: GrantOutcome },
    StartResolved { epoch: u64, result: Result<(), CastError> },
    StopResolved { epoch: u64 },
}

/// Clonable handle for enqueueing commands into the coordinator.
#[derive(Clone)]
pub struct SessionController {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionController {
    pub async fn start(&self, origin: Origin) -> CommandReply {
        self.roundtrip(|reply| SessionEvent::Start { origin, reply })
            .await
    }

    pub async fn stop(&self, origin: Origin) -> CommandReply {
        self.roundtrip(|reply| SessionEvent::Stop { origin, reply })
            .await
    }

    pub async fn status(&self) -> CommandReply {
        self.roundtrip(|reply| SessionEvent::Status { reply }).await
    }

    async fn roundtrip(&self, make: impl FnOnce(ReplyTx) -> SessionEvent) -> CommandReply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(make(tx)).await.is_err() {
            return Err(CastError::Unavailable);
        }
        rx.await.unwrap_or(Err(CastError::Unavailable))
    }
}

/// Spawn the coordinator task and return its command handle.
///
/// The actor is the only mutator of session state; collaborator calls
/// that can suspend (grant prompt, process start/stop) run in spawned
/// tasks and post their outcome back into the inbox stamped with the
/// epoch current at issue time, so late results for superseded contexts
/// are discarded instead of misapplied.
pub fn spawn_session<C, S>(
    capability: Arc<CapabilityBroker<C>>,
    server: Arc<S>,
    status: Arc<StatusBroker>,
) -> SessionController
where
    C: CapabilitySource,
    S: DisplayServer,
{
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let actor = SessionActor {
        inbox: rx,
        callback_tx: tx.clone(),
        state: SessionState::Idle,
        epoch: 0,
        last_known_running: false,
        capability,
        server,
        status,
        pending_starts: Vec::new(),
        pending_stops: Vec::new(),
    };
    tokio::spawn(actor.run());
    SessionController { tx }
}

struct SessionActor<C: CapabilitySource, S: DisplayServer> {
    inbox: mpsc::Receiver<SessionEvent>,
    callback_tx: mpsc::Sender<SessionEvent>,
    state: SessionState,
    /// Correlation counter stamped onto every asynchronous operation.
    epoch: u64,
    /// Last status the process handle actually reported. May diverge
    /// from `state` inside the optimistic window.
    last_known_running: bool,
    capability: Arc<CapabilityBroker<C>>,
    server: Arc<S>,
    status: Arc<StatusBroker>,
    /// Start requesters waiting on the permission handshake.
    pending_starts: Vec<(Origin, ReplyTx)>,
    /// Stop requesters queued behind an in-flight start, or joined onto
    /// an in-flight stop.
    pending_stops: Vec<(Origin, ReplyTx)>,
}

impl<C: CapabilitySource, S: DisplayServer> SessionActor<C, S> {
    async fn run(mut self) {
        // The display server may have outlived a previous coordinator.
        if self.server.query_status().await == ServerStatus::Running {
            info!("display server already running, adopting session");
            self.state = SessionState::Running;
            self.last_known_running = true;
            self.status.publish(true);
        }

        while let Some(event) = self.inbox.recv().await {
            self.handle(event);
        }
        debug!("session inbox closed, coordinator stopping");
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start { origin, reply } => self.handle_start(origin, reply),
            SessionEvent::Stop { origin, reply } => self.handle_stop(origin, reply),
            SessionEvent::Status { reply } => {
                let _ = reply.send(Ok(self.report()));
            }
            SessionEvent::GrantResolved { epoch, outcome } => self.handle_grant(epoch, outcome),
            SessionEvent::StartResolved { epoch, result } => {
                self.handle_start_resolved(epoch, result)
            }
            SessionEvent::StopResolved { epoch } => self.handle_stop_resolved(epoch),
        }
    }

    fn report(&self) -> StatusReport {
        StatusReport {
            running: self.state.running(),
            state: self.state.as_str().to_string(),
            grant: self.capability.have_grant(),
        }
    }

    fn handle_start(&mut self, origin: Origin, reply: ReplyTx) {
        match self.state {
            SessionState::Running | SessionState::Starting => {
                debug!(%origin, state = self.state.as_str(), "start while active is a no-op");
                let _ = reply.send(Ok(self.report()));
            }
            SessionState::AwaitingPermission => {
                debug!(%origin, "start joins pending permission handshake");
                self.pending_starts.push((origin, reply));
            }
            SessionState::Stopping => {
                let _ = reply.send(Err(CastError::Busy("stop in progress")));
            }
            SessionState::Idle | SessionState::StartFailed => match self.capability.token() {
                Some(token) => self.begin_start(token, vec![(origin, reply)]),
                None => {
                    info!(%origin, "start requires the capture grant, requesting");
                    self.state = SessionState::AwaitingPermission;
                    self.pending_starts.push((origin, reply));
                    self.epoch += 1;
                    let epoch = self.epoch;
                    let capability = Arc::clone(&self.capability);
                    let tx = self.callback_tx.clone();
                    tokio::spawn(async move {
                        let outcome = capability.request_grant().await;
                        let _ = tx.send(SessionEvent::GrantResolved { epoch, outcome }).await;
                    });
                }
            },
        }
    }

    fn handle_stop(&mut self, origin: Origin, reply: ReplyTx) {
        match self.state {
            SessionState::Idle | SessionState::StartFailed => {
                debug!(%origin, "stop while already stopped is a no-op");
                let _ = reply.send(Ok(self.report()));
            }
            SessionState::AwaitingPermission => {
                // Abandon the handshake; the epoch bump makes any late
                // grant outcome stale.
                info!(%origin, "stop abandons pending permission handshake");
                self.epoch += 1;
                self.state = SessionState::Idle;
                for (waiter, waiter_reply) in self.pending_starts.drain(..) {
                    debug!(%waiter, "pending start canceled");
                    let _ = waiter_reply.send(Err(CastError::Canceled));
                }
                let _ = reply.send(Ok(self.report()));
            }
            SessionState::Starting => {
                debug!(%origin, "stop queued behind in-flight start");
                self.pending_stops.push((origin, reply));
            }
            SessionState::Stopping => {
                debug!(%origin, "stop joins in-flight stop");
                self.pending_stops.push((origin, reply));
            }
            SessionState::Running => {
                self.pending_stops.push((origin, reply));
                self.begin_stop();
            }
        }
    }

    fn begin_start(&mut self, token: CaptureToken, waiters: Vec<(Origin, ReplyTx)>) {
        self.state = SessionState::Starting;
        self.epoch += 1;
        let epoch = self.epoch;
        info!(epoch, "starting display server");

        // Optimistic signal; the process report confirms or corrects it.
        debug!(
            last_known_running = self.last_known_running,
            "publishing optimistic running=true"
        );
        self.status.publish(true);
        let report = self.report();
        for (origin, reply) in waiters {
            debug!(%origin, "start accepted");
            let _ = reply.send(Ok(report.clone()));
        }

        let server = Arc::clone(&self.server);
        let tx = self.callback_tx.clone();
        tokio::spawn(async move {
            let result = server.start(&token).await;
            let _ = tx.send(SessionEvent::StartResolved { epoch, result }).await;
        });
    }

    fn begin_stop(&mut self) {
        self.state = SessionState::Stopping;
        self.epoch += 1;
        let epoch = self.epoch;
        info!(epoch, "stopping display server");

        let server = Arc::clone(&self.server);
        let tx = self.callback_tx.clone();
        tokio::spawn(async move {
            server.stop().await;
            let _ = tx.send(SessionEvent::StopResolved { epoch }).await;
        });
    }

    fn handle_grant(&mut self, epoch: u64, outcome: GrantOutcome) {
        if epoch != self.epoch || self.state != SessionState::AwaitingPermission {
            debug!(
                epoch,
                current = self.epoch,
                state = self.state.as_str(),
                "stale capability outcome dropped"
            );
            return;
        }

        if outcome == GrantOutcome::Granted {
            if let Some(token) = self.capability.token() {
                let waiters = std::mem::take(&mut self.pending_starts);
                self.begin_start(token, waiters);
                return;
            }
            // Granted with no token to show for it; fail the waiters
            // rather than start an unauthorized capture.
            warn!("grant reported without a capture token");
        } else {
            warn!("capture grant denied, start abandoned");
        }

        self.state = SessionState::Idle;
        for (origin, reply) in self.pending_starts.drain(..) {
            debug!(%origin, "start refused: permission denied");
            let _ = reply.send(Err(CastError::PermissionDenied));
        }
        self.status.publish(false);
    }

    fn handle_start_resolved(&mut self, epoch: u64, result: Result<(), CastError>) {
        if epoch != self.epoch || self.state != SessionState::Starting {
            debug!(epoch, current = self.epoch, "stale start result dropped");
            return;
        }

        match result {
            Ok(()) => {
                info!("display server confirmed running");
                self.state = SessionState::Running;
                self.last_known_running = true;
                self.status.publish(true);
                if !self.pending_stops.is_empty() {
                    self.begin_stop();
                }
            }
            Err(e) => {
                warn!(error = %e, "display server failed to start");
                self.state = SessionState::StartFailed;
                self.last_known_running = false;
                // Correct the optimistic signal.
                self.status.publish(false);
                // A stop queued behind this start is trivially satisfied.
                let report = self.report();
                for (origin, reply) in self.pending_stops.drain(..) {
                    debug!(%origin, "queued stop satisfied by start failure");
                    let _ = reply.send(Ok(report.clone()));
                }
            }
        }
    }

    fn handle_stop_resolved(&mut self, epoch: u64) {
        if epoch != self.epoch || self.state != SessionState::Stopping {
            debug!(epoch, current = self.epoch, "stale stop result dropped");
            return;
        }

        info!("display server stopped");
        self.state = SessionState::Idle;
        self.last_known_running = false;
        self.status.publish(false);
        let report = self.report();
        for (origin, reply) in self.pending_stops.drain(..) {
            debug!(%origin, "stop completed");
            let _ = reply.send(Ok(report.clone()));
        }
    }
}
