use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of asking the host OS for the screen-capture grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    Denied,
}

/// Opaque token minted when the grant is acquired. Handed to the display
/// server on start; valid for the lifetime of this process, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureToken(String);

impl CaptureToken {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The seam to the host OS permission prompt. Implementations may suspend
/// for as long as the user deliberates.
pub trait CapabilitySource: Send + Sync + 'static {
    fn request(&self) -> impl Future<Output = GrantOutcome> + Send;
}

/// Caches the process-lifetime screen-capture grant and collapses
/// concurrent requests into a single OS prompt.
///
/// A request while one is outstanding subscribes to the same outcome. A
/// denial is terminal until a new explicit request; the broker never
/// retries on its own.
pub struct CapabilityBroker<S> {
    source: S,
    inner: Mutex<Inner>,
}

struct Inner {
    granted: Option<CaptureToken>,
    inflight: Option<broadcast::Sender<GrantOutcome>>,
}

impl<S: CapabilitySource> CapabilityBroker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            inner: Mutex::new(Inner {
                granted: None,
                inflight: None,
            }),
        }
    }

    /// Whether the grant is currently held.
    pub fn have_grant(&self) -> bool {
        self.lock().granted.is_some()
    }

    /// The capture token, if the grant is held.
    pub fn token(&self) -> Option<CaptureToken> {
        self.lock().granted.clone()
    }

    /// Acquire the grant, prompting the OS at most once concurrently.
    pub async fn request_grant(&self) -> GrantOutcome {
        let join = {
            let mut inner = self.lock();
            if inner.granted.is_some() {
                return GrantOutcome::Granted;
            }
            match &inner.inflight {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inner.inflight = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = join {
            debug!("joining in-flight capability request");
            // A closed channel means the leading request was torn down;
            // report denial rather than hang.
            return rx.recv().await.unwrap_or(GrantOutcome::Denied);
        }

        let outcome = self.source.request().await;

        let mut inner = self.lock();
        if outcome == GrantOutcome::Granted && inner.granted.is_none() {
            inner.granted = Some(CaptureToken::mint());
        }
        if let Some(tx) = inner.inflight.take() {
            let _ = tx.send(outcome);
        }
        drop(inner);

        match outcome {
            GrantOutcome::Granted => info!("screen capture grant acquired"),
            GrantOutcome::Denied => warn!("screen capture grant denied"),
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Production capability source: runs an operator-configured helper
/// command; exit status zero means granted. With no helper configured the
/// device is treated as pre-provisioned and the grant resolves
/// immediately.
pub struct HelperCommandSource {
    command: Option<String>,
}

impl HelperCommandSource {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

impl CapabilitySource for HelperCommandSource {
    async fn request(&self) -> GrantOutcome {
        let Some(command) = &self.command else {
            debug!("no grant helper configured, treating device as pre-provisioned");
            return GrantOutcome::Granted;
        };

        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
        {
            Ok(status) if status.success() => GrantOutcome::Granted,
            Ok(status) => {
                warn!(%command, ?status, "grant helper refused");
                GrantOutcome::Denied
            }
            Err(e) => {
                warn!(%command, error = %e, "grant helper failed to run");
                GrantOutcome::Denied
            }
        }
    }
}
