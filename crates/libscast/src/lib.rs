pub mod broker;
pub mod capability;
pub mod error;
pub mod process;
pub mod session;

pub use broker::StatusBroker;
pub use capability::{CapabilityBroker, CapabilitySource, CaptureToken, GrantOutcome};
pub use error::CastError;
pub use process::{DisplayServer, DisplayServerProcess, ServerStatus};
pub use session::{SessionController, SessionState, spawn_session};
