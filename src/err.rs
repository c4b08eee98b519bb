//! User-visible error taxonomy
//!
//! These are the only errors maestro ever delivers across an actor boundary.
//! Anything else (bad handle, solver inconsistency) is a bug in the
//! simulator or in the model and panics instead.

use thiserror::Error;

/// Errors delivered to actor code as the outcome of a blocking simcall.
///
/// All variants except [`SimError::Deadlock`] are recoverable: an actor may
/// catch them and carry on. A deadlock is reported by `Simulator::run` once
/// every actor is blocked with nothing left to wake anyone.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// The local host went down during a blocking operation.
    #[error("host failed")]
    Host,

    /// The remote peer or a link failed mid-communication.
    #[error("network error: {0}")]
    Network(&'static str),

    /// The timeout expired before the activity completed.
    #[error("timeout: {0}")]
    Timeout(&'static str),

    /// The activity was explicitly canceled.
    #[error("canceled: {0}")]
    Cancel(&'static str),

    /// Invalid simcall argument.
    #[error("invalid argument: {0}")]
    Arg(String),

    /// Storage operation failure.
    #[error("io error: {0}")]
    Io(String),

    /// The actor was killed; propagate this out of the actor body.
    #[error("actor killed")]
    Killed,

    /// Every actor is blocked and no activity can ever complete.
    #[error("deadlock: {0} actor(s) blocked with no pending activity")]
    Deadlock(usize),
}

impl SimError {
    /// Whether actor code may catch this error and keep running.
    pub fn recoverable(&self) -> bool {
        !matches!(self, SimError::Deadlock(_) | SimError::Killed)
    }
}
