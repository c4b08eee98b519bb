#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

//! Simulation kernel for distributed systems
//!
//! Throughout this crate there is a user-backend relationship between the
//! simulated actors (user code, each on its own context) and the kernel: a
//! single control flow, the *maestro*, owns every piece of simulator state
//! and drives virtual time one tick at a time. Actors never touch shared
//! state directly, they leave a request record (a *simcall*) and suspend;
//! maestro resolves the resource contention those requests create through a
//! max-min fairness solver and wakes the actors whose work completed.
//!
//! The crate splits along the same lines as the kernel it models:
//!
//! * [lmm] — the sparse linear max-min solver,
//! * [surf] — CPU and network models mapping actions onto solver variables,
//! * [simix] — actors, rendezvous communication, synchronization, timers,
//! * [platform] — hosts, links and routes, built through callbacks,
//! * [config] — the `key:value` configuration surface.

// I like to have many small files
pub mod config;
mod context;
mod err;
pub mod instr;
pub mod lmm;
mod logger;
pub mod platform;
pub mod simix;
pub mod surf;
mod trace;

// but it's much easier to use if the main types are at the root
pub use self::config::{Config, ContextFactory};
pub use self::err::SimError;
pub use self::instr::{InstrSink, NullSink, VarKind};
pub use self::logger::LineLogger;
pub use self::platform::{HostId, LinkId, Platform, SharingPolicy};
pub use self::simix::{
    copy_buffer_callback, copy_pointer_callback, ActorCode, ActorHandle, CondId, CopyFn, MutexId,
    Pid, RdvId, SemId, Simulator, SEM_UNLIMITED,
};
pub use self::surf::{ActionId, ActionState, CleanFn, MatchFn};
pub use self::trace::Trace;

/// Virtual time, in seconds.
pub type Time = f64;

/// Absence of a deadline, for `max_duration`-style fields.
pub const NO_MAX_DURATION: Time = -1.0;

/// Relative-tolerance comparison helpers shared by the solver and the models.
///
/// All virtual-time and rate arithmetic in the kernel is done within a
/// relative precision; exact floating point comparisons would make action
/// completion dependent on summation order.
pub(crate) mod precision {
    /// `x > 0` up to `eps`.
    pub fn positive(x: f64, eps: f64) -> bool {
        x - eps > 0.0
    }

    /// `a == b` up to `eps`.
    pub fn equals(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    /// `*x -= delta`, snapping to zero when the result drops below `eps`.
    pub fn update(x: &mut f64, delta: f64, eps: f64) {
        *x -= delta;
        if *x < eps {
            *x = 0.0;
        }
    }
}
