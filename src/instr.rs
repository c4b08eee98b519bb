//! Tracing hooks
//!
//! An optional event consumer in the style of Paje timelines. The kernel
//! never buffers: hooks fire synchronously, in virtual-time order, from
//! maestro. The default sink drops everything.

use crate::Time;

/// What kind of container a traced variable lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Per-host variable (speed, load...).
    Host,
    /// Per-link variable (bandwidth, latency...).
    Link,
}

/// Consumer of simulation timeline events.
pub trait InstrSink: Send {
    /// Announces a variable before any value is emitted for it.
    fn declare_var(&mut self, _name: &str, _kind: VarKind) {}

    /// Sets the value of `var` on `resource` at virtual time `time`.
    fn set_var(&mut self, _time: Time, _var: &str, _resource: &str, _value: f64) {}

    /// Adds to the value of `var` on `resource`.
    fn add_var(&mut self, _time: Time, _var: &str, _resource: &str, _delta: f64) {}

    /// Subtracts from the value of `var` on `resource`.
    fn sub_var(&mut self, _time: Time, _var: &str, _resource: &str, _delta: f64) {}

    /// Emits a punctual event on a container.
    fn event(&mut self, _time: Time, _container: &str, _kind: &str, _value: f64) {}
}

/// Sink discarding every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl InstrSink for NullSink {}
