//! CPU model
//!
//! One solver constraint per host, bounded by its current speed. An
//! execution is a variable expanded against that constraint; a sleep is the
//! same with a zero sharing weight, so it consumes nothing but still hangs
//! off the constraint and fails with the host.

use crate::config::Config;
use crate::lmm;
use crate::platform::{HostId, Platform};
use crate::precision::update;
use crate::surf::{Action, ActionArena, ActionId, ActionKind, ActionState, CommSide};
use crate::{Time, NO_MAX_DURATION};

#[derive(Debug)]
struct Cpu {
    constraint: lmm::ConstraintId,
    peak: f64,
    scale: f64,
    on: bool,
}

/// The model owning every host constraint and compute/sleep action.
#[derive(Debug)]
pub(crate) struct CpuModel {
    pub sys: lmm::System,
    cpus: Vec<Cpu>,
    running: Vec<ActionId>,
    precision: f64,
}

impl CpuModel {
    pub fn new(platform: &Platform, config: &Config) -> CpuModel {
        let mut sys = lmm::System::new(true);
        sys.set_precision(config.maxmin_precision);
        sys.set_default_concurrency_limit(config.concurrency_limit);

        let cpus = platform
            .hosts
            .iter()
            .enumerate()
            .map(|(ix, host)| Cpu {
                constraint: sys.new_constraint(ix, host.speed),
                peak: host.speed,
                scale: 1.0,
                on: true,
            })
            .collect();

        CpuModel {
            sys,
            cpus,
            running: Vec::new(),
            precision: config.surf_precision,
        }
    }

    pub fn host_is_on(&self, host: HostId) -> bool {
        self.cpus[host.0].on
    }

    pub fn host_speed(&self, host: HostId) -> f64 {
        let cpu = &self.cpus[host.0];
        cpu.peak * cpu.scale
    }

    /// Starts a computation of `flops` on `host`.
    pub fn execute(
        &mut self,
        arena: &mut ActionArena,
        host: HostId,
        flops: f64,
        priority: f64,
        now: Time,
    ) -> ActionId {
        let failed = !self.cpus[host.0].on;
        let id = arena.alloc(Action {
            state: if failed {
                ActionState::Failed
            } else {
                ActionState::Running
            },
            cost: flops,
            remains: flops,
            start: now,
            finish: -1.0,
            max_duration: NO_MAX_DURATION,
            priority,
            variable: None,
            suspended: false,
            refcount: 1,
            waiters: Vec::new(),
            kind: ActionKind::Execute { host },
        });
        if !failed {
            let var = self.sys.new_variable(id.0, priority, -1.0, 1);
            self.sys.expand(self.cpus[host.0].constraint, var, 1.0);
            arena.get_mut(id).variable = Some(var);
            self.running.push(id);
        }
        id
    }

    /// Starts a pure wait of `duration` seconds on `host` (negative for "no
    /// deadline, only the host can end this").
    pub fn sleep(
        &mut self,
        arena: &mut ActionArena,
        host: HostId,
        duration: Time,
        now: Time,
        watching: Option<(ActionId, CommSide)>,
    ) -> ActionId {
        self.timed_wait(arena, host, duration, now, ActionKind::Sleep { host, watching })
    }

    /// Same as a sleep, but carrying a blocking synchronization operation.
    pub fn synchro_wait(
        &mut self,
        arena: &mut ActionArena,
        host: HostId,
        timeout: Time,
        now: Time,
    ) -> ActionId {
        self.timed_wait(arena, host, timeout, now, ActionKind::Synchro { host })
    }

    fn timed_wait(
        &mut self,
        arena: &mut ActionArena,
        host: HostId,
        duration: Time,
        now: Time,
        kind: ActionKind,
    ) -> ActionId {
        let failed = !self.cpus[host.0].on;
        let id = arena.alloc(Action {
            state: if failed {
                ActionState::Failed
            } else {
                ActionState::Running
            },
            cost: 1.0,
            remains: 1.0,
            start: now,
            finish: -1.0,
            max_duration: if duration < 0.0 { NO_MAX_DURATION } else { duration },
            priority: 0.0,
            variable: None,
            suspended: false,
            refcount: 1,
            waiters: Vec::new(),
            kind,
        });
        if !failed {
            // zero weight: consumes nothing, but fails with the host
            let var = self.sys.new_variable(id.0, 0.0, -1.0, 1);
            self.sys.expand(self.cpus[host.0].constraint, var, 1.0);
            arena.get_mut(id).variable = Some(var);
            self.running.push(id);
        }
        id
    }

    /// Smallest positive time until some running action changes state.
    pub fn share_resources(&mut self, arena: &ActionArena) -> Time {
        self.sys.solve();
        let mut min = f64::INFINITY;
        for &id in &self.running {
            let action = arena.get(id);
            let mut dt = f64::INFINITY;
            if let Some(var) = action.variable {
                let value = self.sys.variable_value(var);
                if value > 0.0 && action.remains > 0.0 {
                    dt = action.remains / value;
                }
            }
            if action.max_duration != NO_MAX_DURATION {
                dt = dt.min(action.max_duration);
            }
            min = min.min(dt);
        }
        min
    }

    /// Advances every running action by `delta` at its solved rate.
    pub fn update_actions_state(
        &mut self,
        arena: &mut ActionArena,
        now: Time,
        delta: Time,
        finished: &mut Vec<ActionId>,
    ) {
        let mut still = Vec::with_capacity(self.running.len());
        for &id in &self.running {
            let (value, weight) = match arena.get(id).variable {
                Some(var) => (self.sys.variable_value(var), self.sys.variable_weight(var)),
                None => (0.0, 0.0),
            };
            let action = arena.get_mut(id);
            if action.state.is_over() {
                // failed by a resource event earlier this tick
                continue;
            }
            if value > 0.0 {
                update(&mut action.remains, value * delta, self.precision);
            }
            if action.max_duration != NO_MAX_DURATION {
                update(&mut action.max_duration, delta, self.precision);
            }

            let done = (action.remains <= 0.0 && weight > 0.0)
                || (action.max_duration != NO_MAX_DURATION && action.max_duration <= 0.0);
            if done {
                action.finish = now;
                action.state = ActionState::Done;
                if let Some(var) = action.variable {
                    self.sys.update_variable_weight(var, 0.0);
                }
                finished.push(id);
            } else {
                still.push(id);
            }
        }
        self.running = still;
    }

    /// Applies a speed-scale trace event.
    pub fn set_host_scale(&mut self, host: HostId, scale: f64) {
        let cpu = &mut self.cpus[host.0];
        cpu.scale = scale;
        let bound = cpu.peak * cpu.scale;
        self.sys.update_constraint_bound(cpu.constraint, bound);
    }

    /// Applies an on/off trace event; turning a host off fails every action
    /// attached to its constraint.
    pub fn set_host_state(
        &mut self,
        arena: &mut ActionArena,
        host: HostId,
        on: bool,
        date: Time,
        finished: &mut Vec<ActionId>,
    ) {
        self.cpus[host.0].on = on;
        if on {
            return;
        }
        let constraint = self.cpus[host.0].constraint;
        for (var, _) in self.sys.constraint_elements(constraint) {
            let id = ActionId(self.sys.variable_token(var));
            let action = arena.get_mut(id);
            if !action.state.is_over() {
                action.state = ActionState::Failed;
                action.finish = date;
                self.sys.update_variable_weight(var, 0.0);
                finished.push(id);
            }
        }
        self.running.retain(|&id| !arena.get(id).state.is_over());
    }

    /// Stops an action on explicit request; the caller finishes it.
    pub fn cancel(&mut self, arena: &mut ActionArena, id: ActionId, now: Time) {
        let action = arena.get_mut(id);
        if action.state.is_over() {
            return;
        }
        action.state = ActionState::Canceled;
        action.finish = now;
        if let Some(var) = action.variable {
            self.sys.update_variable_weight(var, 0.0);
        }
        self.running.retain(|&r| r != id);
    }

    /// Freezes an action's progress.
    pub fn suspend(&mut self, arena: &mut ActionArena, id: ActionId) {
        let action = arena.get_mut(id);
        if !action.suspended {
            action.suspended = true;
            if let Some(var) = action.variable {
                self.sys.update_variable_weight(var, 0.0);
            }
        }
    }

    /// Resumes a suspended action at its original priority.
    pub fn resume(&mut self, arena: &mut ActionArena, id: ActionId) {
        let action = arena.get_mut(id);
        if action.suspended {
            action.suspended = false;
            if let Some(var) = action.variable {
                self.sys.update_variable_weight(var, action.priority);
            }
        }
    }

    /// Releases the solver variable of a terminated action.
    pub fn drop_variable(&mut self, action: &mut Action) {
        if let Some(var) = action.variable.take() {
            self.sys.remove_variable(var);
        }
    }
}
