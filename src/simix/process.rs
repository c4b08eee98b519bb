//! Actors and their lifecycle
//!
//! An actor is user code pinned to a host, running on its own context. All
//! scheduling state lives maestro-side in the [`Actor`] record; the code
//! itself only sees an [`ActorHandle`], whose every method is a thin
//! wrapper around one simcall exchange.

use crate::context::{Context, ContextHandle};
use crate::err::SimError;
use crate::platform::HostId;
use crate::simix::comm::RdvId;
use crate::simix::synchro::{CondId, MutexId, SemId};
use crate::simix::{ActorCode, Answer, ClockCell, ExitHook, Resume, Simcall, Simulator, Yield};
use crate::surf::{ActionId, ActionState, CleanFn, MatchFn};
use crate::Time;
use slog::{debug, info, warn};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Unique actor id. Pids are never reused within one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub(crate) usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Panic payload used to unwind a killed actor's stack cooperatively.
pub(crate) struct ForcedExit;

/// What a blocked actor is waiting for, so kills and failures can detach it.
#[derive(Debug)]
pub(crate) enum Blocked {
    ExecWait(ActionId),
    Sleep { action: ActionId, wtime: bool },
    CommWait(ActionId),
    CommWaitany(Vec<ActionId>),
    Join {
        target: Pid,
        timer: Option<ActionId>,
    },
    MutexLock {
        mutex: MutexId,
        synchro: ActionId,
    },
    CondWait {
        cond: CondId,
        mutex: MutexId,
        synchro: ActionId,
    },
    SemAcquire {
        sem: SemId,
        synchro: ActionId,
    },
    Suspended,
}

/// Maestro-side record of one simulated actor.
pub(crate) struct Actor {
    pub pid: Pid,
    pub name: String,
    pub host: HostId,
    pub parent: Option<Pid>,

    pub context: Option<Context<Resume, Yield>>,
    pub code: Option<ActorCode>,

    pub answer: Option<Answer>,
    pub blocked: Option<Blocked>,
    pub waiting_action: Option<ActionId>,
    pub comms: Vec<ActionId>,
    pub on_exit: Vec<ExitHook>,
    pub join_waiters: Vec<Pid>,
    pub kill_timer: Option<Time>,
    pub data: u64,

    pub suspended: bool,
    pub dying: bool,
    pub auto_restart: bool,
    pub queued: bool,
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("suspended", &self.suspended)
            .field("dying", &self.dying)
            .field("blocked", &self.blocked)
            .finish()
    }
}

impl Simulator {
    /// Registers an actor before (or during) the simulation.
    pub fn register<F>(&mut self, name: &str, host: HostId, code: F) -> Pid
    where
        F: Fn(&mut ActorHandle) -> Result<(), SimError> + Send + Sync + 'static,
    {
        self.spawn_actor(name, host, false, Arc::new(code), None)
    }

    /// Registers an actor that is restarted when its failed host comes
    /// back online.
    pub fn register_restartable<F>(&mut self, name: &str, host: HostId, code: F) -> Pid
    where
        F: Fn(&mut ActorHandle) -> Result<(), SimError> + Send + Sync + 'static,
    {
        self.spawn_actor(name, host, true, Arc::new(code), None)
    }

    pub(crate) fn spawn_actor(
        &mut self,
        name: &str,
        host: HostId,
        auto_restart: bool,
        code: ActorCode,
        parent: Option<Pid>,
    ) -> Pid {
        assert!(host.0 < self.host_residents.len(), "unknown host");
        let pid = Pid(self.actors.len());
        let clock = Arc::clone(&self.clock_cell);
        let body = Arc::clone(&code);
        let host_name = self.platform.host_name(host).to_string();
        let actor_name = name.to_string();

        let context = Context::spawn(
            format!("actor-{}-{}", pid.0, name),
            self.cfg.stack_size_kib,
            move |ctx, first| {
                if let Resume::Kill = first {
                    // killed before ever running
                    return Yield::Done(Err(SimError::Killed));
                }
                let mut handle = ActorHandle {
                    ctx,
                    pid,
                    host,
                    host_name,
                    name: actor_name,
                    clock,
                };
                match panic::catch_unwind(AssertUnwindSafe(|| body(&mut handle))) {
                    Ok(result) => Yield::Done(result),
                    Err(payload) => {
                        if payload.is::<ForcedExit>() {
                            Yield::Done(Err(SimError::Killed))
                        } else {
                            let msg = payload
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "opaque panic payload".to_string());
                            Yield::Panicked(msg)
                        }
                    }
                }
            },
        );

        self.actors.push(Some(Actor {
            pid,
            name: name.to_string(),
            host,
            parent,
            context: Some(context),
            code: Some(code),
            answer: None,
            blocked: None,
            waiting_action: None,
            comms: Vec::new(),
            on_exit: Vec::new(),
            join_waiters: Vec::new(),
            kill_timer: None,
            data: 0,
            suspended: false,
            dying: false,
            auto_restart,
            queued: false,
        }));
        self.n_alive += 1;
        self.host_residents[host.0].push(pid);
        self.enqueue(pid);
        debug!(
            self.log,
            "spawned actor {} '{}' on '{}' (parent: {:?})",
            pid.0,
            name,
            self.platform.host_name(host),
            parent.map(|p| p.0)
        );
        pid
    }

    /// Runs the epilogue of an actor whose body returned (or was killed).
    pub(crate) fn actor_ended(&mut self, pid: Pid, result: Result<(), SimError>) {
        let failed = result.is_err();
        info!(
            self.log,
            "actor {} '{}' ended ({})",
            pid.0,
            self.actors[pid.0].as_ref().unwrap().name,
            if failed { "failure" } else { "ok" }
        );

        {
            let actor = self.actors[pid.0].as_mut().unwrap();
            actor.dying = true;
            actor.queued = false;
            if let Some(date) = actor.kill_timer.take() {
                // the timer entry stays in the heap and fires as a no-op
                debug!(self.log, "actor {} dies before its kill date {}", pid.0, date);
            }
        }

        let hooks = std::mem::take(&mut self.actors[pid.0].as_mut().unwrap().on_exit);
        for hook in hooks {
            hook(failed);
        }

        let waiters = std::mem::take(&mut self.actors[pid.0].as_mut().unwrap().join_waiters);
        for waiter in waiters {
            if self.actor_is_dead(waiter) {
                continue;
            }
            if let Some(Blocked::Join { timer, .. }) =
                self.actors[waiter.0].as_mut().unwrap().blocked.take()
            {
                if let Some(t) = timer {
                    self.discard_cpu_action(t);
                }
            }
            self.answer(waiter, Answer::Unit);
        }

        self.cleanup_comms(pid);

        let host = self.actors[pid.0].as_ref().unwrap().host;
        self.host_residents[host.0].retain(|&p| p != pid);

        match result {
            Err(e) if e != SimError::Killed => {
                warn!(self.log, "actor {} ended with user-level error: {}", pid.0, e);
                self.add_failure();
            }
            _ => {}
        }

        self.n_alive -= 1;
        self.push_zombie(pid);
    }

    /// Cooperative kill: detaches the victim from whatever it waits on and
    /// arranges for its next resume to unwind.
    pub(crate) fn kill_actor(&mut self, victim: Pid) {
        if self.actor_is_dead(victim) {
            return;
        }
        self.cleanup_blocked(victim);
        let actor = self.actors[victim.0].as_mut().unwrap();
        actor.dying = true;
        actor.suspended = false;
        self.enqueue(victim);
    }

    /// Detaches a blocked actor from the thing it waits on.
    fn cleanup_blocked(&mut self, victim: Pid) {
        let actor = self.actors[victim.0].as_mut().unwrap();
        let blocked = actor.blocked.take();
        actor.waiting_action = None;
        match blocked {
            Some(Blocked::ExecWait(a)) => {
                self.actions.get_mut(a).waiters.retain(|&p| p != victim);
                self.discard_cpu_action(a);
            }
            Some(Blocked::Sleep { action, .. }) => {
                self.actions.get_mut(action).waiters.retain(|&p| p != victim);
                self.discard_cpu_action(action);
            }
            Some(Blocked::CommWait(comm)) => {
                if self.actions.is_alive(comm) {
                    self.actions.get_mut(comm).waiters.retain(|&p| p != victim);
                    self.comm_cancel(comm);
                }
            }
            Some(Blocked::CommWaitany(comms)) => {
                for comm in comms {
                    if self.actions.is_alive(comm) {
                        self.actions.get_mut(comm).waiters.retain(|&p| p != victim);
                    }
                }
            }
            Some(Blocked::Join { target, timer }) => {
                if let Some(Some(t)) = self.actors.get_mut(target.0).map(|a| a.as_mut()) {
                    t.join_waiters.retain(|&p| p != victim);
                }
                if let Some(t) = timer {
                    self.actions.get_mut(t).waiters.retain(|&p| p != victim);
                    self.discard_cpu_action(t);
                }
            }
            Some(Blocked::MutexLock { mutex, synchro }) => {
                if let Some(m) = self.mutexes[mutex.0].as_mut() {
                    m.sleeping.retain(|&p| p != victim);
                }
                self.discard_cpu_action(synchro);
            }
            Some(Blocked::CondWait { cond, synchro, .. }) => {
                if let Some(c) = self.conds[cond.0].as_mut() {
                    c.sleeping.retain(|&p| p != victim);
                }
                self.discard_cpu_action(synchro);
            }
            Some(Blocked::SemAcquire { sem, synchro }) => {
                if let Some(s) = self.sems[sem.0].as_mut() {
                    s.sleeping.retain(|&p| p != victim);
                }
                self.discard_cpu_action(synchro);
            }
            Some(Blocked::Suspended) | None => {}
        }
    }

    /// Cancels and releases every in-flight communication of a dying actor.
    pub(crate) fn cleanup_comms(&mut self, pid: Pid) {
        let comms = std::mem::take(&mut self.actors[pid.0].as_mut().unwrap().comms);
        for comm in comms {
            if !self.actions.is_alive(comm) {
                continue;
            }
            self.actions.get_mut(comm).waiters.retain(|&p| p != pid);
            let (detached_sender, over) = {
                let action = self.actions.get(comm);
                let data = action.comm();
                (
                    data.detached && data.src == Some(pid),
                    action.state.is_over(),
                )
            };
            if !over {
                self.comm_cancel(comm);
            }
            if !detached_sender && self.actions.is_alive(comm) {
                self.destroy_action(comm);
            }
        }
    }

    /// Discards a cpu-model action without answering anyone.
    pub(crate) fn discard_cpu_action(&mut self, action: ActionId) {
        if self.actions.is_alive(action) {
            self.cpu.cancel(&mut self.actions, action, self.clock);
            self.actions.get_mut(action).waiters.clear();
            self.destroy_action(action);
        }
    }

    pub(crate) fn suspend_actor(&mut self, issuer: Pid, target: Pid) {
        if self.actor_is_dead(target) {
            self.answer(issuer, Answer::Unit);
            return;
        }
        let waiting = {
            let actor = self.actors[target.0].as_mut().unwrap();
            actor.suspended = true;
            actor.waiting_action
        };
        if let Some(action) = waiting {
            self.model_suspend(action);
        }
        if issuer == target {
            // blocks right here; resumed by somebody else later
            self.actors[issuer.0].as_mut().unwrap().blocked = Some(Blocked::Suspended);
        } else {
            self.answer(issuer, Answer::Unit);
        }
    }

    pub(crate) fn resume_actor(&mut self, target: Pid) {
        if self.actor_is_dead(target) {
            return;
        }
        let (was_suspended, waiting) = {
            let actor = self.actors[target.0].as_mut().unwrap();
            let was = actor.suspended;
            actor.suspended = false;
            (was, actor.waiting_action)
        };
        if !was_suspended {
            return;
        }
        if let Some(action) = waiting {
            self.model_resume(action);
        }
        let self_suspended = matches!(
            self.actors[target.0].as_ref().unwrap().blocked,
            Some(Blocked::Suspended)
        );
        if self_suspended {
            self.actors[target.0].as_mut().unwrap().blocked = None;
            self.answer(target, Answer::Unit);
        } else if self.actors[target.0].as_ref().unwrap().answer.is_some() {
            // parked while suspended with a pending answer
            self.enqueue(target);
        }
    }

    fn model_suspend(&mut self, action: ActionId) {
        if self.actions.get(action).is_comm() {
            self.net.suspend(&mut self.actions, action);
        } else {
            self.cpu.suspend(&mut self.actions, action);
        }
    }

    fn model_resume(&mut self, action: ActionId) {
        if self.actions.get(action).is_comm() {
            self.net.resume(&mut self.actions, action);
        } else {
            self.cpu.resume(&mut self.actions, action);
        }
    }

    // ======================== sleep & join ========================

    pub(crate) fn sleep_start(&mut self, pid: Pid, duration: Time, wtime: bool) {
        let host = self.actors[pid.0].as_ref().unwrap().host;
        if !self.cpu.host_is_on(host) {
            self.answer(pid, Answer::Error(SimError::Host));
            return;
        }
        let action = self
            .cpu
            .sleep(&mut self.actions, host, duration, self.clock, None);
        self.actions.get_mut(action).waiters.push(pid);
        let actor = self.actors[pid.0].as_mut().unwrap();
        actor.blocked = Some(Blocked::Sleep { action, wtime });
        actor.waiting_action = Some(action);
    }

    pub(crate) fn sleep_finished(&mut self, action: ActionId) {
        let state = self.actions.get(action).state;
        let waiters = std::mem::take(&mut self.actions.get_mut(action).waiters);
        for pid in waiters {
            if self.actor_is_dead(pid) {
                continue;
            }
            let blocked = self.actors[pid.0].as_mut().unwrap().blocked.take();
            match blocked {
                Some(Blocked::Sleep { wtime, .. }) => {
                    let answer = match state {
                        ActionState::Done => {
                            if wtime {
                                Answer::Float(self.clock)
                            } else {
                                Answer::Unit
                            }
                        }
                        _ => Answer::Error(SimError::Host),
                    };
                    self.answer(pid, answer);
                }
                Some(Blocked::Join { target, .. }) => {
                    if let Some(Some(t)) = self.actors.get_mut(target.0).map(|a| a.as_mut()) {
                        t.join_waiters.retain(|&p| p != pid);
                    }
                    let answer = match state {
                        ActionState::Done => Answer::Error(SimError::Timeout("join")),
                        _ => Answer::Error(SimError::Host),
                    };
                    self.answer(pid, answer);
                }
                other => {
                    debug_assert!(other.is_none(), "sleep waiter in odd state");
                }
            }
        }
        self.destroy_action(action);
    }

    pub(crate) fn join_start(&mut self, pid: Pid, target: Pid, timeout: Time) {
        if self.actor_is_dead(target) {
            self.answer(pid, Answer::Unit);
            return;
        }
        self.actors[target.0]
            .as_mut()
            .unwrap()
            .join_waiters
            .push(pid);
        let timer = if timeout >= 0.0 {
            let host = self.actors[pid.0].as_ref().unwrap().host;
            let t = self
                .cpu
                .sleep(&mut self.actions, host, timeout, self.clock, None);
            self.actions.get_mut(t).waiters.push(pid);
            Some(t)
        } else {
            None
        };
        let actor = self.actors[pid.0].as_mut().unwrap();
        actor.blocked = Some(Blocked::Join { target, timer });
        actor.waiting_action = timer;
    }

    // ======================== executions ========================

    pub(crate) fn exec_wait(&mut self, pid: Pid, action: ActionId) {
        if !self.actions.is_alive(action) {
            self.answer(
                pid,
                Answer::Error(SimError::Arg("stale execution handle".to_string())),
            );
            return;
        }
        if self.actions.get(action).state.is_over() {
            self.actions.get_mut(action).waiters.push(pid);
            self.exec_finished(action);
        } else {
            self.actions.get_mut(action).waiters.push(pid);
            let actor = self.actors[pid.0].as_mut().unwrap();
            actor.blocked = Some(Blocked::ExecWait(action));
            actor.waiting_action = Some(action);
        }
    }

    pub(crate) fn exec_finished(&mut self, action: ActionId) {
        let state = self.actions.get(action).state;
        let waiters = std::mem::take(&mut self.actions.get_mut(action).waiters);
        for pid in waiters {
            if self.actor_is_dead(pid) {
                continue;
            }
            self.actors[pid.0].as_mut().unwrap().blocked.take();
            let answer = match state {
                ActionState::Done => Answer::Unit,
                ActionState::Canceled => {
                    Answer::Error(SimError::Cancel("execution canceled"))
                }
                _ => Answer::Error(SimError::Host),
            };
            self.answer(pid, answer);
            // the issuer held the only lasting reference
            self.destroy_action(action);
        }
    }

    pub(crate) fn exec_cancel(&mut self, action: ActionId) {
        if !self.actions.is_alive(action) || self.actions.get(action).state.is_over() {
            return;
        }
        self.cpu.cancel(&mut self.actions, action, self.clock);
        if !self.actions.get(action).waiters.is_empty() {
            self.exec_finished(action);
        }
    }
}

/// The interface actor code sees: every method suspends the actor, leaves a
/// simcall for maestro and returns its answer.
pub struct ActorHandle {
    ctx: ContextHandle<Resume, Yield>,
    pid: Pid,
    host: HostId,
    host_name: String,
    name: String,
    clock: Arc<ClockCell>,
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .finish()
    }
}

impl ActorHandle {
    fn call(&self, call: Simcall) -> Answer {
        match self.ctx.exchange(Yield::Simcall(call)) {
            Resume::Answer(answer) => answer,
            Resume::Kill => panic::panic_any(ForcedExit),
        }
    }

    fn unit(&self, call: Simcall) -> Result<(), SimError> {
        match self.call(call) {
            Answer::Unit => Ok(()),
            Answer::Error(e) => Err(e),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// This actor's pid.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// This actor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The host this actor is pinned to.
    pub fn host(&self) -> HostId {
        self.host
    }

    /// The name of the host this actor is pinned to.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Current virtual time, read without suspending.
    pub fn now(&self) -> Time {
        self.clock.load()
    }

    /// Uniform random draw from maestro's deterministic generator.
    pub fn random(&self, min: f64, max: f64) -> f64 {
        match self.call(Simcall::Random { min, max }) {
            Answer::Float(v) => v,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Virtual time with the configured minimum increment between calls.
    pub fn wtime(&self) -> Time {
        match self.call(Simcall::Wtime) {
            Answer::Float(v) => v,
            Answer::Error(_) => self.now(),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Requests a state snapshot; returns its sequence number.
    pub fn mc_snapshot(&self) -> u64 {
        match self.call(Simcall::McSnapshot) {
            Answer::Uint(v) => v,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    // -- actor management ----------------------------------------------

    /// Spawns a child actor on `host`.
    pub fn spawn<F>(&self, name: &str, host: HostId, code: F) -> Pid
    where
        F: Fn(&mut ActorHandle) -> Result<(), SimError> + Send + Sync + 'static,
    {
        match self.call(Simcall::ProcessCreate {
            name: name.to_string(),
            host,
            auto_restart: false,
            code: Arc::new(code),
        }) {
            Answer::ProcessRef(pid) => pid,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Kills another actor (or this one).
    pub fn kill(&self, victim: Pid) {
        let _ = self.call(Simcall::ProcessKill { victim });
    }

    /// Suspends an actor; suspending oneself blocks until resumed.
    pub fn suspend(&self, target: Pid) {
        let _ = self.call(Simcall::ProcessSuspend { target });
    }

    /// Resumes a suspended actor.
    pub fn resume(&self, target: Pid) {
        let _ = self.call(Simcall::ProcessResume { target });
    }

    /// Sleeps for `duration` of virtual time.
    pub fn sleep(&self, duration: Time) -> Result<(), SimError> {
        self.unit(Simcall::ProcessSleep { duration })
    }

    /// Waits for another actor to end. Negative timeout waits forever.
    pub fn join(&self, target: Pid, timeout: Time) -> Result<(), SimError> {
        self.unit(Simcall::ProcessJoin { target, timeout })
    }

    /// Number of actors currently alive.
    pub fn process_count(&self) -> usize {
        match self.call(Simcall::ProcessCount) {
            Answer::Uint(v) => v as usize,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Attaches opaque data to this actor.
    pub fn set_data(&self, value: u64) {
        let _ = self.call(Simcall::ProcessSetData { value });
    }

    /// Reads another actor's opaque data (0 if it is gone).
    pub fn data_of(&self, target: Pid) -> u64 {
        match self.call(Simcall::ProcessGetData { target }) {
            Answer::Uint(v) => v,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// The actor that spawned this one, `None` when bootstrapped from the
    /// platform setup.
    pub fn parent(&self) -> Option<Pid> {
        self.parent_of(self.pid)
    }

    /// Another actor's parent pid (`None` for bootstrapped or gone actors).
    pub fn parent_of(&self, target: Pid) -> Option<Pid> {
        match self.call(Simcall::ProcessGetParent { target }) {
            Answer::ProcessOpt(parent) => parent,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Registers a hook run in maestro when this actor dies; the hook is
    /// told whether the death was a failure.
    pub fn on_exit<F>(&self, hook: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let _ = self.call(Simcall::ProcessOnExit {
            hook: Box::new(hook),
        });
    }

    // -- computations --------------------------------------------------

    /// Computes `flops` on the local host, blocking until done.
    pub fn execute(&self, flops: f64) -> Result<(), SimError> {
        let action = self.execution_start(flops, 1.0);
        self.execution_wait(action)
    }

    /// Starts a computation and returns without blocking.
    pub fn execution_start(&self, flops: f64, priority: f64) -> ActionId {
        match self.call(Simcall::Execute { flops, priority }) {
            Answer::ActionRef(a) => a,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Blocks until a started computation finishes.
    pub fn execution_wait(&self, action: ActionId) -> Result<(), SimError> {
        self.unit(Simcall::ExecWait { action })
    }

    /// Polls a started computation.
    pub fn execution_test(&self, action: ActionId) -> bool {
        match self.call(Simcall::ExecTest { action }) {
            Answer::Bool(b) => b,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Cancels a started computation; its waiter observes a cancel error.
    pub fn execution_cancel(&self, action: ActionId) {
        let _ = self.call(Simcall::ExecCancel { action });
    }

    // -- rendezvous & communications -----------------------------------

    /// Creates a rendezvous point, optionally registered under a name.
    pub fn rdv_create(&self, name: Option<&str>) -> RdvId {
        match self.call(Simcall::RdvCreate {
            name: name.map(|n| n.to_string()),
        }) {
            Answer::RdvRef(Some(rdv)) => rdv,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Finds a named rendezvous point.
    pub fn rdv_by_name(&self, name: &str) -> Option<RdvId> {
        match self.call(Simcall::RdvByName {
            name: name.to_string(),
        }) {
            Answer::RdvRef(rdv) => rdv,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Destroys a rendezvous point, canceling whatever is still queued.
    pub fn rdv_destroy(&self, rdv: RdvId) {
        let _ = self.call(Simcall::RdvDestroy { rdv });
    }

    /// Pins a receiver actor on the rendezvous for fast-path matching.
    pub fn rdv_set_receiver(&self, rdv: RdvId, receiver: Pid) {
        let _ = self.call(Simcall::RdvSetReceiver { rdv, receiver });
    }

    /// Counts queued communications issued from `host`.
    pub fn rdv_comm_count_by_host(&self, rdv: RdvId, host: HostId) -> usize {
        match self.call(Simcall::RdvCommCount { rdv, host }) {
            Answer::Uint(v) => v as usize,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Posts a send of `size` bytes and returns its handle without blocking.
    pub fn isend(&self, rdv: RdvId, size: f64, payload: Vec<u8>) -> ActionId {
        self.isend_matched(rdv, size, payload, 0, None)
    }

    /// Posts a send carrying a match tag and an optional predicate.
    pub fn isend_matched(
        &self,
        rdv: RdvId,
        size: f64,
        payload: Vec<u8>,
        tag: u64,
        match_fn: Option<MatchFn>,
    ) -> ActionId {
        match self.call(Simcall::Isend {
            rdv,
            size,
            rate: -1.0,
            payload,
            shared: false,
            tag,
            match_fn,
            clean_fn: None,
            detached: false,
        }) {
            Answer::ActionRef(a) => a,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Fire-and-forget send: no handle, `clean_fn` reclaims the buffer when
    /// the communication terminates.
    pub fn isend_detached(
        &self,
        rdv: RdvId,
        size: f64,
        payload: Vec<u8>,
        clean_fn: Option<CleanFn>,
    ) {
        let _ = self.call(Simcall::Isend {
            rdv,
            size,
            rate: -1.0,
            payload,
            shared: false,
            tag: 0,
            match_fn: None,
            clean_fn,
            detached: true,
        });
    }

    /// Posts a receive and returns its handle without blocking.
    pub fn irecv(&self, rdv: RdvId) -> ActionId {
        self.irecv_matched(rdv, 0, None)
    }

    /// Posts a receive carrying a match tag and an optional predicate.
    pub fn irecv_matched(&self, rdv: RdvId, tag: u64, match_fn: Option<MatchFn>) -> ActionId {
        match self.call(Simcall::Irecv { rdv, tag, match_fn }) {
            Answer::ActionRef(a) => a,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Blocking send.
    pub fn send(&self, rdv: RdvId, size: f64, payload: Vec<u8>) -> Result<(), SimError> {
        let action = self.isend(rdv, size, payload);
        self.comm_wait(action, -1.0).map(|_| ())
    }

    /// Blocking receive; yields the sender's payload.
    pub fn recv(&self, rdv: RdvId) -> Result<Option<Vec<u8>>, SimError> {
        let action = self.irecv(rdv);
        self.comm_wait(action, -1.0)
    }

    /// Blocking receive with a timeout.
    pub fn recv_timeout(&self, rdv: RdvId, timeout: Time) -> Result<Option<Vec<u8>>, SimError> {
        let action = self.irecv(rdv);
        self.comm_wait(action, timeout)
    }

    /// Waits for a communication; a negative timeout waits forever. The
    /// receiving side gets the payload.
    pub fn comm_wait(&self, comm: ActionId, timeout: Time) -> Result<Option<Vec<u8>>, SimError> {
        match self.call(Simcall::CommWait { comm, timeout }) {
            Answer::Payload(p) => Ok(p),
            Answer::Unit => Ok(None),
            Answer::Error(e) => Err(e),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Waits for the first of several communications; returns its index in
    /// the given slice and its outcome.
    pub fn comm_waitany(&self, comms: &[ActionId]) -> (usize, Result<Option<Vec<u8>>, SimError>) {
        match self.call(Simcall::CommWaitany {
            comms: comms.to_vec(),
        }) {
            Answer::AnyOk { index, payload } => (index, Ok(payload)),
            Answer::AnyErr { index, error } => (index, Err(error)),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Polls one communication; `Some` consumes its outcome.
    pub fn comm_test(&self, comm: ActionId) -> Option<Result<Option<Vec<u8>>, SimError>> {
        match self.call(Simcall::CommTest { comm }) {
            Answer::Bool(false) => None,
            Answer::Payload(p) => Some(Ok(p)),
            Answer::Error(e) => Some(Err(e)),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Polls several communications; `Some` consumes the finished one's
    /// outcome along with its index.
    pub fn comm_testany(
        &self,
        comms: &[ActionId],
    ) -> Option<(usize, Result<Option<Vec<u8>>, SimError>)> {
        match self.call(Simcall::CommTestany {
            comms: comms.to_vec(),
        }) {
            Answer::Bool(false) => None,
            Answer::AnyOk { index, payload } => Some((index, Ok(payload))),
            Answer::AnyErr { index, error } => Some((index, Err(error))),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Cancels a communication; all parties observe a cancel error.
    pub fn comm_cancel(&self, comm: ActionId) {
        let _ = self.call(Simcall::CommCancel { comm });
    }

    /// Bytes a communication still has to transfer.
    pub fn comm_remains(&self, comm: ActionId) -> f64 {
        match self.call(Simcall::CommRemains { comm }) {
            Answer::Float(v) => v,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Current state of a communication, `None` once its handle is spent.
    pub fn comm_state(&self, comm: ActionId) -> Option<ActionState> {
        match self.call(Simcall::CommState { comm }) {
            Answer::State(s) => s,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Sender and receiver of a communication, as far as they are known.
    pub fn comm_parties(&self, comm: ActionId) -> (Option<Pid>, Option<Pid>) {
        match self.call(Simcall::CommParties { comm }) {
            Answer::Parties(src, dst) => (src, dst),
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Oldest unmatched communication queued on the rendezvous.
    pub fn rdv_get_head(&self, rdv: RdvId) -> Option<ActionId> {
        match self.call(Simcall::RdvGetHead { rdv }) {
            Answer::ActionOpt(head) => head,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    // -- synchronization -----------------------------------------------

    /// Creates a mutex.
    pub fn mutex_create(&self) -> MutexId {
        match self.call(Simcall::MutexCreate) {
            Answer::MutexRef(m) => m,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Locks, blocking in arrival order behind the current owner.
    pub fn mutex_lock(&self, mutex: MutexId) -> Result<(), SimError> {
        self.unit(Simcall::MutexLock { mutex })
    }

    /// Locks if free; never blocks.
    pub fn mutex_trylock(&self, mutex: MutexId) -> bool {
        match self.call(Simcall::MutexTrylock { mutex }) {
            Answer::Bool(b) => b,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Unlocks; the longest-waiting actor (if any) gets the mutex.
    pub fn mutex_unlock(&self, mutex: MutexId) {
        let _ = self.call(Simcall::MutexUnlock { mutex });
    }

    /// Destroys a mutex.
    pub fn mutex_destroy(&self, mutex: MutexId) {
        let _ = self.call(Simcall::MutexDestroy { mutex });
    }

    /// Creates a condition variable.
    pub fn cond_create(&self) -> CondId {
        match self.call(Simcall::CondCreate) {
            Answer::CondRef(c) => c,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Atomically releases the mutex and waits for a signal; relocks the
    /// mutex before returning.
    pub fn cond_wait(&self, cond: CondId, mutex: MutexId) -> Result<(), SimError> {
        self.unit(Simcall::CondWait {
            cond,
            mutex,
            timeout: -1.0,
        })
    }

    /// Like [`ActorHandle::cond_wait`] with a timeout.
    pub fn cond_wait_timeout(
        &self,
        cond: CondId,
        mutex: MutexId,
        timeout: Time,
    ) -> Result<(), SimError> {
        self.unit(Simcall::CondWait {
            cond,
            mutex,
            timeout,
        })
    }

    /// Wakes one waiter of the condition.
    pub fn cond_signal(&self, cond: CondId) {
        let _ = self.call(Simcall::CondSignal { cond });
    }

    /// Wakes every waiter of the condition.
    pub fn cond_broadcast(&self, cond: CondId) {
        let _ = self.call(Simcall::CondBroadcast { cond });
    }

    /// Destroys a condition variable.
    pub fn cond_destroy(&self, cond: CondId) {
        let _ = self.call(Simcall::CondDestroy { cond });
    }

    /// Creates a counting semaphore.
    pub fn sem_create(&self, capacity: i32) -> SemId {
        match self.call(Simcall::SemCreate { capacity }) {
            Answer::SemRef(s) => s,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Takes one unit, blocking while the semaphore is empty.
    pub fn sem_acquire(&self, sem: SemId) -> Result<(), SimError> {
        self.unit(Simcall::SemAcquire { sem, timeout: -1.0 })
    }

    /// Like [`ActorHandle::sem_acquire`] with a timeout.
    pub fn sem_acquire_timeout(&self, sem: SemId, timeout: Time) -> Result<(), SimError> {
        self.unit(Simcall::SemAcquire { sem, timeout })
    }

    /// Releases one unit, waking the longest-waiting actor if any.
    pub fn sem_release(&self, sem: SemId) {
        let _ = self.call(Simcall::SemRelease { sem });
    }

    /// Whether an acquire would block right now.
    pub fn sem_would_block(&self, sem: SemId) -> bool {
        match self.call(Simcall::SemWouldBlock { sem }) {
            Answer::Bool(b) => b,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Current capacity of the semaphore.
    pub fn sem_capacity(&self, sem: SemId) -> i32 {
        match self.call(Simcall::SemCapacity { sem }) {
            Answer::Uint(v) => v as i32,
            other => panic!("unexpected simcall answer {:?}", other),
        }
    }

    /// Destroys a semaphore.
    pub fn sem_destroy(&self, sem: SemId) {
        let _ = self.call(Simcall::SemDestroy { sem });
    }
}
