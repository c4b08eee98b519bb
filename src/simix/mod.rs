//! Actor scheduler and synchronization kernel
//!
//! A single control flow, *maestro*, owns every structure below and drives
//! the simulation one tick at a time: run every ready actor until it blocks
//! in a simcall, handle the collected simcalls (creating and finishing
//! actions in the resource models), ask the models and the timer heap for
//! the next date anything changes, jump the clock there, and wake whoever
//! finished. Actor code runs on dedicated contexts and only ever talks to
//! maestro through simcall records, so none of this state needs locking.

pub mod comm;
mod process;
mod synchro;

pub use self::comm::RdvId;
pub use self::process::{ActorHandle, Pid};
pub use self::synchro::{CondId, MutexId, SemId, SEM_UNLIMITED};

use self::comm::Rdv;
use self::process::{Actor, Blocked};
use self::synchro::{SmxCond, SmxMutex, SmxSem};
use crate::config::{Config, ContextFactory};
use crate::err::SimError;
use crate::instr::{InstrSink, NullSink, VarKind};
use crate::platform::{HostId, LinkId, Platform};
use crate::surf::{
    ActionArena, ActionId, ActionKind, ActionState, CleanFn, CpuModel, MatchFn, NetworkModel,
};
use crate::trace::TraceMgr;
use crate::Time;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog::{debug, info, o, warn, Discard, Logger};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Code run by an actor: a reusable closure so auto-restarted actors can be
/// given a fresh run of the same body.
pub type ActorCode = Arc<dyn Fn(&mut ActorHandle) -> Result<(), SimError> + Send + Sync>;

/// Hook run in maestro when an actor dies; told whether the death was a
/// failure (killed, host down, error) rather than a normal return.
pub type ExitHook = Box<dyn FnOnce(bool) + Send>;

/// Copies a finished communication's payload from source to destination.
///
/// `shared` flags a source buffer living in a shared segment, which copy
/// implementations may skip.
pub type CopyFn = fn(src: &mut Option<Vec<u8>>, dst: &mut Option<Vec<u8>>, size: f64, shared: bool);

/// Default copy callback: moves the payload, pointer-style.
pub fn copy_pointer_callback(
    src: &mut Option<Vec<u8>>,
    dst: &mut Option<Vec<u8>>,
    _size: f64,
    _shared: bool,
) {
    *dst = src.take();
}

/// Byte-copying callback: clones the payload, skipping shared segments.
pub fn copy_buffer_callback(
    src: &mut Option<Vec<u8>>,
    dst: &mut Option<Vec<u8>>,
    _size: f64,
    shared: bool,
) {
    if !shared {
        *dst = src.clone();
    }
}

/// The request record an actor leaves before suspending.
pub(crate) enum Simcall {
    ProcessCreate {
        name: String,
        host: HostId,
        auto_restart: bool,
        code: ActorCode,
    },
    ProcessKill { victim: Pid },
    ProcessSuspend { target: Pid },
    ProcessResume { target: Pid },
    ProcessSleep { duration: Time },
    ProcessJoin { target: Pid, timeout: Time },
    ProcessCount,
    ProcessSetData { value: u64 },
    ProcessGetData { target: Pid },
    ProcessGetParent { target: Pid },
    ProcessOnExit { hook: ExitHook },

    Execute { flops: f64, priority: f64 },
    ExecWait { action: ActionId },
    ExecTest { action: ActionId },
    ExecCancel { action: ActionId },

    RdvCreate { name: Option<String> },
    RdvDestroy { rdv: RdvId },
    RdvByName { name: String },
    RdvSetReceiver { rdv: RdvId, receiver: Pid },
    RdvCommCount { rdv: RdvId, host: HostId },

    Isend {
        rdv: RdvId,
        size: f64,
        rate: f64,
        payload: Vec<u8>,
        shared: bool,
        tag: u64,
        match_fn: Option<MatchFn>,
        clean_fn: Option<CleanFn>,
        detached: bool,
    },
    Irecv {
        rdv: RdvId,
        tag: u64,
        match_fn: Option<MatchFn>,
    },
    CommWait { comm: ActionId, timeout: Time },
    CommWaitany { comms: Vec<ActionId> },
    CommTest { comm: ActionId },
    CommTestany { comms: Vec<ActionId> },
    CommCancel { comm: ActionId },
    CommRemains { comm: ActionId },
    CommState { comm: ActionId },
    CommParties { comm: ActionId },
    RdvGetHead { rdv: RdvId },

    MutexCreate,
    MutexLock { mutex: MutexId },
    MutexTrylock { mutex: MutexId },
    MutexUnlock { mutex: MutexId },
    MutexDestroy { mutex: MutexId },

    CondCreate,
    CondWait {
        cond: CondId,
        mutex: MutexId,
        timeout: Time,
    },
    CondSignal { cond: CondId },
    CondBroadcast { cond: CondId },
    CondDestroy { cond: CondId },

    SemCreate { capacity: i32 },
    SemAcquire { sem: SemId, timeout: Time },
    SemRelease { sem: SemId },
    SemWouldBlock { sem: SemId },
    SemCapacity { sem: SemId },
    SemDestroy { sem: SemId },

    Random { min: f64, max: f64 },
    Wtime,
    McSnapshot,
}

impl Simcall {
    pub fn name(&self) -> &'static str {
        match self {
            Simcall::ProcessCreate { .. } => "process_create",
            Simcall::ProcessKill { .. } => "process_kill",
            Simcall::ProcessSuspend { .. } => "process_suspend",
            Simcall::ProcessResume { .. } => "process_resume",
            Simcall::ProcessSleep { .. } => "process_sleep",
            Simcall::ProcessJoin { .. } => "process_join",
            Simcall::ProcessCount => "process_count",
            Simcall::ProcessSetData { .. } => "process_set_data",
            Simcall::ProcessGetData { .. } => "process_get_data",
            Simcall::ProcessGetParent { .. } => "process_get_parent",
            Simcall::ProcessOnExit { .. } => "process_on_exit",
            Simcall::Execute { .. } => "host_execute",
            Simcall::ExecWait { .. } => "host_execution_wait",
            Simcall::ExecTest { .. } => "host_execution_test",
            Simcall::ExecCancel { .. } => "host_execution_cancel",
            Simcall::RdvCreate { .. } => "rdv_create",
            Simcall::RdvDestroy { .. } => "rdv_destroy",
            Simcall::RdvByName { .. } => "rdv_get_by_name",
            Simcall::RdvSetReceiver { .. } => "rdv_set_receiver",
            Simcall::RdvCommCount { .. } => "rdv_comm_count_by_host",
            Simcall::Isend { .. } => "comm_isend",
            Simcall::Irecv { .. } => "comm_irecv",
            Simcall::CommWait { .. } => "comm_wait",
            Simcall::CommWaitany { .. } => "comm_waitany",
            Simcall::CommTest { .. } => "comm_test",
            Simcall::CommTestany { .. } => "comm_testany",
            Simcall::CommCancel { .. } => "comm_cancel",
            Simcall::CommRemains { .. } => "comm_get_remains",
            Simcall::CommState { .. } => "comm_get_state",
            Simcall::CommParties { .. } => "comm_get_parties",
            Simcall::RdvGetHead { .. } => "rdv_get_head",
            Simcall::MutexCreate => "mutex_create",
            Simcall::MutexLock { .. } => "mutex_lock",
            Simcall::MutexTrylock { .. } => "mutex_trylock",
            Simcall::MutexUnlock { .. } => "mutex_unlock",
            Simcall::MutexDestroy { .. } => "mutex_destroy",
            Simcall::CondCreate => "cond_create",
            Simcall::CondWait { .. } => "cond_wait",
            Simcall::CondSignal { .. } => "cond_signal",
            Simcall::CondBroadcast { .. } => "cond_broadcast",
            Simcall::CondDestroy { .. } => "cond_destroy",
            Simcall::SemCreate { .. } => "sem_create",
            Simcall::SemAcquire { .. } => "sem_acquire",
            Simcall::SemRelease { .. } => "sem_release",
            Simcall::SemWouldBlock { .. } => "sem_would_block",
            Simcall::SemCapacity { .. } => "sem_get_capacity",
            Simcall::SemDestroy { .. } => "sem_destroy",
            Simcall::Random { .. } => "random",
            Simcall::Wtime => "wtime",
            Simcall::McSnapshot => "mc_snapshot",
        }
    }
}

impl fmt::Debug for Simcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The result slot of a simcall, delivered on resume.
#[derive(Debug)]
pub(crate) enum Answer {
    Unit,
    Bool(bool),
    Uint(u64),
    Float(f64),
    ProcessRef(Pid),
    ProcessOpt(Option<Pid>),
    ActionRef(ActionId),
    RdvRef(Option<RdvId>),
    MutexRef(MutexId),
    CondRef(CondId),
    SemRef(SemId),
    Payload(Option<Vec<u8>>),
    AnyOk { index: usize, payload: Option<Vec<u8>> },
    AnyErr { index: usize, error: SimError },
    State(Option<ActionState>),
    Parties(Option<Pid>, Option<Pid>),
    ActionOpt(Option<ActionId>),
    Error(SimError),
}

/// What maestro hands a context on resume.
#[derive(Debug)]
pub(crate) enum Resume {
    Answer(Answer),
    /// Cooperative cancellation: unwind and run cleanups.
    Kill,
}

/// What a context hands back when it suspends.
pub(crate) enum Yield {
    Simcall(Simcall),
    Done(Result<(), SimError>),
    Panicked(String),
}

impl fmt::Debug for Yield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Yield::Simcall(c) => write!(f, "Simcall({})", c.name()),
            Yield::Done(r) => write!(f, "Done({:?})", r),
            Yield::Panicked(m) => write!(f, "Panicked({})", m),
        }
    }
}

/// Virtual clock mirror readable from actor threads without a simcall.
#[derive(Debug, Default)]
pub(crate) struct ClockCell(AtomicU64);

impl ClockCell {
    pub fn store(&self, t: Time) {
        self.0.store(t.to_bits(), AtomicOrdering::Release);
    }

    pub fn load(&self) -> Time {
        Time::from_bits(self.0.load(AtomicOrdering::Acquire))
    }
}

enum TimerKind {
    Kill(Pid),
    Start {
        name: String,
        host: HostId,
        auto_restart: bool,
        code: ActorCode,
    },
}

impl fmt::Debug for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Kill(pid) => write!(f, "Kill({:?})", pid),
            TimerKind::Start { name, .. } => write!(f, "Start({})", name),
        }
    }
}

#[derive(Debug)]
struct TimerEntry {
    date: Time,
    seq: u64,
    kind: TimerKind,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: pop earliest date, FIFO among ties
        other
            .date
            .partial_cmp(&self.date)
            .unwrap_or(Ordering::Equal)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

/// Which resource metric an installed trace drives.
#[derive(Debug, Clone, Copy)]
enum TraceTarget {
    HostSpeed(HostId),
    HostState(HostId),
    LinkBandwidth(LinkId),
    LinkLatency(LinkId),
    LinkState(LinkId),
}

/// Recorded identity of an auto-restart actor killed by its host.
struct RestartInfo {
    name: String,
    host: HostId,
    code: ActorCode,
}

/// The whole simulated world: actors, models, timers, configuration.
///
/// Nothing here is process-global; several simulators can coexist.
pub struct Simulator {
    pub(crate) cfg: Config,
    pub(crate) log: Logger,
    pub(crate) platform: Platform,

    pub(crate) clock: Time,
    pub(crate) clock_cell: Arc<ClockCell>,

    pub(crate) actions: ActionArena,
    pub(crate) cpu: CpuModel,
    pub(crate) net: NetworkModel,

    pub(crate) actors: Vec<Option<Actor>>,
    pub(crate) n_alive: usize,
    pub(crate) ready: VecDeque<Pid>,
    zombies: Vec<Pid>,
    pub(crate) host_residents: Vec<Vec<Pid>>,
    pending_restart: Vec<RestartInfo>,

    pub(crate) rdvs: Vec<Option<Rdv>>,
    pub(crate) rdv_names: HashMap<String, RdvId>,
    pub(crate) mutexes: Vec<Option<SmxMutex>>,
    pub(crate) conds: Vec<Option<SmxCond>>,
    pub(crate) sems: Vec<Option<SmxSem>>,

    timers: BinaryHeap<TimerEntry>,
    timer_seq: u64,
    traces: TraceMgr<TraceTarget>,

    pub(crate) instr: Box<dyn InstrSink>,
    pub(crate) copy_fn: CopyFn,
    pub(crate) rng: StdRng,
    pub(crate) snapshot_seq: u64,
    failures: usize,
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("clock", &self.clock)
            .field("n_alive", &self.n_alive)
            .field("ready", &self.ready)
            .finish()
    }
}

impl Simulator {
    /// Builds a simulator over a declared platform.
    pub fn new(cfg: Config, mut platform: Platform) -> Simulator {
        let cpu = CpuModel::new(&platform, &cfg);
        let net = NetworkModel::new(&platform, &cfg);

        let mut traces: TraceMgr<TraceTarget> = TraceMgr::new();
        for ix in 0..platform.hosts.len() {
            if let Some(t) = platform.hosts[ix].speed_trace.take() {
                traces.add(t, 0.0, TraceTarget::HostSpeed(HostId(ix)));
            }
            if let Some(t) = platform.hosts[ix].state_trace.take() {
                traces.add(t, 0.0, TraceTarget::HostState(HostId(ix)));
            }
        }
        for ix in 0..platform.links.len() {
            if let Some(t) = platform.links[ix].bandwidth_trace.take() {
                traces.add(t, 0.0, TraceTarget::LinkBandwidth(LinkId(ix)));
            }
            if let Some(t) = platform.links[ix].latency_trace.take() {
                traces.add(t, 0.0, TraceTarget::LinkLatency(LinkId(ix)));
            }
            if let Some(t) = platform.links[ix].state_trace.take() {
                traces.add(t, 0.0, TraceTarget::LinkState(LinkId(ix)));
            }
        }

        let host_residents = vec![Vec::new(); platform.hosts.len()];

        let mut instr: Box<dyn InstrSink> = Box::new(NullSink);
        instr.declare_var("power", VarKind::Host);
        instr.declare_var("bandwidth", VarKind::Link);
        instr.declare_var("latency", VarKind::Link);

        Simulator {
            cfg,
            log: Logger::root(Discard, o!()),
            platform,
            clock: 0.0,
            clock_cell: Arc::new(ClockCell::default()),
            actions: ActionArena::new(),
            cpu,
            net,
            actors: Vec::new(),
            n_alive: 0,
            ready: VecDeque::new(),
            zombies: Vec::new(),
            host_residents,
            pending_restart: Vec::new(),
            rdvs: Vec::new(),
            rdv_names: HashMap::new(),
            mutexes: Vec::new(),
            conds: Vec::new(),
            sems: Vec::new(),
            timers: BinaryHeap::new(),
            timer_seq: 0,
            traces,
            instr,
            copy_fn: copy_pointer_callback,
            rng: StdRng::seed_from_u64(0x5eed),
            snapshot_seq: 0,
            failures: 0,
        }
    }

    /// Installs a logger (the default discards everything).
    pub fn set_logger(&mut self, log: Logger) {
        self.log = log;
    }

    /// Installs a tracing sink (the default discards everything).
    pub fn set_instr_sink(&mut self, mut sink: Box<dyn InstrSink>) {
        sink.declare_var("power", VarKind::Host);
        sink.declare_var("bandwidth", VarKind::Link);
        sink.declare_var("latency", VarKind::Link);
        self.instr = sink;
    }

    /// Replaces the payload copy callback.
    pub fn set_copy_callback(&mut self, copy_fn: CopyFn) {
        self.copy_fn = copy_fn;
    }

    /// Replaces the constant network factors by size-dependent hooks.
    pub fn set_network_factors(&mut self, latency: fn(f64) -> f64, bandwidth: fn(f64) -> f64) {
        self.net.set_factor_callbacks(latency, bandwidth);
    }

    /// Current virtual time.
    pub fn clock(&self) -> Time {
        self.clock
    }

    /// Looks a host up by its declared name.
    pub fn host_of(&self, name: &str) -> Option<HostId> {
        self.platform.host_by_name(name)
    }

    /// Current speed of a host (peak times availability), in flop/s.
    pub fn host_speed(&self, host: HostId) -> f64 {
        self.cpu.host_speed(host)
    }

    /// How many actors ended in error (other than being killed).
    pub fn failure_count(&self) -> usize {
        self.failures
    }

    /// Schedules `pid`'s death at an absolute virtual date.
    pub fn kill_at(&mut self, date: Time, pid: Pid) {
        self.timers.push(TimerEntry {
            date,
            seq: self.timer_seq,
            kind: TimerKind::Kill(pid),
        });
        self.timer_seq += 1;
        if let Some(actor) = self.actors[pid.0].as_mut() {
            actor.kill_timer = Some(date);
        }
    }

    /// Schedules an actor start at an absolute virtual date.
    pub fn start_at<F>(&mut self, date: Time, name: &str, host: HostId, code: F)
    where
        F: Fn(&mut ActorHandle) -> Result<(), SimError> + Send + Sync + 'static,
    {
        self.timers.push(TimerEntry {
            date,
            seq: self.timer_seq,
            kind: TimerKind::Start {
                name: name.to_string(),
                host,
                auto_restart: false,
                code: Arc::new(code),
            },
        });
        self.timer_seq += 1;
    }

    /// Runs the simulation until every actor is done.
    ///
    /// Returns the deadlock error when all remaining actors are blocked
    /// with no pending activity, timer or trace event to ever wake them.
    pub fn run(&mut self) -> Result<(), SimError> {
        match self.cfg.context_factory {
            ContextFactory::Raw | ContextFactory::Boost | ContextFactory::Ucontext => {
                warn!(
                    self.log,
                    "context factory not compiled in, falling back to threads"
                );
            }
            ContextFactory::Thread | ContextFactory::Serial => {}
        }
        info!(self.log, "simulation start: {} actor(s)", self.n_alive);
        loop {
            // run every ready actor until all are blocked or gone
            while !self.ready.is_empty() {
                let ran: Vec<Pid> = self.ready.drain(..).collect();
                let yields = self.run_all(&ran);
                for (pid, y) in yields {
                    self.process_yield(pid, y);
                }
                self.reap_zombies();
            }

            if self.n_alive == 0 {
                info!(self.log, "simulation ended at t={}", self.clock);
                return Ok(());
            }

            // next date anything can change
            let mut next = f64::INFINITY;
            next = next.min(self.cpu.share_resources(&self.actions));
            next = next.min(self.net.share_resources(&self.actions));
            if let Some(date) = self.traces.next_date() {
                next = next.min(date - self.clock);
            }
            if let Some(timer) = self.timers.peek() {
                next = next.min(timer.date - self.clock);
            }

            if next == f64::INFINITY {
                self.report_deadlock();
                return Err(SimError::Deadlock(self.n_alive));
            }
            let delta = next.max(0.0);
            self.clock += delta;
            self.clock_cell.store(self.clock);
            debug!(self.log, "clock advanced by {} to {}", delta, self.clock);

            let mut finished: Vec<ActionId> = Vec::new();
            self.fire_traces(&mut finished);
            self.fire_timers();
            self.cpu
                .update_actions_state(&mut self.actions, self.clock, delta, &mut finished);
            self.net
                .update_actions_state(&mut self.actions, self.clock, delta, &mut finished);

            for id in finished {
                self.action_finished(id);
            }
            self.reap_zombies();
        }
    }

    /// Resumes every runnable actor of this batch and collects their
    /// yields, in batch order for serial dispatch.
    fn run_all(&mut self, ran: &[Pid]) -> Vec<(Pid, Yield)> {
        let mut runnable = Vec::with_capacity(ran.len());
        for &pid in ran {
            let actor = match self.actors[pid.0].as_mut() {
                Some(actor) => actor,
                None => continue,
            };
            actor.queued = false;
            if actor.suspended && !actor.dying {
                // parked: keeps its pending answer until somebody resumes it
                continue;
            }
            runnable.push(pid);
        }

        let nthreads = self.cfg.context_nthreads.max(1);
        let parallel = self.cfg.context_factory != ContextFactory::Serial
            && nthreads > 1
            && runnable.len() >= self.cfg.parallel_threshold;

        let mut out = Vec::with_capacity(runnable.len());
        if !parallel {
            for &pid in &runnable {
                let resume = self.take_resume(pid);
                let y = self.actors[pid.0]
                    .as_ref()
                    .unwrap()
                    .context
                    .as_ref()
                    .unwrap()
                    .resume(resume);
                out.push((pid, y));
            }
        } else {
            for batch in runnable.chunks(nthreads) {
                for &pid in batch {
                    let resume = self.take_resume(pid);
                    self.actors[pid.0]
                        .as_ref()
                        .unwrap()
                        .context
                        .as_ref()
                        .unwrap()
                        .post(resume);
                }
                for &pid in batch {
                    let y = self.actors[pid.0]
                        .as_ref()
                        .unwrap()
                        .context
                        .as_ref()
                        .unwrap()
                        .collect();
                    out.push((pid, y));
                }
            }
        }
        out
    }

    fn take_resume(&mut self, pid: Pid) -> Resume {
        let actor = self.actors[pid.0].as_mut().unwrap();
        if actor.dying {
            Resume::Kill
        } else {
            Resume::Answer(actor.answer.take().unwrap_or(Answer::Unit))
        }
    }

    fn process_yield(&mut self, pid: Pid, y: Yield) {
        match y {
            Yield::Simcall(call) => {
                debug!(self.log, "actor {} issued {}", pid.0, call.name());
                self.handle_simcall(pid, call);
            }
            Yield::Done(result) => self.actor_ended(pid, result),
            Yield::Panicked(msg) => {
                panic!("actor {} panicked: {}", pid.0, msg);
            }
        }
    }

    fn handle_simcall(&mut self, pid: Pid, call: Simcall) {
        match call {
            Simcall::ProcessCreate {
                name,
                host,
                auto_restart,
                code,
            } => {
                let child = self.spawn_actor(&name, host, auto_restart, code, Some(pid));
                self.answer(pid, Answer::ProcessRef(child));
            }
            Simcall::ProcessKill { victim } => {
                self.kill_actor(victim);
                if !self.actor_is_dead(pid) {
                    self.answer(pid, Answer::Unit);
                }
            }
            Simcall::ProcessSuspend { target } => self.suspend_actor(pid, target),
            Simcall::ProcessResume { target } => {
                self.resume_actor(target);
                self.answer(pid, Answer::Unit);
            }
            Simcall::ProcessSleep { duration } => self.sleep_start(pid, duration, false),
            Simcall::ProcessJoin { target, timeout } => self.join_start(pid, target, timeout),
            Simcall::ProcessCount => {
                let n = self.n_alive as u64;
                self.answer(pid, Answer::Uint(n));
            }
            Simcall::ProcessSetData { value } => {
                self.actors[pid.0].as_mut().unwrap().data = value;
                self.answer(pid, Answer::Unit);
            }
            Simcall::ProcessGetData { target } => {
                let value = self.actors[target.0].as_ref().map(|a| a.data).unwrap_or(0);
                self.answer(pid, Answer::Uint(value));
            }
            Simcall::ProcessGetParent { target } => {
                let parent = self
                    .actors
                    .get(target.0)
                    .and_then(|a| a.as_ref())
                    .and_then(|a| a.parent);
                self.answer(pid, Answer::ProcessOpt(parent));
            }
            Simcall::ProcessOnExit { hook } => {
                self.actors[pid.0].as_mut().unwrap().on_exit.push(hook);
                self.answer(pid, Answer::Unit);
            }

            Simcall::Execute { flops, priority } => {
                let host = self.actors[pid.0].as_ref().unwrap().host;
                let id = self
                    .cpu
                    .execute(&mut self.actions, host, flops, priority, self.clock);
                self.answer(pid, Answer::ActionRef(id));
            }
            Simcall::ExecWait { action } => self.exec_wait(pid, action),
            Simcall::ExecTest { action } => {
                let over = self.actions.is_alive(action) && self.actions.get(action).state.is_over();
                self.answer(pid, Answer::Bool(over));
            }
            Simcall::ExecCancel { action } => {
                self.exec_cancel(action);
                self.answer(pid, Answer::Unit);
            }

            Simcall::RdvCreate { name } => {
                let rdv = self.rdv_create(name);
                self.answer(pid, Answer::RdvRef(Some(rdv)));
            }
            Simcall::RdvDestroy { rdv } => {
                self.rdv_destroy(rdv);
                self.answer(pid, Answer::Unit);
            }
            Simcall::RdvByName { name } => {
                let rdv = self.rdv_names.get(&name).copied();
                self.answer(pid, Answer::RdvRef(rdv));
            }
            Simcall::RdvSetReceiver { rdv, receiver } => {
                self.rdv_mut(rdv).permanent_receiver = Some(receiver);
                self.answer(pid, Answer::Unit);
            }
            Simcall::RdvCommCount { rdv, host } => {
                let count = self.rdv_comm_count_by_host(rdv, host);
                self.answer(pid, Answer::Uint(count));
            }

            Simcall::Isend {
                rdv,
                size,
                rate,
                payload,
                shared,
                tag,
                match_fn,
                clean_fn,
                detached,
            } => self.comm_isend(
                pid, rdv, size, rate, payload, shared, tag, match_fn, clean_fn, detached,
            ),
            Simcall::Irecv { rdv, tag, match_fn } => self.comm_irecv(pid, rdv, tag, match_fn),
            Simcall::CommWait { comm, timeout } => self.comm_wait(pid, comm, timeout),
            Simcall::CommWaitany { comms } => self.comm_waitany(pid, comms),
            Simcall::CommTest { comm } => self.comm_test(pid, comm),
            Simcall::CommTestany { comms } => self.comm_testany(pid, comms),
            Simcall::CommCancel { comm } => {
                self.comm_cancel(comm);
                self.answer(pid, Answer::Unit);
            }
            Simcall::CommRemains { comm } => {
                let remains = if self.actions.is_alive(comm) {
                    self.actions.get(comm).remains
                } else {
                    0.0
                };
                self.answer(pid, Answer::Float(remains));
            }
            Simcall::CommState { comm } => {
                let state = if self.actions.is_alive(comm) {
                    Some(self.actions.get(comm).state)
                } else {
                    None
                };
                self.answer(pid, Answer::State(state));
            }
            Simcall::CommParties { comm } => {
                let (src, dst) = if self.actions.is_alive(comm) {
                    let data = self.actions.get(comm).comm();
                    (data.src, data.dst)
                } else {
                    (None, None)
                };
                self.answer(pid, Answer::Parties(src, dst));
            }
            Simcall::RdvGetHead { rdv } => {
                let head = self.rdvs.get(rdv.0).and_then(|r| {
                    r.as_ref().and_then(|r| r.fifo.front().copied())
                });
                self.answer(pid, Answer::ActionOpt(head));
            }

            Simcall::MutexCreate => {
                let m = self.mutex_create();
                self.answer(pid, Answer::MutexRef(m));
            }
            Simcall::MutexLock { mutex } => self.mutex_lock(pid, mutex),
            Simcall::MutexTrylock { mutex } => {
                let got = self.mutex_trylock(pid, mutex);
                self.answer(pid, Answer::Bool(got));
            }
            Simcall::MutexUnlock { mutex } => {
                self.mutex_unlock(pid, mutex);
                self.answer(pid, Answer::Unit);
            }
            Simcall::MutexDestroy { mutex } => {
                self.mutex_destroy(mutex);
                self.answer(pid, Answer::Unit);
            }

            Simcall::CondCreate => {
                let c = self.cond_create();
                self.answer(pid, Answer::CondRef(c));
            }
            Simcall::CondWait {
                cond,
                mutex,
                timeout,
            } => self.cond_wait(pid, cond, mutex, timeout),
            Simcall::CondSignal { cond } => {
                self.cond_signal(cond);
                self.answer(pid, Answer::Unit);
            }
            Simcall::CondBroadcast { cond } => {
                self.cond_broadcast(cond);
                self.answer(pid, Answer::Unit);
            }
            Simcall::CondDestroy { cond } => {
                self.cond_destroy(cond);
                self.answer(pid, Answer::Unit);
            }

            Simcall::SemCreate { capacity } => {
                let s = self.sem_create(capacity);
                self.answer(pid, Answer::SemRef(s));
            }
            Simcall::SemAcquire { sem, timeout } => self.sem_acquire(pid, sem, timeout),
            Simcall::SemRelease { sem } => {
                self.sem_release(sem);
                self.answer(pid, Answer::Unit);
            }
            Simcall::SemWouldBlock { sem } => {
                let blocks = self.sem_would_block(sem);
                self.answer(pid, Answer::Bool(blocks));
            }
            Simcall::SemCapacity { sem } => {
                let v = self.sem_capacity(sem);
                self.answer(pid, Answer::Uint(v as u64));
            }
            Simcall::SemDestroy { sem } => {
                self.sem_destroy(sem);
                self.answer(pid, Answer::Unit);
            }

            Simcall::Random { min, max } => {
                let v = if max > min {
                    self.rng.gen_range(min, max)
                } else {
                    min
                };
                self.answer(pid, Answer::Float(v));
            }
            Simcall::Wtime => {
                if self.cfg.smpi_wtime > 0.0 {
                    let d = self.cfg.smpi_wtime;
                    self.sleep_start(pid, d, true);
                } else {
                    let now = self.clock;
                    self.answer(pid, Answer::Float(now));
                }
            }
            Simcall::McSnapshot => {
                self.snapshot_seq += 1;
                if self.cfg.model_check {
                    debug!(self.log, "snapshot {} taken at t={}", self.snapshot_seq, self.clock);
                }
                let seq = self.snapshot_seq;
                self.answer(pid, Answer::Uint(seq));
            }
        }
    }

    // ======================== tick plumbing ========================

    fn fire_traces(&mut self, finished: &mut Vec<ActionId>) {
        for (date, target, value) in self.traces.pop_until(self.clock) {
            match target {
                TraceTarget::HostSpeed(h) => {
                    self.cpu.set_host_scale(h, value);
                    let name = self.platform.host_name(h);
                    self.instr.set_var(date, "power", name, value);
                }
                TraceTarget::HostState(h) => {
                    let on = value > 0.0;
                    let name = self.platform.host_name(h).to_string();
                    self.instr
                        .event(date, &name, "host_state", if on { 1.0 } else { 0.0 });
                    if on != self.cpu.host_is_on(h) {
                        self.cpu
                            .set_host_state(&mut self.actions, h, on, date, finished);
                        if on {
                            self.host_restarted(h);
                        } else {
                            // settle the failed actions first: waiters must
                            // observe the host failure, not the cancellation
                            // of the residents about to be killed
                            let failed_now: Vec<ActionId> = finished.drain(..).collect();
                            for id in failed_now {
                                self.action_finished(id);
                            }
                            self.host_failed(h);
                        }
                    }
                }
                TraceTarget::LinkBandwidth(l) => {
                    self.net.set_link_bandwidth(&mut self.actions, l, value);
                    let name = &self.platform.links[l.0].name;
                    self.instr.set_var(date, "bandwidth", name, value);
                }
                TraceTarget::LinkLatency(l) => {
                    self.net.set_link_latency(&mut self.actions, l, value);
                    let name = &self.platform.links[l.0].name;
                    self.instr.set_var(date, "latency", name, value);
                }
                TraceTarget::LinkState(l) => {
                    let on = value > 0.0;
                    self.net
                        .set_link_state(&mut self.actions, l, on, date, finished);
                    let name = self.platform.links[l.0].name.clone();
                    self.instr
                        .event(date, &name, "link_state", if on { 1.0 } else { 0.0 });
                }
            }
        }
    }

    fn fire_timers(&mut self) {
        loop {
            match self.timers.peek() {
                Some(entry) if entry.date <= self.clock => {}
                _ => break,
            }
            let entry = self.timers.pop().unwrap();
            match entry.kind {
                TimerKind::Kill(pid) => {
                    if !self.actor_is_dead(pid) {
                        debug!(self.log, "kill timer fired for actor {}", pid.0);
                        self.kill_actor(pid);
                    }
                }
                TimerKind::Start {
                    name,
                    host,
                    auto_restart,
                    code,
                } => {
                    self.spawn_actor(&name, host, auto_restart, code, None);
                }
            }
        }
    }

    /// Dispatches a terminal action to its finisher.
    fn action_finished(&mut self, id: ActionId) {
        if !self.actions.is_alive(id) {
            return; // concluded earlier this tick
        }
        match &self.actions.get(id).kind {
            ActionKind::Execute { .. } => self.exec_finished(id),
            ActionKind::Sleep { watching: None, .. } => self.sleep_finished(id),
            ActionKind::Sleep {
                watching: Some(_), ..
            } => self.comm_timeout_fired(id),
            ActionKind::Synchro { .. } => self.synchro_finished(id),
            ActionKind::Comm(_) => self.conclude_comm(id),
        }
    }

    /// Drops one reference; tears the action down at zero.
    pub(crate) fn destroy_action(&mut self, id: ActionId) {
        if let Some(mut action) = self.actions.dec_ref(id) {
            debug_assert!(action.waiters.is_empty(), "destroying an awaited action");
            if action.is_comm() {
                self.net.drop_variable(&mut action);
                let data = match action.kind {
                    ActionKind::Comm(data) => data,
                    _ => unreachable!(),
                };
                // drop the rendezvous link if it never matched
                if let Some(rdv) = data.rdv {
                    if let Some(r) = self.rdvs[rdv.0].as_mut() {
                        r.fifo.retain(|&c| c != id);
                        r.done_fifo.retain(|&c| c != id);
                    }
                }
                for side in [data.src, data.dst].iter().flatten() {
                    if let Some(actor) = self.actors[side.0].as_mut() {
                        actor.comms.retain(|&c| c != id);
                    }
                }
                // a detached send that still owns its buffer reclaims it
                // here, exactly once
                if let (Some(clean), Some(buf)) = (data.clean_fn, data.payload) {
                    clean(buf);
                }
            } else {
                self.cpu.drop_variable(&mut action);
            }
        }
    }

    // ======================== bookkeeping ========================

    pub(crate) fn answer(&mut self, pid: Pid, answer: Answer) {
        let actor = match self.actors[pid.0].as_mut() {
            Some(actor) => actor,
            None => return,
        };
        debug_assert!(actor.answer.is_none(), "double answer to actor");
        actor.answer = Some(answer);
        actor.blocked = None;
        actor.waiting_action = None;
        self.enqueue(pid);
    }

    pub(crate) fn enqueue(&mut self, pid: Pid) {
        let actor = match self.actors[pid.0].as_mut() {
            Some(actor) => actor,
            None => return,
        };
        if !actor.queued {
            actor.queued = true;
            self.ready.push_back(pid);
        }
    }

    pub(crate) fn actor_is_dead(&self, pid: Pid) -> bool {
        match self.actors.get(pid.0) {
            Some(Some(actor)) => actor.dying,
            _ => true,
        }
    }

    pub(crate) fn reap_zombies(&mut self) {
        let zombies = std::mem::take(&mut self.zombies);
        for pid in zombies {
            if let Some(mut actor) = self.actors[pid.0].take() {
                if let Some(ctx) = actor.context.take() {
                    ctx.destroy();
                }
            }
        }
    }

    pub(crate) fn push_zombie(&mut self, pid: Pid) {
        self.zombies.push(pid);
    }

    pub(crate) fn add_failure(&mut self) {
        self.failures += 1;
    }

    fn report_deadlock(&mut self) {
        warn!(
            self.log,
            "deadlock at t={}: {} actor(s) blocked with no pending activity",
            self.clock,
            self.n_alive
        );
        for slot in self.actors.iter().flatten() {
            warn!(
                self.log,
                "  actor {} '{}' blocked on {:?}", slot.pid.0, slot.name, slot.blocked
            );
        }
    }

    /// Kills every resident of a failed host, remembering the auto-restart
    /// ones.
    fn host_failed(&mut self, host: HostId) {
        let residents = self.host_residents[host.0].clone();
        info!(
            self.log,
            "host '{}' failed, killing {} actor(s)",
            self.platform.host_name(host),
            residents.len()
        );
        for pid in residents {
            if self.actor_is_dead(pid) {
                continue;
            }
            let actor = self.actors[pid.0].as_ref().unwrap();
            if actor.auto_restart {
                self.pending_restart.push(RestartInfo {
                    name: actor.name.clone(),
                    host,
                    code: Arc::clone(actor.code.as_ref().unwrap()),
                });
            }
            self.kill_actor(pid);
        }
    }

    /// Restarts the auto-restart actors recorded for a host that came back.
    fn host_restarted(&mut self, host: HostId) {
        let pending = std::mem::take(&mut self.pending_restart);
        let (mine, keep): (Vec<_>, Vec<_>) = pending.into_iter().partition(|r| r.host == host);
        self.pending_restart = keep;
        for info in mine {
            info!(self.log, "auto-restarting '{}' on recovered host", info.name);
            self.spawn_actor(&info.name, info.host, true, info.code, None);
        }
    }
}
