//! Resource models and the actions they drive
//!
//! An *action* is a monotonically progressing unit of simulated work owned
//! by a resource model: a computation on a host, a data transfer across a
//! route, a plain sleep, or the carrier of a blocking synchronization.
//! Actions are refcounted: the model holds one reference while the action
//! runs, and every actor blocked on it holds another. The slot is recycled
//! once the last reference drops.

// I like to have many small files
mod cpu;
mod network;

pub(crate) use self::cpu::CpuModel;
pub(crate) use self::network::NetworkModel;

use crate::platform::HostId;
use crate::simix::comm::RdvId;
use crate::simix::Pid;
use crate::Time;

/// Handle on an in-flight action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub(crate) usize);

/// Lifecycle of an action.
///
/// Communications start out [`ActionState::Waiting`] in a rendezvous; every
/// other action is born [`ActionState::Running`]. Everything from
/// [`ActionState::Done`] on is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Created, not yet started.
    Inited,
    /// Communication sitting in a rendezvous, unmatched.
    Waiting,
    /// Communication matched, about to enter the network model.
    Ready,
    /// Progressing under the resource model.
    Running,
    /// Completed its full cost.
    Done,
    /// The resource it was using failed.
    Failed,
    /// The sender-side timeout fired first.
    SrcTimeout,
    /// The receiver-side timeout fired first.
    DstTimeout,
    /// The sender's host went down.
    SrcHostFailure,
    /// The receiver's host went down.
    DstHostFailure,
    /// A link of the route went down.
    LinkFailure,
    /// Explicitly canceled.
    Canceled,
}

impl ActionState {
    /// Whether the action reached a terminal state.
    pub fn is_over(self) -> bool {
        !matches!(
            self,
            ActionState::Inited | ActionState::Waiting | ActionState::Ready | ActionState::Running
        )
    }
}

/// Which end of a communication an actor or a timeout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommSide {
    Src,
    Dst,
}

/// Direction of an unmatched communication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommType {
    Send,
    Recv,
    /// Both sides present, matched.
    Ready,
}

/// Predicate deciding whether two user tags match.
pub type MatchFn = Box<dyn Fn(u64, u64) -> bool + Send>;

/// Reclaims the source buffer of a detached send that terminated.
pub type CleanFn = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Communication-specific action payload.
pub(crate) struct CommData {
    pub ctype: CommType,
    pub rdv: Option<RdvId>,
    pub src: Option<Pid>,
    pub dst: Option<Pid>,
    pub size: f64,
    pub rate: f64,

    pub payload: Option<Vec<u8>>,
    pub delivered: Option<Vec<u8>>,
    /// Source buffer lives in a shared segment: the copy step skips it.
    pub shared: bool,
    pub src_tag: u64,
    pub dst_tag: u64,
    pub match_fn: Option<MatchFn>,
    pub clean_fn: Option<CleanFn>,
    pub copied: bool,
    /// Terminal handling already ran (watchers dropped, waiters answered).
    pub concluded: bool,
    pub detached: bool,

    pub src_timeout: Option<ActionId>,
    pub dst_timeout: Option<ActionId>,

    /// Latency still to elapse before bandwidth is consumed.
    pub latency: Time,
    /// Raw route latency, for the TCP window bound.
    pub lat_current: Time,
    /// Sharing weight once the latency has elapsed.
    pub weight: f64,
}

impl std::fmt::Debug for CommData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommData")
            .field("ctype", &self.ctype)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("size", &self.size)
            .field("detached", &self.detached)
            .field("copied", &self.copied)
            .field("latency", &self.latency)
            .finish()
    }
}

/// What kind of work an action stands for.
#[derive(Debug)]
pub(crate) enum ActionKind {
    /// A computation pinned to one host.
    Execute { host: HostId },
    /// Pure passage of time on a host; optionally watches a communication
    /// as its source- or destination-side timeout.
    Sleep {
        host: HostId,
        watching: Option<(ActionId, CommSide)>,
    },
    /// Carrier of a blocking synchronization operation, so host failures
    /// reach actors blocked on a mutex, condition or semaphore.
    Synchro { host: HostId },
    /// A data transfer between two hosts.
    Comm(CommData),
}

/// An in-flight unit of simulated work.
#[derive(Debug)]
pub(crate) struct Action {
    pub state: ActionState,
    /// Total cost: flops for executions, bytes for communications.
    pub cost: f64,
    pub remains: f64,
    pub start: Time,
    pub finish: Time,
    /// Wall limit on the action, [`crate::NO_MAX_DURATION`] for none.
    pub max_duration: Time,
    /// Sharing weight of an execution variable.
    pub priority: f64,
    pub variable: Option<crate::lmm::VariableId>,
    pub suspended: bool,
    pub refcount: u32,
    /// Actors blocked on this action, answered when it finishes.
    pub waiters: Vec<Pid>,
    pub kind: ActionKind,
}

impl Action {
    pub fn comm(&self) -> &CommData {
        match &self.kind {
            ActionKind::Comm(data) => data,
            _ => panic!("not a communication action"),
        }
    }

    pub fn comm_mut(&mut self) -> &mut CommData {
        match &mut self.kind {
            ActionKind::Comm(data) => data,
            _ => panic!("not a communication action"),
        }
    }

    pub fn is_comm(&self) -> bool {
        matches!(self.kind, ActionKind::Comm(_))
    }
}

/// Slab of action slots with free-list recycling.
#[derive(Debug, Default)]
pub(crate) struct ActionArena {
    slots: Vec<Option<Action>>,
    free: Vec<usize>,
}

impl ActionArena {
    pub fn new() -> ActionArena {
        ActionArena::default()
    }

    pub fn alloc(&mut self, action: Action) -> ActionId {
        match self.free.pop() {
            Some(ix) => {
                debug_assert!(self.slots[ix].is_none());
                self.slots[ix] = Some(action);
                ActionId(ix)
            }
            None => {
                self.slots.push(Some(action));
                ActionId(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, id: ActionId) -> &Action {
        self.slots[id.0].as_ref().expect("stale action handle")
    }

    pub fn get_mut(&mut self, id: ActionId) -> &mut Action {
        self.slots[id.0].as_mut().expect("stale action handle")
    }

    pub fn is_alive(&self, id: ActionId) -> bool {
        self.slots.get(id.0).map_or(false, |s| s.is_some())
    }

    pub fn inc_ref(&mut self, id: ActionId) {
        self.get_mut(id).refcount += 1;
    }

    /// Drops one reference; returns the action for teardown when it was the
    /// last one.
    pub fn dec_ref(&mut self, id: ActionId) -> Option<Action> {
        let action = self.get_mut(id);
        assert!(action.refcount > 0, "action refcount underflow");
        action.refcount -= 1;
        if action.refcount == 0 {
            let action = self.slots[id.0].take();
            self.free.push(id.0);
            action
        } else {
            None
        }
    }
}
