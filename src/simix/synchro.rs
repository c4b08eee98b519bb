//! Mutexes, condition variables, semaphores
//!
//! Pure scheduler objects: no resource consumption, just ordered queues of
//! blocked actors. Every blocking operation still carries a synchro action
//! on the issuer's host so host failures (and timeouts, where allowed)
//! reach the sleeper as structured errors.

use crate::err::SimError;
use crate::simix::process::Blocked;
use crate::simix::{Answer, Pid, Simulator};
use crate::surf::{ActionId, ActionState};
use crate::Time;
use slog::{debug, warn};
use std::collections::VecDeque;

/// Handle on a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) usize);

/// Handle on a condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondId(pub(crate) usize);

/// Handle on a counting semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId(pub(crate) usize);

/// Capacity sentinel for a semaphore that never blocks.
pub const SEM_UNLIMITED: i32 = i32::MAX;

#[derive(Debug, Default)]
pub(crate) struct SmxMutex {
    pub locked: bool,
    pub owner: Option<Pid>,
    pub sleeping: VecDeque<Pid>,
}

#[derive(Debug, Default)]
pub(crate) struct SmxCond {
    pub sleeping: VecDeque<Pid>,
    /// Mutex last associated through a wait.
    pub mutex: Option<MutexId>,
}

#[derive(Debug)]
pub(crate) struct SmxSem {
    pub value: i32,
    pub sleeping: VecDeque<Pid>,
}

impl Simulator {
    // ======================== mutex ========================

    pub(crate) fn mutex_create(&mut self) -> MutexId {
        self.mutexes.push(Some(SmxMutex::default()));
        MutexId(self.mutexes.len() - 1)
    }

    /// Grants the mutex to `pid` or queues it behind the current owner, in
    /// arrival order.
    pub(crate) fn mutex_lock(&mut self, pid: Pid, mutex: MutexId) {
        let locked = self.mutexes[mutex.0].as_ref().expect("stale mutex").locked;
        if locked {
            // a synchro action carries host failures to the sleeper
            let host = self.actors[pid.0].as_ref().unwrap().host;
            let synchro = self
                .cpu
                .synchro_wait(&mut self.actions, host, -1.0, self.clock);
            self.actions.get_mut(synchro).waiters.push(pid);
            let actor = self.actors[pid.0].as_mut().unwrap();
            actor.blocked = Some(Blocked::MutexLock { mutex, synchro });
            actor.waiting_action = Some(synchro);
            self.mutexes[mutex.0]
                .as_mut()
                .unwrap()
                .sleeping
                .push_back(pid);
        } else {
            let m = self.mutexes[mutex.0].as_mut().unwrap();
            m.locked = true;
            m.owner = Some(pid);
            self.answer(pid, Answer::Unit);
        }
    }

    pub(crate) fn mutex_trylock(&mut self, pid: Pid, mutex: MutexId) -> bool {
        let m = self.mutexes[mutex.0].as_mut().expect("stale mutex");
        if m.locked {
            false
        } else {
            m.locked = true;
            m.owner = Some(pid);
            true
        }
    }

    /// Unlocks and hands the mutex to the longest-waiting actor, if any.
    /// Unlocking someone else's mutex does nothing.
    pub(crate) fn mutex_unlock(&mut self, pid: Pid, mutex: MutexId) {
        let owner = self.mutexes[mutex.0].as_ref().expect("stale mutex").owner;
        if owner != Some(pid) {
            warn!(
                self.log,
                "actor {} unlocked a mutex it does not own", pid.0
            );
            return;
        }
        let next = self.mutexes[mutex.0].as_mut().unwrap().sleeping.pop_front();
        match next {
            Some(p) => {
                let synchro = match self.actors[p.0].as_mut().unwrap().blocked.take() {
                    Some(Blocked::MutexLock { synchro, .. }) => synchro,
                    other => panic!("mutex sleeper in odd state {:?}", other),
                };
                self.mutexes[mutex.0].as_mut().unwrap().owner = Some(p);
                self.discard_cpu_action(synchro);
                self.answer(p, Answer::Unit);
            }
            None => {
                let m = self.mutexes[mutex.0].as_mut().unwrap();
                m.locked = false;
                m.owner = None;
            }
        }
    }

    pub(crate) fn mutex_destroy(&mut self, mutex: MutexId) {
        if let Some(m) = self.mutexes[mutex.0].take() {
            assert!(m.sleeping.is_empty(), "destroying a mutex with waiters");
        }
    }

    // ======================== condition ========================

    pub(crate) fn cond_create(&mut self) -> CondId {
        self.conds.push(Some(SmxCond::default()));
        CondId(self.conds.len() - 1)
    }

    /// Releases the mutex, then sleeps on the condition; timeout is
    /// negative for none.
    pub(crate) fn cond_wait(&mut self, pid: Pid, cond: CondId, mutex: MutexId, timeout: Time) {
        self.mutex_unlock(pid, mutex);
        self.conds[cond.0].as_mut().expect("stale condition").mutex = Some(mutex);

        let host = self.actors[pid.0].as_ref().unwrap().host;
        let synchro = self
            .cpu
            .synchro_wait(&mut self.actions, host, timeout, self.clock);
        self.actions.get_mut(synchro).waiters.push(pid);
        let actor = self.actors[pid.0].as_mut().unwrap();
        actor.blocked = Some(Blocked::CondWait {
            cond,
            mutex,
            synchro,
        });
        actor.waiting_action = Some(synchro);
        self.conds[cond.0].as_mut().unwrap().sleeping.push_back(pid);
    }

    /// Wakes one sleeper and turns its wait into a lock attempt on the
    /// associated mutex.
    pub(crate) fn cond_signal(&mut self, cond: CondId) {
        let next = self.conds[cond.0]
            .as_mut()
            .expect("stale condition")
            .sleeping
            .pop_front();
        if let Some(p) = next {
            let (mutex, synchro) = match self.actors[p.0].as_mut().unwrap().blocked.take() {
                Some(Blocked::CondWait { mutex, synchro, .. }) => (mutex, synchro),
                other => panic!("condition sleeper in odd state {:?}", other),
            };
            self.actors[p.0].as_mut().unwrap().waiting_action = None;
            self.discard_cpu_action(synchro);
            self.mutex_lock(p, mutex);
        }
    }

    /// Signals until nobody is left waiting.
    pub(crate) fn cond_broadcast(&mut self, cond: CondId) {
        while !self.conds[cond.0]
            .as_ref()
            .expect("stale condition")
            .sleeping
            .is_empty()
        {
            self.cond_signal(cond);
        }
    }

    pub(crate) fn cond_destroy(&mut self, cond: CondId) {
        if let Some(c) = self.conds[cond.0].take() {
            assert!(c.sleeping.is_empty(), "destroying a condition with waiters");
            debug!(
                self.log,
                "condition {} destroyed (was paired with mutex {:?})",
                cond.0,
                c.mutex.map(|m| m.0)
            );
        }
    }

    // ======================== semaphore ========================

    pub(crate) fn sem_create(&mut self, capacity: i32) -> SemId {
        self.sems.push(Some(SmxSem {
            value: capacity,
            sleeping: VecDeque::new(),
        }));
        SemId(self.sems.len() - 1)
    }

    pub(crate) fn sem_acquire(&mut self, pid: Pid, sem: SemId, timeout: Time) {
        let value = self.sems[sem.0].as_ref().expect("stale semaphore").value;
        if value <= 0 {
            let host = self.actors[pid.0].as_ref().unwrap().host;
            let synchro = self
                .cpu
                .synchro_wait(&mut self.actions, host, timeout, self.clock);
            self.actions.get_mut(synchro).waiters.push(pid);
            let actor = self.actors[pid.0].as_mut().unwrap();
            actor.blocked = Some(Blocked::SemAcquire { sem, synchro });
            actor.waiting_action = Some(synchro);
            self.sems[sem.0].as_mut().unwrap().sleeping.push_back(pid);
        } else {
            self.sems[sem.0].as_mut().unwrap().value -= 1;
            self.answer(pid, Answer::Unit);
        }
    }

    /// Unblocks the longest-waiting actor, or banks one unit.
    pub(crate) fn sem_release(&mut self, sem: SemId) {
        let next = self.sems[sem.0]
            .as_mut()
            .expect("stale semaphore")
            .sleeping
            .pop_front();
        match next {
            Some(p) => {
                let synchro = match self.actors[p.0].as_mut().unwrap().blocked.take() {
                    Some(Blocked::SemAcquire { synchro, .. }) => synchro,
                    other => panic!("semaphore sleeper in odd state {:?}", other),
                };
                self.discard_cpu_action(synchro);
                self.answer(p, Answer::Unit);
            }
            None => {
                let s = self.sems[sem.0].as_mut().unwrap();
                if s.value < SEM_UNLIMITED {
                    s.value += 1;
                }
            }
        }
    }

    pub(crate) fn sem_would_block(&self, sem: SemId) -> bool {
        self.sems[sem.0].as_ref().expect("stale semaphore").value <= 0
    }

    pub(crate) fn sem_capacity(&self, sem: SemId) -> i32 {
        self.sems[sem.0].as_ref().expect("stale semaphore").value
    }

    pub(crate) fn sem_destroy(&mut self, sem: SemId) {
        if let Some(s) = self.sems[sem.0].take() {
            assert!(s.sleeping.is_empty(), "destroying a semaphore with waiters");
        }
    }

    /// A synchro action completed: its sleeper sees a timeout or a host
    /// failure, never a normal return.
    pub(crate) fn synchro_finished(&mut self, action: ActionId) {
        let state = self.actions.get(action).state;
        let waiters = std::mem::take(&mut self.actions.get_mut(action).waiters);
        for pid in waiters {
            if self.actor_is_dead(pid) {
                continue;
            }
            let blocked = self.actors[pid.0].as_mut().unwrap().blocked.take();
            match blocked {
                Some(Blocked::MutexLock { mutex, .. }) => {
                    if let Some(m) = self.mutexes[mutex.0].as_mut() {
                        m.sleeping.retain(|&p| p != pid);
                    }
                }
                Some(Blocked::CondWait { cond, .. }) => {
                    if let Some(c) = self.conds[cond.0].as_mut() {
                        c.sleeping.retain(|&p| p != pid);
                    }
                }
                Some(Blocked::SemAcquire { sem, .. }) => {
                    if let Some(s) = self.sems[sem.0].as_mut() {
                        s.sleeping.retain(|&p| p != pid);
                    }
                }
                other => {
                    debug_assert!(other.is_none(), "synchro waiter in odd state");
                }
            }
            let answer = match state {
                ActionState::Done => Answer::Error(SimError::Timeout("synchronization")),
                _ => Answer::Error(SimError::Host),
            };
            self.answer(pid, answer);
        }
        self.destroy_action(action);
    }
}
