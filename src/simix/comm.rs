//! Rendezvous points and communications
//!
//! A rendezvous is a named FIFO of unmatched communication requests. A send
//! scans it for the first receive its predicate accepts (and symmetrically);
//! a match fuses both requests into one action that enters the network
//! model. Every terminal state funnels through `comm_finish`, which copies
//! the payload exactly once, answers every waiter with the outcome its side
//! observes, and lets the refcounts tear the action down.

use crate::err::SimError;
use crate::platform::HostId;
use crate::simix::process::Blocked;
use crate::simix::{Answer, Pid, Simulator};
use crate::surf::{
    Action, ActionId, ActionKind, ActionState, CleanFn, CommData, CommSide, CommType, MatchFn,
};
use crate::Time;
use slog::debug;
use std::collections::VecDeque;

/// Handle on a rendezvous point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RdvId(pub(crate) usize);

/// One meeting place for sends and receives.
#[derive(Debug, Default)]
pub(crate) struct Rdv {
    pub name: Option<String>,
    /// Unmatched requests, in arrival order.
    pub fifo: VecDeque<ActionId>,
    /// Fast-path queue: sends already started toward the pinned receiver.
    pub done_fifo: VecDeque<ActionId>,
    pub permanent_receiver: Option<Pid>,
}

impl Simulator {
    pub(crate) fn rdv_mut(&mut self, rdv: RdvId) -> &mut Rdv {
        self.rdvs[rdv.0].as_mut().expect("stale rendezvous")
    }

    pub(crate) fn rdv_create(&mut self, name: Option<String>) -> RdvId {
        if let Some(n) = &name {
            if let Some(&existing) = self.rdv_names.get(n) {
                return existing;
            }
        }
        let id = RdvId(self.rdvs.len());
        if let Some(n) = &name {
            self.rdv_names.insert(n.clone(), id);
        }
        self.rdvs.push(Some(Rdv {
            name,
            ..Rdv::default()
        }));
        id
    }

    pub(crate) fn rdv_destroy(&mut self, rdv: RdvId) {
        if let Some(r) = self.rdvs[rdv.0].take() {
            if let Some(n) = &r.name {
                self.rdv_names.remove(n);
            }
            for comm in r.fifo {
                if self.actions.is_alive(comm) {
                    self.comm_cancel(comm);
                }
            }
            for comm in r.done_fifo {
                if self.actions.is_alive(comm) {
                    // the queue held a reference on parked sends
                    self.destroy_action(comm);
                }
            }
        }
    }

    pub(crate) fn rdv_comm_count_by_host(&self, rdv: RdvId, host: HostId) -> u64 {
        let r = self.rdvs[rdv.0].as_ref().expect("stale rendezvous");
        let mut count = 0;
        for &comm in &r.fifo {
            let data = self.actions.get(comm).comm();
            let issuer = match data.ctype {
                CommType::Send => data.src,
                _ => data.dst,
            };
            if let Some(pid) = issuer {
                if self.actors[pid.0].as_ref().map(|a| a.host) == Some(host) {
                    count += 1;
                }
            }
        }
        count
    }

    /// First queued request of the wanted direction accepted by the
    /// caller's predicate; unlinked from the FIFO when found.
    fn rdv_search(
        &mut self,
        rdv: RdvId,
        want: CommType,
        caller_tag: u64,
        match_fn: &Option<MatchFn>,
    ) -> Option<ActionId> {
        let actions = &self.actions;
        let r = self.rdvs[rdv.0].as_mut().expect("stale rendezvous");
        let pos = r.fifo.iter().position(|&c| {
            let data = actions.get(c).comm();
            if data.ctype != want {
                return false;
            }
            let queued_tag = match want {
                CommType::Send => data.src_tag,
                _ => data.dst_tag,
            };
            match match_fn {
                Some(f) => f(caller_tag, queued_tag),
                None => true,
            }
        })?;
        r.fifo.remove(pos)
    }

    fn new_comm(&mut self, ctype: CommType, size: f64, rate: f64) -> ActionId {
        self.actions.alloc(Action {
            state: ActionState::Waiting,
            cost: size,
            remains: size,
            start: self.clock,
            finish: -1.0,
            max_duration: crate::NO_MAX_DURATION,
            priority: 1.0,
            variable: None,
            suspended: false,
            refcount: 1,
            waiters: Vec::new(),
            kind: ActionKind::Comm(CommData {
                ctype,
                rdv: None,
                src: None,
                dst: None,
                size,
                rate,
                payload: None,
                delivered: None,
                shared: false,
                src_tag: 0,
                dst_tag: 0,
                match_fn: None,
                clean_fn: None,
                copied: false,
                concluded: false,
                detached: false,
                src_timeout: None,
                dst_timeout: None,
                latency: 0.0,
                lat_current: 0.0,
                weight: 0.0,
            }),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn comm_isend(
        &mut self,
        pid: Pid,
        rdv: RdvId,
        size: f64,
        rate: f64,
        payload: Vec<u8>,
        shared: bool,
        tag: u64,
        match_fn: Option<MatchFn>,
        clean_fn: Option<CleanFn>,
        detached: bool,
    ) {
        if self.rdvs.get(rdv.0).map_or(true, |r| r.is_none()) {
            self.answer(
                pid,
                Answer::Error(SimError::Arg("stale rendezvous".to_string())),
            );
            return;
        }

        let comm = match self.rdv_search(rdv, CommType::Recv, tag, &match_fn) {
            Some(found) => {
                let data = self.actions.get_mut(found).comm_mut();
                data.ctype = CommType::Ready;
                data.rdv = None;
                self.actions.get_mut(found).state = ActionState::Ready;
                found
            }
            None => {
                let id = self.new_comm(CommType::Send, size, rate);
                let receiver = self.rdv_mut(rdv).permanent_receiver;
                let data = self.actions.get_mut(id).comm_mut();
                data.rdv = Some(rdv);
                match receiver {
                    Some(dst) => {
                        // pinned-receiver fast path: start right away, park
                        // the action for the receiver to claim
                        data.dst = Some(dst);
                        data.ctype = CommType::Ready;
                        self.actions.get_mut(id).state = ActionState::Ready;
                        self.actions.inc_ref(id);
                        self.rdv_mut(rdv).done_fifo.push_back(id);
                    }
                    None => self.rdv_mut(rdv).fifo.push_back(id),
                }
                id
            }
        };

        {
            let data = self.actions.get_mut(comm).comm_mut();
            data.src = Some(pid);
            data.size = size;
            data.rate = rate;
            data.payload = Some(payload);
            data.shared = shared;
            data.src_tag = tag;
            data.detached = detached;
            data.clean_fn = clean_fn;
            if data.match_fn.is_none() {
                data.match_fn = match_fn;
            }
        }
        self.actors[pid.0].as_mut().unwrap().comms.push(comm);
        if !detached {
            self.actions.inc_ref(comm);
        }

        if self.actions.get(comm).state == ActionState::Ready {
            self.comm_start(comm);
        }

        if detached {
            self.answer(pid, Answer::Unit);
        } else {
            self.answer(pid, Answer::ActionRef(comm));
        }
    }

    pub(crate) fn comm_irecv(&mut self, pid: Pid, rdv: RdvId, tag: u64, match_fn: Option<MatchFn>) {
        if self.rdvs.get(rdv.0).map_or(true, |r| r.is_none()) {
            self.answer(
                pid,
                Answer::Error(SimError::Arg("stale rendezvous".to_string())),
            );
            return;
        }

        // pinned receiver claims sends that already started toward it
        if self.rdv_mut(rdv).permanent_receiver == Some(pid) {
            let actions = &self.actions;
            let r = self.rdvs[rdv.0].as_mut().unwrap();
            let pos = r.done_fifo.iter().position(|&c| {
                let data = actions.get(c).comm();
                match &match_fn {
                    Some(f) => f(tag, data.src_tag),
                    None => true,
                }
            });
            if let Some(pos) = pos {
                let comm = r.done_fifo.remove(pos).unwrap();
                {
                    let data = self.actions.get_mut(comm).comm_mut();
                    data.rdv = None;
                    data.dst = Some(pid);
                    data.dst_tag = tag;
                }
                // the queue's reference transfers to the receiver
                self.actors[pid.0].as_mut().unwrap().comms.push(comm);
                self.answer(pid, Answer::ActionRef(comm));
                return;
            }
        }

        let comm = match self.rdv_search(rdv, CommType::Send, tag, &match_fn) {
            Some(found) => {
                let data = self.actions.get_mut(found).comm_mut();
                data.ctype = CommType::Ready;
                data.rdv = None;
                self.actions.get_mut(found).state = ActionState::Ready;
                found
            }
            None => {
                let id = self.new_comm(CommType::Recv, 0.0, -1.0);
                let data = self.actions.get_mut(id).comm_mut();
                data.rdv = Some(rdv);
                self.rdv_mut(rdv).fifo.push_back(id);
                id
            }
        };

        {
            let data = self.actions.get_mut(comm).comm_mut();
            data.dst = Some(pid);
            data.dst_tag = tag;
            if data.match_fn.is_none() {
                data.match_fn = match_fn;
            }
        }
        self.actors[pid.0].as_mut().unwrap().comms.push(comm);
        self.actions.inc_ref(comm);

        if self.actions.get(comm).state == ActionState::Ready {
            self.comm_start(comm);
        }
        self.answer(pid, Answer::ActionRef(comm));
    }

    /// Enters a matched communication into the network model.
    fn comm_start(&mut self, comm: ActionId) {
        let (src, dst) = {
            let data = self.actions.get(comm).comm();
            (data.src.unwrap(), data.dst.unwrap())
        };
        let src_host = self.actors[src.0].as_ref().unwrap().host;
        let dst_host = self.actors[dst.0].as_ref().unwrap().host;
        self.net.start(
            &mut self.actions,
            &self.platform,
            comm,
            src_host,
            dst_host,
            self.clock,
        );

        let suspended = self.actors[src.0].as_ref().unwrap().suspended
            || self.actors[dst.0].as_ref().unwrap().suspended;
        if suspended && !self.actions.get(comm).state.is_over() {
            self.net.suspend(&mut self.actions, comm);
        }

        // a dead link is detected at start time
        if self.actions.get(comm).state.is_over() {
            self.conclude_comm(comm);
        }
    }

    pub(crate) fn comm_wait(&mut self, pid: Pid, comm: ActionId, timeout: Time) {
        if !self.actions.is_alive(comm) {
            self.answer(
                pid,
                Answer::Error(SimError::Arg("stale communication handle".to_string())),
            );
            return;
        }
        if self.actions.get(comm).state.is_over() {
            self.actions.get_mut(comm).waiters.push(pid);
            self.comm_finish(comm);
            return;
        }

        self.actions.get_mut(comm).waiters.push(pid);
        {
            let actor = self.actors[pid.0].as_mut().unwrap();
            actor.blocked = Some(Blocked::CommWait(comm));
            actor.waiting_action = Some(comm);
        }

        // a sleep on the issuer's host catches both the timeout and the
        // host failing under the waiter
        let side = if self.actions.get(comm).comm().src == Some(pid) {
            CommSide::Src
        } else {
            CommSide::Dst
        };
        let host = self.actors[pid.0].as_ref().unwrap().host;
        let watcher = self
            .cpu
            .sleep(&mut self.actions, host, timeout, self.clock, Some((comm, side)));
        let data = self.actions.get_mut(comm).comm_mut();
        match side {
            CommSide::Src => data.src_timeout = Some(watcher),
            CommSide::Dst => data.dst_timeout = Some(watcher),
        }
    }

    pub(crate) fn comm_waitany(&mut self, pid: Pid, comms: Vec<ActionId>) {
        if comms.is_empty() {
            self.answer(
                pid,
                Answer::Error(SimError::Arg("waitany over nothing".to_string())),
            );
            return;
        }
        for &comm in &comms {
            if !self.actions.is_alive(comm) {
                self.answer(
                    pid,
                    Answer::Error(SimError::Arg("stale communication handle".to_string())),
                );
                return;
            }
        }
        if let Some(&over) = comms
            .iter()
            .find(|&&c| self.actions.get(c).state.is_over())
        {
            self.actions.get_mut(over).waiters.push(pid);
            self.actors[pid.0].as_mut().unwrap().blocked = Some(Blocked::CommWaitany(comms));
            self.comm_finish(over);
            return;
        }
        for &comm in &comms {
            self.actions.get_mut(comm).waiters.push(pid);
        }
        self.actors[pid.0].as_mut().unwrap().blocked = Some(Blocked::CommWaitany(comms));
    }

    pub(crate) fn comm_test(&mut self, pid: Pid, comm: ActionId) {
        if !self.actions.is_alive(comm) {
            self.answer(
                pid,
                Answer::Error(SimError::Arg("stale communication handle".to_string())),
            );
            return;
        }
        if self.actions.get(comm).state.is_over() {
            self.actions.get_mut(comm).waiters.push(pid);
            self.comm_finish(comm);
        } else {
            self.answer(pid, Answer::Bool(false));
        }
    }

    pub(crate) fn comm_testany(&mut self, pid: Pid, comms: Vec<ActionId>) {
        let over = comms
            .iter()
            .copied()
            .find(|&c| self.actions.is_alive(c) && self.actions.get(c).state.is_over());
        match over {
            Some(comm) => {
                self.actions.get_mut(comm).waiters.push(pid);
                self.actors[pid.0].as_mut().unwrap().blocked = Some(Blocked::CommWaitany(comms));
                self.comm_finish(comm);
            }
            None => self.answer(pid, Answer::Bool(false)),
        }
    }

    /// Cancels a communication wherever it stands: unmatched in a
    /// rendezvous, or running in the network model.
    pub(crate) fn comm_cancel(&mut self, comm: ActionId) {
        if !self.actions.is_alive(comm) || self.actions.get(comm).state.is_over() {
            return;
        }
        match self.actions.get(comm).state {
            ActionState::Waiting => {
                self.unlink_rdv(comm);
                self.actions.get_mut(comm).state = ActionState::Canceled;
                self.actions.get_mut(comm).finish = self.clock;
                self.conclude_comm(comm);
            }
            ActionState::Ready | ActionState::Running => {
                self.net
                    .stop(&mut self.actions, comm, ActionState::Canceled, self.clock);
                self.conclude_comm(comm);
            }
            _ => {}
        }
    }

    fn unlink_rdv(&mut self, comm: ActionId) {
        if let Some(rdv) = self.actions.get_mut(comm).comm_mut().rdv.take() {
            if let Some(r) = self.rdvs[rdv.0].as_mut() {
                r.fifo.retain(|&c| c != comm);
                r.done_fifo.retain(|&c| c != comm);
            }
        }
    }

    /// A timeout watcher fired (or died with its host) for a communication.
    pub(crate) fn comm_timeout_fired(&mut self, watcher: ActionId) {
        let (comm, side) = match &self.actions.get(watcher).kind {
            ActionKind::Sleep {
                watching: Some(pair),
                ..
            } => *pair,
            _ => unreachable!("not a timeout watcher"),
        };
        let expired = self.actions.get(watcher).state == ActionState::Done;

        if self.actions.is_alive(comm) && !self.actions.get(comm).state.is_over() {
            let state = match (expired, side) {
                (true, CommSide::Src) => ActionState::SrcTimeout,
                (true, CommSide::Dst) => ActionState::DstTimeout,
                (false, CommSide::Src) => ActionState::SrcHostFailure,
                (false, CommSide::Dst) => ActionState::DstHostFailure,
            };
            self.unlink_rdv(comm);
            self.net.stop(&mut self.actions, comm, state, self.clock);
            self.conclude_comm(comm);
        }

        // conclude_comm discards both watchers; only an already-settled
        // communication leaves this one behind
        if self.actions.is_alive(watcher) {
            self.actions.get_mut(watcher).waiters.clear();
            self.destroy_action(watcher);
        }
    }

    /// Terminal handling: discard the timeout watchers, answer every
    /// waiter, release the system's reference. Idempotent.
    pub(crate) fn conclude_comm(&mut self, comm: ActionId) {
        if !self.actions.is_alive(comm) {
            return;
        }
        {
            let data = self.actions.get_mut(comm).comm_mut();
            if data.concluded {
                return;
            }
            data.concluded = true;
        }
        let (src_t, dst_t) = {
            let data = self.actions.get_mut(comm).comm_mut();
            (data.src_timeout.take(), data.dst_timeout.take())
        };
        for watcher in [src_t, dst_t].iter().flatten() {
            self.discard_cpu_action(*watcher);
        }
        {
            let action = self.actions.get(comm);
            debug!(
                self.log,
                "communication of {} bytes over: {:?} (started {}, ended {})",
                action.cost,
                action.state,
                action.start,
                action.finish
            );
        }
        self.comm_finish(comm);
        self.destroy_action(comm);
    }

    /// Answers everyone blocked on a finished communication with the
    /// outcome its side observes.
    pub(crate) fn comm_finish(&mut self, comm: ActionId) {
        let state = self.actions.get(comm).state;
        let waiters = std::mem::take(&mut self.actions.get_mut(comm).waiters);
        for pid in waiters {
            if self.actor_is_dead(pid) {
                continue;
            }
            if state == ActionState::Done {
                self.comm_copy(comm);
            }

            let (src, dst) = {
                let data = self.actions.get(comm).comm();
                (data.src, data.dst)
            };
            let outcome: Result<Option<Vec<u8>>, SimError> = match state {
                ActionState::Done => {
                    if dst == Some(pid) {
                        Ok(self.actions.get_mut(comm).comm_mut().delivered.take())
                    } else {
                        Ok(None)
                    }
                }
                ActionState::SrcTimeout => Err(SimError::Timeout(
                    "communication timeouted because of sender",
                )),
                ActionState::DstTimeout => Err(SimError::Timeout(
                    "communication timeouted because of receiver",
                )),
                ActionState::SrcHostFailure => {
                    if src == Some(pid) {
                        Err(SimError::Host)
                    } else {
                        Err(SimError::Network("remote peer failed"))
                    }
                }
                ActionState::DstHostFailure => {
                    if dst == Some(pid) {
                        Err(SimError::Host)
                    } else {
                        Err(SimError::Network("remote peer failed"))
                    }
                }
                ActionState::LinkFailure => Err(SimError::Network("link failure")),
                ActionState::Canceled => Err(SimError::Cancel("communication canceled")),
                other => unreachable!("finishing a communication in state {:?}", other),
            };

            let blocked = self.actors[pid.0].as_mut().unwrap().blocked.take();
            let answer = match blocked {
                Some(Blocked::CommWaitany(list)) => {
                    let index = list.iter().position(|&c| c == comm).unwrap_or(0);
                    for &other in &list {
                        if other != comm && self.actions.is_alive(other) {
                            self.actions.get_mut(other).waiters.retain(|&p| p != pid);
                        }
                    }
                    match outcome {
                        Ok(payload) => Answer::AnyOk { index, payload },
                        Err(error) => Answer::AnyErr { index, error },
                    }
                }
                _ => match outcome {
                    Ok(payload) => Answer::Payload(payload),
                    Err(error) => Answer::Error(error),
                },
            };

            self.actors[pid.0]
                .as_mut()
                .unwrap()
                .comms
                .retain(|&c| c != comm);
            self.answer(pid, answer);
            // this waiter's endpoint reference
            self.destroy_action(comm);
        }
    }

    /// Runs the payload copy callback, exactly once per communication.
    fn comm_copy(&mut self, comm: ActionId) {
        let copy_fn = self.copy_fn;
        let data = self.actions.get_mut(comm).comm_mut();
        if data.copied {
            return;
        }
        data.copied = true;
        let size = data.size;
        let shared = data.shared;
        let (payload, delivered) = (&mut data.payload, &mut data.delivered);
        copy_fn(payload, delivered, size, shared);
    }
}
