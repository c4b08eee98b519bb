//! Cooperative execution contexts
//!
//! Each simulated actor runs its own code linearly on a dedicated OS thread
//! while staying under the simulator's control: the thread only ever runs
//! between a `resume` from maestro and its own next yield, so at any point
//! in time at most the actors maestro explicitly resumed are live. The
//! handshake is a one-slot exchange guarded by a mutex and a condvar pair;
//! it carries a value each way, which the scheduler uses for simcall
//! requests and their answers.
//!
//! Serial dispatch resumes one context at a time and waits for its yield,
//! so actor code can assume full mutual exclusion. Parallel dispatch posts
//! a batch of resumes and then collects every yield, which only preserves
//! mutual exclusion between actors of different batches.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread;

enum Slot<R, Y> {
    Empty,
    ToActor(R),
    ToMaestro(Y),
}

struct Shared<R, Y> {
    slot: Mutex<Slot<R, Y>>,
    to_actor: Condvar,
    to_maestro: Condvar,
}

impl<R, Y> Shared<R, Y> {
    fn send_to_actor(&self, r: R) {
        let mut slot = self.slot.lock();
        debug_assert!(matches!(*slot, Slot::Empty), "context resumed twice");
        *slot = Slot::ToActor(r);
        self.to_actor.notify_one();
    }

    fn recv_resume(&self) -> R {
        let mut slot = self.slot.lock();
        loop {
            if matches!(*slot, Slot::ToActor(_)) {
                match mem::replace(&mut *slot, Slot::Empty) {
                    Slot::ToActor(r) => return r,
                    _ => unreachable!(),
                }
            }
            self.to_actor.wait(&mut slot);
        }
    }

    fn send_to_maestro(&self, y: Y) {
        let mut slot = self.slot.lock();
        debug_assert!(matches!(*slot, Slot::Empty), "context yielded twice");
        *slot = Slot::ToMaestro(y);
        self.to_maestro.notify_one();
    }

    fn recv_yield(&self) -> Y {
        let mut slot = self.slot.lock();
        loop {
            if matches!(*slot, Slot::ToMaestro(_)) {
                match mem::replace(&mut *slot, Slot::Empty) {
                    Slot::ToMaestro(y) => return y,
                    _ => unreachable!(),
                }
            }
            self.to_maestro.wait(&mut slot);
        }
    }
}

/// Actor-side endpoint, handed to the context body.
pub(crate) struct ContextHandle<R, Y> {
    shared: Arc<Shared<R, Y>>,
}

impl<R, Y> ContextHandle<R, Y> {
    /// Yields `y` to maestro and blocks until the next resume.
    pub fn exchange(&self, y: Y) -> R {
        self.shared.send_to_maestro(y);
        self.shared.recv_resume()
    }
}

impl<R, Y> fmt::Debug for ContextHandle<R, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextHandle")
    }
}

/// Maestro-side endpoint: one suspended actor.
pub(crate) struct Context<R, Y> {
    shared: Arc<Shared<R, Y>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<R, Y> fmt::Debug for Context<R, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Context")
    }
}

impl<R, Y> Context<R, Y>
where
    R: Send + 'static,
    Y: Send + 'static,
{
    /// Spawns the context. The body does not run until the first
    /// [`Context::resume`] (or [`Context::post`]); it receives that first
    /// resume value and must return exactly one final yield.
    pub fn spawn<F>(name: String, stack_kib: usize, body: F) -> Context<R, Y>
    where
        F: FnOnce(ContextHandle<R, Y>, R) -> Y + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Empty),
            to_actor: Condvar::new(),
            to_maestro: Condvar::new(),
        });
        let actor_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(name)
            .stack_size(stack_kib * 1024)
            .spawn(move || {
                let first = actor_shared.recv_resume();
                let handle = ContextHandle {
                    shared: Arc::clone(&actor_shared),
                };
                let last = body(handle, first);
                actor_shared.send_to_maestro(last);
            })
            .expect("failed to spawn actor context");

        Context {
            shared,
            thread: Some(thread),
        }
    }

    /// Serial dispatch: hands `r` to the actor and blocks until it yields.
    pub fn resume(&self, r: R) -> Y {
        self.shared.send_to_actor(r);
        self.shared.recv_yield()
    }

    /// Parallel dispatch, first half: unblocks the actor without waiting.
    pub fn post(&self, r: R) {
        self.shared.send_to_actor(r);
    }

    /// Parallel dispatch, second half: blocks until the actor yields.
    pub fn collect(&self) -> Y {
        self.shared.recv_yield()
    }

    /// Reclaims the stack once the body returned its final yield.
    pub fn destroy(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod test {
    use crate::context::*;

    #[test]
    fn ping_pong() {
        let ctx: Context<u32, u32> = Context::spawn("echo".to_string(), 128, |handle, first| {
            let mut cur = first;
            while cur != 0 {
                cur = handle.exchange(cur * 2);
            }
            99
        });

        assert_eq!(ctx.resume(1), 2);
        assert_eq!(ctx.resume(3), 6);
        assert_eq!(ctx.resume(0), 99);
        ctx.destroy();
    }

    #[test]
    fn body_sees_first_resume() {
        let ctx: Context<&'static str, String> =
            Context::spawn("greeter".to_string(), 128, |_, first| format!("hi {}", first));
        assert_eq!(ctx.resume("maestro"), "hi maestro");
        ctx.destroy();
    }

    #[test]
    fn parallel_batch_post_then_collect() {
        let mut ctxs = Vec::new();
        for i in 0u32..4 {
            ctxs.push(Context::spawn(format!("worker-{}", i), 128, move |_, first: u32| {
                first + i
            }));
        }
        for ctx in &ctxs {
            ctx.post(10);
        }
        let got: Vec<u32> = ctxs.iter().map(|c| c.collect()).collect();
        assert_eq!(got, vec![10, 11, 12, 13]);
        for ctx in ctxs {
            ctx.destroy();
        }
    }
}
