//! Actor lifecycle, synchronization primitives and failure delivery.

use gridsim::{Config, Platform, SimError, Simulator, Trace};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + b.abs())
}

fn two_hosts() -> (Platform, gridsim::HostId, gridsim::HostId) {
    let mut p = Platform::new();
    let h1 = p.add_host("left", 1e8);
    let h2 = p.add_host("right", 1e8);
    let l = p.add_link("middle", 1e7, 1e-3);
    p.add_route_symmetric(h1, h2, vec![l]);
    (p, h1, h2)
}

#[test]
fn semaphore_serializes_critical_section() {
    let (p, h, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let peak = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));

    sim.register("boot", h, {
        let peak = Arc::clone(&peak);
        let inside = Arc::clone(&inside);
        move |handle| {
            let sem = handle.sem_create(2);
            for i in 0..5usize {
                let peak = Arc::clone(&peak);
                let inside = Arc::clone(&inside);
                handle.spawn(&format!("user-{}", i), handle.host(), move |h| {
                    h.sem_acquire(sem)?;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    h.sleep(1.0)?;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    h.sem_release(sem);
                    Ok(())
                });
            }
            Ok(())
        }
    });

    sim.run().unwrap();
    assert!(peak.load(Ordering::SeqCst) <= 2);
    // 5 one-second sections through 2 slots
    assert!(close(sim.clock(), 3.0), "clock is {}", sim.clock());
}

#[test]
fn condition_signal_hands_the_mutex_over() {
    let (p, h, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let woke_at = Arc::new(Mutex::new(0.0));

    sim.register("boot", h, {
        let woke_at = Arc::clone(&woke_at);
        move |handle| {
            let mutex = handle.mutex_create();
            let cond = handle.cond_create();

            let sink = Arc::clone(&woke_at);
            handle.spawn("waiter", handle.host(), move |h| {
                h.mutex_lock(mutex)?;
                h.cond_wait(cond, mutex)?;
                *sink.lock().unwrap() = h.now();
                h.mutex_unlock(mutex);
                Ok(())
            });
            handle.spawn("signaler", handle.host(), move |h| {
                h.sleep(2.0)?;
                h.cond_signal(cond);
                Ok(())
            });
            Ok(())
        }
    });

    sim.run().unwrap();
    assert!(close(*woke_at.lock().unwrap(), 2.0));
}

#[test]
fn cond_wait_timeout_expires() {
    let (p, h, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let outcome = Arc::new(Mutex::new(None));

    sim.register("boot", h, {
        let outcome = Arc::clone(&outcome);
        move |handle| {
            let mutex = handle.mutex_create();
            let cond = handle.cond_create();
            handle.mutex_lock(mutex)?;
            let out = handle.cond_wait_timeout(cond, mutex, 1.5);
            *outcome.lock().unwrap() = Some((handle.now(), out));
            Ok(())
        }
    });

    sim.run().unwrap();
    let (when, out) = outcome.lock().unwrap().take().unwrap();
    assert!(close(when, 1.5));
    assert!(matches!(out, Err(SimError::Timeout(_))));
}

#[test]
fn children_know_their_parent() {
    let (p, h, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let seen = Arc::new(Mutex::new(None));

    sim.register("root", h, {
        let seen = Arc::clone(&seen);
        move |handle| {
            // bootstrapped actors have no parent
            assert_eq!(handle.parent(), None);
            let me = handle.pid();
            let seen = Arc::clone(&seen);
            handle.spawn("kid", handle.host(), move |h| {
                *seen.lock().unwrap() = Some((h.parent(), h.parent_of(h.pid()), me));
                Ok(())
            });
            Ok(())
        }
    });

    sim.run().unwrap();
    let (parent, parent_of, me) = seen.lock().unwrap().take().unwrap();
    assert_eq!(parent, Some(me));
    assert_eq!(parent_of, Some(me));
}

#[test]
fn join_returns_when_target_ends() {
    let (p, h, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let joined_at = Arc::new(Mutex::new(vec![]));

    sim.register("boot", h, {
        let joined_at = Arc::clone(&joined_at);
        move |handle| {
            let worker = handle.spawn("worker", handle.host(), |h| h.sleep(4.0));
            // this one joins in time
            let sink = Arc::clone(&joined_at);
            handle.spawn("patient", handle.host(), move |h| {
                h.join(worker, -1.0)?;
                sink.lock().unwrap().push(("patient", h.now()));
                Ok(())
            });
            // this one gives up after one second
            let sink = Arc::clone(&joined_at);
            handle.spawn("hasty", handle.host(), move |h| {
                let out = h.join(worker, 1.0);
                assert!(matches!(out, Err(SimError::Timeout(_))));
                sink.lock().unwrap().push(("hasty", h.now()));
                Ok(())
            });
            Ok(())
        }
    });

    sim.run().unwrap();
    let joined = joined_at.lock().unwrap();
    assert_eq!(joined.len(), 2);
    assert_eq!(joined[0].0, "hasty");
    assert!(close(joined[0].1, 1.0));
    assert_eq!(joined[1].0, "patient");
    assert!(close(joined[1].1, 4.0));
}

#[test]
fn killing_the_receiver_cancels_the_transfer() {
    let (p, h1, h2) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let sender_saw = Arc::new(Mutex::new(None));

    sim.register("boot", h1, {
        let sender_saw = Arc::clone(&sender_saw);
        move |handle| {
            let sink = Arc::clone(&sender_saw);
            handle.spawn("A", handle.host(), move |h| {
                let rdv = h.rdv_create(Some("victim"));
                let out = h.send(rdv, 1e8, Vec::new());
                *sink.lock().unwrap() = Some((h.now(), out));
                Ok(())
            });
            let receiver = handle.spawn("B", h2, |h| {
                let rdv = h.rdv_create(Some("victim"));
                h.recv(rdv).map(|_| ())
            });
            handle.spawn("killer", handle.host(), move |h| {
                h.sleep(0.5)?;
                h.kill(receiver);
                Ok(())
            });
            Ok(())
        }
    });

    sim.run().unwrap();
    let (when, out) = sender_saw.lock().unwrap().take().unwrap();
    assert!(close(when, 0.5), "sender unblocked at {}", when);
    assert!(matches!(out, Err(SimError::Cancel(_))));
}

#[test]
fn detached_send_reclaims_its_buffer() {
    let (p, h1, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let cleaned = Arc::new(AtomicBool::new(false));

    sim.register("A", h1, {
        let cleaned = Arc::clone(&cleaned);
        move |h| {
            let rdv = h.rdv_create(Some("void"));
            let flag = Arc::clone(&cleaned);
            h.isend_detached(
                rdv,
                1e6,
                vec![42],
                Some(Box::new(move |buf: Vec<u8>| {
                    assert_eq!(buf, vec![42]);
                    flag.store(true, Ordering::SeqCst);
                })),
            );
            Ok(())
        }
    });

    // nobody ever receives: the buffer is reclaimed when the sender's
    // leftover communication is torn down
    sim.run().unwrap();
    assert!(cleaned.load(Ordering::SeqCst));
}

#[test]
fn suspend_freezes_a_computation() {
    let (p, h, _) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);

    sim.register("boot", h, move |handle| {
        let worker = handle.spawn("worker", handle.host(), |h| h.execute(1e9));
        handle.spawn("controller", handle.host(), move |h| {
            h.sleep(2.0)?;
            h.suspend(worker);
            h.sleep(3.0)?;
            h.resume(worker);
            Ok(())
        });
        Ok(())
    });

    sim.run().unwrap();
    // 10 s of work, frozen from t=2 to t=5
    assert!(close(sim.clock(), 13.0), "clock is {}", sim.clock());
}

#[test]
fn waitany_picks_the_first_finisher() {
    let (p, h1, h2) = two_hosts();
    let mut sim = Simulator::new(Config::new(), p);
    let picked = Arc::new(Mutex::new(None));

    sim.register("B", h2, {
        let picked = Arc::clone(&picked);
        move |h| {
            let slow = h.rdv_create(Some("slow"));
            let fast = h.rdv_create(Some("fast"));
            let c1 = h.irecv(slow);
            let c2 = h.irecv(fast);
            let (index, out) = h.comm_waitany(&[c1, c2]);
            assert!(out.is_ok());
            *picked.lock().unwrap() = Some((index, h.now()));
            // drain the other transfer too
            h.comm_wait(c1, -1.0).map(|_| ())
        }
    });
    sim.register("A", h1, move |h| {
        let slow = h.rdv_create(Some("slow"));
        let fast = h.rdv_create(Some("fast"));
        h.sleep(1.0)?;
        h.send(fast, 1e6, Vec::new())?;
        h.send(slow, 1e6, Vec::new())
    });

    sim.run().unwrap();
    let (index, when) = picked.lock().unwrap().take().unwrap();
    assert_eq!(index, 1, "the fast mailbox finished first");
    assert!(when > 1.0);
}

#[test]
fn host_failure_kills_and_restarts_residents() {
    let mut p = Platform::new();
    let h1 = p.add_host("stable", 1e8);
    let h2 = p.add_host("flaky", 1e8);
    let l = p.add_link("wire", 1e7, 1e-3);
    p.add_route_symmetric(h1, h2, vec![l]);
    // dies at t=2, back at t=3
    p.set_host_state_trace(h2, Trace::new(vec![(2.0, 0.0), (1.0, 1.0)]));

    let mut sim = Simulator::new(Config::new(), p);
    let runs = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    sim.register_restartable("daemon", h2, {
        let runs = Arc::clone(&runs);
        let failures = Arc::clone(&failures);
        move |h| {
            runs.fetch_add(1, Ordering::SeqCst);
            let failures = Arc::clone(&failures);
            h.on_exit(move |failed| {
                if failed {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            });
            h.sleep(5.0)
        }
    });
    // keeps the simulation alive across the outage
    sim.register("anchor", h1, |h| h.sleep(5.0));

    sim.run().unwrap();
    // first run killed by the outage at t=2, second run restarts at t=3
    // and sleeps its full five seconds
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(close(sim.clock(), 8.0), "clock is {}", sim.clock());
}
