//! End-to-end scenarios over a tiny two-host platform.

use gridsim::{Config, HostId, Platform, SimError, Simulator, Trace};
use std::sync::{Arc, Mutex};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + b.abs())
}

/// H1 (100 Mflop/s) and H2, joined by a 10 MB/s, 1 ms link.
fn dumbbell() -> (Platform, HostId, HostId, gridsim::LinkId) {
    let mut p = Platform::new();
    let h1 = p.add_host("H1", 1e8);
    let h2 = p.add_host("H2", 1e8);
    let l = p.add_link("L", 1e7, 1e-3);
    p.add_route_symmetric(h1, h2, vec![l]);
    (p, h1, h2, l)
}

#[test]
fn send_then_compute() {
    let (p, h1, h2, _) = dumbbell();
    let mut sim = Simulator::new(Config::new(), p);
    let recv_end = Arc::new(Mutex::new(0.0));

    sim.register("A", h1, |h| {
        let rdv = h.rdv_create(Some("job"));
        h.send(rdv, 1e7, Vec::new())?;
        h.execute(1e9)
    });
    let sink = Arc::clone(&recv_end);
    sim.register("B", h2, move |h| {
        let rdv = h.rdv_create(Some("job"));
        h.recv(rdv)?;
        *sink.lock().unwrap() = h.now();
        Ok(())
    });

    sim.run().unwrap();
    // the 10 MB transfer takes 1 s plus the 1 ms latency, the 1 Gflop
    // computation another 10 s
    let recv_end = *recv_end.lock().unwrap();
    assert!(close(recv_end, 1.001), "receive ended at {}", recv_end);
    assert!(close(sim.clock(), 11.001), "clock is {}", sim.clock());
}

#[test]
fn contention_splits_the_link() {
    fn run_once() -> Vec<f64> {
        let (p, h1, h2, _) = dumbbell();
        let mut sim = Simulator::new(Config::new(), p);
        let ends: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..2 {
            let name = format!("pair-{}", i);
            let tx_name = name.clone();
            sim.register(&format!("A{}", i), h1, move |h| {
                let rdv = h.rdv_create(Some(&tx_name));
                h.send(rdv, 1e7, Vec::new())
            });
            let sink = Arc::clone(&ends);
            sim.register(&format!("B{}", i), h2, move |h| {
                let rdv = h.rdv_create(Some(&name));
                h.recv(rdv)?;
                sink.lock().unwrap().push(h.now());
                Ok(())
            });
        }
        sim.run().unwrap();
        let ends = ends.lock().unwrap().clone();
        ends
    }

    let ends = run_once();
    assert_eq!(ends.len(), 2);
    assert!(close(ends[0], 2.001), "flow ended at {}", ends[0]);
    assert!(close(ends[1], 2.001), "flow ended at {}", ends[1]);

    // rerunning yields a bit-identical trajectory
    let again = run_once();
    assert_eq!(ends, again);
}

#[test]
fn late_sender_triggers_the_match() {
    let (p, h1, h2, _) = dumbbell();
    let mut sim = Simulator::new(Config::new(), p);
    let unblocked: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    let tx_sink = Arc::clone(&unblocked);
    sim.register("A", h1, move |h| {
        h.sleep(5.0)?;
        let rdv = h.rdv_create(Some("meet"));
        h.send(rdv, 1.0, Vec::new())?;
        tx_sink.lock().unwrap().push(h.now());
        Ok(())
    });
    let rx_sink = Arc::clone(&unblocked);
    sim.register("B", h2, move |h| {
        let rdv = h.rdv_create(Some("meet"));
        let payload = h.recv(rdv)?;
        assert!(payload.is_some());
        rx_sink.lock().unwrap().push(h.now());
        Ok(())
    });

    sim.run().unwrap();
    // blocked from t=0, matched at t=5, then latency and a one-byte transfer
    let expected = 5.0 + 1e-3 + 1.0 / 1e7;
    for &t in unblocked.lock().unwrap().iter() {
        assert!(close(t, expected), "unblocked at {}, expected {}", t, expected);
    }
}

#[test]
fn receive_timeout_raises_timeout_error() {
    let (p, _, h2, _) = dumbbell();
    let mut sim = Simulator::new(Config::new(), p);
    let observed = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&observed);
    sim.register("B", h2, move |h| {
        let rdv = h.rdv_create(Some("nobody"));
        let outcome = h.recv_timeout(rdv, 3.0);
        *sink.lock().unwrap() = Some((h.now(), outcome));
        Ok(())
    });

    sim.run().unwrap();
    let observed = observed.lock().unwrap().take().unwrap();
    assert!(close(observed.0, 3.0), "timed out at {}", observed.0);
    match observed.1 {
        Err(SimError::Timeout(_)) => {}
        other => panic!("expected a timeout, got {:?}", other),
    }
}

#[test]
fn link_failure_raises_network_error_on_both_sides() {
    let (mut p, h1, h2, l) = dumbbell();
    // the link dies at t=2
    p.set_link_state_trace(l, Trace::new(vec![(2.0, 0.0)]));

    let mut sim = Simulator::new(Config::new(), p);
    let outcomes: Arc<Mutex<Vec<(f64, Result<(), SimError>)>>> =
        Arc::new(Mutex::new(Vec::new()));

    let tx_sink = Arc::clone(&outcomes);
    sim.register("A", h1, move |h| {
        let rdv = h.rdv_create(Some("doomed"));
        let out = h.send(rdv, 1e8, Vec::new());
        tx_sink.lock().unwrap().push((h.now(), out));
        Ok(())
    });
    let rx_sink = Arc::clone(&outcomes);
    sim.register("B", h2, move |h| {
        let rdv = h.rdv_create(Some("doomed"));
        let out = h.recv(rdv).map(|_| ());
        rx_sink.lock().unwrap().push((h.now(), out));
        Ok(())
    });

    sim.run().unwrap();
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    for (t, out) in outcomes.iter() {
        assert!(close(*t, 2.0), "failure observed at {}", t);
        match out {
            Err(SimError::Network(_)) => {}
            other => panic!("expected a network error, got {:?}", other),
        }
    }
}
