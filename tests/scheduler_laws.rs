//! Basic timing laws of the scheduler and the sharing model.

use gridsim::{Config, Platform, SharingPolicy, Simulator};
use std::sync::{Arc, Mutex};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + b.abs())
}

/// One host, 100 Mflop/s.
fn lone_host() -> (Platform, gridsim::HostId) {
    let mut p = Platform::new();
    let h = p.add_host("node", 1e8);
    (p, h)
}

/// Two hosts joined by one 10 MB/s, 1 ms link.
fn dumbbell() -> (Platform, gridsim::HostId, gridsim::HostId, gridsim::LinkId) {
    let mut p = Platform::new();
    let h1 = p.add_host("sender", 1e8);
    let h2 = p.add_host("receiver", 1e8);
    let l = p.add_link("wire", 1e7, 1e-3);
    p.add_route_symmetric(h1, h2, vec![l]);
    (p, h1, h2, l)
}

#[test]
fn two_sleeps_end_at_two() {
    let (p, h) = lone_host();
    let mut sim = Simulator::new(Config::new(), p);
    sim.register("sleeper", h, |h| {
        h.sleep(1.0)?;
        h.sleep(1.0)?;
        Ok(())
    });
    sim.run().unwrap();
    assert!(close(sim.clock(), 2.0), "clock is {}", sim.clock());
}

#[test]
fn execute_at_host_speed() {
    let (p, h) = lone_host();
    let mut sim = Simulator::new(Config::new(), p);
    sim.register("worker", h, |h| h.execute(1e9));
    sim.run().unwrap();
    // 1 Gflop on 100 Mflop/s
    assert!(close(sim.clock(), 10.0), "clock is {}", sim.clock());
}

#[test]
fn uncontended_send_is_latency_plus_transfer() {
    let (p, h1, h2, _) = dumbbell();
    let mut sim = Simulator::new(Config::new(), p);
    sim.register("tx", h1, |h| {
        let rdv = h.rdv_create(Some("law"));
        h.send(rdv, 1e7, Vec::new())
    });
    sim.register("rx", h2, |h| {
        let rdv = h.rdv_create(Some("law"));
        h.recv(rdv).map(|_| ())
    });
    sim.run().unwrap();
    assert!(close(sim.clock(), 1.001), "clock is {}", sim.clock());
}

#[test]
fn two_flows_each_get_half() {
    let (p, h1, h2, _) = dumbbell();
    let mut sim = Simulator::new(Config::new(), p);
    let ends: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    for i in 0..2 {
        let name = format!("law-{}", i);
        let tx_name = name.clone();
        sim.register(&format!("tx-{}", i), h1, move |h| {
            let rdv = h.rdv_create(Some(&tx_name));
            h.send(rdv, 1e7, Vec::new())
        });
        let sink = Arc::clone(&ends);
        sim.register(&format!("rx-{}", i), h2, move |h| {
            let rdv = h.rdv_create(Some(&name));
            h.recv(rdv)?;
            sink.lock().unwrap().push(h.now());
            Ok(())
        });
    }

    sim.run().unwrap();
    let ends = ends.lock().unwrap();
    assert_eq!(ends.len(), 2);
    // both flows share the 10 MB/s link, so both take twice as long
    assert!(close(ends[0], 2.001), "flow 0 ended at {}", ends[0]);
    assert!(close(ends[1], 2.001), "flow 1 ended at {}", ends[1]);
    assert!((ends[0] - ends[1]).abs() < 1e-9);
}

#[test]
fn fatpipe_gives_full_bandwidth_to_everyone() {
    let mut p = Platform::new();
    let h1 = p.add_host("sender", 1e8);
    let h2 = p.add_host("receiver", 1e8);
    let l = p.add_link("backbone", 1e7, 1e-3);
    p.set_link_policy(l, SharingPolicy::Fatpipe);
    p.add_route_symmetric(h1, h2, vec![l]);

    let mut sim = Simulator::new(Config::new(), p);
    let ends: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let name = format!("fat-{}", i);
        let tx_name = name.clone();
        sim.register(&format!("tx-{}", i), h1, move |h| {
            let rdv = h.rdv_create(Some(&tx_name));
            h.send(rdv, 1e7, Vec::new())
        });
        let sink = Arc::clone(&ends);
        sim.register(&format!("rx-{}", i), h2, move |h| {
            let rdv = h.rdv_create(Some(&name));
            h.recv(rdv)?;
            sink.lock().unwrap().push(h.now());
            Ok(())
        });
    }
    sim.run().unwrap();
    for &end in ends.lock().unwrap().iter() {
        assert!(close(end, 1.001), "flow ended at {}", end);
    }
}

#[test]
fn tcp_window_caps_the_rate() {
    let (p, h1, h2, _) = dumbbell();
    let mut config = Config::new();
    // gamma / (2 * 1 ms) = 5 MB/s, half the link bandwidth
    config.set("network/TCP-gamma", "10000").unwrap();
    let mut sim = Simulator::new(config, p);
    sim.register("tx", h1, |h| {
        let rdv = h.rdv_create(Some("windowed"));
        h.send(rdv, 1e7, Vec::new())
    });
    sim.register("rx", h2, |h| {
        let rdv = h.rdv_create(Some("windowed"));
        h.recv(rdv).map(|_| ())
    });
    sim.run().unwrap();
    assert!(close(sim.clock(), 2.001), "clock is {}", sim.clock());
}

#[test]
fn parallel_dispatch_reaches_the_same_times() {
    let (p, h) = lone_host();
    let mut config = Config::new();
    config.set("context/nthreads", "4").unwrap();
    let mut sim = Simulator::new(config, p);
    for i in 0..8 {
        sim.register(&format!("worker-{}", i), h, |h| {
            h.sleep(1.0)?;
            h.execute(1e8)
        });
    }
    sim.run().unwrap();
    // 8 concurrent unit computations share the host for 8 s after the sleep
    assert!(close(sim.clock(), 9.0), "clock is {}", sim.clock());
}

#[test]
fn mutex_grants_in_arrival_order() {
    let (p, h) = lone_host();
    let mut sim = Simulator::new(Config::new(), p);
    let order: Arc<Mutex<Vec<(usize, f64)>>> = Arc::new(Mutex::new(Vec::new()));

    // created by a bootstrap actor so everyone shares the same mutex
    let order_boot = Arc::clone(&order);
    sim.register("boot", h, move |handle| {
        let mutex = handle.mutex_create();
        for i in 0..4usize {
            let sink = Arc::clone(&order_boot);
            handle.spawn(&format!("locker-{}", i), handle.host(), move |h| {
                h.sleep(i as f64)?;
                h.mutex_lock(mutex)?;
                sink.lock().unwrap().push((i, h.now()));
                h.sleep(10.0)?;
                h.mutex_unlock(mutex);
                Ok(())
            });
        }
        Ok(())
    });

    sim.run().unwrap();
    let order = order.lock().unwrap();
    let ids: Vec<usize> = order.iter().map(|&(i, _)| i).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    let times: Vec<f64> = order.iter().map(|&(_, t)| t).collect();
    assert!(close(times[0], 0.0));
    assert!(close(times[1], 10.0));
    assert!(close(times[2], 20.0));
    assert!(close(times[3], 30.0));
    assert!(close(sim.clock(), 40.0), "clock is {}", sim.clock());
}
