//! Solver benchmark: repeated incremental solves over a mid-sized system.

use criterion::{criterion_group, criterion_main, Criterion};
use gridsim::lmm::System;

/// A bipartite-ish system: `n_cnst` resources, `n_var` flows crossing 3 of
/// them each, every third flow rate-bounded.
fn build(n_cnst: usize, n_var: usize, selective: bool) -> System {
    let mut sys = System::new(selective);
    let mut cnsts = Vec::with_capacity(n_cnst);
    for i in 0..n_cnst {
        cnsts.push(sys.new_constraint(i, 1.0 + (i % 7) as f64));
    }
    for i in 0..n_var {
        let bound = if i % 3 == 0 { 2.0 } else { -1.0 };
        let var = sys.new_variable(i, 1.0, bound, 3);
        for k in 0..3 {
            sys.expand(cnsts[(i * 3 + k) % n_cnst], var, 1.0);
        }
    }
    sys
}

fn bench_solve(c: &mut Criterion) {
    c.bench_function("full solve 100x300", |b| {
        let mut sys = build(100, 300, false);
        let cnst = sys.new_constraint(100, 5.0);
        let var = sys.new_variable(300, 1.0, -1.0, 1);
        sys.expand(cnst, var, 1.0);
        let mut bump = 0;
        b.iter(|| {
            bump += 1;
            // poke the system so every iteration actually solves
            sys.update_constraint_bound(cnst, 5.0 + (bump % 10) as f64);
            sys.solve();
        });
    });

    c.bench_function("selective solve 100x300", |b| {
        let mut sys = build(100, 300, true);
        let cnst = sys.new_constraint(100, 5.0);
        let var = sys.new_variable(300, 1.0, -1.0, 1);
        sys.expand(cnst, var, 1.0);
        let mut bump = 0;
        b.iter(|| {
            bump += 1;
            sys.update_constraint_bound(cnst, 5.0 + (bump % 10) as f64);
            sys.solve();
        });
    });
}

criterion_group!(benches, bench_solve);
criterion_main!(benches);
