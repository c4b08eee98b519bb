//! Time-stamped value traces
//!
//! A trace is a plain sequence of `(relative time, value)` pairs describing
//! a resource's trajectory (host speed, link bandwidth, on/off state...).
//! Installing a trace on a resource turns it into a stream of dated events;
//! the manager below merges every installed stream into one min-heap so the
//! maestro loop can treat "next external event" as just another candidate
//! for the next tick boundary.

use crate::Time;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// An externally supplied trajectory for one resource metric.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<(Time, f64)>,
}

impl Trace {
    /// Builds a trace from `(offset since previous event, value)` pairs.
    pub fn new(events: Vec<(Time, f64)>) -> Trace {
        assert!(
            events.iter().all(|&(dt, _)| dt >= 0.0),
            "trace offsets must be non-negative"
        );
        Trace { events }
    }

    fn get(&self, ix: usize) -> Option<(Time, f64)> {
        self.events.get(ix).copied()
    }
}

#[derive(Debug)]
struct History<T> {
    trace: Trace,
    target: T,
    next: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    date: Time,
    seq: u64,
    hist: usize,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap pops the earliest date, FIFO among ties
        other
            .date
            .partial_cmp(&self.date)
            .unwrap_or(Ordering::Equal)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.seq == other.seq
    }
}
impl Eq for Entry {}

/// Merges every installed trace into one dated event stream.
#[derive(Debug)]
pub(crate) struct TraceMgr<T> {
    histories: Vec<History<T>>,
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl<T: Copy> TraceMgr<T> {
    pub fn new() -> TraceMgr<T> {
        TraceMgr {
            histories: Vec::new(),
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Installs `trace` on `target`, with its first event offset from
    /// `start`.
    pub fn add(&mut self, trace: Trace, start: Time, target: T) {
        let hist = History {
            trace,
            target,
            next: 0,
        };
        if let Some((dt, _)) = hist.trace.get(0) {
            self.histories.push(hist);
            self.heap.push(Entry {
                date: start + dt,
                seq: self.seq,
                hist: self.histories.len() - 1,
            });
            self.seq += 1;
        }
    }

    /// Date of the next event, if any.
    pub fn next_date(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.date)
    }

    /// Pops every event dated up to `now` (inclusive), in date order, FIFO
    /// among equal dates, scheduling each history's follow-up event.
    pub fn pop_until(&mut self, now: Time) -> Vec<(Time, T, f64)> {
        let mut fired = Vec::new();
        while let Some(&entry) = self.heap.peek() {
            if entry.date > now {
                break;
            }
            self.heap.pop();
            let hist = &mut self.histories[entry.hist];
            let (_, value) = hist.trace.get(hist.next).unwrap();
            fired.push((entry.date, hist.target, value));
            hist.next += 1;
            if let Some((dt, _)) = hist.trace.get(hist.next) {
                self.heap.push(Entry {
                    date: entry.date + dt,
                    seq: self.seq,
                    hist: entry.hist,
                });
                self.seq += 1;
            }
        }
        fired
    }
}

#[cfg(test)]
mod test {
    use crate::trace::*;

    #[test]
    fn empty_trace_produces_nothing() {
        let mut mgr: TraceMgr<u32> = TraceMgr::new();
        mgr.add(Trace::new(vec![]), 0.0, 7);
        assert_eq!(mgr.next_date(), None);
        assert!(mgr.pop_until(100.0).is_empty());
    }

    #[test]
    fn relative_offsets_accumulate() {
        let mut mgr: TraceMgr<u32> = TraceMgr::new();
        mgr.add(Trace::new(vec![(1.0, 10.0), (2.0, 20.0), (0.5, 5.0)]), 1.0, 1);

        assert_eq!(mgr.next_date(), Some(2.0));
        let fired = mgr.pop_until(2.0);
        assert_eq!(fired, vec![(2.0, 1, 10.0)]);

        assert_eq!(mgr.next_date(), Some(4.0));
        let fired = mgr.pop_until(10.0);
        assert_eq!(fired, vec![(4.0, 1, 20.0), (4.5, 1, 5.0)]);
        assert_eq!(mgr.next_date(), None);
    }

    #[test]
    fn equal_dates_fire_in_install_order() {
        let mut mgr: TraceMgr<u32> = TraceMgr::new();
        mgr.add(Trace::new(vec![(3.0, 1.0)]), 0.0, 1);
        mgr.add(Trace::new(vec![(3.0, 2.0)]), 0.0, 2);
        let fired = mgr.pop_until(3.0);
        assert_eq!(fired, vec![(3.0, 1, 1.0), (3.0, 2, 2.0)]);
    }
}
