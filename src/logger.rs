//! slog drain for the CLI driver
//!
//! The kernel only ever talks to an abstract `Logger`; this drain is the
//! binary's cheap way of watching it work. Every record becomes exactly one
//! stamped line, whatever its level, so the stream stays grep- and
//! sort-friendly next to the simulator's CSV output on stdout.

use slog::{Drain, OwnedKVList, Record};
use std::io;
use std::sync::Mutex;
use std::time::Instant;

/// One record per line: `seconds-since-start level message`.
#[derive(Debug)]
pub struct LineLogger<W: io::Write> {
    out: Mutex<W>,
    epoch: Instant,
}

impl<W> LineLogger<W>
where
    W: io::Write,
{
    /// Wraps a writer; records are stamped relative to this call.
    pub fn new(out: W) -> LineLogger<W> {
        LineLogger {
            out: Mutex::new(out),
            epoch: Instant::now(),
        }
    }
}

impl<W> Drain for LineLogger<W>
where
    W: io::Write,
{
    type Ok = ();
    type Err = io::Error;

    fn log(&self, record: &Record, _values: &OwnedKVList) -> io::Result<()> {
        let stamp = self.epoch.elapsed().as_secs_f64();
        let mut out = self.out.lock().unwrap();
        writeln!(
            out,
            "{:>12.6} {} {}",
            stamp,
            record.level().as_short_str(),
            record.msg()
        )
    }
}
