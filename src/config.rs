//! Simulation configuration surface
//!
//! One flat `key:value` map, mirrored into a typed struct at startup. The
//! key names are part of the public interface; setting a key nobody knows
//! is a hard error rather than a silent typo.

use crate::err::SimError;
use std::str::FromStr;

/// Which context backend runs the actors.
///
/// This build carries the OS-thread backend only; the assembly and
/// ucontext-style factories of other builds are accepted by the parser and
/// fall back to [`ContextFactory::Thread`] with a warning. `Serial` is the
/// thread backend pinned to one-at-a-time dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFactory {
    /// Hand-written assembly switching (not compiled in).
    Raw,
    /// Boost-style fcontext switching (not compiled in).
    Boost,
    /// POSIX ucontext switching (not compiled in).
    Ucontext,
    /// One OS thread per actor, blocking handshake with maestro.
    Thread,
    /// Thread backend, strictly serial dispatch.
    Serial,
}

impl FromStr for ContextFactory {
    type Err = ();

    fn from_str(s: &str) -> Result<ContextFactory, ()> {
        match s {
            "raw" => Ok(ContextFactory::Raw),
            "boost" => Ok(ContextFactory::Boost),
            "ucontext" => Ok(ContextFactory::Ucontext),
            "thread" => Ok(ContextFactory::Thread),
            "serial" => Ok(ContextFactory::Serial),
            _ => Err(()),
        }
    }
}

/// Typed view of the configuration map.
///
/// Defaults match the documented ones; every field can be overridden
/// through [`Config::set`] before the simulator is built.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relative tolerance of the max-min solver.
    pub maxmin_precision: f64,
    /// Relative tolerance of action-progress arithmetic in the models.
    pub surf_precision: f64,
    /// Default per-constraint concurrency limit, `-1` for unlimited.
    pub concurrency_limit: i32,

    /// Multiplier applied to the summed route latency.
    pub latency_factor: f64,
    /// Multiplier applied to link bandwidths when bounding a flow.
    pub bandwidth_factor: f64,
    /// Additive per-link weight correction `weight_S / bandwidth`.
    pub weight_s: f64,
    /// TCP window constant γ; a flow is bounded by `γ / (2·latency)`.
    /// Non-positive means no window bound.
    pub tcp_gamma: f64,
    /// Model TCP ACK back-pressure by consuming 5% of the reverse route.
    pub fullduplex: bool,

    /// Context backend selection.
    pub context_factory: ContextFactory,
    /// Actor stack size, in KiB.
    pub stack_size_kib: usize,
    /// Minimum number of runnable actors before parallel dispatch is used.
    pub parallel_threshold: usize,
    /// How many actors may run concurrently within one tick.
    pub context_nthreads: usize,

    /// Record snapshot simcalls (the checker itself is an external tool).
    pub model_check: bool,
    /// Minimum virtual-time increment returned by successive `wtime` calls.
    pub smpi_wtime: f64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            maxmin_precision: 1e-5,
            surf_precision: 1e-5,
            concurrency_limit: -1,

            latency_factor: 1.0,
            bandwidth_factor: 1.0,
            weight_s: 0.0,
            tcp_gamma: 0.0,
            fullduplex: false,

            context_factory: ContextFactory::Thread,
            stack_size_kib: 128,
            parallel_threshold: 2,
            context_nthreads: 1,

            model_check: false,
            smpi_wtime: 0.0,
        }
    }
}

impl Config {
    /// Creates the default configuration.
    pub fn new() -> Config {
        Config::default()
    }

    /// Sets one configuration key from its string form.
    ///
    /// Unrecognized keys and unparsable values are rejected with
    /// [`SimError::Arg`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SimError> {
        fn num<T: FromStr>(key: &str, value: &str) -> Result<T, SimError> {
            value
                .parse::<T>()
                .map_err(|_| SimError::Arg(format!("bad value '{}' for key '{}'", value, key)))
        }

        match key {
            "maxmin/precision" => self.maxmin_precision = num(key, value)?,
            "surf/precision" => self.surf_precision = num(key, value)?,
            "maxmin/concurrency-limit" => self.concurrency_limit = num(key, value)?,

            "network/latency-factor" => self.latency_factor = num(key, value)?,
            "network/bandwidth-factor" => self.bandwidth_factor = num(key, value)?,
            "network/weight-S" => self.weight_s = num(key, value)?,
            "network/TCP-gamma" => self.tcp_gamma = num(key, value)?,
            "network/fullduplex" => self.fullduplex = num(key, value)?,

            "context/factory" => {
                self.context_factory = value
                    .parse()
                    .map_err(|_| SimError::Arg(format!("unknown context factory '{}'", value)))?
            }
            "context/stack-size" => self.stack_size_kib = num(key, value)?,
            "context/parallel-threshold" => self.parallel_threshold = num(key, value)?,
            "context/nthreads" => self.context_nthreads = num(key, value)?,

            "model-check" => self.model_check = num(key, value)?,
            "smpi/wtime" => self.smpi_wtime = num(key, value)?,

            _ => return Err(SimError::Arg(format!("unrecognized config key '{}'", key))),
        }
        Ok(())
    }

    /// Applies a batch of `key:value` strings, as found on the command line.
    pub fn set_all<'a>(&mut self, pairs: impl IntoIterator<Item = &'a str>) -> Result<(), SimError> {
        for pair in pairs {
            let mut split = pair.splitn(2, ':');
            let key = split.next().unwrap_or("");
            let value = split
                .next()
                .ok_or_else(|| SimError::Arg(format!("expected key:value, got '{}'", pair)))?;
            self.set(key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::config::*;

    #[test]
    fn defaults() {
        let c = Config::new();
        assert_eq!(c.maxmin_precision, 1e-5);
        assert_eq!(c.concurrency_limit, -1);
        assert_eq!(c.context_factory, ContextFactory::Thread);
        assert_eq!(c.stack_size_kib, 128);
    }

    #[test]
    fn set_known_keys() {
        let mut c = Config::new();
        c.set("maxmin/precision", "1e-9").unwrap();
        c.set("network/TCP-gamma", "20000").unwrap();
        c.set("context/factory", "serial").unwrap();
        c.set("context/nthreads", "4").unwrap();
        assert_eq!(c.maxmin_precision, 1e-9);
        assert_eq!(c.tcp_gamma, 20000.0);
        assert_eq!(c.context_factory, ContextFactory::Serial);
        assert_eq!(c.context_nthreads, 4);
    }

    #[test]
    fn reject_unknown_key() {
        let mut c = Config::new();
        assert!(c.set("network/tcp_gamma", "1").is_err());
        assert!(c.set("", "1").is_err());
    }

    #[test]
    fn reject_bad_value() {
        let mut c = Config::new();
        assert!(c.set("surf/precision", "fast").is_err());
        assert!(c.set("context/factory", "fibers").is_err());
    }

    #[test]
    fn set_all_pairs() {
        let mut c = Config::new();
        c.set_all(vec!["model-check:true", "smpi/wtime:1e-8"]).unwrap();
        assert!(c.model_check);
        assert_eq!(c.smpi_wtime, 1e-8);
        assert!(c.set_all(vec!["no-colon"]).is_err());
    }
}
