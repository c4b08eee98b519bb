//! Platform description: hosts, links, routes
//!
//! The kernel does not read platform files; whatever parses them drives the
//! callback-style interface below (one call per declaration) and hands the
//! finished [`Platform`] to the simulator, which materializes a solver
//! constraint per host and per link.

pub use crate::lmm::SharingPolicy;
use crate::trace::Trace;
use crate::Time;
use std::collections::HashMap;

/// Handle on a declared host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub(crate) usize);

/// Handle on a declared link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub(crate) usize);

/// One computing host.
#[derive(Debug)]
pub(crate) struct HostDecl {
    pub name: String,
    /// Peak speed, in flop/s.
    pub speed: f64,
    /// Relative availability trajectory (scale factors).
    pub speed_trace: Option<Trace>,
    /// On/off trajectory (value > 0 means on).
    pub state_trace: Option<Trace>,
}

/// One network link.
#[derive(Debug)]
pub(crate) struct LinkDecl {
    pub name: String,
    /// Peak bandwidth, in bytes/s.
    pub bandwidth: f64,
    /// Latency, in seconds.
    pub latency: Time,
    pub policy: SharingPolicy,
    pub bandwidth_trace: Option<Trace>,
    pub latency_trace: Option<Trace>,
    pub state_trace: Option<Trace>,
}

/// The declared topology, built one callback at a time.
#[derive(Debug, Default)]
pub struct Platform {
    pub(crate) hosts: Vec<HostDecl>,
    pub(crate) links: Vec<LinkDecl>,
    host_names: HashMap<String, HostId>,
    link_names: HashMap<String, LinkId>,
    routes: HashMap<(usize, usize), Vec<LinkId>>,
}

impl Platform {
    /// Creates an empty platform.
    pub fn new() -> Platform {
        Platform::default()
    }

    /// Declares a host with the given peak speed, in flop/s.
    pub fn add_host(&mut self, name: &str, speed: f64) -> HostId {
        assert!(speed > 0.0, "host speed must be positive");
        assert!(
            !self.host_names.contains_key(name),
            "host '{}' declared twice",
            name
        );
        let id = HostId(self.hosts.len());
        self.hosts.push(HostDecl {
            name: name.to_string(),
            speed,
            speed_trace: None,
            state_trace: None,
        });
        self.host_names.insert(name.to_string(), id);
        id
    }

    /// Installs a relative-availability trace on a host.
    pub fn set_host_speed_trace(&mut self, host: HostId, trace: Trace) {
        self.hosts[host.0].speed_trace = Some(trace);
    }

    /// Installs an on/off trace on a host (value > 0 means on).
    pub fn set_host_state_trace(&mut self, host: HostId, trace: Trace) {
        self.hosts[host.0].state_trace = Some(trace);
    }

    /// Declares a link with the given bandwidth (bytes/s) and latency (s).
    pub fn add_link(&mut self, name: &str, bandwidth: f64, latency: Time) -> LinkId {
        assert!(bandwidth > 0.0, "link bandwidth must be positive");
        assert!(
            !self.link_names.contains_key(name),
            "link '{}' declared twice",
            name
        );
        let id = LinkId(self.links.len());
        self.links.push(LinkDecl {
            name: name.to_string(),
            bandwidth,
            latency,
            policy: SharingPolicy::Shared,
            bandwidth_trace: None,
            latency_trace: None,
            state_trace: None,
        });
        self.link_names.insert(name.to_string(), id);
        id
    }

    /// Changes a link's sharing policy (links start out shared).
    pub fn set_link_policy(&mut self, link: LinkId, policy: SharingPolicy) {
        self.links[link.0].policy = policy;
    }

    /// Installs a bandwidth trace on a link (absolute peaks, bytes/s).
    pub fn set_link_bandwidth_trace(&mut self, link: LinkId, trace: Trace) {
        self.links[link.0].bandwidth_trace = Some(trace);
    }

    /// Installs a latency trace on a link (absolute latencies, seconds).
    pub fn set_link_latency_trace(&mut self, link: LinkId, trace: Trace) {
        self.links[link.0].latency_trace = Some(trace);
    }

    /// Installs an on/off trace on a link (value > 0 means on).
    pub fn set_link_state_trace(&mut self, link: LinkId, trace: Trace) {
        self.links[link.0].state_trace = Some(trace);
    }

    /// Declares the one-way route between two hosts.
    pub fn add_route(&mut self, src: HostId, dst: HostId, links: Vec<LinkId>) {
        self.routes.insert((src.0, dst.0), links);
    }

    /// Declares the same route in both directions.
    pub fn add_route_symmetric(&mut self, a: HostId, b: HostId, links: Vec<LinkId>) {
        self.routes.insert((a.0, b.0), links.clone());
        self.routes.insert((b.0, a.0), links);
    }

    /// Looks a host up by name.
    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.host_names.get(name).copied()
    }

    /// Looks a link up by name.
    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.link_names.get(name).copied()
    }

    /// A host's declared name.
    pub fn host_name(&self, host: HostId) -> &str {
        &self.hosts[host.0].name
    }

    /// Number of declared hosts.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Handle of the `ix`-th declared host.
    pub fn host_at(&self, ix: usize) -> HostId {
        assert!(ix < self.hosts.len(), "host index out of range");
        HostId(ix)
    }

    pub(crate) fn route(&self, src: HostId, dst: HostId) -> Option<&[LinkId]> {
        self.routes.get(&(src.0, dst.0)).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod test {
    use crate::platform::*;

    #[test]
    fn build_and_look_up() {
        let mut p = Platform::new();
        let h1 = p.add_host("alpha", 1e8);
        let h2 = p.add_host("beta", 1e8);
        let l = p.add_link("wire", 1e7, 1e-3);
        p.add_route_symmetric(h1, h2, vec![l]);

        assert_eq!(p.host_by_name("alpha"), Some(h1));
        assert_eq!(p.host_by_name("gamma"), None);
        assert_eq!(p.link_by_name("wire"), Some(l));
        assert_eq!(p.route(h1, h2), Some(&[l][..]));
        assert_eq!(p.route(h2, h1), Some(&[l][..]));
        assert_eq!(p.host_name(h2), "beta");
    }

    #[test]
    #[should_panic]
    fn duplicate_host_name_panics() {
        let mut p = Platform::new();
        p.add_host("twin", 1e8);
        p.add_host("twin", 1e8);
    }
}
