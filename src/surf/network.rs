//! Network model
//!
//! One solver constraint per link. A communication holds one variable
//! expanded with coefficient 1 on every link of its route (and, in
//! full-duplex mode, with 0.05 on the reverse route to model the ACK
//! back-pressure). Until the a-priori latency has elapsed the variable's
//! weight is zero and no bandwidth is consumed; the flow is bounded by the
//! user rate, the factored bandwidth and the TCP window `γ / (2·latency)`.

use crate::config::Config;
use crate::lmm;
use crate::platform::{HostId, LinkId, Platform, SharingPolicy};
use crate::precision::update;
use crate::surf::{ActionArena, ActionId, ActionKind, ActionState};
use crate::{Time, NO_MAX_DURATION};

#[derive(Debug)]
struct Link {
    constraint: lmm::ConstraintId,
    peak: f64,
    scale: f64,
    latency: Time,
    on: bool,
}

/// The model owning every link constraint and communication action.
#[derive(Debug)]
pub(crate) struct NetworkModel {
    pub sys: lmm::System,
    links: Vec<Link>,
    running: Vec<ActionId>,
    precision: f64,

    latency_factor: f64,
    bandwidth_factor: f64,
    weight_s: f64,
    tcp_gamma: f64,
    fullduplex: bool,

    /// Size-dependent overrides of the constant factors.
    latency_factor_cb: Option<fn(f64) -> f64>,
    bandwidth_factor_cb: Option<fn(f64) -> f64>,
}

impl NetworkModel {
    pub fn new(platform: &Platform, config: &Config) -> NetworkModel {
        let mut sys = lmm::System::new(true);
        sys.set_precision(config.maxmin_precision);
        sys.set_default_concurrency_limit(config.concurrency_limit);

        let links = platform
            .links
            .iter()
            .enumerate()
            .map(|(ix, decl)| {
                let constraint = sys.new_constraint(ix, config.bandwidth_factor * decl.bandwidth);
                if decl.policy == SharingPolicy::Fatpipe {
                    sys.set_sharing_policy(constraint, SharingPolicy::Fatpipe);
                }
                Link {
                    constraint,
                    peak: decl.bandwidth,
                    scale: 1.0,
                    latency: decl.latency,
                    on: true,
                }
            })
            .collect();

        NetworkModel {
            sys,
            links,
            running: Vec::new(),
            precision: config.surf_precision,
            latency_factor: config.latency_factor,
            bandwidth_factor: config.bandwidth_factor,
            weight_s: config.weight_s,
            tcp_gamma: config.tcp_gamma,
            fullduplex: config.fullduplex,
            latency_factor_cb: None,
            bandwidth_factor_cb: None,
        }
    }

    /// Replaces the constant factors by size-dependent hooks.
    pub fn set_factor_callbacks(&mut self, lat: fn(f64) -> f64, bw: fn(f64) -> f64) {
        self.latency_factor_cb = Some(lat);
        self.bandwidth_factor_cb = Some(bw);
    }

    fn latency_factor_of(&self, size: f64) -> f64 {
        self.latency_factor_cb.map_or(self.latency_factor, |f| f(size))
    }

    fn bandwidth_factor_of(&self, size: f64) -> f64 {
        self.bandwidth_factor_cb.map_or(self.bandwidth_factor, |f| f(size))
    }

    fn window_bound(&self, rate: f64, lat_current: Time) -> f64 {
        if self.tcp_gamma > 0.0 && lat_current > 0.0 {
            let win = self.tcp_gamma / (2.0 * lat_current);
            if rate < 0.0 {
                win
            } else {
                rate.min(win)
            }
        } else {
            rate
        }
    }

    /// Enters a matched communication into the model: builds its variable,
    /// expands it along the route and starts the latency phase.
    pub fn start(
        &mut self,
        arena: &mut ActionArena,
        platform: &Platform,
        id: ActionId,
        src: HostId,
        dst: HostId,
        now: Time,
    ) {
        let route: Vec<LinkId> = platform
            .route(src, dst)
            .unwrap_or_else(|| {
                panic!(
                    "no route from '{}' to '{}'",
                    platform.host_name(src),
                    platform.host_name(dst)
                )
            })
            .to_vec();
        let back_route: Vec<LinkId> = if self.fullduplex {
            platform.route(dst, src).map(|r| r.to_vec()).unwrap_or_default()
        } else {
            Vec::new()
        };

        let failed = route.iter().any(|l| !self.links[l.0].on);
        let size = arena.get(id).comm().size;
        let user_rate = arena.get(id).comm().rate;

        let mut lat_sum = 0.0;
        let mut weight = 0.0;
        let mut bw_bound = -1.0;
        for l in &route {
            let link = &self.links[l.0];
            lat_sum += link.latency;
            weight += link.latency
                + if self.weight_s > 0.0 {
                    self.weight_s / (link.peak * link.scale)
                } else {
                    0.0
                };
            let factored = self.bandwidth_factor_of(size) * link.peak * link.scale;
            bw_bound = if bw_bound < 0.0 {
                factored
            } else {
                bw_bound.min(factored)
            };
        }

        let latency = lat_sum * self.latency_factor_of(size);
        let rate_bound = if user_rate < 0.0 {
            bw_bound
        } else {
            user_rate.min(bw_bound)
        };
        let steady_weight = if weight > 0.0 { weight } else { 1.0 };

        let var = self.sys.new_variable(
            id.0,
            if latency > 0.0 { 0.0 } else { steady_weight },
            -1.0,
            route.len() + back_route.len(),
        );
        self.sys
            .update_variable_bound(var, self.window_bound(rate_bound, lat_sum));
        for l in &route {
            self.sys.expand(self.links[l.0].constraint, var, 1.0);
        }
        // ACK back-pressure consumes a sliver of the reverse path
        for l in &back_route {
            self.sys.expand(self.links[l.0].constraint, var, 0.05);
        }

        let action = arena.get_mut(id);
        action.variable = Some(var);
        let data = action.comm_mut();
        data.latency = latency;
        data.lat_current = lat_sum;
        data.weight = steady_weight;
        data.rate = rate_bound;

        if failed {
            action.state = ActionState::LinkFailure;
            action.finish = now;
            self.sys.update_variable_weight(var, 0.0);
        } else {
            action.state = ActionState::Running;
            self.running.push(id);
        }
    }

    /// Smallest positive time until some running action changes state.
    pub fn share_resources(&mut self, arena: &ActionArena) -> Time {
        self.sys.solve();
        let mut min = f64::INFINITY;
        for &id in &self.running {
            let action = arena.get(id);
            let mut dt = f64::INFINITY;
            if let Some(var) = action.variable {
                let value = self.sys.variable_value(var);
                if value > 0.0 && action.remains > 0.0 {
                    dt = action.remains / value;
                }
            }
            if action.max_duration != NO_MAX_DURATION {
                dt = dt.min(action.max_duration);
            }
            let data = action.comm();
            if data.latency > 0.0 {
                dt = dt.min(data.latency);
            }
            min = min.min(dt);
        }
        min
    }

    /// Advances every running communication by `delta`: first through its
    /// latency phase, then at its solved bandwidth share.
    pub fn update_actions_state(
        &mut self,
        arena: &mut ActionArena,
        now: Time,
        delta: Time,
        finished: &mut Vec<ActionId>,
    ) {
        let mut still = Vec::with_capacity(self.running.len());
        for &id in &self.running {
            let var = arena.get(id).variable;
            let value = var.map(|v| self.sys.variable_value(v)).unwrap_or(0.0);
            let action = arena.get_mut(id);
            if action.state.is_over() {
                // failed by a resource event earlier this tick
                continue;
            }

            let suspended = action.suspended;
            let mut deltap = delta;
            if let ActionKind::Comm(data) = &mut action.kind {
                if data.latency > 0.0 {
                    if data.latency > deltap {
                        update(&mut data.latency, deltap, self.precision);
                        deltap = 0.0;
                    } else {
                        let elapsed = data.latency;
                        update(&mut deltap, elapsed, self.precision);
                        data.latency = 0.0;
                    }
                    if data.latency <= 0.0 && !suspended {
                        self.sys.update_variable_weight(var.unwrap(), data.weight);
                    }
                }
            }

            update(&mut action.remains, value * deltap, self.precision);
            if action.max_duration != NO_MAX_DURATION {
                update(&mut action.max_duration, delta, self.precision);
            }

            let weight = var.map(|v| self.sys.variable_weight(v)).unwrap_or(0.0);
            let done = (action.remains <= 0.0 && weight > 0.0)
                || (action.max_duration != NO_MAX_DURATION && action.max_duration <= 0.0);
            if done {
                action.finish = now;
                action.state = ActionState::Done;
                if let Some(v) = var {
                    self.sys.update_variable_weight(v, 0.0);
                }
                finished.push(id);
            } else {
                still.push(id);
            }
        }
        self.running = still;
    }

    /// Applies a bandwidth trace event.
    pub fn set_link_bandwidth(&mut self, arena: &mut ActionArena, link: LinkId, value: f64) {
        let old_bw = self.links[link.0].peak * self.links[link.0].scale;
        self.links[link.0].peak = value;
        let new_bw = self.links[link.0].peak * self.links[link.0].scale;
        let constraint = self.links[link.0].constraint;
        self.sys
            .update_constraint_bound(constraint, self.bandwidth_factor * new_bw);

        if self.weight_s > 0.0 {
            let delta = self.weight_s / new_bw - self.weight_s / old_bw;
            for (var, _) in self.sys.constraint_elements(constraint) {
                let action = arena.get_mut(ActionId(self.sys.variable_token(var)));
                let suspended = action.suspended;
                let data = action.comm_mut();
                data.weight += delta;
                let (in_latency, weight) = (data.latency > 0.0, data.weight);
                if !suspended && !in_latency {
                    self.sys.update_variable_weight(var, weight);
                }
            }
        }
    }

    /// Applies a latency trace event: every flow crossing the link sees its
    /// weight and its TCP window bound change.
    pub fn set_link_latency(&mut self, arena: &mut ActionArena, link: LinkId, value: Time) {
        let delta = value - self.links[link.0].latency;
        self.links[link.0].latency = value;
        let constraint = self.links[link.0].constraint;

        for (var, _) in self.sys.constraint_elements(constraint) {
            let action = arena.get_mut(ActionId(self.sys.variable_token(var)));
            let suspended = action.suspended;
            let data = action.comm_mut();
            data.lat_current += delta;
            data.weight += delta;
            let (in_latency, weight) = (data.latency > 0.0, data.weight);
            let bound = self.window_bound(data.rate, data.lat_current);
            self.sys.update_variable_bound(var, bound);
            if !suspended && !in_latency {
                self.sys.update_variable_weight(var, weight);
            }
        }
    }

    /// Applies an on/off trace event; turning a link off fails every flow
    /// crossing it.
    pub fn set_link_state(
        &mut self,
        arena: &mut ActionArena,
        link: LinkId,
        on: bool,
        date: Time,
        finished: &mut Vec<ActionId>,
    ) {
        self.links[link.0].on = on;
        if on {
            return;
        }
        let constraint = self.links[link.0].constraint;
        for (var, _) in self.sys.constraint_elements(constraint) {
            let id = ActionId(self.sys.variable_token(var));
            let action = arena.get_mut(id);
            if !action.state.is_over() {
                action.state = ActionState::LinkFailure;
                action.finish = date;
                self.sys.update_variable_weight(var, 0.0);
                finished.push(id);
            }
        }
        self.running.retain(|&id| !arena.get(id).state.is_over());
    }

    /// Stops a communication in the given terminal state (cancellation,
    /// timeout, peer failure); the caller finishes it.
    pub fn stop(&mut self, arena: &mut ActionArena, id: ActionId, state: ActionState, now: Time) {
        debug_assert!(state.is_over());
        let action = arena.get_mut(id);
        if action.state.is_over() {
            return;
        }
        action.state = state;
        action.finish = now;
        if let Some(var) = action.variable {
            self.sys.update_variable_weight(var, 0.0);
        }
        self.running.retain(|&r| r != id);
    }

    /// Freezes a communication (used while either party is suspended).
    pub fn suspend(&mut self, arena: &mut ActionArena, id: ActionId) {
        let action = arena.get_mut(id);
        if !action.suspended {
            action.suspended = true;
            if let Some(var) = action.variable {
                self.sys.update_variable_weight(var, 0.0);
            }
        }
    }

    /// Resumes a suspended communication at its steady weight.
    pub fn resume(&mut self, arena: &mut ActionArena, id: ActionId) {
        let action = arena.get_mut(id);
        if action.suspended {
            action.suspended = false;
            if let (Some(var), ActionKind::Comm(data)) = (action.variable, &action.kind) {
                if data.latency <= 0.0 {
                    self.sys.update_variable_weight(var, data.weight);
                }
            }
        }
    }

    /// Releases the solver variable of a terminated communication.
    pub fn drop_variable(&mut self, action: &mut crate::surf::Action) {
        if let Some(var) = action.variable.take() {
            self.sys.remove_variable(var);
        }
    }
}
