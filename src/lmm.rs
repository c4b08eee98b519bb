//! Linear max-min fairness solver
//!
//! A sparse system of constraints (one per shared resource, with a capacity
//! bound) and variables (one per in-flight action, with a sharing weight and
//! an optional rate bound), linked by elements carrying a consumption
//! weight. [`System::solve`] assigns every enabled variable its max-min fair
//! share by progressive filling: repeatedly saturate the tightest
//! constraint, fix the variables it serves, and redistribute what is left.
//!
//! Storage is arena-based. Elements live in one slab and are threaded onto
//! their constraint's membership lists through embedded prev/next indices,
//! so moving an element between the enabled/disabled/active lists is O(1)
//! and freed slots are recycled through free lists. Handles are plain
//! indices; passing a stale handle is a programmer error, not a recoverable
//! one.

use crate::precision::{equals, positive, update};

/// Handle on a solver variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) usize);

/// Handle on a solver constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ElementId(usize);

/// How concurrent consumers share a constraint's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingPolicy {
    /// The sum of consumptions is bounded (a link, a CPU).
    Shared,
    /// Each consumption is bounded individually (a backbone fat pipe).
    Fatpipe,
}

/// Unlimited concurrency, the default for new constraints.
pub const CONCURRENCY_UNLIMITED: i32 = -1;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<ElementId>,
    next: Option<ElementId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ListHead {
    head: Option<ElementId>,
    tail: Option<ElementId>,
    len: usize,
}

/// Which embedded link an element is threaded through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// The enabled-or-disabled membership list of the constraint.
    Member,
    /// The active working list used while solving.
    Active,
}

/// Which membership list the element currently sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Enabled,
    Disabled,
}

#[derive(Debug)]
struct Element {
    cnst: ConstraintId,
    var: VariableId,
    consumption: f64,
    membership: Membership,
    member: Link,
    active: Link,
    in_active: bool,
}

#[derive(Debug)]
struct Constraint {
    token: usize,
    bound: f64,
    policy: SharingPolicy,

    concurrency_limit: i32,
    concurrency_current: i32,
    concurrency_maximum: i32,

    enabled: ListHead,
    disabled: ListHead,
    active: ListHead,

    // solver scratch
    usage: f64,
    remaining: f64,
    light: Option<usize>,

    active_pos: Option<usize>,
    modified_pos: Option<usize>,
    alive: bool,
}

#[derive(Debug)]
struct Variable {
    token: usize,
    weight: f64,
    staged_weight: f64,
    bound: f64,
    value: f64,
    concurrency_share: i32,
    elements: Vec<ElementId>,
    visited: u32,
    saturated: bool,
    alive: bool,
}

#[derive(Debug, Clone, Copy)]
struct LightEntry {
    cnst: ConstraintId,
    remaining_over_usage: f64,
}

/// The sparse linear system and its solver state.
#[derive(Debug)]
pub struct System {
    constraints: Vec<Constraint>,
    cnst_free: Vec<usize>,
    variables: Vec<Variable>,
    var_free: Vec<usize>,
    elements: Vec<Element>,
    elem_free: Vec<usize>,

    active_set: Vec<ConstraintId>,
    modified_set: Vec<ConstraintId>,

    selective_update: bool,
    modified: bool,
    visited_counter: u32,

    precision: f64,
    default_concurrency_limit: i32,
}

fn element_concurrency(consumption: f64) -> i32 {
    // cross-traffic elements (consumption below one) do not take a slot
    if consumption >= 1.0 {
        1
    } else {
        0
    }
}

fn link_mut(e: &mut Element, slot: Slot) -> &mut Link {
    match slot {
        Slot::Member => &mut e.member,
        Slot::Active => &mut e.active,
    }
}

fn list_push_head(elems: &mut [Element], list: &mut ListHead, slot: Slot, id: ElementId) {
    let old_head = list.head;
    {
        let l = link_mut(&mut elems[id.0], slot);
        l.prev = None;
        l.next = old_head;
    }
    if let Some(h) = old_head {
        link_mut(&mut elems[h.0], slot).prev = Some(id);
    } else {
        list.tail = Some(id);
    }
    list.head = Some(id);
    list.len += 1;
}

fn list_push_tail(elems: &mut [Element], list: &mut ListHead, slot: Slot, id: ElementId) {
    let old_tail = list.tail;
    {
        let l = link_mut(&mut elems[id.0], slot);
        l.next = None;
        l.prev = old_tail;
    }
    if let Some(t) = old_tail {
        link_mut(&mut elems[t.0], slot).next = Some(id);
    } else {
        list.head = Some(id);
    }
    list.tail = Some(id);
    list.len += 1;
}

fn list_remove(elems: &mut [Element], list: &mut ListHead, slot: Slot, id: ElementId) {
    let (prev, next) = {
        let l = link_mut(&mut elems[id.0], slot);
        let pn = (l.prev, l.next);
        l.prev = None;
        l.next = None;
        pn
    };
    match prev {
        Some(p) => link_mut(&mut elems[p.0], slot).next = next,
        None => list.head = next,
    }
    match next {
        Some(n) => link_mut(&mut elems[n.0], slot).prev = prev,
        None => list.tail = prev,
    }
    list.len -= 1;
}

fn list_collect(elems: &[Element], list: &ListHead, slot: Slot) -> Vec<ElementId> {
    let mut out = Vec::with_capacity(list.len);
    let mut cur = list.head;
    while let Some(id) = cur {
        out.push(id);
        cur = match slot {
            Slot::Member => elems[id.0].member.next,
            Slot::Active => elems[id.0].active.next,
        };
    }
    out
}

impl System {
    /// Creates an empty system.
    ///
    /// With `selective_update`, mutations record the subgraph of constraints
    /// they touch and [`System::solve`] only recomputes that subgraph.
    pub fn new(selective_update: bool) -> System {
        System {
            constraints: Vec::new(),
            cnst_free: Vec::new(),
            variables: Vec::new(),
            var_free: Vec::new(),
            elements: Vec::new(),
            elem_free: Vec::new(),

            active_set: Vec::new(),
            modified_set: Vec::new(),

            selective_update,
            modified: false,
            visited_counter: 1,

            precision: 1e-5,
            default_concurrency_limit: CONCURRENCY_UNLIMITED,
        }
    }

    /// Sets the relative tolerance of all solver comparisons.
    pub fn set_precision(&mut self, precision: f64) {
        assert!(precision > 0.0, "precision must be positive");
        self.precision = precision;
    }

    /// Sets the concurrency limit given to constraints created from now on.
    pub fn set_default_concurrency_limit(&mut self, limit: i32) {
        self.default_concurrency_limit = limit;
    }

    // ======================== constraints ========================

    /// Creates a constraint with capacity `bound`, tagged with an opaque
    /// `token` the caller uses to map it back to its resource.
    pub fn new_constraint(&mut self, token: usize, bound: f64) -> ConstraintId {
        let cnst = Constraint {
            token,
            bound,
            policy: SharingPolicy::Shared,
            concurrency_limit: self.default_concurrency_limit,
            concurrency_current: 0,
            concurrency_maximum: 0,
            enabled: ListHead::default(),
            disabled: ListHead::default(),
            active: ListHead::default(),
            usage: 0.0,
            remaining: 0.0,
            light: None,
            active_pos: None,
            modified_pos: None,
            alive: true,
        };
        match self.cnst_free.pop() {
            Some(ix) => {
                self.constraints[ix] = cnst;
                ConstraintId(ix)
            }
            None => {
                self.constraints.push(cnst);
                ConstraintId(self.constraints.len() - 1)
            }
        }
    }

    /// Changes the sharing policy (constraints start out [`SharingPolicy::Shared`]).
    pub fn set_sharing_policy(&mut self, c: ConstraintId, policy: SharingPolicy) {
        self.constraints[c.0].policy = policy;
    }

    /// Reads the sharing policy.
    pub fn sharing_policy(&self, c: ConstraintId) -> SharingPolicy {
        self.constraints[c.0].policy
    }

    /// Updates the capacity bound and marks the touched subgraph.
    pub fn update_constraint_bound(&mut self, c: ConstraintId, bound: f64) {
        self.modified = true;
        self.touch_constraint(c);
        self.constraints[c.0].bound = bound;
    }

    /// Reads the capacity bound.
    pub fn constraint_bound(&self, c: ConstraintId) -> f64 {
        self.constraints[c.0].bound
    }

    /// The opaque token given at creation.
    pub fn constraint_token(&self, c: ConstraintId) -> usize {
        self.constraints[c.0].token
    }

    /// Whether the constraint currently serves at least one element.
    pub fn constraint_active(&self, c: ConstraintId) -> bool {
        self.constraints[c.0].active_pos.is_some()
    }

    /// Caps how many enabled elements may contribute concurrently;
    /// [`CONCURRENCY_UNLIMITED`] removes the cap.
    pub fn set_concurrency_limit(&mut self, c: ConstraintId, limit: i32) {
        let cnst = &mut self.constraints[c.0];
        assert!(
            limit < 0 || cnst.concurrency_maximum <= limit,
            "new concurrency limit below observed maximum; reset the maximum first"
        );
        cnst.concurrency_limit = limit;
    }

    /// Reads the concurrency limit.
    pub fn concurrency_limit(&self, c: ConstraintId) -> i32 {
        self.constraints[c.0].concurrency_limit
    }

    /// Highest concurrency observed since the last reset.
    pub fn concurrency_maximum(&self, c: ConstraintId) -> i32 {
        let cnst = &self.constraints[c.0];
        assert!(
            cnst.concurrency_limit < 0 || cnst.concurrency_maximum <= cnst.concurrency_limit,
            "observed concurrency above the limit"
        );
        cnst.concurrency_maximum
    }

    /// Forgets the observed concurrency maximum.
    pub fn reset_concurrency_maximum(&mut self, c: ConstraintId) {
        self.constraints[c.0].concurrency_maximum = 0;
    }

    /// Instantaneous load of the resource behind this constraint: the sum
    /// (or, for fat pipes, the max) of `consumption · value` over its
    /// enabled elements.
    pub fn constraint_usage(&self, c: ConstraintId) -> f64 {
        let cnst = &self.constraints[c.0];
        let mut usage = 0.0;
        for id in list_collect(&self.elements, &cnst.enabled, Slot::Member) {
            let e = &self.elements[id.0];
            if e.consumption > 0.0 {
                let contrib = e.consumption * self.variables[e.var.0].value;
                match cnst.policy {
                    SharingPolicy::Shared => usage += contrib,
                    SharingPolicy::Fatpipe => usage = f64::max(usage, contrib),
                }
            }
        }
        usage
    }

    /// Every variable attached to this constraint (enabled first, then the
    /// disabled ones), with its consumption weight.
    pub fn constraint_elements(&self, c: ConstraintId) -> Vec<(VariableId, f64)> {
        let cnst = &self.constraints[c.0];
        let mut out = Vec::with_capacity(cnst.enabled.len + cnst.disabled.len);
        for id in list_collect(&self.elements, &cnst.enabled, Slot::Member) {
            let e = &self.elements[id.0];
            out.push((e.var, e.consumption));
        }
        for id in list_collect(&self.elements, &cnst.disabled, Slot::Member) {
            let e = &self.elements[id.0];
            out.push((e.var, e.consumption));
        }
        out
    }

    // ======================== variables ========================

    /// Creates a variable with the given sharing weight (0 leaves it
    /// disabled) and rate bound (negative for unbounded). `max_elements`
    /// reserves room for the expansions to come.
    pub fn new_variable(
        &mut self,
        token: usize,
        weight: f64,
        bound: f64,
        max_elements: usize,
    ) -> VariableId {
        assert!(weight >= 0.0, "variable weight should not be negative");
        let var = Variable {
            token,
            weight,
            staged_weight: 0.0,
            bound,
            value: 0.0,
            concurrency_share: 1,
            elements: Vec::with_capacity(max_elements),
            visited: self.visited_counter.wrapping_sub(1),
            saturated: false,
            alive: true,
        };
        match self.var_free.pop() {
            Some(ix) => {
                self.variables[ix] = var;
                VariableId(ix)
            }
            None => {
                self.variables.push(var);
                VariableId(self.variables.len() - 1)
            }
        }
    }

    /// How many concurrency slots this variable takes in each constraint.
    pub fn set_concurrency_share(&mut self, v: VariableId, share: i32) {
        self.variables[v.0].concurrency_share = share;
    }

    /// The solver's output for this variable.
    pub fn variable_value(&self, v: VariableId) -> f64 {
        debug_assert!(self.variables[v.0].alive, "stale variable handle");
        self.variables[v.0].value
    }

    /// Current effective sharing weight (0 when disabled or staged).
    pub fn variable_weight(&self, v: VariableId) -> f64 {
        self.variables[v.0].weight
    }

    /// The rate bound (negative when unbounded).
    pub fn variable_bound(&self, v: VariableId) -> f64 {
        self.variables[v.0].bound
    }

    /// The opaque token given at creation.
    pub fn variable_token(&self, v: VariableId) -> usize {
        self.variables[v.0].token
    }

    /// Updates the rate bound and marks the touched subgraph.
    pub fn update_variable_bound(&mut self, v: VariableId, bound: f64) {
        self.modified = true;
        self.variables[v.0].bound = bound;
        if let Some(&eid) = self.variables[v.0].elements.first() {
            let c = self.elements[eid.0].cnst;
            self.touch_constraint(c);
        }
    }

    /// Updates the sharing weight, enabling, disabling or staging the
    /// variable as needed.
    ///
    /// Raising the weight of a disabled variable may leave it *staged* when
    /// one of its constraints has no concurrency slot left; the requested
    /// weight is remembered and applied as soon as a slot frees up.
    pub fn update_variable_weight(&mut self, v: VariableId, weight: f64) {
        assert!(weight >= 0.0, "variable weight should not be negative");
        if weight == self.variables[v.0].weight {
            return;
        }

        let enabling = weight > 0.0 && self.variables[v.0].weight <= 0.0;
        let disabling = weight <= 0.0 && self.variables[v.0].weight > 0.0;
        self.modified = true;

        if enabling {
            self.variables[v.0].staged_weight = weight;
            if self.min_concurrency_slack(v) < self.variables[v.0].concurrency_share {
                // no slot anywhere, stays staged
                return;
            }
            self.enable_var(v);
        } else if disabling {
            self.disable_var(v);
        } else {
            self.variables[v.0].weight = weight;
            if let Some(&eid) = self.variables[v.0].elements.first() {
                let c = self.elements[eid.0].cnst;
                self.touch_constraint(c);
            }
        }
    }

    /// Detaches the variable from every constraint and frees it, promoting
    /// staged variables into the slots it releases.
    pub fn remove_variable(&mut self, v: VariableId) {
        assert!(self.variables[v.0].alive, "double free of a variable");
        self.modified = true;

        if let Some(&eid) = self.variables[v.0].elements.first() {
            let c = self.elements[eid.0].cnst;
            self.touch_constraint(c);
        }

        let had_weight = self.variables[v.0].weight > 0.0;
        let elem_ids = std::mem::take(&mut self.variables[v.0].elements);
        let mut touched: Vec<ConstraintId> = Vec::with_capacity(elem_ids.len());

        for &eid in &elem_ids {
            let c = self.elements[eid.0].cnst;
            touched.push(c);
            if had_weight {
                self.decrease_concurrency(eid);
            }
            self.detach_element(eid);
            let cnst = &self.constraints[c.0];
            if cnst.enabled.len + cnst.disabled.len == 0 {
                self.make_constraint_inactive(c);
            } else {
                self.on_disabled_var(c);
            }
            self.elem_free.push(eid.0);
        }

        // second chance, with every slot this variable held now free
        for c in touched {
            if self.constraints[c.0].disabled.len > 0 {
                self.on_disabled_var(c);
            }
        }

        let var = &mut self.variables[v.0];
        var.alive = false;
        var.weight = 0.0;
        var.staged_weight = 0.0;
        var.value = 0.0;
        self.var_free.push(v.0);
    }

    // ======================== expansion ========================

    /// Attaches `v` to `c` with the given consumption weight.
    ///
    /// Expanding an existing attachment merges: the consumptions add up
    /// under [`SharingPolicy::Shared`] (cross-traffic throttling relies on
    /// this) and take the max under [`SharingPolicy::Fatpipe`]. When the
    /// attachment would exceed the constraint's concurrency limit, the
    /// variable is staged instead.
    pub fn expand(&mut self, c: ConstraintId, v: VariableId, consumption: f64) {
        debug_assert!(self.constraints[c.0].alive, "stale constraint handle");
        debug_assert!(self.variables[v.0].alive, "stale variable handle");
        self.modified = true;

        let existing = self.variables[v.0]
            .elements
            .iter()
            .copied()
            .find(|&eid| self.elements[eid.0].cnst == c);

        match existing {
            Some(eid) => self.expand_merge(c, v, eid, consumption),
            None => self.expand_fresh(c, v, consumption),
        }
    }

    fn expand_fresh(&mut self, c: ConstraintId, v: VariableId, consumption: f64) {
        // a variable taking several slots may already hold some on c
        let mut current_share = 0;
        if self.variables[v.0].concurrency_share > 1 {
            for &eid in &self.variables[v.0].elements {
                let e = &self.elements[eid.0];
                if e.cnst == c && e.membership == Membership::Enabled {
                    current_share += element_concurrency(e.consumption);
                }
            }
        }

        if self.variables[v.0].weight > 0.0
            && self.variables[v.0].concurrency_share - current_share > self.concurrency_slack(c)
        {
            let weight = self.variables[v.0].weight;
            self.disable_var(v);
            let cnsts: Vec<ConstraintId> = self.variables[v.0]
                .elements
                .iter()
                .map(|&eid| self.elements[eid.0].cnst)
                .collect();
            for c2 in cnsts {
                self.on_disabled_var(c2);
            }
            self.variables[v.0].staged_weight = weight;
            debug_assert!(self.variables[v.0].weight <= 0.0);
        }

        let enabled = self.variables[v.0].weight > 0.0;
        let elem = Element {
            cnst: c,
            var: v,
            consumption,
            membership: if enabled {
                Membership::Enabled
            } else {
                Membership::Disabled
            },
            member: Link::default(),
            active: Link::default(),
            in_active: false,
        };
        let eid = match self.elem_free.pop() {
            Some(ix) => {
                self.elements[ix] = elem;
                ElementId(ix)
            }
            None => {
                self.elements.push(elem);
                ElementId(self.elements.len() - 1)
            }
        };
        self.variables[v.0].elements.push(eid);

        if enabled {
            let cnst = &mut self.constraints[c.0];
            list_push_head(&mut self.elements, &mut cnst.enabled, Slot::Member, eid);
            self.increase_concurrency(eid);
        } else {
            let cnst = &mut self.constraints[c.0];
            list_push_tail(&mut self.elements, &mut cnst.disabled, Slot::Member, eid);
        }

        if !self.selective_update {
            self.make_constraint_active(c);
        } else if consumption > 0.0 || self.variables[v.0].weight > 0.0 {
            self.make_constraint_active(c);
            self.touch_constraint(c);
            if self.variables[v.0].elements.len() > 1 {
                let c0 = self.elements[self.variables[v.0].elements[0].0].cnst;
                self.touch_constraint(c0);
            }
        }
    }

    fn expand_merge(&mut self, c: ConstraintId, v: VariableId, eid: ElementId, consumption: f64) {
        let had_weight = self.variables[v.0].weight > 0.0;
        let old_conc = element_concurrency(self.elements[eid.0].consumption);

        {
            let policy = self.constraints[c.0].policy;
            let e = &mut self.elements[eid.0];
            match policy {
                SharingPolicy::Shared => e.consumption += consumption,
                SharingPolicy::Fatpipe => e.consumption = f64::max(e.consumption, consumption),
            }
        }

        if had_weight {
            let new_conc = element_concurrency(self.elements[eid.0].consumption);
            // account for the new weight first so a staging disable below
            // decrements every element consistently
            let over = {
                let cnst = &mut self.constraints[c.0];
                cnst.concurrency_current += new_conc - old_conc;
                cnst.concurrency_limit >= 0 && cnst.concurrency_current > cnst.concurrency_limit
            };
            if over {
                // the heavier element no longer fits, stage the variable
                let weight = self.variables[v.0].weight;
                self.disable_var(v);
                let cnsts: Vec<ConstraintId> = self.variables[v.0]
                    .elements
                    .iter()
                    .map(|&e2| self.elements[e2.0].cnst)
                    .collect();
                for c2 in cnsts {
                    self.on_disabled_var(c2);
                }
                self.variables[v.0].staged_weight = weight;
            } else {
                let cnst = &mut self.constraints[c.0];
                if cnst.concurrency_current > cnst.concurrency_maximum {
                    cnst.concurrency_maximum = cnst.concurrency_current;
                }
            }
        }
        self.touch_constraint(c);
    }

    // ======================== concurrency ========================

    fn concurrency_slack(&self, c: ConstraintId) -> i32 {
        let cnst = &self.constraints[c.0];
        if cnst.concurrency_limit < 0 {
            i32::MAX
        } else {
            cnst.concurrency_limit - cnst.concurrency_current
        }
    }

    fn min_concurrency_slack(&self, v: VariableId) -> i32 {
        let mut min_slack = i32::MAX;
        for &eid in &self.variables[v.0].elements {
            let slack = self.concurrency_slack(self.elements[eid.0].cnst);
            if slack == 0 {
                return 0;
            }
            if slack < min_slack {
                min_slack = slack;
            }
        }
        min_slack
    }

    fn increase_concurrency(&mut self, eid: ElementId) {
        let e = &self.elements[eid.0];
        let conc = element_concurrency(e.consumption);
        let cnst = &mut self.constraints[e.cnst.0];
        cnst.concurrency_current += conc;
        if cnst.concurrency_current > cnst.concurrency_maximum {
            cnst.concurrency_maximum = cnst.concurrency_current;
        }
        assert!(
            cnst.concurrency_limit < 0 || cnst.concurrency_current <= cnst.concurrency_limit,
            "concurrency limit overflow"
        );
    }

    fn decrease_concurrency(&mut self, eid: ElementId) {
        let e = &self.elements[eid.0];
        let conc = element_concurrency(e.consumption);
        let cnst = &mut self.constraints[e.cnst.0];
        assert!(cnst.concurrency_current >= conc, "concurrency underflow");
        cnst.concurrency_current -= conc;
    }

    fn can_enable(&self, v: VariableId) -> bool {
        let var = &self.variables[v.0];
        var.staged_weight > 0.0 && self.min_concurrency_slack(v) >= var.concurrency_share
    }

    fn enable_var(&mut self, v: VariableId) {
        debug_assert!(self.can_enable(v));
        self.variables[v.0].weight = self.variables[v.0].staged_weight;
        self.variables[v.0].staged_weight = 0.0;

        for &eid in &self.variables[v.0].elements.clone() {
            let c = self.elements[eid.0].cnst;
            list_remove(
                &mut self.elements,
                &mut self.constraints[c.0].disabled,
                Slot::Member,
                eid,
            );
            self.elements[eid.0].membership = Membership::Enabled;
            list_push_head(
                &mut self.elements,
                &mut self.constraints[c.0].enabled,
                Slot::Member,
                eid,
            );
            self.increase_concurrency(eid);
        }
        if let Some(&eid) = self.variables[v.0].elements.first() {
            let c = self.elements[eid.0].cnst;
            self.touch_constraint(c);
        }
    }

    fn disable_var(&mut self, v: VariableId) {
        debug_assert!(
            self.variables[v.0].staged_weight == 0.0,
            "staged weight should have been cleared"
        );
        // touch before moving: the recursion walks enabled elements
        if let Some(&eid) = self.variables[v.0].elements.first() {
            let c = self.elements[eid.0].cnst;
            self.touch_constraint(c);
        }
        for &eid in &self.variables[v.0].elements.clone() {
            let c = self.elements[eid.0].cnst;
            self.decrease_concurrency(eid);
            list_remove(
                &mut self.elements,
                &mut self.constraints[c.0].enabled,
                Slot::Member,
                eid,
            );
            self.elements[eid.0].membership = Membership::Disabled;
            list_push_tail(
                &mut self.elements,
                &mut self.constraints[c.0].disabled,
                Slot::Member,
                eid,
            );
            if self.elements[eid.0].in_active {
                list_remove(
                    &mut self.elements,
                    &mut self.constraints[c.0].active,
                    Slot::Active,
                    eid,
                );
                self.elements[eid.0].in_active = false;
            }
        }
        let var = &mut self.variables[v.0];
        var.weight = 0.0;
        var.staged_weight = 0.0;
        var.value = 0.0;
    }

    /// Walks the constraint's disabled list and enables staged variables in
    /// FIFO order while slots remain.
    fn on_disabled_var(&mut self, c: ConstraintId) {
        if self.constraints[c.0].concurrency_limit < 0 {
            return;
        }
        let mut remaining = self.constraints[c.0].disabled.len;
        let mut cur = self.constraints[c.0].disabled.head;
        while remaining > 0 {
            let eid = match cur {
                Some(eid) => eid,
                None => break,
            };
            remaining -= 1;
            let next = self.elements[eid.0].member.next;
            let v = self.elements[eid.0].var;
            if self.variables[v.0].staged_weight > 0.0 && self.can_enable(v) {
                self.enable_var(v);
            }
            let cnst = &self.constraints[c.0];
            assert!(
                cnst.concurrency_current <= cnst.concurrency_limit,
                "concurrency overflow"
            );
            if cnst.concurrency_current == cnst.concurrency_limit {
                break;
            }
            cur = next;
        }
    }

    // ======================== element plumbing ========================

    /// Unlinks an element from whatever lists it is on. Does not touch
    /// concurrency accounting and does not free the slot.
    fn detach_element(&mut self, eid: ElementId) {
        let c = self.elements[eid.0].cnst;
        match self.elements[eid.0].membership {
            Membership::Enabled => list_remove(
                &mut self.elements,
                &mut self.constraints[c.0].enabled,
                Slot::Member,
                eid,
            ),
            Membership::Disabled => list_remove(
                &mut self.elements,
                &mut self.constraints[c.0].disabled,
                Slot::Member,
                eid,
            ),
        }
        if self.elements[eid.0].in_active {
            list_remove(
                &mut self.elements,
                &mut self.constraints[c.0].active,
                Slot::Active,
                eid,
            );
            self.elements[eid.0].in_active = false;
        }
    }

    fn make_elem_active(&mut self, eid: ElementId) {
        if !self.elements[eid.0].in_active {
            let c = self.elements[eid.0].cnst;
            list_push_head(
                &mut self.elements,
                &mut self.constraints[c.0].active,
                Slot::Active,
                eid,
            );
            self.elements[eid.0].in_active = true;
        }
    }

    fn make_elem_inactive(&mut self, eid: ElementId) {
        if self.elements[eid.0].in_active {
            let c = self.elements[eid.0].cnst;
            list_remove(
                &mut self.elements,
                &mut self.constraints[c.0].active,
                Slot::Active,
                eid,
            );
            self.elements[eid.0].in_active = false;
        }
    }

    // ======================== active & modified sets ========================

    fn make_constraint_active(&mut self, c: ConstraintId) {
        if self.constraints[c.0].active_pos.is_none() {
            self.constraints[c.0].active_pos = Some(self.active_set.len());
            self.active_set.push(c);
        }
    }

    fn make_constraint_inactive(&mut self, c: ConstraintId) {
        if let Some(pos) = self.constraints[c.0].active_pos.take() {
            self.active_set.swap_remove(pos);
            if let Some(&moved) = self.active_set.get(pos) {
                self.constraints[moved.0].active_pos = Some(pos);
            }
        }
        if let Some(pos) = self.constraints[c.0].modified_pos.take() {
            self.modified_set.swap_remove(pos);
            if let Some(&moved) = self.modified_set.get(pos) {
                self.constraints[moved.0].modified_pos = Some(pos);
            }
        }
    }

    /// Records that `c` changed and propagates through shared variables so
    /// the whole connected subgraph is re-solved. Variables carry a visited
    /// counter so the walk is linear in the touched subgraph.
    fn touch_constraint(&mut self, c: ConstraintId) {
        if !self.selective_update || self.constraints[c.0].modified_pos.is_some() {
            return;
        }
        self.constraints[c.0].modified_pos = Some(self.modified_set.len());
        self.modified_set.push(c);

        let mut stack = vec![c];
        while let Some(c) = stack.pop() {
            for eid in list_collect(&self.elements, &self.constraints[c.0].enabled, Slot::Member) {
                let v = self.elements[eid.0].var;
                if self.variables[v.0].visited == self.visited_counter {
                    continue;
                }
                for &eid2 in &self.variables[v.0].elements.clone() {
                    let c2 = self.elements[eid2.0].cnst;
                    if c2 != c && self.constraints[c2.0].modified_pos.is_none() {
                        self.constraints[c2.0].modified_pos = Some(self.modified_set.len());
                        self.modified_set.push(c2);
                        stack.push(c2);
                    }
                }
                self.variables[v.0].visited = self.visited_counter;
            }
        }
    }

    fn clear_modified_set(&mut self) {
        // un-flag every variable at once by moving the counter
        self.visited_counter = self.visited_counter.wrapping_add(1);
        if self.visited_counter == 0 {
            // wrapped: force every stale visited value out of range
            for var in &mut self.variables {
                var.visited = u32::MAX;
            }
            self.visited_counter = 1;
        }
        for &c in &self.modified_set {
            self.constraints[c.0].modified_pos = None;
        }
        self.modified_set.clear();
    }

    // ======================== solver ========================

    /// Assigns every enabled variable its max-min fair share.
    ///
    /// Does nothing when the system has not been modified since the last
    /// call. With selective update, only the recorded subgraph is
    /// recomputed; the result is identical to a full solve.
    pub fn solve(&mut self) {
        if !self.modified {
            return;
        }

        let eps = self.precision;
        let cnst_list: Vec<ConstraintId> = if self.selective_update {
            self.modified_set.clone()
        } else {
            self.active_set.clone()
        };

        // reset the output of every variable under consideration
        for &c in &cnst_list {
            for eid in list_collect(&self.elements, &self.constraints[c.0].enabled, Slot::Member) {
                let v = self.elements[eid.0].var;
                debug_assert!(self.variables[v.0].weight > 0.0);
                self.variables[v.0].value = 0.0;
            }
        }

        let mut light: Vec<LightEntry> = Vec::with_capacity(cnst_list.len());
        let mut sat_cnst: Vec<usize> = Vec::new();
        let mut sat_vars: Vec<VariableId> = Vec::new();
        let mut min_usage = -1.0;

        // collect the constraints that actually need saturating
        for &c in &cnst_list {
            self.constraints[c.0].light = None;
            self.constraints[c.0].remaining = self.constraints[c.0].bound;
            let bound = self.constraints[c.0].bound;
            if !positive(self.constraints[c.0].remaining, bound * eps) {
                continue;
            }
            self.constraints[c.0].usage = 0.0;
            for eid in list_collect(&self.elements, &self.constraints[c.0].enabled, Slot::Member) {
                let (cons, w) = {
                    let e = &self.elements[eid.0];
                    (e.consumption, self.variables[e.var.0].weight)
                };
                debug_assert!(w > 0.0);
                if cons > 0.0 {
                    let cnst = &mut self.constraints[c.0];
                    match cnst.policy {
                        SharingPolicy::Shared => cnst.usage += cons / w,
                        SharingPolicy::Fatpipe => {
                            if cnst.usage < cons / w {
                                cnst.usage = cons / w;
                            }
                        }
                    }
                    self.make_elem_active(eid);
                }
            }
            let cnst = &mut self.constraints[c.0];
            if cnst.usage > 0.0 {
                cnst.light = Some(light.len());
                let rou = cnst.remaining / cnst.usage;
                light.push(LightEntry {
                    cnst: c,
                    remaining_over_usage: rou,
                });
                saturated_constraint_update(rou, light.len() - 1, &mut sat_cnst, &mut min_usage);
            }
        }

        self.saturated_variables_update(&light, &sat_cnst, &mut sat_vars);

        loop {
            // did any saturated variable reach its own bound first?
            let mut min_bound = -1.0;
            for &v in &sat_vars {
                let var = &self.variables[v.0];
                if !var.saturated {
                    continue;
                }
                if var.bound > 0.0 && var.bound * var.weight < min_usage {
                    min_bound = if min_bound < 0.0 {
                        var.bound * var.weight
                    } else {
                        f64::min(min_bound, var.bound * var.weight)
                    };
                }
            }

            // fix the variables that have to be
            let work = std::mem::take(&mut sat_vars);
            for v in work {
                if !self.variables[v.0].saturated {
                    continue;
                }
                self.variables[v.0].saturated = false;
                let w = self.variables[v.0].weight;
                debug_assert!(w > 0.0);

                let value = if min_bound < 0.0 {
                    min_usage / w
                } else if equals(min_bound, self.variables[v.0].bound * w, eps) {
                    self.variables[v.0].bound
                } else {
                    // its bound differs, wait for a later round
                    continue;
                };
                self.variables[v.0].value = value;

                for &eid in &self.variables[v.0].elements.clone() {
                    let c = self.elements[eid.0].cnst;
                    let policy = self.constraints[c.0].policy;
                    match policy {
                        SharingPolicy::Shared => {
                            let cons = self.elements[eid.0].consumption;
                            let bound = self.constraints[c.0].bound;
                            let cnst = &mut self.constraints[c.0];
                            update(&mut cnst.remaining, cons * value, bound * eps);
                            update(&mut cnst.usage, cons / w, eps);
                            self.make_elem_inactive(eid);
                        }
                        SharingPolicy::Fatpipe => {
                            self.constraints[c.0].usage = 0.0;
                            self.make_elem_inactive(eid);
                            for eid2 in list_collect(
                                &self.elements,
                                &self.constraints[c.0].enabled,
                                Slot::Member,
                            ) {
                                let (cons2, v2) = {
                                    let e2 = &self.elements[eid2.0];
                                    (e2.consumption, e2.var)
                                };
                                let var2 = &self.variables[v2.0];
                                debug_assert!(var2.weight > 0.0);
                                if var2.value > 0.0 || cons2 <= 0.0 {
                                    continue;
                                }
                                let cnst = &mut self.constraints[c.0];
                                if cnst.usage < cons2 / var2.weight {
                                    cnst.usage = cons2 / var2.weight;
                                }
                            }
                        }
                    }

                    // saturated constraints leave the light table
                    let cnst = &self.constraints[c.0];
                    let saturated = !positive(cnst.usage, eps)
                        || !positive(cnst.remaining, cnst.bound * eps);
                    if let Some(pos) = cnst.light {
                        if saturated {
                            self.constraints[c.0].light = None;
                            light.swap_remove(pos);
                            if let Some(entry) = light.get(pos) {
                                self.constraints[entry.cnst.0].light = Some(pos);
                            }
                        } else {
                            light[pos].remaining_over_usage = cnst.remaining / cnst.usage;
                        }
                    }
                }
            }

            // find out which constraints reach the minimum now
            min_usage = -1.0;
            sat_cnst.clear();
            for (pos, entry) in light.iter().enumerate() {
                assert!(
                    self.constraints[entry.cnst.0].active.len > 0,
                    "cannot saturate a constraint with no active element; \
                     the precision may be too coarse for this system"
                );
                saturated_constraint_update(
                    entry.remaining_over_usage,
                    pos,
                    &mut sat_cnst,
                    &mut min_usage,
                );
            }

            if light.is_empty() {
                break;
            }
            self.saturated_variables_update(&light, &sat_cnst, &mut sat_vars);
        }

        self.modified = false;
        if self.selective_update {
            self.clear_modified_set();
        }
    }

    /// Flags the variables that are active in some saturated constraint.
    fn saturated_variables_update(
        &mut self,
        light: &[LightEntry],
        sat_cnst: &[usize],
        sat_vars: &mut Vec<VariableId>,
    ) {
        for &pos in sat_cnst {
            let c = light[pos].cnst;
            for eid in list_collect(&self.elements, &self.constraints[c.0].active, Slot::Active) {
                let (cons, v) = {
                    let e = &self.elements[eid.0];
                    (e.consumption, e.var)
                };
                debug_assert!(self.variables[v.0].weight > 0.0);
                if cons > 0.0 && !self.variables[v.0].saturated {
                    self.variables[v.0].saturated = true;
                    sat_vars.push(v);
                }
            }
        }
    }

    #[cfg(test)]
    fn check_concurrency(&self) {
        for (ix, cnst) in self.constraints.iter().enumerate() {
            if !cnst.alive {
                continue;
            }
            let mut concurrency = 0;
            for eid in list_collect(&self.elements, &cnst.enabled, Slot::Member) {
                let e = &self.elements[eid.0];
                assert!(self.variables[e.var.0].weight > 0.0);
                concurrency += element_concurrency(e.consumption);
            }
            assert!(
                cnst.concurrency_limit < 0 || concurrency <= cnst.concurrency_limit,
                "concurrency check failed on constraint {}",
                ix
            );
            assert_eq!(
                cnst.concurrency_current, concurrency,
                "concurrency_current out of date on constraint {}",
                ix
            );
        }
    }
}

fn saturated_constraint_update(
    usage: f64,
    light_pos: usize,
    sat_cnst: &mut Vec<usize>,
    min_usage: &mut f64,
) {
    debug_assert!(usage > 0.0);
    if *min_usage < 0.0 || *min_usage > usage {
        *min_usage = usage;
        sat_cnst.clear();
        sat_cnst.push(light_pos);
    } else if *min_usage == usage {
        sat_cnst.push(light_pos);
    }
}

#[cfg(test)]
mod test {
    use crate::lmm::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: f64 = 1e-4;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= EPS * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn two_flows_share_a_link() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 10.0);
        let v1 = sys.new_variable(1, 1.0, -1.0, 1);
        let v2 = sys.new_variable(2, 1.0, -1.0, 1);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v2, 1.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 5.0));
        assert!(close(sys.variable_value(v2), 5.0));
        assert!(close(sys.constraint_usage(c), 10.0));
    }

    #[test]
    fn fatpipe_gives_everyone_everything() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 10.0);
        sys.set_sharing_policy(c, SharingPolicy::Fatpipe);
        let v1 = sys.new_variable(1, 1.0, -1.0, 1);
        let v2 = sys.new_variable(2, 1.0, -1.0, 1);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v2, 1.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 10.0));
        assert!(close(sys.variable_value(v2), 10.0));
        assert!(close(sys.constraint_usage(c), 10.0));
    }

    #[test]
    fn bounded_variable_leaves_the_rest() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 8.0);
        let v1 = sys.new_variable(1, 1.0, 2.0, 1);
        let v2 = sys.new_variable(2, 1.0, -1.0, 1);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v2, 1.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 2.0));
        assert!(close(sys.variable_value(v2), 6.0));
    }

    #[test]
    fn weight_divides_the_share() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 9.0);
        let v1 = sys.new_variable(1, 1.0, -1.0, 1);
        let v2 = sys.new_variable(2, 2.0, -1.0, 1);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v2, 1.0);
        sys.solve();
        // fill rate mu is shared, each variable gets mu / weight
        assert!(close(sys.variable_value(v1), 6.0));
        assert!(close(sys.variable_value(v2), 3.0));
    }

    #[test]
    fn expand_merges_cross_traffic() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 10.0);
        let v = sys.new_variable(1, 1.0, -1.0, 1);
        sys.expand(c, v, 1.0);
        sys.expand(c, v, 0.05);
        sys.solve();
        // consumption summed to 1.05
        assert!(close(sys.variable_value(v) * 1.05, 10.0));

        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 10.0);
        sys.set_sharing_policy(c, SharingPolicy::Fatpipe);
        let v = sys.new_variable(1, 1.0, -1.0, 1);
        sys.expand(c, v, 1.0);
        sys.expand(c, v, 0.05);
        sys.solve();
        // consumption maxed at 1.0
        assert!(close(sys.variable_value(v), 10.0));
    }

    #[test]
    fn zero_weight_and_zero_bound_are_skipped() {
        let mut sys = System::new(false);
        let dead = sys.new_constraint(0, 0.0);
        let c = sys.new_constraint(1, 4.0);
        let v1 = sys.new_variable(1, 1.0, -1.0, 2);
        let v0 = sys.new_variable(2, 0.0, -1.0, 1);
        sys.expand(dead, v1, 1.0);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v0, 1.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 4.0));
        assert_eq!(sys.variable_value(v0), 0.0);
        sys.check_concurrency();
    }

    #[test]
    fn disabled_then_enabled_weight() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 6.0);
        let v1 = sys.new_variable(1, 1.0, -1.0, 1);
        let v2 = sys.new_variable(2, 0.0, -1.0, 1);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v2, 1.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 6.0));

        sys.update_variable_weight(v2, 1.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 3.0));
        assert!(close(sys.variable_value(v2), 3.0));

        sys.update_variable_weight(v2, 0.0);
        sys.solve();
        assert!(close(sys.variable_value(v1), 6.0));
        assert_eq!(sys.variable_value(v2), 0.0);
        sys.check_concurrency();
    }

    #[test]
    fn concurrency_limit_stages_and_promotes_fifo() {
        let mut sys = System::new(false);
        let c = sys.new_constraint(0, 10.0);
        sys.set_concurrency_limit(c, 1);

        let v1 = sys.new_variable(1, 1.0, -1.0, 1);
        let v2 = sys.new_variable(2, 1.0, -1.0, 1);
        let v3 = sys.new_variable(3, 1.0, -1.0, 1);
        sys.expand(c, v1, 1.0);
        sys.expand(c, v2, 1.0);
        sys.expand(c, v3, 1.0);
        sys.check_concurrency();

        // only the first got a slot, the others are staged
        assert!(sys.variable_weight(v1) > 0.0);
        assert_eq!(sys.variable_weight(v2), 0.0);
        assert_eq!(sys.variable_weight(v3), 0.0);

        sys.solve();
        assert!(close(sys.variable_value(v1), 10.0));
        assert_eq!(sys.variable_value(v2), 0.0);

        // freeing the slot promotes the earliest staged variable
        sys.remove_variable(v1);
        sys.check_concurrency();
        assert!(sys.variable_weight(v2) > 0.0);
        assert_eq!(sys.variable_weight(v3), 0.0);

        sys.solve();
        assert!(close(sys.variable_value(v2), 10.0));

        sys.remove_variable(v2);
        sys.check_concurrency();
        assert!(sys.variable_weight(v3) > 0.0);
    }

    // -- randomized property checks ------------------------------------

    struct RandomSystem {
        sys: System,
        cnsts: Vec<ConstraintId>,
        vars: Vec<VariableId>,
    }

    fn random_system(seed: u64, selective: bool, bound_scale: f64) -> RandomSystem {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sys = System::new(selective);

        let n_cnst = rng.gen_range(1, 8);
        let n_var = rng.gen_range(1, 13);

        let mut cnsts = Vec::new();
        for i in 0..n_cnst {
            let c = sys.new_constraint(i, rng.gen_range(1.0, 10.0) * bound_scale);
            if rng.gen_bool(0.3) {
                sys.set_sharing_policy(c, SharingPolicy::Fatpipe);
            }
            cnsts.push(c);
        }

        let mut vars = Vec::new();
        for i in 0..n_var {
            let weight = rng.gen_range(0.5, 2.0);
            let bound = if rng.gen_bool(0.5) {
                -1.0
            } else {
                rng.gen_range(0.1, 3.0) * bound_scale
            };
            let n_links = rng.gen_range(1, 4.min(n_cnst + 1));
            let v = sys.new_variable(i, weight, bound, n_links);
            let mut used = Vec::new();
            for _ in 0..n_links {
                let c = cnsts[rng.gen_range(0, n_cnst)];
                if used.contains(&c) {
                    continue;
                }
                used.push(c);
                sys.expand(c, v, rng.gen_range(0.05, 2.0));
            }
            vars.push(v);
        }

        RandomSystem { sys, cnsts, vars }
    }

    fn assert_feasible(rs: &RandomSystem) {
        let eps = 1e-5;
        for &c in &rs.cnsts {
            let bound = rs.sys.constraint_bound(c);
            let usage = rs.sys.constraint_usage(c);
            assert!(
                usage <= bound * (1.0 + 1e-3) + eps,
                "constraint overloaded: usage {} bound {}",
                usage,
                bound
            );
        }
        for &v in &rs.vars {
            let bound = rs.sys.variable_bound(v);
            let value = rs.sys.variable_value(v);
            if bound > 0.0 {
                assert!(
                    value <= bound * (1.0 + 1e-3) + eps,
                    "variable above bound: value {} bound {}",
                    value,
                    bound
                );
            }
        }
    }

    #[test]
    fn random_systems_are_feasible() {
        for seed in 0..60 {
            let mut rs = random_system(seed, false, 1.0);
            rs.sys.solve();
            assert_feasible(&rs);
            rs.sys.check_concurrency();
        }
    }

    #[test]
    fn progressive_filling_is_fair() {
        // every enabled, non-bound-saturated variable must sit on at least
        // one exactly-saturated shared constraint (otherwise it could grow)
        for seed in 0..40 {
            let mut rs = random_system(seed, false, 1.0);
            rs.sys.solve();

            for &v in &rs.vars {
                if rs.sys.variable_weight(v) <= 0.0 {
                    continue;
                }
                let bound = rs.sys.variable_bound(v);
                let value = rs.sys.variable_value(v);
                if bound > 0.0 && close(value, bound) {
                    continue; // saturated by its own bound
                }
                let on_saturated = rs.cnsts.iter().any(|&c| {
                    rs.sys
                        .constraint_elements(c)
                        .iter()
                        .any(|&(v2, cons)| v2 == v && cons > 0.0)
                        && close(rs.sys.constraint_usage(c), rs.sys.constraint_bound(c))
                });
                assert!(
                    on_saturated,
                    "seed {}: variable got {} without any saturated constraint",
                    seed, value
                );
            }
        }
    }

    #[test]
    fn doubling_bounds_doubles_values() {
        for seed in 0..30 {
            let mut a = random_system(seed, false, 1.0);
            let mut b = random_system(seed, false, 2.0);
            a.sys.solve();
            b.sys.solve();
            for (&va, &vb) in a.vars.iter().zip(&b.vars) {
                let xa = a.sys.variable_value(va);
                let xb = b.sys.variable_value(vb);
                assert!(
                    close(2.0 * xa, xb),
                    "seed {}: expected {} to double to {}",
                    seed,
                    xa,
                    xb
                );
            }
        }
    }

    #[test]
    fn selective_update_matches_full_solve() {
        for seed in 0..30 {
            let mut full = random_system(seed, false, 1.0);
            let mut inc = random_system(seed, true, 1.0);

            full.sys.solve();
            inc.sys.solve();

            // mutate both the same way, re-solve, compare end states
            let mut rng = StdRng::seed_from_u64(seed ^ 0xdead);
            for _ in 0..4 {
                let i = rng.gen_range(0, full.vars.len());
                let w = rng.gen_range(0.0, 2.0);
                full.sys.update_variable_weight(full.vars[i], w);
                inc.sys.update_variable_weight(inc.vars[i], w);

                let j = rng.gen_range(0, full.cnsts.len());
                let b = rng.gen_range(1.0, 10.0);
                full.sys.update_constraint_bound(full.cnsts[j], b);
                inc.sys.update_constraint_bound(inc.cnsts[j], b);

                full.sys.solve();
                inc.sys.solve();

                for (&vf, &vi) in full.vars.iter().zip(&inc.vars) {
                    let xf = full.sys.variable_value(vf);
                    let xi = inc.sys.variable_value(vi);
                    assert!(
                        close(xf, xi),
                        "seed {}: full {} != incremental {}",
                        seed,
                        xf,
                        xi
                    );
                }
            }
        }
    }
}
