use std::collections::HashMap;

use alloy_primitives::Address;
use rebate_types::{Fraction, TypeError, MAX_REFERRAL_CHAIN_LEN};

/// One hop of a resolved chain, root-first: the hop nearest the broker is
/// first, and the hop nearest the queried child (or the code's terminal hop,
/// for `chain_for_code`) is the last element.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLevel {
    pub parent: Address,
    pub child: Address,
    pub pass_on: Fraction,
    /// Fraction of the original fee still "available" after this hop's cut,
    /// i.e. `Π pass_on[0..=k]`.
    pub child_avail: Fraction,
    /// Fraction of the original fee this hop's parent keeps for itself.
    pub parent_pay: Fraction,
    pub level: u32,
}

/// The referral chain loaded in memory for a batch (§10 Design Note 9):
/// one parent edge per child, plus the broker root address.
#[derive(Debug, Clone)]
pub struct Graph {
    broker: Address,
    parents: HashMap<Address, (Address, Fraction)>,
}

impl Graph {
    pub fn new(broker: Address) -> Self {
        Self { broker, parents: HashMap::new() }
    }

    pub fn broker(&self) -> Address {
        self.broker
    }

    /// Loads an edge as observed in storage; `pass_on_percent` is a percent
    /// in `[0, 100]`, matching the stored column.
    pub fn load_edge(
        &mut self,
        parent: Address,
        child: Address,
        pass_on_percent: f32,
    ) -> Result<(), TypeError> {
        let pass_on = Fraction::from_percent(pass_on_percent as f64)?;
        self.parents.insert(child, (parent, pass_on));
        Ok(())
    }

    /// `is_agency(addr)` (§4.1): true if `addr` is the broker or appears as
    /// a child in any chain edge.
    pub fn is_agency(&self, addr: Address) -> (bool, bool) {
        let is_broker = addr == self.broker;
        let is_agent = is_broker || self.parents.contains_key(&addr);
        (is_agent, is_broker)
    }

    /// `has_loop(parent, new_child)` (§4.1): walks the chain upward from
    /// `parent`, failing if `new_child` equals any ancestor's parent or
    /// child — i.e. if `new_child` already sits somewhere on that path.
    pub fn has_loop(&self, parent: Address, new_child: Address) -> bool {
        if parent == new_child {
            return true;
        }
        let mut cursor = parent;
        loop {
            if cursor == new_child {
                return true;
            }
            match self.parents.get(&cursor) {
                Some((next_parent, _)) => {
                    if *next_parent == new_child {
                        return true;
                    }
                    if *next_parent == self.broker {
                        return false;
                    }
                    cursor = *next_parent;
                }
                None => return false,
            }
        }
    }

    /// The chain from the broker down to `child`, root-first, plus whether
    /// `child` is itself an agent. Non-agents resolve to a synthetic single
    /// edge keyed off their token-holding cut tier.
    pub fn chain_from_child(&self, child: Address, referrer_cut: Fraction) -> (Vec<ChainLevel>, bool) {
        if !self.parents.contains_key(&child) {
            let level = ChainLevel {
                parent: self.broker,
                child,
                pass_on: referrer_cut,
                child_avail: referrer_cut,
                parent_pay: Fraction::from_f64(1.0 - referrer_cut.as_f64()),
                level: 1,
            };
            return (vec![level], false);
        }

        // Walk from `child` up to the broker root first, collecting the raw
        // edges leaf-to-root, then reverse them so amounts can be computed
        // root-first (§4.1: `parent_pay[k] = child_avail[k-1]*(1-pass_on[k])`,
        // with `k = 0` the root-adjacent edge) — the cumulative product this
        // formula needs only accrues correctly walked in that direction.
        let mut edges = Vec::new();
        let mut cursor = child;
        let mut depth = 1usize;
        while let Some((parent, pass_on)) = self.parents.get(&cursor).copied() {
            edges.push((parent, cursor, pass_on));
            if parent == self.broker || depth >= MAX_REFERRAL_CHAIN_LEN {
                break;
            }
            cursor = parent;
            depth += 1;
        }
        edges.reverse();

        let mut hops = Vec::with_capacity(edges.len());
        let mut child_avail = Fraction::ONE;
        for (k, (parent, hop_child, pass_on)) in edges.into_iter().enumerate() {
            let prior_avail = child_avail;
            child_avail = child_avail * pass_on;
            let parent_pay = Fraction::from_f64(prior_avail.as_f64() * (1.0 - pass_on.as_f64()));
            hops.push(ChainLevel {
                parent,
                child: hop_child,
                pass_on,
                child_avail,
                parent_pay,
                level: k as u32 + 1,
            });
        }
        (hops, true)
    }

    /// `cut_percentage_agency(addr, holdings?)` (§4.1).
    pub fn cut_percentage_agency(&self, addr: Address, referrer_cut: Fraction) -> (f64, bool) {
        let (_, is_broker) = self.is_agency(addr);
        if is_broker {
            return (100.0, true);
        }
        let (chain, is_agent) = self.chain_from_child(addr, referrer_cut);
        let last = chain.last().map(|l| l.child_avail.as_percent()).unwrap_or(0.0);
        (last, is_agent)
    }

    /// `has_loop`'s companion check used by `refer`: whether `addr` already
    /// appears as a child anywhere in the graph.
    pub fn is_child(&self, addr: Address) -> bool {
        self.parents.contains_key(&addr)
    }

    /// Every address that appears anywhere in the loaded chain edges, other
    /// than the broker root — the population the §4.2 step 3a token-holdings
    /// cache refresh iterates over, since any of them may be a code's
    /// referrer.
    pub fn agent_addresses(&self) -> impl Iterator<Item = Address> {
        let mut addrs: std::collections::HashSet<Address> = std::collections::HashSet::new();
        for (child, (parent, _)) in &self.parents {
            addrs.insert(*child);
            if *parent != self.broker {
                addrs.insert(*parent);
            }
        }
        addrs.into_iter()
    }

    pub fn insert_edge(&mut self, parent: Address, child: Address, pass_on: Fraction) {
        self.parents.insert(child, (parent, pass_on));
    }

    pub fn chain_depth(&self, child: Address) -> usize {
        self.chain_from_child(child, Fraction::ZERO).0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn broker_is_its_own_agency_root() {
        let broker = addr(1);
        let g = Graph::new(broker);
        assert_eq!(g.is_agency(broker), (true, true));
        assert_eq!(g.cut_percentage_agency(broker, Fraction::ZERO).0, 100.0);
    }

    #[test]
    fn non_agent_resolves_to_synthetic_cut_edge() {
        let broker = addr(1);
        let referrer = addr(2);
        let g = Graph::new(broker);
        let (chain, is_agent) = g.chain_from_child(referrer, Fraction::from_percent(30.0).unwrap());
        assert!(!is_agent);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].child_avail.as_percent(), 30.0);
        assert_eq!(chain[0].parent, broker);
    }

    #[test]
    fn two_hop_chain_accumulates_pass_on() {
        let broker = addr(1);
        let mid = addr(2);
        let leaf = addr(3);
        let mut g = Graph::new(broker);
        g.load_edge(broker, mid, 50.0).unwrap();
        g.load_edge(mid, leaf, 50.0).unwrap();

        let (chain, is_agent) = g.chain_from_child(leaf, Fraction::ZERO);
        assert!(is_agent);
        assert_eq!(chain.len(), 2);
        assert!((chain[0].child_avail.as_f64() - 0.5).abs() < 1e-9);
        assert!((chain[1].child_avail.as_f64() - 0.25).abs() < 1e-9);
        assert!((chain[1].parent_pay.as_f64() - 0.25).abs() < 1e-9);
    }

    /// Scenario S2: broker->A pass_on=50%, A->B pass_on=60%. Each hop's
    /// `parent_pay` belongs to *that hop's own parent*, not to whichever
    /// edge happens to be walked first — a symmetric 50/50 chain can't tell
    /// the two apart, so this uses the spec's own asymmetric numbers.
    #[test]
    fn two_hop_chain_attributes_parent_pay_to_the_right_parent() {
        let broker = addr(1);
        let a = addr(2);
        let b = addr(3);
        let mut g = Graph::new(broker);
        g.load_edge(broker, a, 50.0).unwrap();
        g.load_edge(a, b, 60.0).unwrap();

        let (chain, is_agent) = g.chain_from_child(b, Fraction::ZERO);
        assert!(is_agent);
        assert_eq!(chain.len(), 2);

        assert_eq!(chain[0].parent, broker);
        assert!((chain[0].parent_pay.as_f64() - 0.5).abs() < 1e-9);
        assert!((chain[0].child_avail.as_f64() - 0.5).abs() < 1e-9);

        assert_eq!(chain[1].parent, a);
        assert!((chain[1].parent_pay.as_f64() - 0.2).abs() < 1e-9);
        assert!((chain[1].child_avail.as_f64() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn agent_addresses_collects_every_non_broker_address_in_the_chain() {
        let broker = addr(1);
        let a = addr(2);
        let b = addr(3);
        let mut g = Graph::new(broker);
        g.load_edge(broker, a, 50.0).unwrap();
        g.load_edge(a, b, 60.0).unwrap();

        let mut agents: Vec<_> = g.agent_addresses().collect();
        agents.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(agents, expected);
    }

    #[test]
    fn has_loop_detects_cycle_through_existing_ancestor() {
        let broker = addr(1);
        let a = addr(2);
        let b = addr(3);
        let mut g = Graph::new(broker);
        g.load_edge(broker, a, 50.0).unwrap();
        g.load_edge(a, b, 50.0).unwrap();

        // b -> a would close a cycle since a is already b's ancestor.
        assert!(g.has_loop(b, a));
        // a fresh address doesn't create a loop.
        assert!(!g.has_loop(b, addr(9)));
    }

    #[test]
    fn chain_depth_is_bounded_by_max_referral_chain_len() {
        let broker = addr(0);
        let mut g = Graph::new(broker);
        let mut prev = broker;
        for i in 1..=(MAX_REFERRAL_CHAIN_LEN as u8 + 3) {
            let cur = addr(i);
            g.load_edge(prev, cur, 10.0).unwrap();
            prev = cur;
        }
        assert!(g.chain_depth(prev) <= MAX_REFERRAL_CHAIN_LEN);
    }

    proptest::proptest! {
        /// Every `child_avail` is the product of the `pass_on`s walked so far,
        /// so it only ever shrinks: the deepest hop's `child_avail` is never
        /// larger than the shallowest's, for any chain of pass-on percentages.
        #[test]
        fn child_avail_is_non_increasing_along_the_chain(
            pass_ons in proptest::collection::vec(1.0f32..100.0, 1..8),
        ) {
            let broker = addr(0);
            let mut g = Graph::new(broker);
            let mut prev = broker;
            for (i, pct) in pass_ons.iter().enumerate() {
                let cur = addr((i + 1) as u8);
                g.load_edge(prev, cur, *pct).unwrap();
                prev = cur;
            }
            let (chain, _) = g.chain_from_child(prev, Fraction::ZERO);
            for pair in chain.windows(2) {
                proptest::prop_assert!(pair[1].child_avail.as_f64() <= pair[0].child_avail.as_f64() + 1e-9);
            }
            // child_avail plus every parent_pay collected so far accounts for
            // the whole fee: nothing is created or lost along the chain.
            if let Some(last) = chain.last() {
                let kept: f64 = chain.iter().map(|h| h.parent_pay.as_f64()).sum();
                proptest::prop_assert!((kept + last.child_avail.as_f64() - 1.0).abs() < 1e-6);
            }
        }

        /// However many hops are loaded, `chain_from_child` never returns
        /// more than `MAX_REFERRAL_CHAIN_LEN` of them — the walk stops at the
        /// cap rather than looping forever on a long (but acyclic) chain.
        #[test]
        fn chain_length_is_always_bounded(depth in 1usize..40) {
            let broker = addr(0);
            let mut g = Graph::new(broker);
            let mut prev = broker;
            for i in 1..=depth {
                let cur = addr((i % 255) as u8 + 1);
                g.load_edge(prev, cur, 10.0).unwrap();
                prev = cur;
            }
            proptest::prop_assert!(g.chain_depth(prev) <= MAX_REFERRAL_CHAIN_LEN);
        }
    }
}
