//! The filter: an ordered rule list, the fetch-callback registry, and the
//! flow evaluator that decides which rule a transaction matches.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;

use crate::action::Action;
use crate::error::Result;
use crate::flow::{FlowOp, StepKind};
use crate::prefix::Prefix;
use crate::rule::{Rule, RuleDef};
use crate::trie::PrefixTrie;

/// Fetch callback returning the source or destination address of a request,
/// or `None` when the value is unavailable.
pub type AddrFetch<C> = Box<dyn Fn(&C) -> Option<Ipv4Addr> + Send + Sync>;

/// Fetch callback returning the request value for a string match group.
pub type StringFetch<C> = Box<dyn Fn(&C) -> Option<String> + Send + Sync>;

struct Callbacks<C> {
    src_addr: Option<AddrFetch<C>>,
    dst_addr: Option<AddrFetch<C>>,
    strings: AHashMap<String, StringFetch<C>>,
}

impl<C> Default for Callbacks<C> {
    fn default() -> Self {
        Self {
            src_addr: None,
            dst_addr: None,
            strings: AHashMap::new(),
        }
    }
}

/// An ordered set of rules plus the fetch callbacks that supply request
/// data to flow steps.
///
/// A filter is assembled single-threaded, then treated as immutable:
/// traversal never mutates shared state, so any number of threads may call
/// [`Filter::evaluate`] concurrently without locking. Reconfiguration means
/// building a fresh filter and swapping it in through a [`FilterHandle`].
pub struct Filter<C> {
    rules: Vec<Rule>,
    callbacks: Callbacks<C>,
}

impl<C> std::fmt::Debug for Filter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("rule_count", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl<C> Filter<C> {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            callbacks: Callbacks::default(),
        }
    }

    /// Build a filter from already-parsed rule records.
    ///
    /// Construction is fail-closed: the first invalid record rejects the
    /// whole set rather than leaving a partially built filter in service.
    pub fn from_defs(defs: &[RuleDef]) -> Result<Self> {
        let mut filter = Self::new();
        for def in defs {
            filter.add_rule(Rule::from_def(def)?);
        }
        log::debug!("built filter with {} rules", filter.rules.len());
        Ok(filter)
    }

    /// Append a rule; rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Rule) {
        if rule.flow().is_empty() {
            log::warn!("rule {} has an empty flow and can never match", rule.name());
        }
        self.rules.push(rule);
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule with the given name.
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    /// Register the source-address fetch callback.
    pub fn register_src_addr<F>(&mut self, f: F)
    where
        F: Fn(&C) -> Option<Ipv4Addr> + Send + Sync + 'static,
    {
        self.callbacks.src_addr = Some(Box::new(f));
    }

    /// Register the destination-address fetch callback.
    pub fn register_dst_addr<F>(&mut self, f: F)
    where
        F: Fn(&C) -> Option<Ipv4Addr> + Send + Sync + 'static,
    {
        self.callbacks.dst_addr = Some(Box::new(f));
    }

    /// Register the fetch callback for a string match group. Steps naming a
    /// group with no registered callback are skipped during evaluation.
    pub fn register_string<F>(&mut self, group: &str, f: F)
    where
        F: Fn(&C) -> Option<String> + Send + Sync + 'static,
    {
        self.callbacks.strings.insert(group.to_string(), Box::new(f));
    }

    /// Walk the rules in declaration order and return the first whose flow
    /// evaluates true, or `None` when every rule misses.
    pub fn evaluate(&self, ctx: &C) -> Option<&Rule> {
        self.rules.iter().find(|rule| self.eval_rule(rule, ctx))
    }

    fn eval_rule(&self, rule: &Rule, ctx: &C) -> bool {
        let steps = rule.flow().steps();
        let mut i = 0;

        while i < steps.len() {
            let step = &steps[i];
            let outcome = match self.eval_step(rule, step.kind(), ctx) {
                Some(b) => b,
                // No callback registered for this step: not applicable,
                // take no decision from it.
                None => {
                    i += 1;
                    continue;
                }
            };

            if outcome {
                match step.next_op() {
                    Some(FlowOp::Or) | None => {
                        log::trace!("rule {} matched at step {}", rule.name(), i);
                        return true;
                    }
                    Some(FlowOp::And) => {
                        i += 1;
                        continue;
                    }
                }
            }

            // The step failed: abandon the rest of this AND-chain and
            // resume past the next OR boundary, if any.
            match steps[i..].iter().position(|s| s.next_op() == Some(FlowOp::Or)) {
                Some(offset) => i += offset + 1,
                None => return false,
            }
        }

        false
    }

    /// Evaluate one step. `None` means the step has no registered fetch
    /// callback and is skipped.
    fn eval_step(&self, rule: &Rule, kind: &StepKind, ctx: &C) -> Option<bool> {
        match kind {
            StepKind::SrcAddr | StepKind::NotSrcAddr => {
                let fetch = self.callbacks.src_addr.as_ref()?;
                let negate = matches!(kind, StepKind::NotSrcAddr);
                Some(addr_matches(rule.src_addrs(), fetch(ctx), negate))
            }
            StepKind::DstAddr | StepKind::NotDstAddr => {
                let fetch = self.callbacks.dst_addr.as_ref()?;
                let negate = matches!(kind, StepKind::NotDstAddr);
                Some(addr_matches(rule.dst_addrs(), fetch(ctx), negate))
            }
            StepKind::MatchString(group) => {
                let fetch = self.callbacks.strings.get(group)?;
                // A rule with no string groups constrains nothing.
                if rule.strings().is_empty() {
                    return Some(true);
                }
                let value = match fetch(ctx) {
                    Some(v) => v,
                    None => return Some(false),
                };
                Some(rule.strings().matches(group, &value))
            }
        }
    }
}

/// Address-step predicate: longest-prefix membership of the fetched address
/// in the rule's direction set. An unconfigured set constrains nothing,
/// negated or not; an unavailable address is a membership miss.
fn addr_matches(trie: Option<&PrefixTrie>, addr: Option<Ipv4Addr>, negate: bool) -> bool {
    let trie = match trie {
        None => return true,
        Some(t) => t,
    };
    let found = match addr {
        Some(a) => trie.search_best(&Prefix::host(a), true).is_some(),
        None => false,
    };
    if negate {
        !found
    } else {
        found
    }
}

impl<C> Default for Filter<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a traversal through a [`FilterHandle`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Name of the matched rule
    pub name: String,
    /// The matched rule's action
    pub action: Action,
}

/// Shared handle over an immutable filter, supporting atomic replacement.
///
/// Request handling loads a consistent snapshot per traversal; reloading
/// builds a fresh filter and stores it, never mutating the live one.
pub struct FilterHandle<C> {
    inner: ArcSwap<Filter<C>>,
}

impl<C> FilterHandle<C> {
    /// Wrap a filter for shared use.
    pub fn new(filter: Filter<C>) -> Self {
        Self {
            inner: ArcSwap::from_pointee(filter),
        }
    }

    /// The current filter snapshot.
    pub fn load(&self) -> Arc<Filter<C>> {
        self.inner.load_full()
    }

    /// Atomically replace the filter. In-flight traversals keep the
    /// snapshot they started with.
    pub fn store(&self, filter: Filter<C>) {
        self.inner.store(Arc::new(filter));
    }

    /// Evaluate against the current snapshot, returning the matched rule's
    /// name and action.
    pub fn evaluate(&self, ctx: &C) -> Option<Verdict> {
        let filter = self.inner.load();
        filter.evaluate(ctx).map(|rule| Verdict {
            name: rule.name().to_string(),
            action: rule.action(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Request context with per-field fetch counters.
    #[derive(Default)]
    struct Request {
        src: Option<Ipv4Addr>,
        dst: Option<Ipv4Addr>,
        value_a: Option<String>,
        value_b: Option<String>,
        fetches_a: Cell<usize>,
        fetches_b: Cell<usize>,
        fetches_dst: Cell<usize>,
    }

    fn wired_filter() -> Filter<Request> {
        let mut filter = Filter::new();
        filter.register_src_addr(|req: &Request| req.src);
        filter.register_dst_addr(|req: &Request| {
            req.fetches_dst.set(req.fetches_dst.get() + 1);
            req.dst
        });
        filter.register_string("a", |req: &Request| {
            req.fetches_a.set(req.fetches_a.get() + 1);
            req.value_a.clone()
        });
        filter.register_string("b", |req: &Request| {
            req.fetches_b.set(req.fetches_b.get() + 1);
            req.value_b.clone()
        });
        filter
    }

    fn string_rule(name: &str, flow: &str) -> Rule {
        let mut rule = Rule::new(name, flow, Action::Deny).unwrap();
        rule.add_match_value("a", "hit-a");
        rule.add_match_value("b", "hit-b");
        rule
    }

    #[test]
    fn test_or_short_circuits() {
        let mut filter = wired_filter();
        filter.add_rule(string_rule("r", "match_string(a) || match_string(b)"));

        let req = Request {
            value_a: Some("hit-a".to_string()),
            value_b: Some("hit-b".to_string()),
            ..Default::default()
        };

        assert!(filter.evaluate(&req).is_some());
        assert_eq!(req.fetches_a.get(), 1);
        // The OR decided the rule; b was never fetched.
        assert_eq!(req.fetches_b.get(), 0);
    }

    #[test]
    fn test_and_short_circuits() {
        let mut filter = wired_filter();
        filter.add_rule(string_rule("r", "match_string(a) && match_string(b)"));

        let req = Request {
            value_a: Some("miss".to_string()),
            value_b: Some("hit-b".to_string()),
            ..Default::default()
        };

        assert!(filter.evaluate(&req).is_none());
        assert_eq!(req.fetches_a.get(), 1);
        // The failed step discarded the rest of its AND-chain.
        assert_eq!(req.fetches_b.get(), 0);
    }

    #[test]
    fn test_failed_chain_resumes_after_or() {
        let mut filter = wired_filter();
        filter.add_rule(string_rule(
            "r",
            "match_string(a) && match_string(b) || match_string(b)",
        ));

        let req = Request {
            value_a: Some("miss".to_string()),
            value_b: Some("hit-b".to_string()),
            ..Default::default()
        };

        assert!(filter.evaluate(&req).is_some());
        // a failed, the evaluator jumped past the OR boundary straight to
        // the second b step; the first b step never ran.
        assert_eq!(req.fetches_b.get(), 1);
    }

    #[test]
    fn test_and_chain_succeeds() {
        let mut filter = wired_filter();
        filter.add_rule(string_rule("r", "match_string(a) && match_string(b)"));

        let req = Request {
            value_a: Some("hit-a".to_string()),
            value_b: Some("hit-b".to_string()),
            ..Default::default()
        };

        assert!(filter.evaluate(&req).is_some());
        assert_eq!(req.fetches_a.get(), 1);
        assert_eq!(req.fetches_b.get(), 1);
    }

    #[test]
    fn test_unregistered_callback_skips_step() {
        let mut filter: Filter<Request> = Filter::new();
        filter.register_dst_addr(|req: &Request| {
            req.fetches_dst.set(req.fetches_dst.get() + 1);
            req.dst
        });

        let mut rule = Rule::new("r", "match_src_addr && match_dst_addr", Action::Deny).unwrap();
        rule.add_dst_network("192.168.0.0/16").unwrap();
        filter.add_rule(rule);

        // No source callback: the src step is skipped, the dst step decides.
        let req = Request {
            dst: Some(Ipv4Addr::new(192, 168, 1, 1)),
            ..Default::default()
        };
        assert!(filter.evaluate(&req).is_some());
        assert_eq!(req.fetches_dst.get(), 1);
    }

    #[test]
    fn test_all_steps_skipped_is_no_match() {
        let mut filter: Filter<Request> = Filter::new();
        filter.add_rule(string_rule("r", "match_string(a)"));

        let req = Request::default();
        assert!(filter.evaluate(&req).is_none());
    }

    #[test]
    fn test_vacuous_address_constraint() {
        let mut filter = wired_filter();
        // No dst trie configured: every destination matches.
        filter.add_rule(Rule::new("r", "match_dst_addr", Action::Permit).unwrap());

        let req = Request {
            dst: Some(Ipv4Addr::new(203, 0, 113, 9)),
            ..Default::default()
        };
        assert!(filter.evaluate(&req).is_some());
    }

    #[test]
    fn test_negated_address_step() {
        let mut filter = wired_filter();
        let mut rule = Rule::new("r", "!match_src_addr", Action::Deny).unwrap();
        rule.add_src_network("10.0.0.0/8").unwrap();
        filter.add_rule(rule);

        let inside = Request {
            src: Some(Ipv4Addr::new(10, 1, 2, 3)),
            ..Default::default()
        };
        let outside = Request {
            src: Some(Ipv4Addr::new(8, 8, 8, 8)),
            ..Default::default()
        };

        assert!(filter.evaluate(&inside).is_none());
        assert!(filter.evaluate(&outside).is_some());
    }

    #[test]
    fn test_negated_step_with_vacuous_set() {
        let mut filter = wired_filter();
        filter.add_rule(Rule::new("r", "!match_src_addr", Action::Deny).unwrap());

        let req = Request {
            src: Some(Ipv4Addr::new(10, 1, 2, 3)),
            ..Default::default()
        };
        // An unconfigured set is vacuously true even for negated kinds.
        assert!(filter.evaluate(&req).is_some());
    }

    #[test]
    fn test_unavailable_address_is_a_miss() {
        let mut filter = wired_filter();
        let mut positive = Rule::new("pos", "match_src_addr", Action::Deny).unwrap();
        positive.add_src_network("10.0.0.0/8").unwrap();
        let mut negative = Rule::new("neg", "!match_src_addr", Action::Deny).unwrap();
        negative.add_src_network("10.0.0.0/8").unwrap();
        filter.add_rule(positive);
        filter.add_rule(negative);

        let req = Request::default();
        // src fetch returns None: the positive rule misses, the negated one
        // matches.
        assert_eq!(filter.evaluate(&req).map(|r| r.name()), Some("neg"));
    }

    #[test]
    fn test_declaration_order_wins() {
        let mut filter = wired_filter();
        filter.add_rule(string_rule("first", "match_string(a)"));
        filter.add_rule(string_rule("second", "match_string(a)"));

        let req = Request {
            value_a: Some("hit-a".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.evaluate(&req).map(|r| r.name()), Some("first"));
    }

    #[test]
    fn test_rule_lookup_by_name() {
        let mut filter = wired_filter();
        filter.add_rule(string_rule("alpha", "match_string(a)"));
        filter.add_rule(string_rule("beta", "match_string(b)"));

        assert!(filter.rule("alpha").is_some());
        assert!(filter.rule("beta").is_some());
        assert!(filter.rule("gamma").is_none());
    }

    #[test]
    fn test_empty_flow_never_matches() {
        let mut filter = wired_filter();
        filter.add_rule(Rule::new("r", "", Action::Permit).unwrap());

        let req = Request {
            value_a: Some("hit-a".to_string()),
            ..Default::default()
        };
        assert!(filter.evaluate(&req).is_none());
    }

    #[test]
    fn test_empty_string_table_is_vacuous() {
        let mut filter = wired_filter();
        // The rule names group "a" in its flow but configures no groups.
        filter.add_rule(Rule::new("r", "match_string(a)", Action::Permit).unwrap());

        let req = Request {
            value_a: Some("anything".to_string()),
            ..Default::default()
        };
        assert!(filter.evaluate(&req).is_some());
    }
}
