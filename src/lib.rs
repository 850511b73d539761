//! CloudFilter - an embeddable rule-based traffic filter.
//!
//! This crate is the decision core of a web-server filtering module: given
//! a set of declarative rules, it decides per inbound transaction whether a
//! rule matches and which action to take.
//!
//! # Features
//!
//! - **Longest-prefix matching**: IPv4 CIDR sets stored in a Patricia trie
//!   with insertion, exact and best-match lookup, and collapsing removal
//! - **String match groups**: named groups of literal values and compiled
//!   regexes
//! - **Flow expressions**: boolean expressions such as
//!   `match_src_addr && match_dst_addr || match_string(host)`, compiled
//!   into ordered step lists and evaluated left to right with
//!   short-circuiting
//! - **Pluggable data fetch**: the embedding application supplies request
//!   data through registered callbacks keyed by direction or group name
//! - **Immutable after build**: a built filter is read-only and safe for
//!   concurrent traversal; reloading is an atomic pointer swap
//!
//! # Quick Start
//!
//! ```
//! use cloudfilter::{Action, Filter, Rule};
//! use std::net::Ipv4Addr;
//!
//! struct Request {
//!     src: Ipv4Addr,
//!     host: String,
//! }
//!
//! let mut rule = Rule::new(
//!     "block-lan",
//!     "match_src_addr && match_string(host)",
//!     Action::Deny,
//! )
//! .unwrap();
//! rule.add_src_network("10.0.0.0/8").unwrap();
//! rule.add_match_value("host", "internal.example.com");
//!
//! let mut filter = Filter::new();
//! filter.add_rule(rule);
//! filter.register_src_addr(|req: &Request| Some(req.src));
//! filter.register_string("host", |req: &Request| Some(req.host.clone()));
//!
//! let req = Request {
//!     src: Ipv4Addr::new(10, 1, 2, 3),
//!     host: "internal.example.com".to_string(),
//! };
//! let matched = filter.evaluate(&req).unwrap();
//! assert_eq!(matched.name(), "block-lan");
//! assert_eq!(matched.action(), Action::Deny);
//! ```
//!
//! # Flow semantics
//!
//! Operators attach to the step they follow, and evaluation is strictly
//! left to right: a true step with a `||` behind it decides the rule, a
//! false step discards the rest of its `&&`-chain and resumes after the
//! next `||` boundary. There is no parenthesized grouping.
//!
//! A constraint a rule never configures is vacuously true: a rule without a
//! destination set matches any destination address. A step whose fetch
//! callback was never registered is skipped entirely.
//!
//! # Reloading
//!
//! A filter is never mutated while in service. To change the rule set,
//! build a new [`Filter`] and swap it into a [`FilterHandle`]; in-flight
//! traversals finish on the snapshot they started with.

mod action;
mod error;
mod filter;
mod flow;
mod prefix;
mod rule;
mod strings;

pub mod trie;

// Re-export core types
pub use action::Action;
pub use error::{Error, Result};
pub use filter::{AddrFetch, Filter, FilterHandle, StringFetch, Verdict};
pub use flow::{Flow, FlowOp, FlowStep, StepKind};
pub use prefix::Prefix;
pub use rule::{MatchGroupDef, Rule, RuleDef};
pub use strings::StringMatchTable;
pub use trie::{NodeId, PrefixTrie};
