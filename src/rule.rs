//! Rules: the unit of filtering configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::Result;
use crate::flow::Flow;
use crate::prefix::Prefix;
use crate::strings::StringMatchTable;
use crate::trie::PrefixTrie;

/// A single filtering rule: a compiled flow, per-direction prefix sets, a
/// string match table, and the action to take on a match.
///
/// A rule is assembled at load time and never mutated once its filter is in
/// service. A direction whose prefix set was never touched constrains
/// nothing: every address matches it.
pub struct Rule {
    name: String,
    action: Action,
    src_addrs: Option<PrefixTrie>,
    dst_addrs: Option<PrefixTrie>,
    strings: StringMatchTable,
    flow: Flow,
}

impl Rule {
    /// Create a rule with a compiled flow and no address or string
    /// constraints yet.
    pub fn new(name: impl Into<String>, flow: &str, action: Action) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            action,
            src_addrs: None,
            dst_addrs: None,
            strings: StringMatchTable::new(),
            flow: Flow::parse(flow)?,
        })
    }

    /// Rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action taken when this rule matches.
    pub fn action(&self) -> Action {
        self.action
    }

    /// The compiled flow.
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Add a CIDR to the source address set, creating the set on first use.
    pub fn add_src_network(&mut self, network: &str) -> Result<()> {
        let prefix = Prefix::from_str(network)?;
        self.src_addrs.get_or_insert_with(PrefixTrie::new).insert(prefix);
        Ok(())
    }

    /// Add a CIDR to the destination address set, creating the set on first
    /// use.
    pub fn add_dst_network(&mut self, network: &str) -> Result<()> {
        let prefix = Prefix::from_str(network)?;
        self.dst_addrs.get_or_insert_with(PrefixTrie::new).insert(prefix);
        Ok(())
    }

    /// Add a literal value to a match group.
    pub fn add_match_value(&mut self, group: &str, value: &str) {
        self.strings.add_value(group, value);
    }

    /// Add a regex pattern to a match group.
    pub fn add_match_regex(&mut self, group: &str, pattern: &str) -> Result<()> {
        self.strings.add_regex(group, pattern)
    }

    /// Source address set, if one was configured.
    pub fn src_addrs(&self) -> Option<&PrefixTrie> {
        self.src_addrs.as_ref()
    }

    /// Destination address set, if one was configured.
    pub fn dst_addrs(&self) -> Option<&PrefixTrie> {
        self.dst_addrs.as_ref()
    }

    /// The rule's string match table.
    pub fn strings(&self) -> &StringMatchTable {
        &self.strings
    }

    /// Build a rule from an already-parsed record, rejecting the whole
    /// record on the first configuration error.
    pub fn from_def(def: &RuleDef) -> Result<Self> {
        let mut rule = Rule::new(def.name.as_str(), &def.flow, Action::parse(&def.action)?)?;
        for addr in &def.src_addrs {
            rule.add_src_network(addr)?;
        }
        for addr in &def.dst_addrs {
            rule.add_dst_network(addr)?;
        }
        for group in &def.match_strings {
            for value in &group.values {
                rule.add_match_value(&group.name, value);
            }
            for pattern in &group.regex {
                rule.add_match_regex(&group.name, pattern)?;
            }
        }
        Ok(rule)
    }
}

/// An already-parsed rule record, the shape a configuration front end hands
/// to the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    /// Rule name
    pub name: String,
    /// Flow expression, e.g. `match_src_addr && match_string(host)`
    pub flow: String,
    /// Source CIDR strings
    #[serde(default)]
    pub src_addrs: Vec<String>,
    /// Destination CIDR strings
    #[serde(default)]
    pub dst_addrs: Vec<String>,
    /// Named string match groups
    #[serde(default)]
    pub match_strings: Vec<MatchGroupDef>,
    /// Action token: `permit`, `deny`, or a decimal code
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    "deny".to_string()
}

/// A named string match group inside a rule record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGroupDef {
    /// Group name, also the key its fetch callback is registered under
    pub name: String,
    /// Literal values
    #[serde(default)]
    pub values: Vec<String>,
    /// Regex patterns
    #[serde(default)]
    pub regex: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn def(flow: &str) -> RuleDef {
        RuleDef {
            name: "test".to_string(),
            flow: flow.to_string(),
            src_addrs: Vec::new(),
            dst_addrs: Vec::new(),
            match_strings: Vec::new(),
            action: "deny".to_string(),
        }
    }

    #[test]
    fn test_from_def() {
        let mut record = def("match_src_addr && match_string(host)");
        record.src_addrs = vec!["10.0.0.0/8".to_string(), "172.16/12".to_string()];
        record.match_strings = vec![MatchGroupDef {
            name: "host".to_string(),
            values: vec!["internal".to_string()],
            regex: vec!["^static\\.".to_string()],
        }];
        record.action = "permit".to_string();

        let rule = Rule::from_def(&record).unwrap();
        assert_eq!(rule.name(), "test");
        assert_eq!(rule.action(), Action::Permit);
        assert_eq!(rule.src_addrs().map(|t| t.prefix_count()), Some(2));
        assert!(rule.dst_addrs().is_none());
        assert!(rule.strings().matches("host", "internal"));
        assert!(rule.strings().matches("host", "static.example.com"));
    }

    #[test]
    fn test_bad_flow_rejects_rule() {
        let record = def("match_src_addr && frobnicate");
        assert!(matches!(
            Rule::from_def(&record),
            Err(Error::UnknownFlowToken(_))
        ));
    }

    #[test]
    fn test_bad_address_rejects_rule() {
        let mut record = def("match_src_addr");
        record.src_addrs = vec!["10.0.0.0/8".to_string(), "not-an-addr".to_string()];
        assert!(matches!(
            Rule::from_def(&record),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_bad_regex_rejects_rule() {
        let mut record = def("match_string(g)");
        record.match_strings = vec![MatchGroupDef {
            name: "g".to_string(),
            values: Vec::new(),
            regex: vec!["(".to_string()],
        }];
        assert!(matches!(
            Rule::from_def(&record),
            Err(Error::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_bad_action_rejects_rule() {
        let mut record = def("match_src_addr");
        record.action = "drop".to_string();
        assert!(matches!(
            Rule::from_def(&record),
            Err(Error::InvalidAction(_))
        ));
    }

    #[test]
    fn test_integer_action_codes() {
        let mut record = def("match_src_addr");
        record.action = "451".to_string();
        let rule = Rule::from_def(&record).unwrap();
        assert_eq!(rule.action(), Action::Code(451));
    }
}
