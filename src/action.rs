//! Rule actions.

use std::fmt;

use crate::error::{Error, Result};

/// What to do with a transaction once a rule matches.
///
/// `Permit` and `Deny` are the built-in outcomes; `Code` carries an
/// application-defined decision that the embedder enforces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    /// Let the transaction through
    Permit,
    /// Block the transaction
    #[default]
    Deny,
    /// Application-defined action code
    Code(i32),
}

impl Action {
    /// Parse an action token (case-insensitive): `permit`, `deny`, or a
    /// decimal integer for an application-controlled action.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "permit" => Ok(Action::Permit),
            "deny" => Ok(Action::Deny),
            other => other
                .parse::<i32>()
                .map(Action::Code)
                .map_err(|_| Error::InvalidAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Permit => write!(f, "permit"),
            Action::Deny => write!(f, "deny"),
            Action::Code(code) => write!(f, "{}", code),
        }
    }
}
