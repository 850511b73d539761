//! Error types for cloudfilter.

use thiserror::Error;

/// Error type for filter construction.
///
/// Every variant is a configuration-time error: rule sets build fail-closed,
/// so the first bad record rejects the set as a whole. Misses during
/// evaluation (unknown group, unregistered callback, no trie hit) are normal
/// boolean results, never errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed address or CIDR string
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Flow expression begins with an operator
    #[error("flow expression begins with an operator: {0}")]
    LeadingOperator(String),

    /// Token outside the flow vocabulary
    #[error("unrecognized flow token: {0}")]
    UnknownFlowToken(String),

    /// match_string token without a parenthesized group name
    #[error("malformed match_string token: {0}")]
    MalformedMatchString(String),

    /// Regex pattern failed to compile
    #[error("invalid regex in group {group}: {source}")]
    InvalidRegex {
        /// Group the pattern was destined for
        group: String,
        /// Underlying compile error
        #[source]
        source: regex::Error,
    },

    /// Action token is neither a keyword nor an integer
    #[error("invalid action: {0}")]
    InvalidAction(String),
}

/// Result type alias for cloudfilter operations.
pub type Result<T> = std::result::Result<T, Error>;
