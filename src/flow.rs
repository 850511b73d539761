//! Flow expressions: the tokenizer, compiler, and compiled step list.
//!
//! A flow is a whitespace-separated boolean expression such as
//! `match_src_addr && match_dst_addr || match_string(headers)`. Operators
//! attach to the step they follow, and evaluation runs strictly left to
//! right: AND binds within an OR-separated run, and there is no
//! parenthesized grouping.

use crate::error::{Error, Result};

/// Boolean operator attached to the step it follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOp {
    /// Continue into the next step on success
    And,
    /// Decide the rule on success; on failure, resume past this boundary
    Or,
}

/// What a single flow step tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Source address against the rule's source prefix set
    SrcAddr,
    /// Destination address against the rule's destination prefix set
    DstAddr,
    /// Negated source-address membership
    NotSrcAddr,
    /// Negated destination-address membership
    NotDstAddr,
    /// A fetched string against the named match group
    MatchString(String),
}

/// One compiled step: a test plus the operator linking it to the next step.
/// The last step of a flow carries no operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStep {
    kind: StepKind,
    next_op: Option<FlowOp>,
}

impl FlowStep {
    /// The test this step performs.
    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// Operator connecting this step to its successor.
    pub fn next_op(&self) -> Option<FlowOp> {
        self.next_op
    }
}

/// A compiled flow: the ordered step list a rule evaluates per request.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    steps: Vec<FlowStep>,
}

#[derive(Clone, Copy)]
enum Token {
    SrcAddr,
    DstAddr,
    MatchString,
    Or,
    And,
    NotSrcAddr,
    NotDstAddr,
}

/// Token vocabulary, matched case-insensitively by prefix, in table order.
const VOCABULARY: &[(&str, Token)] = &[
    ("match_src_addr", Token::SrcAddr),
    ("match_dst_addr", Token::DstAddr),
    ("match_string", Token::MatchString),
    ("||", Token::Or),
    ("&&", Token::And),
    ("!match_src_addr", Token::NotSrcAddr),
    ("!match_dst_addr", Token::NotDstAddr),
];

fn classify(token: &str) -> Option<Token> {
    let lower = token.to_ascii_lowercase();
    VOCABULARY
        .iter()
        .find(|(word, _)| lower.starts_with(word))
        .map(|&(_, tok)| tok)
}

/// Strip `match_string(` and the closing paren, yielding the group name.
fn unwrap_group(token: &str) -> Result<String> {
    let rest = &token["match_string".len()..];
    if !rest.starts_with('(') || !rest.ends_with(')') || rest.len() < 3 {
        return Err(Error::MalformedMatchString(token.to_string()));
    }
    Ok(rest[1..rest.len() - 1].to_string())
}

impl Flow {
    /// Compile a textual flow expression into a step list.
    ///
    /// Operator tokens attach to the step before them, so an expression
    /// may not begin with one. Unrecognized tokens are rejected
    /// outright: a typo would otherwise disable its test silently.
    pub fn parse(expr: &str) -> Result<Self> {
        let mut steps: Vec<FlowStep> = Vec::new();

        for token in expr.split_whitespace() {
            let tok = match classify(token) {
                Some(t) => t,
                None => return Err(Error::UnknownFlowToken(token.to_string())),
            };

            let kind = match tok {
                Token::SrcAddr => StepKind::SrcAddr,
                Token::DstAddr => StepKind::DstAddr,
                Token::NotSrcAddr => StepKind::NotSrcAddr,
                Token::NotDstAddr => StepKind::NotDstAddr,
                Token::MatchString => StepKind::MatchString(unwrap_group(token)?),
                Token::And | Token::Or => {
                    let op = match tok {
                        Token::And => FlowOp::And,
                        _ => FlowOp::Or,
                    };
                    match steps.last_mut() {
                        Some(last) => last.next_op = Some(op),
                        None => return Err(Error::LeadingOperator(expr.to_string())),
                    }
                    continue;
                }
            };

            steps.push(FlowStep { kind, next_op: None });
        }

        Ok(Self { steps })
    }

    /// The compiled steps in evaluation order.
    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    /// A flow with no steps never matches.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
