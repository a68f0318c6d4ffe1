//! Boolean condition expressions over check-node outcomes
//!
//! A rule's checklist may carry an optional `condition` string such as
//! `(n1 and n2) or n3`. Identifiers reference check-node ids declared in the
//! same rule; `&`/`|` are accepted for `and`/`or`; the constants `true` and
//! `false` are permitted.

mod lexer;
mod parser;
/// Token definitions for condition expressions
pub mod token;

pub use lexer::Lexer;
pub use parser::{CondNode, ConditionAst};

use crate::Result;

/// Parse a condition expression into its AST
pub fn parse(source: &str) -> Result<ConditionAst> {
    let items = Lexer::new(source).scan()?;
    ConditionAst::parse(source, items)
}
