//! Rulesets: compiled form and compilation entry point
//!
//! A ruleset is compiled exactly once from its XML source into a form whose
//! evaluation is a pure function of (event, store state): field paths are
//! pre-parsed, operators resolved, regexes precompiled, plugin calls bound to
//! registry handles, and condition expressions parsed to ASTs. A ruleset
//! that fails compilation never enters the evaluation path.

mod parse;
mod validate;

pub use parse::{RawAppend, RawFilter, RawNode, RawRule, RawRuleset, RawThreshold};

use std::sync::Arc;

use regex::Regex;

use crate::condition::ConditionAst;
use crate::field::FieldPath;
use crate::operator::OpKind;
use crate::plugin::{AppendPlugin, CheckPlugin, PluginCall, PluginRegistry};
use crate::{Result, RAW_REF_PREFIX};

/// Ruleset evaluation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RulesetMode {
    /// Emit the event iff the rule's checks pass
    #[default]
    Detection,
    /// Emit the event iff the rule's checks do not pass
    Whitelist,
}

/// A value that may be a literal or a raw-ref resolved at evaluation time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSpec {
    /// Use the string as written
    Literal(String),
    /// Resolve the path against the event at the point of use
    RawRef {
        /// The full marker-prefixed string, the scratch-cache key
        marked: String,
        /// The pre-parsed path after the marker
        path: FieldPath,
    },
}

impl ValueSpec {
    /// Classify a value string by the raw-ref marker
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix(RAW_REF_PREFIX) {
            Some(path) => ValueSpec::RawRef {
                marked: value.to_string(),
                path: FieldPath::parse(path),
            },
            None => ValueSpec::Literal(value.to_string()),
        }
    }

    /// Whether this value resolves per event
    pub fn is_raw(&self) -> bool {
        matches!(self, ValueSpec::RawRef { .. })
    }

    /// The literal text, when this is a literal
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            ValueSpec::Literal(s) => Some(s),
            ValueSpec::RawRef { .. } => None,
        }
    }
}

/// Pre-gate on a single field: substring containment, INCL semantics
#[derive(Debug, Clone)]
pub struct Filter {
    /// Field to inspect
    pub field: FieldPath,
    /// Substring to require; may be a raw-ref
    pub value: ValueSpec,
}

/// Part-combination semantics for delimiter-split values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    /// Every part must match
    And,
    /// Any part may match
    Or,
}

/// Compiled form of a REGEX node's pattern
#[derive(Debug, Clone)]
pub enum RegexSpec {
    /// Literal pattern, compiled once
    Compiled(Regex),
    /// Literal delimiter-split patterns, compiled once per part
    CompiledParts(Vec<Regex>),
    /// Raw-ref pattern, recompiled per event (and per part)
    PerEvent,
}

/// What a check node actually does
#[derive(Clone)]
pub enum CheckKind {
    /// A named comparison operator
    Op(OpKind),
    /// Regex match over the observed value
    Regex(RegexSpec),
    /// Bound check plugin invocation
    Plugin {
        /// The parsed call expression
        call: PluginCall,
        /// Resolved registry handle
        handle: Arc<dyn CheckPlugin>,
    },
}

impl std::fmt::Debug for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::Op(op) => write!(f, "Op({})", op.name()),
            CheckKind::Regex(spec) => write!(f, "Regex({spec:?})"),
            CheckKind::Plugin { call, .. } => write!(f, "Plugin({})", call.name),
        }
    }
}

/// One compiled checklist entry
#[derive(Debug, Clone)]
pub struct CheckNode {
    /// Node id; required and unique when the rule has a condition
    pub id: String,
    /// The operation to run
    pub kind: CheckKind,
    /// Field whose rendering becomes the observed value
    pub field: FieldPath,
    /// Comparand (or regex pattern, or plugin call source)
    pub value: ValueSpec,
    /// Split semantics, paired with `delimiter`
    pub logic: Option<Logic>,
    /// Delimiter to split the value on, paired with `logic`
    pub delimiter: Option<String>,
}

/// How a threshold counts events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountType {
    /// Count occurrences
    #[default]
    Occurrence,
    /// Accumulate an integer field
    Sum,
    /// Count distinct values of a field
    Classify,
}

/// Sliding-window threshold gating rule firing
#[derive(Debug, Clone)]
pub struct Threshold {
    /// Paths whose rendered values form the group key
    pub group_by: Vec<FieldPath>,
    /// Window length in seconds
    pub range_secs: u64,
    /// Count the quantity must strictly exceed
    pub value: i64,
    /// Counting mode
    pub count_type: CountType,
    /// Counted field; required for SUM and CLASSIFY
    pub count_field: Option<FieldPath>,
}

/// Value side of an append
#[derive(Clone)]
pub enum AppendValue {
    /// Literal or raw-ref
    Value(ValueSpec),
    /// Bound append plugin invocation
    Plugin {
        /// The parsed call expression
        call: PluginCall,
        /// Resolved registry handle
        handle: Arc<dyn AppendPlugin>,
    },
}

impl std::fmt::Debug for AppendValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppendValue::Value(v) => write!(f, "Value({v:?})"),
            AppendValue::Plugin { call, .. } => write!(f, "Plugin({})", call.name),
        }
    }
}

/// Post-match field assignment
#[derive(Debug, Clone)]
pub struct Append {
    /// Event key to assign
    pub field_name: String,
    /// Value producer
    pub value: AppendValue,
}

/// One compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule id, unique within the ruleset
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Rule author
    pub author: String,
    /// Optional pre-gate
    pub filter: Option<Filter>,
    /// Ordered check nodes
    pub checklist: Vec<CheckNode>,
    /// Optional boolean combinator over node ids
    pub condition: Option<ConditionAst>,
    /// Optional firing gate
    pub threshold: Option<Threshold>,
    /// Post-match assignments
    pub appends: Vec<Append>,
    /// Post-match deletions
    pub del: Vec<FieldPath>,
    /// Expected true-count under plain AND logic; a short-circuit bound
    pub checklist_len: usize,
}

/// A compiled, immutable ruleset
#[derive(Debug, Clone)]
pub struct Ruleset {
    /// Ruleset id
    pub id: String,
    /// Ruleset name
    pub name: String,
    /// Evaluation mode
    pub mode: RulesetMode,
    /// Rules in declaration order
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Compile a ruleset from its XML source
    ///
    /// Parses the document, validates it, and pre-computes everything the
    /// evaluator needs. Any defect is rejected here with the exact
    /// user-visible message; a compiled ruleset is immutable.
    pub fn compile(xml: &str, registry: &PluginRegistry) -> Result<Ruleset> {
        let raw = parse::parse_document(xml)?;
        validate::compile(raw, registry)
    }
}
