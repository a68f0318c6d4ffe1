//! Validation and pre-computation of parsed ruleset documents
//!
//! Every rejection carries the exact user-visible message; the control plane
//! surfaces these verbatim. Check-node defects name the node's index within
//! its rule.

use std::collections::HashSet;

use regex::Regex;

use super::parse::{RawNode, RawRule, RawRuleset, RawThreshold};
use super::{
    Append, AppendValue, CheckKind, CheckNode, CountType, Filter, Logic, RegexSpec, Rule,
    Ruleset, RulesetMode, Threshold, ValueSpec,
};
use crate::condition;
use crate::field::FieldPath;
use crate::operator::OpKind;
use crate::plugin::{PluginCall, PluginRegistry};
use crate::{HubError, Result};

/// Compile a raw document into an immutable ruleset
pub fn compile(raw: RawRuleset, registry: &PluginRegistry) -> Result<Ruleset> {
    if raw.id.trim().is_empty() {
        return Err(HubError::compile("RULESET ID CANNOT BE EMPTY"));
    }
    if raw.name.trim().is_empty() {
        return Err(HubError::compile("RULESET NAME CANNOT BE EMPTY"));
    }
    let mode = parse_mode(raw.mode.as_deref())?;

    let mut rules = Vec::with_capacity(raw.rules.len());
    let mut seen_rule_ids = HashSet::new();
    for raw_rule in raw.rules {
        if raw_rule.id.trim().is_empty() {
            return Err(HubError::compile("RULE ID CANNOT BE EMPTY"));
        }
        if !seen_rule_ids.insert(raw_rule.id.clone()) {
            return Err(HubError::compile(format!(
                "DUPLICATE RULE ID, {}",
                raw_rule.id
            )));
        }
        rules.push(compile_rule(raw_rule, registry)?);
    }

    Ok(Ruleset {
        id: raw.id,
        name: raw.name,
        mode,
        rules,
    })
}

fn parse_mode(mode: Option<&str>) -> Result<RulesetMode> {
    match mode {
        None => Ok(RulesetMode::Detection),
        Some(value) if value.trim().is_empty() => Ok(RulesetMode::Detection),
        Some(value) if value.eq_ignore_ascii_case("DETECTION") => Ok(RulesetMode::Detection),
        Some(value) if value.eq_ignore_ascii_case("WHITELIST") => Ok(RulesetMode::Whitelist),
        Some(value) => Err(HubError::compile(format!("UNKNOWN RULESET TYPE, {value}"))),
    }
}

fn compile_rule(raw: RawRule, registry: &PluginRegistry) -> Result<Rule> {
    let rule_id = raw.id.clone();
    if raw.name.trim().is_empty() {
        return Err(HubError::compile(format!(
            "RULE NAME CANNOT BE EMPTY, {rule_id}"
        )));
    }
    if raw.author.trim().is_empty() {
        return Err(HubError::compile(format!(
            "RULE AUTHOR CANNOT BE EMPTY, {rule_id}"
        )));
    }

    let filter = raw.filter.map(|f| Filter {
        field: FieldPath::parse(&f.field),
        value: ValueSpec::parse(&f.value),
    });

    let mut checklist = Vec::with_capacity(raw.nodes.len());
    for (index, node) in raw.nodes.into_iter().enumerate() {
        checklist.push(compile_node(node, index, registry)?);
    }

    let condition = match raw.condition.as_deref().map(str::trim) {
        Some(expr) if !expr.is_empty() => {
            Some(compile_condition(expr, &checklist)?)
        }
        _ => None,
    };

    let threshold = raw.threshold.map(compile_threshold).transpose()?;

    let mut appends = Vec::with_capacity(raw.appends.len());
    for append in raw.appends {
        let value = match append.append_type.as_deref().map(str::trim) {
            None | Some("") => AppendValue::Value(ValueSpec::parse(&append.value)),
            Some(kind) if kind.eq_ignore_ascii_case("PLUGIN") => {
                let call = PluginCall::parse(&append.value).map_err(|_| {
                    HubError::compile(format!("INVALID PLUGIN EXPRESSION, {}", append.value))
                })?;
                let handle = registry.append(&call.name).ok_or_else(|| {
                    HubError::compile(format!("PLUGIN NOT FOUND, {}", call.name))
                })?;
                AppendValue::Plugin { call, handle }
            }
            Some(kind) => {
                return Err(HubError::compile(format!("UNKNOWN APPEND TYPE, {kind}")));
            }
        };
        appends.push(Append {
            field_name: append.field_name,
            value,
        });
    }

    let del = raw
        .del
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(FieldPath::parse)
        .collect();

    let checklist_len = checklist.len();
    Ok(Rule {
        id: raw.id,
        name: raw.name,
        author: raw.author,
        filter,
        checklist,
        condition,
        threshold,
        appends,
        del,
        checklist_len,
    })
}

fn compile_node(raw: RawNode, index: usize, registry: &PluginRegistry) -> Result<CheckNode> {
    let value = ValueSpec::parse(&raw.value);

    let logic = match raw.logic.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) if text.eq_ignore_ascii_case("AND") => Some(Logic::And),
        Some(text) if text.eq_ignore_ascii_case("OR") => Some(Logic::Or),
        Some(_) => {
            return Err(HubError::compile(format!(
                "UNKNOWN CHECK NODE LOGIC, {index}"
            )));
        }
    };
    let delimiter = raw
        .delimiter
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    match (&logic, &delimiter) {
        (Some(_), None) => {
            return Err(HubError::compile(format!(
                "CHECK NODE LOGIC WITHOUT DELIMITER, {index}"
            )));
        }
        (None, Some(_)) => {
            return Err(HubError::compile(format!(
                "CHECK NODE DELIMITER WITHOUT LOGIC, {index}"
            )));
        }
        _ => {}
    }
    if let (Some(delim), Some(literal)) = (&delimiter, value.as_literal()) {
        if !literal.contains(delim.as_str()) {
            return Err(HubError::compile(format!(
                "CHECK NODE VALUE DOES NOT EXIST IN DELIMITER, {index}"
            )));
        }
    }

    let node_type = raw.node_type.trim();
    let kind = if let Some(op) = OpKind::from_name(node_type) {
        CheckKind::Op(op)
    } else if node_type == "REGEX" {
        match &value {
            ValueSpec::Literal(pattern) => {
                let compile_one = |p: &str| {
                    Regex::new(p).map_err(|e| {
                        HubError::compile(format!(
                            "CHECK NODE REGEX COMPILE FAILED, {index}: {e}"
                        ))
                    })
                };
                match &delimiter {
                    Some(delim) => {
                        let parts = pattern
                            .split(delim.as_str())
                            .map(compile_one)
                            .collect::<Result<Vec<_>>>()?;
                        CheckKind::Regex(RegexSpec::CompiledParts(parts))
                    }
                    None => CheckKind::Regex(RegexSpec::Compiled(compile_one(pattern)?)),
                }
            }
            // Raw-ref patterns are recompiled per event
            ValueSpec::RawRef { .. } => CheckKind::Regex(RegexSpec::PerEvent),
        }
    } else if node_type == "PLUGIN" {
        let call = PluginCall::parse(&raw.value).map_err(|_| {
            HubError::compile(format!("INVALID PLUGIN EXPRESSION, {}", raw.value))
        })?;
        let handle = registry
            .check(&call.name)
            .ok_or_else(|| HubError::compile(format!("PLUGIN NOT FOUND, {}", call.name)))?;
        CheckKind::Plugin { call, handle }
    } else {
        return Err(HubError::compile(format!(
            "UNKNOWN CHECK NODE TYPE, {index}"
        )));
    };

    Ok(CheckNode {
        id: raw.id.unwrap_or_default(),
        kind,
        field: FieldPath::parse(&raw.field),
        value,
        logic,
        delimiter,
    })
}

fn compile_condition(
    expr: &str,
    checklist: &[CheckNode],
) -> Result<condition::ConditionAst> {
    for (index, node) in checklist.iter().enumerate() {
        if node.id.trim().is_empty() {
            return Err(HubError::compile(format!(
                "CHECK NODE ID REQUIRED WHEN CONDITION IS PRESENT, {index}"
            )));
        }
    }
    let mut seen = HashSet::new();
    for node in checklist {
        if !seen.insert(node.id.as_str()) {
            return Err(HubError::compile(format!(
                "DUPLICATE CHECK NODE ID, {}",
                node.id
            )));
        }
    }

    let ast = condition::parse(expr)
        .map_err(|e| HubError::compile(format!("INVALID CONDITION EXPRESSION, {e}")))?;
    for ident in ast.identifiers() {
        if !seen.contains(ident) {
            return Err(HubError::compile(format!(
                "UNKNOWN CHECK NODE ID IN CONDITION, {ident}"
            )));
        }
    }
    Ok(ast)
}

fn compile_threshold(raw: RawThreshold) -> Result<Threshold> {
    let group_by: Vec<FieldPath> = raw
        .group_by
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(FieldPath::parse)
        .collect();
    if group_by.is_empty() {
        return Err(HubError::compile("THRESHOLD GROUP BY CANNOT BE EMPTY"));
    }

    let range_secs: u64 = raw
        .range
        .trim()
        .parse()
        .map_err(|_| HubError::compile("THRESHOLD RANGE MUST BE AN INTEGER"))?;
    if range_secs == 0 {
        return Err(HubError::compile("THRESHOLD RANGE MUST BE GREATER THAN 0"));
    }

    let value: i64 = raw
        .value
        .trim()
        .parse()
        .map_err(|_| HubError::compile("THRESHOLD VALUE MUST BE AN INTEGER"))?;
    if value <= 1 {
        return Err(HubError::compile("THRESHOLD VALUE MUST BE GREATER THAN 1"));
    }

    let count_type = match raw.count_type.as_deref().map(str::trim) {
        None | Some("") => CountType::Occurrence,
        Some(text) if text.eq_ignore_ascii_case("SUM") => CountType::Sum,
        Some(text) if text.eq_ignore_ascii_case("CLASSIFY") => CountType::Classify,
        Some(text) => {
            return Err(HubError::compile(format!(
                "UNKNOWN THRESHOLD COUNT TYPE, {text}"
            )));
        }
    };

    let count_field = raw
        .count_field
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(FieldPath::parse);
    if matches!(count_type, CountType::Sum | CountType::Classify) && count_field.is_none() {
        return Err(HubError::compile(
            "THRESHOLD COUNT FIELD REQUIRED FOR SUM AND CLASSIFY",
        ));
    }

    Ok(Threshold {
        group_by,
        range_secs,
        value,
        count_type,
        count_field,
    })
}
