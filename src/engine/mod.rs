//! The rule evaluation engine
//!
//! For each incoming event a [`RuleEvaluator`] runs every rule of its
//! compiled ruleset in declaration order: filter, checklist (with or without
//! a condition expression), threshold gate, then append/delete mutation.
//! Each firing rule emits one snapshot of the working event; later rules see
//! earlier rules' mutations. Evaluation errors never terminate the
//! evaluator, they degrade to benign non-matching.

/// Threshold aggregation over the shared store
pub mod threshold;

pub use threshold::ThresholdAggregator;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::cache::{RegexCache, ScratchCache};
use crate::event::Event;
use crate::kv::SharedStore;
use crate::operator::OpKind;
use crate::plugin::{PluginArg, PluginValue};
use crate::ruleset::{
    AppendValue, CheckKind, CheckNode, Logic, RegexSpec, Rule, Ruleset, RulesetMode, ValueSpec,
};

/// Evaluates one compiled ruleset against incoming events
pub struct RuleEvaluator {
    ruleset: Arc<Ruleset>,
    regex_cache: RegexCache,
    aggregator: ThresholdAggregator,
}

impl RuleEvaluator {
    /// Create an evaluator for a compiled ruleset over the shared store
    pub fn new(ruleset: Arc<Ruleset>, store: SharedStore) -> Self {
        Self {
            ruleset,
            regex_cache: RegexCache::default(),
            aggregator: ThresholdAggregator::new(store),
        }
    }

    /// The compiled ruleset this evaluator runs
    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    /// Evaluate one event, returning zero or more output events
    ///
    /// Rules compose in declaration order over a single working copy; each
    /// firing rule emits one snapshot of it.
    pub async fn evaluate(&self, event: &Event) -> Vec<Event> {
        let mut working = event.clone();
        let mut emitted = Vec::new();
        for rule in &self.ruleset.rules {
            if self.rule_matches(rule, &working).await {
                self.apply_mutations(rule, &mut working).await;
                debug!(
                    ruleset_id = %self.ruleset.id,
                    rule_id = %rule.id,
                    "rule fired"
                );
                emitted.push(working.clone());
            }
        }
        emitted
    }

    /// Run filter, checklist, mode, and threshold for one rule
    async fn rule_matches(&self, rule: &Rule, event: &Event) -> bool {
        let mut scratch = ScratchCache::new(event);

        // 1. Filter: a failed filter skips the rule in both modes
        if let Some(filter) = &rule.filter {
            let (observed, _) = scratch.field(&filter.field);
            let comparand = resolve_value(&filter.value, &mut scratch);
            if !OpKind::Incl.apply(&observed, &comparand).matched {
                return false;
            }
        }

        // 2. Checklist: with a condition every node runs so its id can be
        // looked up; without one the first failure short-circuits
        let outcome = if let Some(condition) = &rule.condition {
            let mut outcomes = HashMap::with_capacity(rule.checklist.len());
            for node in &rule.checklist {
                let result = self.check_node(node, &mut scratch).await;
                outcomes.insert(node.id.clone(), result);
            }
            condition.evaluate(&outcomes)
        } else {
            let mut passed = 0usize;
            for node in &rule.checklist {
                if !self.check_node(node, &mut scratch).await {
                    break;
                }
                passed += 1;
            }
            passed == rule.checklist_len
        };

        // 3. Mode: detection matches on true, whitelist on false
        let matched = match self.ruleset.mode {
            RulesetMode::Detection => outcome,
            RulesetMode::Whitelist => !outcome,
        };
        if !matched {
            return false;
        }

        // 4. Threshold gate
        if let Some(threshold) = &rule.threshold {
            return self
                .aggregator
                .observe(&self.ruleset.id, &rule.id, threshold, &mut scratch)
                .await;
        }
        true
    }

    /// Evaluate a single check node against the event
    async fn check_node(&self, node: &CheckNode, scratch: &mut ScratchCache<'_>) -> bool {
        let (observed, _found) = scratch.field(&node.field);

        if let CheckKind::Plugin { call, handle } = &node.kind {
            let mut args = Vec::with_capacity(call.args.len() + 1);
            args.push(PluginValue::Str(observed.clone()));
            for arg in &call.args {
                args.push(resolve_arg(arg, scratch));
            }
            return match handle.check(&args).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        ruleset_id = %self.ruleset.id,
                        plugin = %call.name,
                        error = %err,
                        "check plugin failed"
                    );
                    false
                }
            };
        }

        let value = resolve_value(&node.value, scratch);
        let parts = split_parts(node, &value);

        match &node.kind {
            CheckKind::Op(op) => {
                fold_parts(node.logic, &parts, |part| op.apply(&observed, part).matched)
            }
            CheckKind::Regex(RegexSpec::Compiled(regex)) => {
                self.regex_cache.is_match(regex, &observed, true)
            }
            CheckKind::Regex(RegexSpec::CompiledParts(regexes)) => {
                let results: Vec<bool> = regexes
                    .iter()
                    .map(|regex| self.regex_cache.is_match(regex, &observed, true))
                    .collect();
                match node.logic {
                    Some(Logic::Or) => results.iter().any(|r| *r),
                    _ => results.iter().all(|r| *r),
                }
            }
            // Raw-ref patterns vary per event: compile directly, skip the cache
            CheckKind::Regex(RegexSpec::PerEvent) => fold_parts(node.logic, &parts, |part| {
                match Regex::new(part) {
                    Ok(regex) => regex.is_match(&observed),
                    Err(err) => {
                        warn!(
                            ruleset_id = %self.ruleset.id,
                            pattern = %part,
                            error = %err,
                            "raw-ref regex failed to compile"
                        );
                        false
                    }
                }
            }),
            CheckKind::Plugin { .. } => unreachable!(),
        }
    }

    /// Apply appends and deletions after a rule fires
    ///
    /// Append values resolve against the pre-mutation event; a failing
    /// append plugin leaves its target field unset.
    async fn apply_mutations(&self, rule: &Rule, event: &mut Event) {
        let mut assignments: Vec<(String, JsonValue)> = Vec::with_capacity(rule.appends.len());
        {
            let mut scratch = ScratchCache::new(&*event);
            for append in &rule.appends {
                match &append.value {
                    AppendValue::Value(spec) => {
                        let value = resolve_value(spec, &mut scratch);
                        assignments.push((append.field_name.clone(), JsonValue::String(value)));
                    }
                    AppendValue::Plugin { call, handle } => {
                        let args: Vec<PluginValue> = call
                            .args
                            .iter()
                            .map(|arg| resolve_arg(arg, &mut scratch))
                            .collect();
                        match handle.produce(&args).await {
                            Ok(value) => {
                                assignments.push((append.field_name.clone(), value.into_json()));
                            }
                            Err(err) => {
                                warn!(
                                    ruleset_id = %self.ruleset.id,
                                    rule_id = %rule.id,
                                    plugin = %call.name,
                                    error = %err,
                                    "append plugin failed, field left unset"
                                );
                            }
                        }
                    }
                }
            }
        }
        for (field_name, value) in assignments {
            event.set(field_name, value);
        }
        for path in &rule.del {
            event.remove(path);
        }
    }
}

/// Resolve a literal-or-raw-ref value at the point of use
fn resolve_value(spec: &ValueSpec, scratch: &mut ScratchCache<'_>) -> String {
    match spec {
        ValueSpec::Literal(text) => text.clone(),
        ValueSpec::RawRef { marked, path } => scratch.raw_ref(marked, path),
    }
}

/// Resolve one plugin argument against the event
fn resolve_arg(arg: &PluginArg, scratch: &mut ScratchCache<'_>) -> PluginValue {
    match arg {
        PluginArg::Literal(value) => value.clone(),
        PluginArg::Field(path) => {
            let (value, _) = scratch.field(path);
            PluginValue::Str(value)
        }
    }
}

/// Split a resolved value by the node's delimiter when configured and present
fn split_parts<'v>(node: &CheckNode, value: &'v str) -> Vec<&'v str> {
    match (&node.logic, &node.delimiter) {
        (Some(_), Some(delim)) if value.contains(delim.as_str()) => {
            value.split(delim.as_str()).collect()
        }
        _ => vec![value],
    }
}

/// Fold per-part outcomes under the node's logic (AND unless OR)
fn fold_parts(logic: Option<Logic>, parts: &[&str], mut check: impl FnMut(&str) -> bool) -> bool {
    match logic {
        Some(Logic::Or) if parts.len() > 1 => parts.iter().any(|part| check(part)),
        _ => parts.iter().all(|part| check(part)),
    }
}
