//! Plugin registry and invocation
//!
//! Plugins are pre-registered callables resolved by name at compile time.
//! Two result shapes exist: check plugins return a boolean and gate a
//! checklist node; append plugins return a value assigned to an event field.
//! Arguments are parsed once at compile time into literals and per-event
//! field references.

/// Built-in leaf plugins shipped with the engine
pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::field::FieldPath;
use crate::kv::SharedStore;
use crate::{HubError, Result, RAW_REF_PREFIX};

/// Scalar value exchanged with a plugin
#[derive(Debug, Clone, PartialEq)]
pub enum PluginValue {
    /// String value
    Str(String),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl PluginValue {
    /// Render the value as a string the way event leaves render
    pub fn render(&self) -> String {
        match self {
            PluginValue::Str(s) => s.clone(),
            PluginValue::Int(i) => i.to_string(),
            PluginValue::Float(f) => f.to_string(),
            PluginValue::Bool(b) => b.to_string(),
        }
    }

    /// Convert into the event's JSON representation
    pub fn into_json(self) -> JsonValue {
        match self {
            PluginValue::Str(s) => JsonValue::String(s),
            PluginValue::Int(i) => JsonValue::from(i),
            PluginValue::Float(f) => {
                serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
            }
            PluginValue::Bool(b) => JsonValue::Bool(b),
        }
    }

    /// Integer view, parsing strings when needed
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PluginValue::Int(i) => Some(*i),
            PluginValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// One compile-time parsed plugin argument
#[derive(Debug, Clone)]
pub enum PluginArg {
    /// A literal scalar
    Literal(PluginValue),
    /// An identifier resolved against the event at evaluation time
    Field(FieldPath),
}

/// A parsed plugin invocation, `name(arg, ...)`
#[derive(Debug, Clone)]
pub struct PluginCall {
    /// Registered plugin name
    pub name: String,
    /// Parsed argument list
    pub args: Vec<PluginArg>,
}

impl PluginCall {
    /// Parse an invocation expression
    ///
    /// `suppress_once(alert_key, 300)`; a bare name with no parentheses is
    /// an empty-argument call. Quoted arguments are string literals; bare
    /// words parse as int/float/bool literals before falling back to field
    /// identifiers; the raw-ref marker is accepted and means the same thing
    /// an identifier does.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let Some(open) = expr.find('(') else {
            if expr.is_empty() {
                return Err(HubError::Plugin("empty plugin expression".to_string()));
            }
            return Ok(Self {
                name: expr.to_string(),
                args: Vec::new(),
            });
        };
        let name = expr[..open].trim();
        if name.is_empty() {
            return Err(HubError::Plugin(format!(
                "plugin expression has no name: {expr}"
            )));
        }
        let Some(inner) = expr[open + 1..].strip_suffix(')') else {
            return Err(HubError::Plugin(format!(
                "unterminated plugin argument list: {expr}"
            )));
        };
        let mut args = Vec::new();
        for part in split_args(inner) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            args.push(parse_arg(part));
        }
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }
}

/// Split an argument list on commas outside quotes
fn split_args(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in inner.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ',' => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_arg(part: &str) -> PluginArg {
    if (part.starts_with('"') && part.ends_with('"') && part.len() >= 2)
        || (part.starts_with('\'') && part.ends_with('\'') && part.len() >= 2)
    {
        return PluginArg::Literal(PluginValue::Str(part[1..part.len() - 1].to_string()));
    }
    if let Some(path) = part.strip_prefix(RAW_REF_PREFIX) {
        return PluginArg::Field(FieldPath::parse(path));
    }
    if let Ok(i) = part.parse::<i64>() {
        return PluginArg::Literal(PluginValue::Int(i));
    }
    if let Ok(f) = part.parse::<f64>() {
        return PluginArg::Literal(PluginValue::Float(f));
    }
    match part {
        "true" => PluginArg::Literal(PluginValue::Bool(true)),
        "false" => PluginArg::Literal(PluginValue::Bool(false)),
        _ => PluginArg::Field(FieldPath::parse(part)),
    }
}

/// A plugin producing a boolean, usable as a checklist node
#[async_trait]
pub trait CheckPlugin: Send + Sync {
    /// Evaluate the check over resolved arguments
    async fn check(&self, args: &[PluginValue]) -> Result<bool>;
}

/// A plugin producing a value, usable in an append
#[async_trait]
pub trait AppendPlugin: Send + Sync {
    /// Compute the value to append
    async fn produce(&self, args: &[PluginValue]) -> Result<PluginValue>;
}

/// Name → callable map, read-only after initial load
#[derive(Default)]
pub struct PluginRegistry {
    checks: HashMap<String, Arc<dyn CheckPlugin>>,
    appends: HashMap<String, Arc<dyn AppendPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the built-in plugins
    pub fn with_builtins(store: SharedStore) -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry, store);
        registry
    }

    /// Register a check plugin under a name
    pub fn register_check(&mut self, name: impl Into<String>, plugin: Arc<dyn CheckPlugin>) {
        self.checks.insert(name.into(), plugin);
    }

    /// Register an append plugin under a name
    pub fn register_append(&mut self, name: impl Into<String>, plugin: Arc<dyn AppendPlugin>) {
        self.appends.insert(name.into(), plugin);
    }

    /// Look up a check plugin
    pub fn check(&self, name: &str) -> Option<Arc<dyn CheckPlugin>> {
        self.checks.get(name).cloned()
    }

    /// Look up an append plugin
    pub fn append(&self, name: &str) -> Option<Arc<dyn AppendPlugin>> {
        self.appends.get(name).cloned()
    }

    /// Whether any plugin is registered under the name
    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name) || self.appends.contains_key(name)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .field("appends", &self.appends.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_mixed_args() {
        let call = PluginCall::parse(r#"geo_match(src_ip, "CN,US", 3, 1.5, true)"#).unwrap();
        assert_eq!(call.name, "geo_match");
        assert_eq!(call.args.len(), 5);
        assert!(matches!(&call.args[0], PluginArg::Field(p) if p.raw() == "src_ip"));
        assert!(matches!(
            &call.args[1],
            PluginArg::Literal(PluginValue::Str(s)) if s == "CN,US"
        ));
        assert!(matches!(
            &call.args[2],
            PluginArg::Literal(PluginValue::Int(3))
        ));
        assert!(matches!(
            &call.args[3],
            PluginArg::Literal(PluginValue::Float(f)) if (*f - 1.5).abs() < f64::EPSILON
        ));
        assert!(matches!(
            &call.args[4],
            PluginArg::Literal(PluginValue::Bool(true))
        ));
    }

    #[test]
    fn test_parse_bare_name_and_raw_ref() {
        let call = PluginCall::parse("now").unwrap();
        assert_eq!(call.name, "now");
        assert!(call.args.is_empty());

        let call = PluginCall::parse("hash(_$user.name)").unwrap();
        assert!(matches!(&call.args[0], PluginArg::Field(p) if p.raw() == "user.name"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(PluginCall::parse("").is_err());
        assert!(PluginCall::parse("(x)").is_err());
        assert!(PluginCall::parse("f(x").is_err());
    }

    #[test]
    fn test_registry_lookup() {
        struct Always;
        #[async_trait]
        impl CheckPlugin for Always {
            async fn check(&self, _args: &[PluginValue]) -> Result<bool> {
                Ok(true)
            }
        }

        let mut registry = PluginRegistry::new();
        registry.register_check("always", Arc::new(Always));
        assert!(registry.contains("always"));
        assert!(registry.check("always").is_some());
        assert!(registry.append("always").is_none());
        assert!(!registry.contains("never"));
    }
}
