//! Degraded-store behaviour and compile determinism

use std::sync::Arc;

use agentsmith_hub::kv::KvStore;
use agentsmith_hub::plugin::PluginRegistry;
use agentsmith_hub::{Event, Hub, HubError, RuleEvaluator, Ruleset, SharedStore};
use async_trait::async_trait;
use serde_json::json;

/// A store whose every operation fails, simulating a cluster outage
struct DownStore;

#[async_trait]
impl KvStore for DownStore {
    async fn get(&self, _key: &str) -> agentsmith_hub::Result<Option<String>> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> agentsmith_hub::Result<()> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn setnx(
        &self,
        _key: &str,
        _value: &str,
        _ttl_secs: u64,
    ) -> agentsmith_hub::Result<bool> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn incr(&self, _key: &str) -> agentsmith_hub::Result<i64> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn incrby(&self, _key: &str, _delta: i64) -> agentsmith_hub::Result<i64> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn del(&self, _key: &str) -> agentsmith_hub::Result<()> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn keys(&self, _pattern: &str) -> agentsmith_hub::Result<Vec<String>> {
        Err(HubError::Store("connection refused".to_string()))
    }
    async fn ping(&self) -> agentsmith_hub::Result<bool> {
        Ok(false)
    }
}

fn down_evaluator(xml: &str) -> RuleEvaluator {
    let store: SharedStore = Arc::new(DownStore);
    let registry = PluginRegistry::with_builtins(store.clone());
    let ruleset = Ruleset::compile(xml, &registry).unwrap();
    RuleEvaluator::new(Arc::new(ruleset), store)
}

#[tokio::test]
async fn test_threshold_does_not_fire_when_store_is_down() {
    let eval = down_evaluator(
        r#"<root ruleset_id="rs" ruleset_name="t">
             <rule id="r1" name="n" author="a">
               <threshold group_by="ip" range="60">2</threshold>
             </rule>
           </root>"#,
    );
    let event = Event::from_json(json!({"ip": "1.2.3.4"})).unwrap();
    for _ in 0..5 {
        assert!(eval.evaluate(&event).await.is_empty());
    }
}

#[tokio::test]
async fn test_suppression_fails_closed_when_store_is_down() {
    let eval = down_evaluator(
        r#"<root ruleset_id="rs" ruleset_name="t">
             <rule id="r1" name="n" author="a">
               <checklist>
                 <node type="PLUGIN" field="host">suppress_once(60)</node>
               </checklist>
             </rule>
           </root>"#,
    );
    // Already-suppressed behaviour: the rule never matches
    let event = Event::from_json(json!({"host": "web-1"})).unwrap();
    assert!(eval.evaluate(&event).await.is_empty());
}

#[tokio::test]
async fn test_non_threshold_rules_unaffected_by_store_outage() {
    let eval = down_evaluator(
        r#"<root ruleset_id="rs" ruleset_name="t">
             <rule id="r1" name="n" author="a">
               <checklist><node type="INCL" field="url">admin</node></checklist>
             </rule>
           </root>"#,
    );
    let event = Event::from_json(json!({"url": "/admin"})).unwrap();
    assert_eq!(eval.evaluate(&event).await.len(), 1);
}

#[test]
fn test_compile_errors_are_deterministic() {
    let hub = Hub::builder().build();
    let bad = r#"<root ruleset_id="rs" ruleset_name="t">
        <rule id="r1" name="n" author="a">
          <threshold group_by="ip" range="60">1</threshold>
        </rule>
      </root>"#;

    let first = hub.compile(bad).unwrap_err().to_string();
    let second = hub.compile(bad).unwrap_err().to_string();
    assert_eq!(first, second);
    assert_eq!(
        first,
        "compile error: THRESHOLD VALUE MUST BE GREATER THAN 1"
    );
}

#[test]
fn test_compiled_ruleset_is_immutable_shared_form() {
    let hub = Hub::builder().build();
    let xml = r#"<root ruleset_id="rs" ruleset_name="t">
        <rule id="r1" name="n" author="a">
          <checklist><node type="INCL" field="url">admin</node></checklist>
        </rule>
      </root>"#;
    let first = hub.compile(xml).unwrap();
    // Editing the source yields a new compiled form; the old handle is
    // unaffected.
    let second = hub.compile(&xml.replace("admin", "login")).unwrap();
    assert_eq!(first.rules.len(), second.rules.len());
    assert!(!Arc::ptr_eq(&first, &second));
}
