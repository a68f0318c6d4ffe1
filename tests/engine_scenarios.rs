//! End-to-end evaluation scenarios

use std::sync::Arc;

use agentsmith_hub::plugin::PluginRegistry;
use agentsmith_hub::{Event, MemoryStore, RuleEvaluator, Ruleset, SharedStore};
use pretty_assertions::assert_eq;
use serde_json::json;

fn evaluator(xml: &str) -> RuleEvaluator {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let registry = PluginRegistry::with_builtins(store.clone());
    let ruleset = Ruleset::compile(xml, &registry).expect("ruleset should compile");
    RuleEvaluator::new(Arc::new(ruleset), store)
}

fn event(data: serde_json::Value) -> Event {
    Event::from_json(data).unwrap()
}

#[tokio::test]
async fn test_simple_incl_match_emits_input_unchanged() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="web">
             <rule id="r1" name="admin probe" author="qa">
               <checklist><node type="INCL" field="url">admin</node></checklist>
             </rule>
           </root>"#,
    );
    let input = event(json!({"url": "/admin/login"}));
    let emitted = eval.evaluate(&input).await;
    assert_eq!(emitted, vec![input]);
}

#[tokio::test]
async fn test_threshold_occurrence_fires_on_fourth_and_resets() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="brute">
             <rule id="r1" name="burst" author="qa">
               <threshold group_by="ip" range="60">3</threshold>
             </rule>
           </root>"#,
    );
    let e = event(json!({"ip": "1.2.3.4"}));

    // Events 1-3 accumulate below the threshold
    for n in 1..=3 {
        assert!(eval.evaluate(&e).await.is_empty(), "event {n} must not emit");
    }
    // Event 4 strictly exceeds the count and fires exactly once
    assert_eq!(eval.evaluate(&e).await.len(), 1);
    // Firing cleared the counter, event 5 starts a fresh window
    assert!(eval.evaluate(&e).await.is_empty());
}

#[tokio::test]
async fn test_threshold_classify_counts_distinct_values() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="spray">
             <rule id="r1" name="many users" author="qa">
               <threshold group_by="ip" range="60" count_type="CLASSIFY" count_field="uid">2</threshold>
             </rule>
           </root>"#,
    );
    let uid = |u: &str| event(json!({"ip": "1.2.3.4", "uid": u}));

    assert!(eval.evaluate(&uid("a")).await.is_empty());
    assert!(eval.evaluate(&uid("a")).await.is_empty());
    assert!(eval.evaluate(&uid("b")).await.is_empty());
    // Third distinct uid exceeds 2
    assert_eq!(eval.evaluate(&uid("c")).await.len(), 1);
}

#[tokio::test]
async fn test_condition_or_matches_without_short_circuit() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="cond">
             <rule id="r1" name="either" author="qa">
               <checklist condition="n1 or n2">
                 <node id="n1" type="EQU" field="a">x</node>
                 <node id="n2" type="EQU" field="b">y</node>
               </checklist>
             </rule>
           </root>"#,
    );
    // Only n2 is satisfied
    assert_eq!(eval.evaluate(&event(json!({"a": "no", "b": "y"}))).await.len(), 1);
}

#[tokio::test]
async fn test_delimiter_and_requires_every_part() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="delim">
             <rule id="r1" name="both" author="qa">
               <checklist>
                 <node type="INCL" field="msg" logic="AND" delimiter="|">foo|bar</node>
               </checklist>
             </rule>
           </root>"#,
    );
    assert_eq!(eval.evaluate(&event(json!({"msg": "foo bar baz"}))).await.len(), 1);
    assert!(eval.evaluate(&event(json!({"msg": "foo baz"}))).await.is_empty());
}

#[tokio::test]
async fn test_raw_ref_append_copies_event_value() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="append">
             <rule id="r1" name="tag user" author="qa">
               <checklist><node type="NOTNULL" field="username"/></checklist>
               <append field_name="alert">_$username</append>
             </rule>
           </root>"#,
    );
    let emitted = eval
        .evaluate(&event(json!({"username": "alice", "action": "login"})))
        .await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].get("alert"), Some(&json!("alice")));
    assert_eq!(emitted[0].get("action"), Some(&json!("login")));
}

#[tokio::test]
async fn test_detection_whitelist_duality() {
    let rule_body = r#"<rule id="r1" name="root login" author="qa">
        <checklist><node type="EQU" field="user">root</node></checklist>
      </rule>"#;
    let detect = evaluator(&format!(
        r#"<root ruleset_id="rs" ruleset_name="d" type="DETECTION">{rule_body}</root>"#
    ));
    let white = evaluator(&format!(
        r#"<root ruleset_id="rs" ruleset_name="w" type="WHITELIST">{rule_body}</root>"#
    ));

    for data in [
        json!({"user": "root"}),
        json!({"user": "alice"}),
        json!({"other": 1}),
    ] {
        let e = event(data.clone());
        let detected = !detect.evaluate(&e).await.is_empty();
        let whitelisted = !white.evaluate(&e).await.is_empty();
        assert_ne!(detected, whitelisted, "duality violated for {data}");
    }
}

#[tokio::test]
async fn test_append_determinism_mutates_exactly_the_declared_keys() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="mut">
             <rule id="r1" name="shape" author="qa">
               <checklist><node type="NOTNULL" field="url"/></checklist>
               <append field_name="severity">high</append>
               <append field_name="team">secops</append>
               <del>internal,ctx.raw</del>
             </rule>
           </root>"#,
    );
    let input = event(json!({
        "url": "/x",
        "internal": true,
        "ctx": {"raw": "blob", "id": 7},
        "untouched": [1, 2]
    }));
    let emitted = eval.evaluate(&input).await;
    assert_eq!(emitted.len(), 1);
    let out = &emitted[0];

    assert_eq!(out.get("severity"), Some(&json!("high")));
    assert_eq!(out.get("team"), Some(&json!("secops")));
    assert_eq!(out.get("internal"), None);
    assert_eq!(out.get("ctx"), Some(&json!({"id": 7})));
    // Everything else is untouched
    assert_eq!(out.get("url"), Some(&json!("/x")));
    assert_eq!(out.get("untouched"), Some(&json!([1, 2])));
}

#[tokio::test]
async fn test_raw_ref_transparency() {
    // A node comparing against _$expected behaves exactly like the literal
    // value of `expected` at event time.
    let raw = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="raw">
             <rule id="r1" name="n" author="qa">
               <checklist><node type="INCL" field="path">_$expected</node></checklist>
             </rule>
           </root>"#,
    );
    let literal = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="lit">
             <rule id="r1" name="n" author="qa">
               <checklist><node type="INCL" field="path">/etc</node></checklist>
             </rule>
           </root>"#,
    );
    for path in ["/etc/passwd", "/tmp/etc", "/home"] {
        let e = event(json!({"path": path, "expected": "/etc"}));
        assert_eq!(
            raw.evaluate(&e).await.len(),
            literal.evaluate(&e).await.len(),
            "raw-ref transparency violated for {path}"
        );
    }
}

#[tokio::test]
async fn test_evaluation_is_pure_given_store_state() {
    // Without thresholds, re-evaluating the same event yields identical
    // output regardless of how often it runs.
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="pure">
             <rule id="r1" name="n" author="qa">
               <checklist><node type="INCL" field="url">admin</node></checklist>
               <append field_name="tag">seen</append>
             </rule>
           </root>"#,
    );
    let e = event(json!({"url": "/admin"}));
    let first = eval.evaluate(&e).await;
    let second = eval.evaluate(&e).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_threshold_sum_accumulates() {
    let eval = evaluator(
        r#"<root ruleset_id="rs" ruleset_name="bytes">
             <rule id="r1" name="exfil" author="qa">
               <threshold group_by="host" range="60" count_type="SUM" count_field="bytes">1000</threshold>
             </rule>
           </root>"#,
    );
    let sized = |n: u64| event(json!({"host": "db-1", "bytes": n}));

    assert!(eval.evaluate(&sized(400)).await.is_empty());
    assert!(eval.evaluate(&sized(400)).await.is_empty());
    // 1200 > 1000 fires and resets
    assert_eq!(eval.evaluate(&sized(400)).await.len(), 1);
    assert!(eval.evaluate(&sized(400)).await.is_empty());
}
