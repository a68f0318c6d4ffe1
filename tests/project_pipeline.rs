//! Project graph and pipeline integration tests

use std::sync::Arc;

use agentsmith_hub::plugin::PluginRegistry;
use agentsmith_hub::project::{HubNodeFactory, MemoryInput, MemoryOutput};
use agentsmith_hub::{
    Event, Hub, MemoryStore, ProjectConfig, ProjectGraph, ProjectState, RuleEvaluator, Ruleset,
    SharedStore,
};
use serde_json::json;

const RULESET_XML: &str = r#"
<root ruleset_id="web" ruleset_name="web detections">
  <rule id="r1" name="admin probe" author="qa">
    <checklist><node type="INCL" field="url">admin</node></checklist>
    <append field_name="rule">admin_probe</append>
  </rule>
</root>"#;

type Sink = Arc<parking_lot::Mutex<Vec<Event>>>;

fn web_evaluator() -> Arc<RuleEvaluator> {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let registry = PluginRegistry::with_builtins(store.clone());
    let ruleset = Ruleset::compile(RULESET_XML, &registry).unwrap();
    Arc::new(RuleEvaluator::new(Arc::new(ruleset), store))
}

fn memory_factory(events: Vec<Event>, sinks: &[(&str, Sink)]) -> HubNodeFactory {
    let mut factory = HubNodeFactory::new();
    let events = parking_lot::Mutex::new(Some(events));
    factory.register_input("src", move || {
        Box::new(MemoryInput::new(events.lock().take().unwrap_or_default()))
    });
    factory.register_ruleset("web", web_evaluator());
    for (name, sink) in sinks {
        let sink = sink.clone();
        factory.register_output(name, move || Box::new(MemoryOutput::new(sink.clone())));
    }
    factory
}

async fn drain(project: &mut agentsmith_hub::Project) {
    // Memory inputs close their edges after replay; a short yield lets the
    // pipeline run dry before stop.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    project.stop().await.unwrap();
}

#[test]
fn test_cycle_rejection_property() {
    for content in [
        "RULESET.a -> RULESET.a",
        "INPUT.i -> RULESET.a\nRULESET.a -> RULESET.b\nRULESET.b -> RULESET.a",
    ] {
        let err = ProjectGraph::parse(content).unwrap_err();
        assert!(err.to_string().contains("CYCLE DETECTED"), "{content}");
    }
}

#[test]
fn test_polarity_property() {
    assert!(ProjectGraph::parse("OUTPUT.o -> RULESET.a")
        .unwrap_err()
        .to_string()
        .contains("OUTPUT CANNOT BE AN EDGE SOURCE"));
    assert!(ProjectGraph::parse("RULESET.a -> INPUT.i")
        .unwrap_err()
        .to_string()
        .contains("INPUT CANNOT BE AN EDGE TARGET"));
}

#[tokio::test]
async fn test_pipeline_filters_and_mutates() {
    let config = ProjectConfig::from_yaml(
        "id: p1\nname: pipeline\ncontent: |\n  INPUT.src -> RULESET.web\n  RULESET.web -> OUTPUT.sink\n",
    )
    .unwrap();

    let sink: Sink = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let events = vec![
        Event::from_json(json!({"url": "/admin/a"})).unwrap(),
        Event::from_json(json!({"url": "/public"})).unwrap(),
        Event::from_json(json!({"url": "/admin/b"})).unwrap(),
    ];
    let factory = memory_factory(events, &[("sink", sink.clone())]);

    let hub = Hub::builder().build();
    let mut project = hub.build_project(&config, &factory).unwrap();
    project.start().await.unwrap();
    drain(&mut project).await;

    let collected = sink.lock();
    assert_eq!(collected.len(), 2);
    for event in collected.iter() {
        assert_eq!(event.get("rule"), Some(&json!("admin_probe")));
    }
}

#[tokio::test]
async fn test_fan_out_delivers_to_every_downstream_edge() {
    let config = ProjectConfig::from_yaml(
        "id: p2\nname: fanout\ncontent: |\n  INPUT.src -> RULESET.web\n  RULESET.web -> OUTPUT.a\n  RULESET.web -> OUTPUT.b\n",
    )
    .unwrap();

    let sink_a: Sink = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink_b: Sink = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let events = vec![Event::from_json(json!({"url": "/admin"})).unwrap()];
    let factory = memory_factory(events, &[("a", sink_a.clone()), ("b", sink_b.clone())]);

    let hub = Hub::builder().build();
    let mut project = hub.build_project(&config, &factory).unwrap();
    project.start().await.unwrap();
    drain(&mut project).await;

    assert_eq!(sink_a.lock().len(), 1);
    assert_eq!(sink_b.lock().len(), 1);
    // Distinct logical events per edge
    assert_eq!(sink_a.lock()[0], sink_b.lock()[0]);
}

#[tokio::test]
async fn test_file_input_to_file_output_pipeline() {
    use agentsmith_hub::project::{FileInput, FileOutput};

    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("events.jsonl");
    let out_path = dir.path().join("alerts.jsonl");
    std::fs::write(
        &in_path,
        "{\"url\": \"/admin/x\"}\nnot json\n{\"url\": \"/health\"}\n{\"url\": \"/admin/y\"}\n",
    )
    .unwrap();

    let config = ProjectConfig::from_yaml(
        "id: p4\nname: files\ncontent: |\n  INPUT.src -> RULESET.web\n  RULESET.web -> OUTPUT.sink\n",
    )
    .unwrap();

    let mut factory = HubNodeFactory::new();
    let input_path = in_path.clone();
    factory.register_input("src", move || Box::new(FileInput::new(input_path.clone())));
    factory.register_ruleset("web", web_evaluator());
    let output_path = out_path.clone();
    factory.register_output("sink", move || {
        Box::new(FileOutput::new(output_path.clone()))
    });

    let hub = Hub::builder().build();
    let mut project = hub.build_project(&config, &factory).unwrap();
    project.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    project.stop().await.unwrap();

    let written = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    // The malformed line and the non-matching event are dropped
    assert_eq!(lines.len(), 2);
    for line in lines {
        let event = Event::from_slice(line.as_bytes()).unwrap();
        assert_eq!(event.get("rule"), Some(&json!("admin_probe")));
    }
}

#[tokio::test]
async fn test_lifecycle_states_and_once_semantics() {
    let config = ProjectConfig::from_yaml(
        "id: p3\nname: lifecycle\ncontent: |\n  INPUT.src -> RULESET.web\n  RULESET.web -> OUTPUT.sink\n",
    )
    .unwrap();
    let sink: Sink = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let factory = memory_factory(Vec::new(), &[("sink", sink)]);

    let hub = Hub::builder().build();
    let mut project = hub.build_project(&config, &factory).unwrap();

    assert_eq!(project.state(), ProjectState::Stopped);
    project.start().await.unwrap();
    assert_eq!(project.state(), ProjectState::Running);
    assert!(project.start().await.is_err());

    project.stop().await.unwrap();
    assert_eq!(project.state(), ProjectState::Stopped);
    // Stop is a no-op the second time
    project.stop().await.unwrap();
}
