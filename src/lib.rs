//! Distributed security event-stream processing engine
//!
//! Raw events arrive from external sources, flow through a user-defined
//! graph of components, are filtered, enriched, and suppressed by declarative
//! rulesets, and are emitted to downstream sinks. Projects assemble four
//! reusable component kinds (INPUT, RULESET, OUTPUT, PLUGIN) over a
//! text-defined edge set.
//!
//! # Example
//!
//! ```no_run
//! use agentsmith_hub::{Event, Hub};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let hub = Hub::builder().build();
//!
//! // Compile a ruleset
//! let ruleset = hub.compile(r#"
//!   <root ruleset_id="web" ruleset_name="web detections">
//!     <rule id="r1" name="admin probe" author="secops">
//!       <checklist><node type="INCL" field="url">admin</node></checklist>
//!     </rule>
//!   </root>"#)?;
//!
//! // Evaluate an event
//! let evaluator = hub.evaluator(ruleset);
//! let event = Event::from_json(json!({"url": "/admin/login"}))?;
//! let emitted = evaluator.evaluate(&event).await;
//! tracing::info!("emitted {} events", emitted.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

// Re-export commonly used items
pub use cache::{RegexCache, ScratchCache};
pub use engine::{RuleEvaluator, ThresholdAggregator};
pub use error::{HubError, Result};
pub use event::Event;
pub use field::FieldPath;
pub use kv::{KvStore, MemoryStore, SharedStore};
pub use operator::{OpKind, OpOutcome};
pub use plugin::PluginRegistry;
pub use project::{Project, ProjectConfig, ProjectGraph, ProjectState};
pub use ruleset::{Ruleset, RulesetMode};

/// Error types
pub mod error;

/// Event abstraction
pub mod event;

/// Field path parsing and resolution
pub mod field;

/// The check-node operator table
pub mod operator;

/// Condition expressions over check-node outcomes
pub mod condition;

/// Evaluation-path caches
pub mod cache;

/// Plugin registry and built-ins
pub mod plugin;

/// Shared key/value store contract
pub mod kv;

/// Ruleset compilation
pub mod ruleset;

/// The rule evaluation engine
pub mod engine;

/// Project graphs and lifecycle
pub mod project;

use std::sync::Arc;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Marker prefix for values resolved from the event at evaluation time
pub const RAW_REF_PREFIX: &str = "_$";

/// Initialize the tracing subscriber with default settings
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Builder for configuring a [`Hub`]
#[derive(Default)]
pub struct HubBuilder {
    store: Option<SharedStore>,
}

impl HubBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific shared store instead of the in-memory default
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the hub
    pub fn build(self) -> Hub {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as SharedStore);
        let registry = PluginRegistry::with_builtins(store.clone());
        Hub { store, registry }
    }
}

/// Engine facade exposed to the control plane
///
/// Owns the shared store handle and the plugin registry, and provides the
/// three engine operations: compile a ruleset, evaluate events through a
/// compiled ruleset, and build a project from a node factory.
pub struct Hub {
    store: SharedStore,
    registry: PluginRegistry,
}

impl Hub {
    /// Start building a hub
    pub fn builder() -> HubBuilder {
        HubBuilder::new()
    }

    /// The shared store handle
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// The plugin registry; read-only after initial load
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Compile a ruleset from XML source
    pub fn compile(&self, xml: &str) -> Result<Arc<Ruleset>> {
        Ok(Arc::new(Ruleset::compile(xml, &self.registry)?))
    }

    /// Create an evaluator for a compiled ruleset
    pub fn evaluator(&self, ruleset: Arc<Ruleset>) -> Arc<RuleEvaluator> {
        Arc::new(RuleEvaluator::new(ruleset, self.store.clone()))
    }

    /// Build a project instance from its config and a node factory
    pub fn build_project(
        &self,
        config: &ProjectConfig,
        factory: &dyn project::NodeFactory,
    ) -> Result<Project> {
        Project::build(config, factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let hub = Hub::builder().build();
        assert!(hub.registry().contains("suppress_once"));
        assert!(hub.registry().contains("is_private_ip"));
    }

    #[tokio::test]
    async fn test_hub_compile_and_evaluate() {
        let hub = Hub::builder().build();
        let ruleset = hub
            .compile(
                r#"<root ruleset_id="rs" ruleset_name="t">
                     <rule id="r1" name="n" author="a">
                       <checklist><node type="INCL" field="url">admin</node></checklist>
                     </rule>
                   </root>"#,
            )
            .unwrap();
        let evaluator = hub.evaluator(ruleset);
        let event = Event::from_json(json!({"url": "/admin"})).unwrap();
        assert_eq!(evaluator.evaluate(&event).await.len(), 1);
    }

    #[test]
    fn test_compile_error_surfaces_exact_message() {
        let hub = Hub::builder().build();
        let err = hub
            .compile(r#"<root ruleset_id="" ruleset_name="x"/>"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "compile error: RULESET ID CANNOT BE EMPTY");
    }
}
