//! Kafka consumer input node
//!
//! A thin driver over a streaming consumer: each message payload is decoded
//! as one JSON event and fanned out to the node's edges. Delivery semantics
//! are at-least-once; offsets auto-commit and idempotent sinks are assumed.

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use super::node::{ProjectNode, TaskGroup, DEFAULT_STOP_TIMEOUT_SECS};
use crate::event::Event;
use crate::{HubError, Result};

/// Kafka consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaInputConfig {
    /// Broker addresses, comma-separated
    pub brokers: String,
    /// Consumer group id
    pub group_id: String,
    /// Topics to consume from
    pub topics: Vec<String>,
    /// Offset reset policy (earliest, latest)
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,
}

impl Default for KafkaInputConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "agentsmith-hub".to_string(),
            topics: vec!["events".to_string()],
            auto_offset_reset: "latest".to_string(),
            session_timeout_ms: 6000,
        }
    }
}

/// Input node consuming JSON events from Kafka topics
pub struct KafkaInput {
    config: KafkaInputConfig,
    outputs: Vec<mpsc::Sender<Event>>,
    tasks: TaskGroup,
}

impl KafkaInput {
    /// Create an input for the given consumer configuration
    pub fn new(config: KafkaInputConfig) -> Self {
        Self {
            config,
            outputs: Vec::new(),
            tasks: TaskGroup::new(),
        }
    }

    fn build_consumer(&self) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .create()
            .map_err(|e| HubError::Kafka(format!("failed to create consumer: {e}")))?;
        let topics: Vec<&str> = self.config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| HubError::Kafka(format!("failed to subscribe: {e}")))?;
        Ok(consumer)
    }
}

#[async_trait]
impl ProjectNode for KafkaInput {
    fn attach_output(&mut self, tx: mpsc::Sender<Event>) {
        self.outputs.push(tx);
    }

    async fn start(&mut self) -> Result<()> {
        let consumer = Arc::new(self.build_consumer()?);
        info!(topics = ?self.config.topics, group = %self.config.group_id, "kafka input subscribed");

        let outputs = std::mem::take(&mut self.outputs);
        let mut shutdown = self.tasks.subscribe();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = consumer.recv() => {
                        let message = match received {
                            Ok(message) => message,
                            Err(err) => {
                                warn!(error = %err, "kafka receive failed");
                                continue;
                            }
                        };
                        let Some(payload) = message.payload() else { continue };
                        match Event::from_slice(payload) {
                            Ok(event) => {
                                for tx in &outputs {
                                    if tx.send(event.clone()).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(
                                    topic = message.topic(),
                                    offset = message.offset(),
                                    error = %err,
                                    "skipping undecodable message"
                                );
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}
