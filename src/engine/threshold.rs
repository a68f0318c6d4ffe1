//! Sliding-window threshold aggregation over the shared store
//!
//! Counters are keyed by a mode prefix plus a hash of the rule identity and
//! the resolved group-by values. Group-by values are joined with a zero byte
//! before hashing so adjacent values cannot collide. The TTL is absolute
//! from first set, making each window a tumbling one.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;
use tracing::warn;

use crate::cache::ScratchCache;
use crate::kv::SharedStore;
use crate::ruleset::{CountType, Threshold};

/// Key prefix for occurrence counters
pub const OCCURRENCE_PREFIX: &str = "F_";
/// Key prefix for sum accumulators
pub const SUM_PREFIX: &str = "FS_";
/// Key prefix for classify sub-key groups
pub const CLASSIFY_PREFIX: &str = "FC_";

/// Evaluates threshold gates against the shared store
pub struct ThresholdAggregator {
    store: SharedStore,
}

impl ThresholdAggregator {
    /// Create an aggregator over the given store
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Observe one matching event; returns whether the rule fires.
    ///
    /// Firing clears the group's state so the next event starts a fresh
    /// window. A store failure means the rule does not fire on this event.
    pub async fn observe(
        &self,
        ruleset_id: &str,
        rule_id: &str,
        threshold: &Threshold,
        scratch: &mut ScratchCache<'_>,
    ) -> bool {
        let group_hash = group_hash(ruleset_id, rule_id, threshold, scratch);
        match threshold.count_type {
            CountType::Occurrence => self.observe_occurrence(threshold, group_hash).await,
            CountType::Sum => self.observe_sum(threshold, group_hash, scratch).await,
            CountType::Classify => self.observe_classify(threshold, group_hash, scratch).await,
        }
        .unwrap_or_else(|err| {
            warn!(
                ruleset_id,
                rule_id,
                error = %err,
                "threshold store unavailable, not firing"
            );
            false
        })
    }

    async fn observe_occurrence(
        &self,
        threshold: &Threshold,
        group_hash: u64,
    ) -> crate::Result<bool> {
        let key = format!("{OCCURRENCE_PREFIX}{group_hash:016x}");
        let count = if self.store.setnx(&key, "1", threshold.range_secs).await? {
            1
        } else {
            self.store.incr(&key).await?
        };
        if count > threshold.value {
            self.store.del(&key).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn observe_sum(
        &self,
        threshold: &Threshold,
        group_hash: u64,
        scratch: &mut ScratchCache<'_>,
    ) -> crate::Result<bool> {
        let Some(count_field) = &threshold.count_field else {
            return Ok(false);
        };
        let (text, _) = scratch.field(count_field);
        let Ok(amount) = text.trim().parse::<i64>() else {
            // Non-numeric contributions are not counted
            return Ok(false);
        };
        let key = format!("{SUM_PREFIX}{group_hash:016x}");
        let total = if self
            .store
            .setnx(&key, &amount.to_string(), threshold.range_secs)
            .await?
        {
            amount
        } else {
            self.store.incrby(&key, amount).await?
        };
        if total > threshold.value {
            self.store.del(&key).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn observe_classify(
        &self,
        threshold: &Threshold,
        group_hash: u64,
        scratch: &mut ScratchCache<'_>,
    ) -> crate::Result<bool> {
        let Some(count_field) = &threshold.count_field else {
            return Ok(false);
        };
        let (class, _) = scratch.field(count_field);
        let base = format!("{CLASSIFY_PREFIX}{group_hash:016x}");
        let sub_key = format!("{base}_{:016x}", hash_str(&class));
        self.store.set(&sub_key, "1", threshold.range_secs).await?;

        let members = self.store.keys(&format!("{base}_*")).await?;
        if members.len() as i64 > threshold.value {
            for key in &members {
                self.store.del(key).await?;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

/// Hash the rule identity and resolved group-by values into a group key
fn group_hash(
    ruleset_id: &str,
    rule_id: &str,
    threshold: &Threshold,
    scratch: &mut ScratchCache<'_>,
) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(ruleset_id.as_bytes());
    hasher.write_u8(0);
    hasher.write(rule_id.as_bytes());
    hasher.write_u8(0);
    for path in &threshold.group_by {
        let (value, _) = scratch.field(path);
        hasher.write(value.as_bytes());
        hasher.write_u8(0);
    }
    hasher.finish()
}

fn hash_str(value: &str) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(value.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::field::FieldPath;
    use crate::kv::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn threshold(count_type: CountType, value: i64) -> Threshold {
        Threshold {
            group_by: vec![FieldPath::parse("ip")],
            range_secs: 60,
            value,
            count_type,
            count_field: match count_type {
                CountType::Occurrence => None,
                _ => Some(FieldPath::parse("amount")),
            },
        }
    }

    async fn observe(agg: &ThresholdAggregator, t: &Threshold, event: &Event) -> bool {
        let mut scratch = ScratchCache::new(event);
        agg.observe("rs", "r1", t, &mut scratch).await
    }

    #[tokio::test]
    async fn test_occurrence_fires_once_and_resets() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let t = threshold(CountType::Occurrence, 3);
        let event = Event::from_json(json!({"ip": "1.2.3.4"})).unwrap();

        for _ in 0..3 {
            assert!(!observe(&agg, &t, &event).await);
        }
        assert!(observe(&agg, &t, &event).await);
        // Firing cleared the counter, the fifth event starts over
        assert!(!observe(&agg, &t, &event).await);
    }

    #[tokio::test]
    async fn test_occurrence_groups_are_independent() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let t = threshold(CountType::Occurrence, 2);
        let a = Event::from_json(json!({"ip": "1.1.1.1"})).unwrap();
        let b = Event::from_json(json!({"ip": "2.2.2.2"})).unwrap();

        assert!(!observe(&agg, &t, &a).await);
        assert!(!observe(&agg, &t, &a).await);
        assert!(!observe(&agg, &t, &b).await);
        assert!(observe(&agg, &t, &a).await);
        assert!(!observe(&agg, &t, &b).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_occurrence_window_expiry() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let t = threshold(CountType::Occurrence, 2);
        let event = Event::from_json(json!({"ip": "1.2.3.4"})).unwrap();

        assert!(!observe(&agg, &t, &event).await);
        assert!(!observe(&agg, &t, &event).await);
        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        // The window lapsed, counting starts over
        assert!(!observe(&agg, &t, &event).await);
    }

    #[tokio::test]
    async fn test_sum_accumulates_count_field() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let t = threshold(CountType::Sum, 100);
        let small = Event::from_json(json!({"ip": "1.2.3.4", "amount": 40})).unwrap();
        let tip = Event::from_json(json!({"ip": "1.2.3.4", "amount": 30})).unwrap();

        assert!(!observe(&agg, &t, &small).await);
        assert!(!observe(&agg, &t, &small).await);
        assert!(observe(&agg, &t, &tip).await);
        // Reset after firing
        assert!(!observe(&agg, &t, &small).await);
    }

    #[tokio::test]
    async fn test_sum_ignores_non_numeric() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let t = threshold(CountType::Sum, 10);
        let event = Event::from_json(json!({"ip": "1.2.3.4", "amount": "lots"})).unwrap();
        assert!(!observe(&agg, &t, &event).await);
    }

    #[tokio::test]
    async fn test_classify_counts_distinct_values() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let mut t = threshold(CountType::Classify, 2);
        t.count_field = Some(FieldPath::parse("uid"));

        let uid = |u: &str| Event::from_json(json!({"ip": "1.2.3.4", "uid": u})).unwrap();
        assert!(!observe(&agg, &t, &uid("a")).await);
        assert!(!observe(&agg, &t, &uid("a")).await);
        assert!(!observe(&agg, &t, &uid("b")).await);
        assert!(observe(&agg, &t, &uid("c")).await);
        // Firing removed every sub-key
        assert!(!observe(&agg, &t, &uid("d")).await);
    }

    #[tokio::test]
    async fn test_group_key_separator_prevents_collisions() {
        let agg = ThresholdAggregator::new(Arc::new(MemoryStore::new()));
        let t = Threshold {
            group_by: vec![FieldPath::parse("a"), FieldPath::parse("b")],
            range_secs: 60,
            value: 2,
            count_type: CountType::Occurrence,
            count_field: None,
        };
        let one = Event::from_json(json!({"a": "foo", "b": "bar"})).unwrap();
        let two = Event::from_json(json!({"a": "foob", "b": "ar"})).unwrap();

        assert!(!observe(&agg, &t, &one).await);
        assert!(!observe(&agg, &t, &one).await);
        // Different groups despite identical concatenation
        assert!(!observe(&agg, &t, &two).await);
        assert!(observe(&agg, &t, &one).await);
    }
}
