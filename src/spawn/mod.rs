//! Parent-to-child delegation records.
//!
//! A spawn is a parent WU recording that a target WU should be handled by
//! another agent. Records share the event-sourced pattern of the WU log: a
//! separate JSONL file replayed into in-memory indexes on each invocation.

mod envelope;
mod registry;

pub use envelope::SpawnEnvelope;
pub use registry::SpawnRegistry;

use serde::{Deserialize, Serialize};

use crate::wu::WuId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SpawnStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl SpawnStatus {
    /// Legal forward transitions: pending to active to completed or failed.
    pub fn can_become(self, next: SpawnStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
        )
    }
}

/// One line of `spawn-events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRecord {
    /// `spawn-<4 hex>`.
    pub id: String,
    pub parent_wu_id: WuId,
    pub target_wu_id: WuId,
    pub lane: String,
    /// RFC3339 UTC.
    pub spawned_at: String,
    pub status: SpawnStatus,
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl SpawnRecord {
    pub fn new(parent: WuId, target: WuId, lane: impl Into<String>) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("spawn-{}", &raw[..4]),
            parent_wu_id: parent,
            target_wu_id: target,
            lane: lane.into(),
            spawned_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            status: SpawnStatus::Pending,
            completed_at: None,
            intent: None,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_forward_only() {
        assert!(SpawnStatus::Pending.can_become(SpawnStatus::Active));
        assert!(SpawnStatus::Active.can_become(SpawnStatus::Completed));
        assert!(SpawnStatus::Active.can_become(SpawnStatus::Failed));
        assert!(!SpawnStatus::Pending.can_become(SpawnStatus::Completed));
        assert!(!SpawnStatus::Completed.can_become(SpawnStatus::Active));
    }

    #[test]
    fn record_ids_have_spawn_prefix() {
        let record = SpawnRecord::new(WuId(1), WuId(2), "Core");
        assert!(record.id.starts_with("spawn-"));
        assert_eq!(record.id.len(), "spawn-".len() + 4);
        assert_eq!(record.status, SpawnStatus::Pending);
    }

    #[test]
    fn wire_format_matches_contract() {
        let mut record = SpawnRecord::new(WuId(10), WuId(20), "API");
        record.id = "spawn-ab12".into();
        record.spawned_at = "2024-06-01T00:00:00Z".into();
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(value["parentWuId"], "WU-10");
        assert_eq!(value["targetWuId"], "WU-20");
        assert_eq!(value["status"], "pending");
        // completedAt is an explicit null until the spawn finishes
        assert!(value["completedAt"].is_null());
    }
}
