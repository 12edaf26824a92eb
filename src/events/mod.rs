//! Event-sourced work-unit state.
//!
//! The JSONL log is the authoritative record of WU status; the YAML copy is
//! a convenience projection that must agree with it. Events are ordered by
//! file offset, not timestamp.

mod store;

pub use store::EventStore;

use serde::{Deserialize, Serialize};

use crate::wu::{WuId, WuStatus};

/// Lifecycle event kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Claim,
    Release,
    Complete,
    Block,
    Unblock,
    Checkpoint,
    Cancel,
    Archive,
}

/// One line of `wu-events.jsonl`.
///
/// Field names are part of the wire contract; optional fields are omitted
/// entirely rather than written as null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WuEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub wu_id: WuId,
    /// RFC3339 UTC.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
}

impl WuEvent {
    pub fn new(kind: EventKind, wu_id: WuId) -> Self {
        Self {
            kind,
            wu_id,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            reason: None,
            lane: None,
            title: None,
            session_id: session_from_env(),
            progress: None,
            next_steps: None,
        }
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = Some(progress.into());
        self
    }

    pub fn with_next_steps(mut self, next_steps: impl Into<String>) -> Self {
        self.next_steps = Some(next_steps.into());
        self
    }
}

fn session_from_env() -> Option<String> {
    std::env::var("LUMENFLOW_SESSION").ok().filter(|s| !s.is_empty())
}

/// State projected from the log for one WU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedState {
    pub status: WuStatus,
    pub lane: Option<String>,
    /// Timestamp of the last event that changed status.
    pub updated_at: Option<String>,
    pub last_checkpoint_at: Option<String>,
    pub progress: Option<String>,
    pub next_steps: Option<String>,
    /// Session that performed the active claim, if any.
    pub session_id: Option<String>,
}

impl Default for ProjectedState {
    fn default() -> Self {
        Self {
            status: WuStatus::Ready,
            lane: None,
            updated_at: None,
            last_checkpoint_at: None,
            progress: None,
            next_steps: None,
            session_id: None,
        }
    }
}

impl ProjectedState {
    /// Fold one event into the state. Illegal transitions leave the state
    /// untouched and return `false`; the caller decides how loudly to warn.
    pub fn apply(&mut self, event: &WuEvent) -> bool {
        use WuStatus::*;
        let next = match event.kind {
            EventKind::Checkpoint => {
                self.last_checkpoint_at = Some(event.timestamp.clone());
                if event.progress.is_some() {
                    self.progress = event.progress.clone();
                }
                if event.next_steps.is_some() {
                    self.next_steps = event.next_steps.clone();
                }
                return true;
            }
            EventKind::Claim => match self.status {
                Ready => Some(InProgress),
                _ => None,
            },
            EventKind::Block => match self.status {
                Ready | InProgress => Some(Blocked),
                _ => None,
            },
            EventKind::Unblock => match self.status {
                Blocked => Some(InProgress),
                _ => None,
            },
            EventKind::Release => match self.status {
                InProgress | Blocked => Some(Ready),
                _ => None,
            },
            EventKind::Complete => match self.status {
                InProgress => Some(Done),
                _ => None,
            },
            EventKind::Cancel => match self.status {
                Ready | InProgress | Blocked => Some(Cancelled),
                _ => None,
            },
            EventKind::Archive => match self.status {
                Archived => None,
                _ => Some(Archived),
            },
        };

        let Some(next) = next else {
            return false;
        };

        self.status = next;
        self.updated_at = Some(event.timestamp.clone());
        match event.kind {
            EventKind::Claim => {
                if event.lane.is_some() {
                    self.lane = event.lane.clone();
                }
                self.session_id = event.session_id.clone();
            }
            EventKind::Release | EventKind::Complete | EventKind::Cancel => {
                self.session_id = None;
            }
            _ => {}
        }
        true
    }
}

/// Why the YAML copy disagrees with the log, if it does.
pub fn detect_inconsistency(yaml_status: WuStatus, projected: &ProjectedState) -> Option<String> {
    if yaml_status == projected.status {
        None
    } else {
        Some(format!(
            "YAML says {} but event store shows {}",
            yaml_status, projected.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> WuEvent {
        WuEvent::new(kind, WuId(1))
    }

    #[test]
    fn happy_path_claim_complete() {
        let mut state = ProjectedState::default();
        assert!(state.apply(&event(EventKind::Claim).with_lane("Core")));
        assert_eq!(state.status, WuStatus::InProgress);
        assert_eq!(state.lane.as_deref(), Some("Core"));
        assert!(state.apply(&event(EventKind::Complete)));
        assert_eq!(state.status, WuStatus::Done);
    }

    #[test]
    fn unblock_only_from_blocked() {
        let mut state = ProjectedState::default();
        assert!(!state.apply(&event(EventKind::Unblock)));
        assert_eq!(state.status, WuStatus::Ready);

        state.apply(&event(EventKind::Claim));
        state.apply(&event(EventKind::Block));
        assert_eq!(state.status, WuStatus::Blocked);
        assert!(state.apply(&event(EventKind::Unblock)));
        assert_eq!(state.status, WuStatus::InProgress);
    }

    #[test]
    fn illegal_transitions_leave_state() {
        let mut state = ProjectedState::default();
        state.apply(&event(EventKind::Claim));
        state.apply(&event(EventKind::Complete));
        // A stray claim after completion is retained in the log but ignored
        assert!(!state.apply(&event(EventKind::Claim)));
        assert_eq!(state.status, WuStatus::Done);
        assert!(!state.apply(&event(EventKind::Release)));
        assert_eq!(state.status, WuStatus::Done);
    }

    #[test]
    fn checkpoint_keeps_status_updates_metadata() {
        let mut state = ProjectedState::default();
        state.apply(&event(EventKind::Claim));
        let cp = event(EventKind::Checkpoint)
            .with_progress("half done")
            .with_next_steps("wire the tests");
        assert!(state.apply(&cp));
        assert_eq!(state.status, WuStatus::InProgress);
        assert_eq!(state.progress.as_deref(), Some("half done"));
        assert_eq!(state.last_checkpoint_at, Some(cp.timestamp));
    }

    #[test]
    fn wire_format_is_camel_case() {
        let mut e = WuEvent::new(EventKind::Claim, WuId(100));
        e.timestamp = "2024-01-01T00:00:00Z".into();
        e.lane = Some("Framework: Core".into());
        e.session_id = Some("s-1".into());
        let json = serde_json::to_string(&e).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "claim");
        assert_eq!(value["wuId"], "WU-100");
        assert_eq!(value["sessionId"], "s-1");
        // Absent optionals are omitted, not null
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn inconsistency_message_names_both_sides() {
        let mut state = ProjectedState::default();
        state.apply(&event(EventKind::Claim));
        let reason = detect_inconsistency(WuStatus::Done, &state).unwrap();
        assert!(reason.contains("done"));
        assert!(reason.contains("in_progress"));
        assert!(detect_inconsistency(WuStatus::InProgress, &state).is_none());
    }
}
