//! Event model emitted by pipeline stages to the event bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of pipeline events. Serialized snake_case on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    PipelinePaused,
    StageEntered,
    StageCompleted,
    AgentStarted,
    AgentCompleted,
    AgentToolCall,
    AgentOutput,
    AgentNudge,
    TestRun,
    ReviewFinding,
    InterventionSet,
    CostUpdate,
    Error,
}

impl EventType {
    /// Wire name, e.g. `pipeline_started`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PipelineStarted => "pipeline_started",
            EventType::PipelineCompleted => "pipeline_completed",
            EventType::PipelineFailed => "pipeline_failed",
            EventType::PipelinePaused => "pipeline_paused",
            EventType::StageEntered => "stage_entered",
            EventType::StageCompleted => "stage_completed",
            EventType::AgentStarted => "agent_started",
            EventType::AgentCompleted => "agent_completed",
            EventType::AgentToolCall => "agent_tool_call",
            EventType::AgentOutput => "agent_output",
            EventType::AgentNudge => "agent_nudge",
            EventType::TestRun => "test_run",
            EventType::ReviewFinding => "review_finding",
            EventType::InterventionSet => "intervention_set",
            EventType::CostUpdate => "cost_update",
            EventType::Error => "error",
        }
    }

    /// Terminal events close the per-CR stream for SSE consumers.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::PipelineCompleted | EventType::PipelineFailed | EventType::PipelinePaused
        )
    }
}

/// One event appended to a CR's stream. Never mutated after emission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub cr_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub data: Value,
    /// Seconds since the Unix epoch, assigned at construction.
    pub timestamp: f64,
}

impl PipelineEvent {
    pub fn new(cr_id: impl Into<String>, event_type: EventType, stage: impl Into<String>) -> Self {
        Self {
            cr_id: cr_id.into(),
            event_type,
            stage: stage.into(),
            data: Value::Object(Default::default()),
            timestamp: now_secs(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_snake_case() {
        let json = serde_json::to_string(&EventType::StageEntered).unwrap();
        assert_eq!(json, "\"stage_entered\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::StageEntered);
        assert_eq!(EventType::StageEntered.as_str(), "stage_entered");
    }

    #[test]
    fn terminal_events_are_flagged() {
        assert!(EventType::PipelineCompleted.is_terminal());
        assert!(EventType::PipelinePaused.is_terminal());
        assert!(!EventType::StageCompleted.is_terminal());
    }

    /// **Scenario**: timestamps are monotonically non-decreasing across constructions.
    #[test]
    fn timestamps_non_decreasing() {
        let a = PipelineEvent::new("CR-1", EventType::StageEntered, "intake");
        let b = PipelineEvent::new("CR-1", EventType::StageCompleted, "intake");
        assert!(b.timestamp >= a.timestamp);
    }
}
