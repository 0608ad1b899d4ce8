use serde::{Deserialize, Serialize};

use crate::config::SlicingConfig;

/// Lifecycle state of a slicing task.
///
/// Transitions are monotone along
/// `Created -> Queued -> Processing -> (Completed | Failed)`, except
/// `Cancelled`, which may be entered from `Queued` or `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Created, Processing)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Engine stage reported alongside progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Loading,
    Indexing,
    Slicing,
    Finalizing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Loading => "loading",
            Stage::Indexing => "indexing",
            Stage::Slicing => "slicing",
            Stage::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// One slicing job and its lifecycle bookkeeping. Owns its tile records and
/// incremental index by id; triangles never outlive a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlicingTask {
    pub id: u64,
    pub name: String,
    pub source_path: String,
    pub model_type: String,
    pub config: SlicingConfig,
    pub output_prefix: String,
    /// Optional column-major origin transform attached to the tileset root.
    pub origin_transform: Option<[f64; 16]>,
    pub status: TaskStatus,
    /// 0..=100.
    pub progress: u8,
    pub created_by: String,
    /// Unix seconds.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error_message: Option<String>,
}

/// Progress snapshot returned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub task_id: u64,
    pub progress: u8,
    pub current_stage: Stage,
    pub status: TaskStatus,
    pub processed_tiles: u64,
    pub total_tiles: u64,
    pub estimated_time_remaining_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotone() {
        use TaskStatus::*;
        assert!(Created.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        // No going back
        assert!(!Processing.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Queued));
    }

    #[test]
    fn cancel_only_from_queued_or_processing() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Created.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Processing));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
        assert_eq!(Stage::Slicing.to_string(), "slicing");
    }
}
