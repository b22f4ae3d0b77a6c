//! Swarm task records
//!
//! Tasks are only observed: the manager schedules them, Crane reads them
//! back to report stack health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Task is new
    #[default]
    New,
    /// Task is pending
    Pending,
    /// Task is assigned
    Assigned,
    /// Task is accepted
    Accepted,
    /// Task is preparing
    Preparing,
    /// Task is ready
    Ready,
    /// Task is starting
    Starting,
    /// Task is running
    Running,
    /// Task completed
    Complete,
    /// Task shutdown
    Shutdown,
    /// Task failed
    Failed,
    /// Task rejected
    Rejected,
    /// Task removed
    Remove,
    /// Task is orphaned
    Orphaned,
}

/// Swarm task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    /// Task ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Service ID
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    /// Slot (for replicated services)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    /// Node ID
    #[serde(rename = "NodeID", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Task status
    #[serde(default)]
    pub status: TaskStatus,
    /// Desired state
    #[serde(default)]
    pub desired_state: TaskState,
    /// Created timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Updated timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task for a service
    pub fn new(service_id: &str, slot: Option<u64>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().simple().to_string(),
            service_id: service_id.to_string(),
            slot,
            node_id: None,
            status: TaskStatus::default(),
            desired_state: TaskState::Running,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Assign task to a node
    pub fn assign(&mut self, node_id: &str) {
        self.node_id = Some(node_id.to_string());
        self.status.state = TaskState::Assigned;
        self.updated_at = Some(Utc::now());
    }

    /// Set task as running
    pub fn set_running(&mut self) {
        self.status.state = TaskState::Running;
        self.status.message = Some("started".to_string());
        self.updated_at = Some(Utc::now());
    }

    /// Leave the task pending with a scheduler message
    pub fn set_pending(&mut self, message: &str) {
        self.status.state = TaskState::Pending;
        self.status.err = Some(message.to_string());
        self.updated_at = Some(Utc::now());
    }

    /// Shutdown the task
    pub fn shutdown(&mut self) {
        self.desired_state = TaskState::Shutdown;
        self.status.state = TaskState::Shutdown;
        self.updated_at = Some(Utc::now());
    }

    /// Check if task is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.state,
            TaskState::Complete
                | TaskState::Shutdown
                | TaskState::Failed
                | TaskState::Rejected
                | TaskState::Remove
                | TaskState::Orphaned
        )
    }

    /// Check if task is running
    pub fn is_running(&self) -> bool {
        self.status.state == TaskState::Running
    }
}

/// Task status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatus {
    /// Current state
    #[serde(default)]
    pub state: TaskState,
    /// Message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}
