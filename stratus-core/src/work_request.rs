//! Work Request - Data model for asynchronous control-plane operations
//!
//! Mutating calls against the cloud control plane return a work request
//! handle. The handle is polled until the operation reaches a terminal
//! status, after which the affected resources name the entity that was
//! created, updated or deleted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle for a pending asynchronous operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkRequestId(String);

impl WorkRequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkRequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkRequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Status of a work request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Accepted,
    InProgress,
    Canceling,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    /// Returns true if no further transition can occur
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Position in the forward lifecycle. Terminal states share the highest rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::InProgress => 1,
            Self::Canceling => 2,
            Self::Succeeded | Self::Failed | Self::Canceled => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Canceling => "CANCELING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a work request did to an affected resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Created,
    Updated,
    Deleted,
    InProgress,
    Related,
    /// Any action this client does not know about. Never matches an expected action.
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::InProgress => "IN_PROGRESS",
            Self::Related => "RELATED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity touched by a work request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResource {
    /// Entity type as reported by the service (e.g., "autonomousContainerDatabase")
    pub entity_type: String,
    pub action_type: ActionType,
    /// Identifier (OCID) of the entity
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_uri: Option<String>,
}

impl AffectedResource {
    pub fn new(
        entity_type: impl Into<String>,
        action_type: ActionType,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            action_type,
            identifier: identifier.into(),
            entity_uri: None,
        }
    }
}

/// An error reported by the service for a work request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            timestamp: None,
        }
    }
}

/// Snapshot of a work request returned by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub id: WorkRequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    pub status: OperationStatus,
    #[serde(default)]
    pub resources: Vec<AffectedResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_accepted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_finished: Option<DateTime<Utc>>,
}

impl WorkRequest {
    pub fn new(id: impl Into<WorkRequestId>, status: OperationStatus) -> Self {
        Self {
            id: id.into(),
            operation_type: None,
            status,
            resources: Vec::new(),
            percent_complete: None,
            time_accepted: None,
            time_started: None,
            time_finished: None,
        }
    }

    pub fn with_resource(mut self, resource: AffectedResource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Returns true while the operation can still make progress
    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }
}
