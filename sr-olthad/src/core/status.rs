//! Task statuses shared by the OLTHAD and the agents.
//!
//! The string forms are shown verbatim to the LM, so they are part of the
//! prompt contract and must stay stable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every status a task node can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "In progress")]
    InProgress,
    #[serde(rename = "Attempted (success)")]
    Success,
    #[serde(rename = "Attempted (partial success)")]
    PartialSuccess,
    #[serde(rename = "Dropped")]
    Dropped,
    #[serde(rename = "Attempted (failure)")]
    Failure,
    #[serde(rename = "Tentatively planned")]
    Planned,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "In progress",
            Self::Success => "Attempted (success)",
            Self::PartialSuccess => "Attempted (partial success)",
            Self::Dropped => "Dropped",
            Self::Failure => "Attempted (failure)",
            Self::Planned => "Tentatively planned",
        }
    }

    pub const ALL: [TaskStatus; 6] = [
        Self::InProgress,
        Self::Success,
        Self::PartialSuccess,
        Self::Dropped,
        Self::Failure,
        Self::Planned,
    ];
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

/// Statuses that indicate a task was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptedTaskStatus {
    #[serde(rename = "Attempted (success)")]
    Success,
    #[serde(rename = "Attempted (partial success)")]
    PartialSuccess,
    #[serde(rename = "Attempted (failure)")]
    Failure,
}

impl AttemptedTaskStatus {
    pub const ALL: [AttemptedTaskStatus; 3] = [
        AttemptedTaskStatus::Success,
        AttemptedTaskStatus::PartialSuccess,
        AttemptedTaskStatus::Failure,
    ];

    pub fn as_str(self) -> &'static str {
        TaskStatus::from(self).as_str()
    }
}

impl fmt::Display for AttemptedTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AttemptedTaskStatus> for TaskStatus {
    fn from(status: AttemptedTaskStatus) -> Self {
        match status {
            AttemptedTaskStatus::Success => TaskStatus::Success,
            AttemptedTaskStatus::PartialSuccess => TaskStatus::PartialSuccess,
            AttemptedTaskStatus::Failure => TaskStatus::Failure,
        }
    }
}

/// Statuses that warrant backtracking (or record that it happened).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BacktrackedFromTaskStatus {
    #[serde(rename = "Attempted (success)")]
    Success,
    #[serde(rename = "Attempted (partial success)")]
    PartialSuccess,
    #[serde(rename = "Attempted (failure)")]
    Failure,
    #[serde(rename = "Dropped")]
    Dropped,
}

impl From<BacktrackedFromTaskStatus> for TaskStatus {
    fn from(status: BacktrackedFromTaskStatus) -> Self {
        match status {
            BacktrackedFromTaskStatus::Success => TaskStatus::Success,
            BacktrackedFromTaskStatus::PartialSuccess => TaskStatus::PartialSuccess,
            BacktrackedFromTaskStatus::Failure => TaskStatus::Failure,
            BacktrackedFromTaskStatus::Dropped => TaskStatus::Dropped,
        }
    }
}

impl From<AttemptedTaskStatus> for BacktrackedFromTaskStatus {
    fn from(status: AttemptedTaskStatus) -> Self {
        match status {
            AttemptedTaskStatus::Success => Self::Success,
            AttemptedTaskStatus::PartialSuccess => Self::PartialSuccess,
            AttemptedTaskStatus::Failure => Self::Failure,
        }
    }
}
