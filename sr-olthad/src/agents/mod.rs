//! The LM agents of sr-OLTHAD and the chat machinery they share.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

pub mod attempt_summarizer;
pub mod backtracker;
pub mod chat;
pub mod planner;
pub mod prompts;

/// Every agent (and backtracker sub-agent) that takes LM steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AgentName {
    #[serde(rename = "Attempt Summarizer")]
    AttemptSummarizer,
    #[serde(rename = "Backtracker")]
    Backtracker,
    #[serde(rename = "Planner")]
    Planner,
    #[serde(rename = "Exhaustive Effort Classifier")]
    ExhaustiveEffortClf,
    #[serde(rename = "Most Worthwhile Pursuit Classifier")]
    MostWorthwhilePursuitClf,
    #[serde(rename = "Partial Success Classifier")]
    PartialSuccessClf,
    #[serde(rename = "Successful Completion Classifier")]
    SuccessfulCompletionClf,
}

impl AgentName {
    pub const ALL: [AgentName; 7] = [
        AgentName::AttemptSummarizer,
        AgentName::Backtracker,
        AgentName::Planner,
        AgentName::ExhaustiveEffortClf,
        AgentName::MostWorthwhilePursuitClf,
        AgentName::PartialSuccessClf,
        AgentName::SuccessfulCompletionClf,
    ];

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttemptSummarizer => "Attempt Summarizer",
            Self::Backtracker => "Backtracker",
            Self::Planner => "Planner",
            Self::ExhaustiveEffortClf => "Exhaustive Effort Classifier",
            Self::MostWorthwhilePursuitClf => "Most Worthwhile Pursuit Classifier",
            Self::PartialSuccessClf => "Partial Success Classifier",
            Self::SuccessfulCompletionClf => "Successful Completion Classifier",
        }
    }

    /// Kebab-case key used on the command line.
    pub fn key(self) -> &'static str {
        match self {
            Self::AttemptSummarizer => "attempt-summarizer",
            Self::Backtracker => "backtracker",
            Self::Planner => "planner",
            Self::ExhaustiveEffortClf => "exhaustive-effort",
            Self::MostWorthwhilePursuitClf => "most-worthwhile-pursuit",
            Self::PartialSuccessClf => "partial-success",
            Self::SuccessfulCompletionClf => "successful-completion",
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentName::ALL
            .into_iter()
            .find(|name| name.key() == s || name.as_str() == s)
            .ok_or_else(|| {
                let keys: Vec<&str> = AgentName::ALL.iter().map(|n| n.key()).collect();
                format!("unknown agent '{s}' (expected one of: {})", keys.join(", "))
            })
    }
}
