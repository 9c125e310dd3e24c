//! Orchestration of the agents into one `next_action` step.
//!
//! Each call first lets the attempt summarizer close the previously returned
//! action, then alternates backtracking, planning and recursing inward until
//! the in-progress subtask of the current node is an executable action (or
//! the traversal backtracked out of the root).

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use tracing::{debug, info, instrument};

use crate::agents::AgentName;
use crate::agents::attempt_summarizer::AttemptSummarizer;
use crate::agents::backtracker::{Backtracker, BacktrackerLms};
use crate::agents::planner::Planner;
use crate::agents::prompts::PromptRegistry;
use crate::core::traversal::OlthadTraversal;
use crate::emissions::StepHandlers;
use crate::io::config::SrOlthadConfig;
use crate::io::lm::LmProvider;
use crate::io::tree_store::SessionSnapshot;

/// Environment state handed to [`SrOlthad::next_action`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnvState {
    Text(String),
    /// Rendered as indented JSON.
    Json(Value),
}

impl EnvState {
    pub fn render(&self, indent: usize) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Json(value) => {
                let unit = " ".repeat(indent);
                let mut buf = Vec::new();
                let formatter = PrettyFormatter::with_indent(unit.as_bytes());
                let mut ser = Serializer::with_formatter(&mut buf, formatter);
                value
                    .serialize(&mut ser)
                    .context("serialize environment state")?;
                String::from_utf8(buf).context("environment state is not UTF-8")
            }
        }
    }
}

impl From<&str> for EnvState {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for EnvState {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for EnvState {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Decides whether a task can be handed to the environment as-is.
#[async_trait]
pub trait ExecutableActionClassifier: Send + Sync {
    async fn is_executable_action(&self, task: &str) -> Result<bool>;
}

/// Structured Reasoning with Open-Language Task Hierarchies of Any Depth.
pub struct SrOlthad {
    traversal: OlthadTraversal,
    domain_documentation: String,
    classifier: Arc<dyn ExecutableActionClassifier>,
    attempt_summarizer: AttemptSummarizer,
    backtracker: Backtracker,
    planner: Planner,
    json_indent: usize,
    has_been_called_before: bool,
    /// Node of the action returned by the previous call.
    last_action_node_id: Option<String>,
}

impl SrOlthad {
    pub fn new(
        highest_level_task: impl Into<String>,
        domain_documentation: impl Into<String>,
        classifier: Arc<dyn ExecutableActionClassifier>,
        config: &SrOlthadConfig,
        lms: &dyn LmProvider,
        handlers: StepHandlers,
    ) -> Result<Self> {
        Self::build(
            OlthadTraversal::new(highest_level_task).into(),
            domain_documentation.into(),
            classifier,
            config,
            lms,
            handlers,
        )
    }

    /// Continue from a saved session or bare traversal.
    ///
    /// A traversal that already has subtasks is treated as called before, so
    /// the backtracker deliberates before any further planning. A pending
    /// action is summarized by the next [`SrOlthad::next_action`] call.
    pub fn resume(
        snapshot: impl Into<SessionSnapshot>,
        domain_documentation: impl Into<String>,
        classifier: Arc<dyn ExecutableActionClassifier>,
        config: &SrOlthadConfig,
        lms: &dyn LmProvider,
        handlers: StepHandlers,
    ) -> Result<Self> {
        Self::build(
            snapshot.into(),
            domain_documentation.into(),
            classifier,
            config,
            lms,
            handlers,
        )
    }

    fn build(
        snapshot: SessionSnapshot,
        domain_documentation: String,
        classifier: Arc<dyn ExecutableActionClassifier>,
        config: &SrOlthadConfig,
        lms: &dyn LmProvider,
        handlers: StepHandlers,
    ) -> Result<Self> {
        config.validate()?;
        snapshot.check_last_action()?;
        let SessionSnapshot {
            traversal,
            last_action_node_id,
        } = snapshot;
        let prompts = Arc::new(PromptRegistry::new(config.json_indent)?);
        let versions = [
            (AgentName::AttemptSummarizer, &config.attempt_summarizer.prompts_version),
            (AgentName::Planner, &config.planner.prompts_version),
            (
                AgentName::SuccessfulCompletionClf,
                &config.backtracker.successful_completion.prompts_version,
            ),
            (
                AgentName::ExhaustiveEffortClf,
                &config.backtracker.exhaustive_effort.prompts_version,
            ),
            (
                AgentName::PartialSuccessClf,
                &config.backtracker.partial_success.prompts_version,
            ),
            (
                AgentName::MostWorthwhilePursuitClf,
                &config.backtracker.most_worthwhile_pursuit.prompts_version,
            ),
        ];
        for (agent, version) in versions {
            if !prompts.has_version(agent, version) {
                bail!("no prompts version '{version}' for {agent}");
            }
        }

        let lm_for = |agent: AgentName, model: &str| {
            lms.lm_for(agent, model)
                .with_context(|| format!("create the LM of the {agent}"))
        };
        let bt = &config.backtracker;
        let backtracker_lms = BacktrackerLms {
            successful_completion: lm_for(
                AgentName::SuccessfulCompletionClf,
                &bt.successful_completion.model,
            )?,
            exhaustive_effort: lm_for(AgentName::ExhaustiveEffortClf, &bt.exhaustive_effort.model)?,
            partial_success: lm_for(AgentName::PartialSuccessClf, &bt.partial_success.model)?,
            most_worthwhile_pursuit: lm_for(
                AgentName::MostWorthwhilePursuitClf,
                &bt.most_worthwhile_pursuit.model,
            )?,
        };

        let indent = config.json_indent;
        let has_been_called_before = traversal.root_node().has_subtasks();
        Ok(Self {
            attempt_summarizer: AttemptSummarizer::new(
                lm_for(AgentName::AttemptSummarizer, &config.attempt_summarizer.model)?,
                &config.attempt_summarizer,
                Arc::clone(&prompts),
                handlers.clone(),
                indent,
            ),
            backtracker: Backtracker::new(
                backtracker_lms,
                bt,
                Arc::clone(&prompts),
                handlers.clone(),
                indent,
            ),
            planner: Planner::new(
                lm_for(AgentName::Planner, &config.planner.model)?,
                &config.planner,
                prompts,
                handlers,
                indent,
            ),
            traversal,
            domain_documentation,
            classifier,
            json_indent: indent,
            has_been_called_before,
            last_action_node_id,
        })
    }

    pub fn traversal(&self) -> &OlthadTraversal {
        &self.traversal
    }

    /// The state to save for a later [`SrOlthad::resume`].
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            traversal: self.traversal.clone(),
            last_action_node_id: self.last_action_node_id.clone(),
        }
    }

    pub fn domain_documentation(&self) -> &str {
        &self.domain_documentation
    }

    /// Get the next executable action, or `None` once the highest-level task
    /// is believed completed, exhaustively attempted or worth dropping.
    #[instrument(skip_all)]
    pub async fn next_action(&mut self, env_state: impl Into<EnvState>) -> Result<Option<String>> {
        if self.traversal.is_finished() {
            debug!("traversal already exited the root");
            return Ok(None);
        }
        let env_state = env_state.into().render(self.json_indent)?;

        if let Some(attempted) = self.last_action_node_id.take() {
            self.attempt_summarizer
                .run(&mut self.traversal, &attempted, &env_state)
                .await
                .with_context(|| format!("summarize the attempt of '{attempted}'"))?;
        }

        let action = self.traverse_to_action(&env_state).await;
        self.has_been_called_before = true;
        action
    }

    async fn traverse_to_action(&mut self, env_state: &str) -> Result<Option<String>> {
        loop {
            if self.has_been_called_before
                && self.backtracker.run(&mut self.traversal, env_state).await?
            {
                if self.traversal.is_finished() {
                    info!("backtracked out of the root: no next action");
                    return Ok(None);
                }
                continue;
            }

            self.planner.run(&mut self.traversal, env_state).await?;

            let next = self
                .traversal
                .cur_node()
                .context("planning left no current node")?
                .in_progress_subtask()?
                .context("planning left no in-progress subtask")?;
            let (id, task) = (next.id.clone(), next.task.clone());
            if self
                .classifier
                .is_executable_action(&task)
                .await
                .with_context(|| format!("classify '{task}'"))?
            {
                info!(node_id = %id, action = %task, "next executable action");
                self.last_action_node_id = Some(id);
                return Ok(Some(task));
            }
            self.traversal.recurse_inward()?;
        }
    }
}
