//! Attempt summarizer agent: after an action was executed, assess how the
//! attempt went and close the attempted task with a retrospective.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::agents::AgentName;
use crate::agents::chat::{AgentReturn, InstructLmChatAgent, LmResponse};
use crate::agents::prompts::{PromptInputs, PromptRegistry};
use crate::core::status::AttemptedTaskStatus;
use crate::core::stringify::{StringifyOptions, stringify};
use crate::core::traversal::OlthadTraversal;
use crate::emissions::StepHandlers;
use crate::io::config::AgentConfig;
use crate::io::lm::InstructLm;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttemptSummarizerLmResponse {
    pub status_to_assign: AttemptedTaskStatus,
    pub retrospective_to_assign: String,
}

impl LmResponse for AttemptSummarizerLmResponse {
    fn validate(&self) -> Result<(), String> {
        if self.retrospective_to_assign.trim().is_empty() {
            return Err("retrospective_to_assign must not be empty".to_string());
        }
        Ok(())
    }
}

pub struct AttemptSummarizer {
    agent: InstructLmChatAgent,
    prompts: Arc<PromptRegistry>,
    prompts_version: String,
    handlers: StepHandlers,
    json_indent: usize,
}

impl AttemptSummarizer {
    pub fn new(
        lm: Arc<dyn InstructLm>,
        config: &AgentConfig,
        prompts: Arc<PromptRegistry>,
        handlers: StepHandlers,
        json_indent: usize,
    ) -> Self {
        Self {
            agent: InstructLmChatAgent::new(lm, config.max_tries),
            prompts,
            prompts_version: config.prompts_version.clone(),
            handlers,
            json_indent,
        }
    }

    /// Assign an attempted status and retrospective to `attempted_node_id`.
    #[instrument(skip(self, traversal, env_state))]
    pub async fn run(
        &self,
        traversal: &mut OlthadTraversal,
        attempted_node_id: &str,
        env_state: &str,
    ) -> Result<()> {
        let cur_id = traversal
            .cur_node_id()
            .context("the attempt summarizer needs a current node")?
            .to_string();
        let attempted = traversal
            .node(attempted_node_id)
            .with_context(|| format!("attempted task '{attempted_node_id}' not found"))?;
        let opts = StringifyOptions::with_indent(self.json_indent).in_question(attempted_node_id);
        let inputs = PromptInputs {
            env_state: env_state.to_string(),
            olthad: stringify(traversal.root_node(), &opts),
            task_in_question: stringify(attempted, &opts),
        };
        let messages =
            self.prompts
                .render(AgentName::AttemptSummarizer, &self.prompts_version, &inputs)?;

        info!("summarizing the attempt");
        loop {
            self.handlers
                .before_step(AgentName::AttemptSummarizer, &cur_id, &messages, 1)
                .await;
            let ret: AgentReturn<AttemptSummarizerLmResponse> = self
                .agent
                .chat(&messages, self.handlers.sink())
                .await
                .context("attempt summarizer LM step")?;
            let update = traversal.update_status_and_retrospective_of(
                attempted_node_id,
                ret.output.status_to_assign.into(),
                ret.output.retrospective_to_assign,
            )?;
            let diff = traversal.diff(&update, self.json_indent)?;
            if self
                .handlers
                .approve(AgentName::AttemptSummarizer, diff, ret.transcripts)
                .await?
            {
                traversal.commit(update)?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::TaskStatus;
    use crate::test_support::{ScriptedLm, pizza_olthad};

    fn summarizer(lm: &ScriptedLm) -> AttemptSummarizer {
        AttemptSummarizer::new(
            Arc::new(lm.clone()),
            &AgentConfig::default(),
            Arc::new(PromptRegistry::new(3).expect("prompts")),
            StepHandlers::default(),
            3,
        )
    }

    #[tokio::test]
    async fn closes_attempt_and_promotes_next_planned_sibling() {
        let lm = ScriptedLm::new([
            r#"The slice is gone. {"status_to_assign": "Attempted (success)", "retrospective_to_assign": "You ate the third slice of pizza."}"#,
        ]);
        let mut traversal =
            OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string())).expect("parts");

        summarizer(&lm)
            .run(&mut traversal, "1.1.3", "One slice left.")
            .await
            .expect("summarize");

        let third = traversal.node("1.1.3").expect("1.1.3");
        assert_eq!(third.status, TaskStatus::Success);
        assert_eq!(
            third.retrospective.as_deref(),
            Some("You ate the third slice of pizza.")
        );
        assert_eq!(
            traversal.node("1.1.4").map(|n| n.status),
            Some(TaskStatus::InProgress)
        );

        let prompt = &lm.prompts()[0][1].content;
        assert!(prompt.contains("One slice left."));
        assert!(prompt.contains("\"status\": \"?\""));
    }

    #[tokio::test]
    async fn unknown_status_fails_without_retries() {
        let lm = ScriptedLm::new([
            r#"{"status_to_assign": "Dropped", "retrospective_to_assign": "meh"}"#,
        ]);
        let mut traversal =
            OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string())).expect("parts");

        let err = summarizer(&lm)
            .run(&mut traversal, "1.1.3", "state")
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("doesn't match the expected structure"));
        assert_eq!(
            traversal.node("1.1.3").map(|n| n.status),
            Some(TaskStatus::InProgress)
        );
    }
}
