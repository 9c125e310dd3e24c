//! Planner agent: (re)plans the tentatively planned subtasks of the current
//! node.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::agents::AgentName;
use crate::agents::chat::{AgentReturn, InstructLmChatAgent, LmResponse};
use crate::agents::prompts::{PromptInputs, PromptRegistry};
use crate::core::stringify::{StringifyOptions, stringify};
use crate::core::traversal::OlthadTraversal;
use crate::emissions::StepHandlers;
use crate::io::config::AgentConfig;
use crate::io::lm::InstructLm;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlannerLmResponse {
    pub new_planned_subtasks: Vec<String>,
}

impl LmResponse for PlannerLmResponse {
    fn validate(&self) -> Result<(), String> {
        if self.new_planned_subtasks.is_empty() {
            return Err("new_planned_subtasks must not be empty".to_string());
        }
        if self.new_planned_subtasks.iter().any(|t| t.trim().is_empty()) {
            return Err("planned subtasks must not be blank".to_string());
        }
        Ok(())
    }
}

pub struct Planner {
    agent: InstructLmChatAgent,
    prompts: Arc<PromptRegistry>,
    prompts_version: String,
    handlers: StepHandlers,
    json_indent: usize,
}

impl Planner {
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

    /// Replace the planned subtasks of the current node with the LM's plan.
    ///
    /// The step is re-run until the approver (if any) accepts it.
    #[instrument(skip_all)]
    pub async fn run(&self, traversal: &mut OlthadTraversal, env_state: &str) -> Result<()> {
        let cur = traversal
            .cur_node()
            .context("the planner needs a current node")?;
        let cur_id = cur.id.clone();
        let opts = StringifyOptions::with_indent(self.json_indent);
        let inputs = PromptInputs {
            env_state: env_state.to_string(),
            olthad: stringify(traversal.root_node(), &opts),
            task_in_question: stringify(cur, &opts),
        };
        let messages = self
            .prompts
            .render(AgentName::Planner, &self.prompts_version, &inputs)?;

        info!(node_id = %cur_id, "updating tentatively planned subtasks");
        loop {
            self.handlers
                .before_step(AgentName::Planner, &cur_id, &messages, 1)
                .await;
            let ret: AgentReturn<PlannerLmResponse> = self
                .agent
                .chat(&messages, self.handlers.sink())
                .await
                .context("planner LM step")?;
            let update =
                traversal.update_planned_subtasks_of_cur_node(ret.output.new_planned_subtasks)?;
            let diff = traversal.diff(&update, self.json_indent)?;
            if self
                .handlers
                .approve(AgentName::Planner, diff, ret.transcripts)
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
    use crate::emissions::{PostLmGenerationStepApprover, PostLmGenerationStepEmission};
    use crate::test_support::{RecordingHandlers, ScriptedLm, planner_reply};

    fn planner(lm: &ScriptedLm, handlers: StepHandlers) -> Planner {
        let prompts = Arc::new(PromptRegistry::new(3).expect("prompts"));
        Planner::new(
            Arc::new(lm.clone()),
            &AgentConfig {
                max_tries: 2,
                ..AgentConfig::default()
            },
            prompts,
            handlers,
            3,
        )
    }

    #[tokio::test]
    async fn plans_and_promotes_first_subtask() {
        let lm = ScriptedLm::new([planner_reply(&["Find a tree.", "Punch the tree."])]);
        let mut traversal = OlthadTraversal::new("Get wood.");

        planner(&lm, StepHandlers::default())
            .run(&mut traversal, "A forest.")
            .await
            .expect("plan");

        let root = traversal.root_node();
        assert_eq!(root.non_planned_subtasks[0].task, "Find a tree.");
        assert_eq!(root.non_planned_subtasks[0].status, TaskStatus::InProgress);
        assert_eq!(root.planned_subtasks[0].id, "1.2");
        let prompt = &lm.prompts()[0];
        assert!(prompt[1].content.contains("A forest."));
        assert!(prompt[1].content.contains("\"task\": \"Get wood.\""));
    }

    #[tokio::test]
    async fn empty_plan_is_retried() {
        let lm = ScriptedLm::new([
            "{\"new_planned_subtasks\": []}".to_string(),
            planner_reply(&["Look around."]),
        ]);
        let mut traversal = OlthadTraversal::new("Explore.");

        planner(&lm, StepHandlers::default())
            .run(&mut traversal, "Dark cave.")
            .await
            .expect("plan");

        assert_eq!(lm.calls(), 2);
        assert_eq!(traversal.root_node().non_planned_subtasks[0].task, "Look around.");
    }

    #[tokio::test]
    async fn rejected_step_is_rerun_before_commit() {
        let lm = ScriptedLm::new([
            planner_reply(&["Bad plan."]),
            planner_reply(&["Good plan."]),
        ]);
        let recording = RecordingHandlers::approving([false, true]);
        let mut traversal = OlthadTraversal::new("Do it.");

        planner(&lm, recording.handlers())
            .run(&mut traversal, "state")
            .await
            .expect("plan");

        assert_eq!(traversal.root_node().non_planned_subtasks[0].task, "Good plan.");
        assert_eq!(recording.pre_step_agents(), vec![AgentName::Planner; 2]);
        let post = recording.post_step_emissions();
        assert_eq!(post.len(), 2);
        assert!(post[0].diff.iter().any(|l| l.starts_with("+ ") && l.contains("Bad plan.")));
    }

    struct ClosedInput;

    #[async_trait::async_trait]
    impl PostLmGenerationStepApprover for ClosedInput {
        async fn approve(&self, _emission: &PostLmGenerationStepEmission) -> Result<bool> {
            anyhow::bail!("stdin closed")
        }
    }

    #[tokio::test]
    async fn failed_approval_aborts_without_commit() {
        let lm = ScriptedLm::new([planner_reply(&["Unseen plan."])]);
        let handlers = StepHandlers {
            approver: Some(Arc::new(ClosedInput)),
            ..StepHandlers::default()
        };
        let mut traversal = OlthadTraversal::new("Do it.");

        let err = planner(&lm, handlers)
            .run(&mut traversal, "state")
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("stdin closed"));
        assert_eq!(lm.calls(), 1);
        assert!(!traversal.root_node().has_subtasks());
    }
}
