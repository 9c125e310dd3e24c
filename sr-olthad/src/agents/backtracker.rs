//! Backtracker agent: decides whether to leave the current node, and with
//! which status.
//!
//! Four binary classifiers are consulted in order: successful completion,
//! exhaustive effort (followed by partial success when the effort was
//! exhaustive), and finally most-worthwhile pursuit for every level of the
//! in-progress lineage, from the root down to the current node.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::agents::AgentName;
use crate::agents::chat::{InstructLmChatAgent, LmResponse, Voting};
use crate::agents::prompts::{
    EFFORT_WAS_EXHAUSTIVE_OPTIONS, IS_MOST_WORTHWHILE_OPTIONS, PromptInputs, PromptRegistry,
    WAS_PARTIAL_SUCCESS_OPTIONS, WAS_SUCCESSFULLY_COMPLETED_OPTIONS,
};
use crate::core::choice::BinaryChoiceOptions;
use crate::core::node::parent_id_of;
use crate::core::status::BacktrackedFromTaskStatus;
use crate::core::stringify::{StringifyOptions, stringify, stringify_diff_lines};
use crate::core::traversal::{OlthadTraversal, PendingOlthadUpdate};
use crate::core::voting::Ballot;
use crate::emissions::StepHandlers;
use crate::io::config::{BacktrackerConfig, ClassifierConfig};
use crate::io::lm::{ChatMessage, InstructLm};

/// JSON answer of every backtracker classifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BacktrackerSubAgentLmResponse {
    pub answer: String,
    pub retrospective: Option<String>,
}

impl LmResponse for BacktrackerSubAgentLmResponse {}

impl Ballot for BacktrackerSubAgentLmResponse {
    fn vote(&self) -> String {
        self.answer.clone()
    }

    fn reason(&self) -> Option<String> {
        self.retrospective.clone()
    }

    fn with_reason(self, reason: String) -> Self {
        Self {
            retrospective: Some(reason),
            ..self
        }
    }
}

/// LMs of the four classifiers.
pub struct BacktrackerLms {
    pub successful_completion: Arc<dyn InstructLm>,
    pub exhaustive_effort: Arc<dyn InstructLm>,
    pub partial_success: Arc<dyn InstructLm>,
    pub most_worthwhile_pursuit: Arc<dyn InstructLm>,
}

struct Verdict {
    answer: bool,
    retrospective: String,
    transcripts: Vec<Vec<ChatMessage>>,
}

struct Classifier {
    name: AgentName,
    agent: InstructLmChatAgent,
    voting: Voting,
    prompts_version: String,
    options: BinaryChoiceOptions,
}

impl Classifier {
    fn new(
        name: AgentName,
        lm: Arc<dyn InstructLm>,
        config: &ClassifierConfig,
        options: BinaryChoiceOptions,
    ) -> Self {
        Self {
            name,
            agent: InstructLmChatAgent::new(lm, config.max_tries),
            voting: Voting {
                n_calls: config.n_calls_for_voting,
                max_async_calls: config.max_async_calls_for_voting,
            },
            prompts_version: config.prompts_version.clone(),
            options,
        }
    }

    async fn ask(
        &self,
        prompts: &PromptRegistry,
        handlers: &StepHandlers,
        cur_node_id: &str,
        inputs: &PromptInputs,
    ) -> Result<Verdict> {
        let messages = prompts.render(self.name, &self.prompts_version, inputs)?;
        handlers
            .before_step(self.name, cur_node_id, &messages, self.voting.n_calls)
            .await;
        let ret = self
            .agent
            .chat_with_voting::<BacktrackerSubAgentLmResponse>(
                &messages,
                self.voting,
                handlers.stream_handler(),
            )
            .await
            .with_context(|| format!("{} LM step", self.name))?;
        let answer = self
            .options
            .resolve(&ret.output.answer)
            .with_context(|| format!("{} answer", self.name))?;
        Ok(Verdict {
            answer,
            retrospective: ret.output.retrospective.unwrap_or_default(),
            transcripts: ret.transcripts,
        })
    }
}

pub struct Backtracker {
    successful_completion: Classifier,
    exhaustive_effort: Classifier,
    partial_success: Classifier,
    most_worthwhile_pursuit: Classifier,
    prompts: Arc<PromptRegistry>,
    handlers: StepHandlers,
    json_indent: usize,
}

impl Backtracker {
    pub fn new(
        lms: BacktrackerLms,
        config: &BacktrackerConfig,
        prompts: Arc<PromptRegistry>,
        handlers: StepHandlers,
        json_indent: usize,
    ) -> Self {
        Self {
            successful_completion: Classifier::new(
                AgentName::SuccessfulCompletionClf,
                lms.successful_completion,
                &config.successful_completion,
                WAS_SUCCESSFULLY_COMPLETED_OPTIONS,
            ),
            exhaustive_effort: Classifier::new(
                AgentName::ExhaustiveEffortClf,
                lms.exhaustive_effort,
                &config.exhaustive_effort,
                EFFORT_WAS_EXHAUSTIVE_OPTIONS,
            ),
            partial_success: Classifier::new(
                AgentName::PartialSuccessClf,
                lms.partial_success,
                &config.partial_success,
                WAS_PARTIAL_SUCCESS_OPTIONS,
            ),
            most_worthwhile_pursuit: Classifier::new(
                AgentName::MostWorthwhilePursuitClf,
                lms.most_worthwhile_pursuit,
                &config.most_worthwhile_pursuit,
                IS_MOST_WORTHWHILE_OPTIONS,
            ),
            prompts,
            handlers,
            json_indent,
        }
    }

    /// Deliberate over the current node and backtrack if warranted.
    ///
    /// Returns whether backtracking occurred.
    #[instrument(skip_all)]
    pub async fn run(&self, traversal: &mut OlthadTraversal, env_state: &str) -> Result<bool> {
        let cur = traversal
            .cur_node()
            .context("the backtracker needs a current node")?;
        let cur_id = cur.id.clone();
        let opts = StringifyOptions::with_indent(self.json_indent).in_question(&cur_id);
        let inputs = PromptInputs {
            env_state: env_state.to_string(),
            olthad: stringify(traversal.root_node(), &opts),
            task_in_question: stringify(cur, &opts),
        };

        info!(node_id = %cur_id, "checking if the task has been successfully completed");
        let completion = loop {
            let verdict = self
                .successful_completion
                .ask(&self.prompts, &self.handlers, &cur_id, &inputs)
                .await?;
            let update = if verdict.answer {
                Some(traversal.update_status_and_retrospective_of(
                    &cur_id,
                    BacktrackedFromTaskStatus::Success,
                    verdict.retrospective,
                )?)
            } else {
                None
            };
            if self
                .approve(
                    traversal,
                    AgentName::SuccessfulCompletionClf,
                    update.as_ref(),
                    verdict.transcripts,
                )
                .await?
            {
                break update;
            }
        };
        if let Some(update) = completion {
            return self.commit_and_backtrack(traversal, update, &cur_id);
        }

        info!(node_id = %cur_id, "checking if an exhaustive effort was given");
        let exhaustive = loop {
            let verdict = self
                .exhaustive_effort
                .ask(&self.prompts, &self.handlers, &cur_id, &inputs)
                .await?;
            if self
                .approve(
                    traversal,
                    AgentName::ExhaustiveEffortClf,
                    None,
                    verdict.transcripts,
                )
                .await?
            {
                break verdict.answer;
            }
        };

        if exhaustive {
            info!(node_id = %cur_id, "checking if the task was a partial success or a failure");
            let update = loop {
                let verdict = self
                    .partial_success
                    .ask(&self.prompts, &self.handlers, &cur_id, &inputs)
                    .await?;
                let status = if verdict.answer {
                    BacktrackedFromTaskStatus::PartialSuccess
                } else {
                    BacktrackedFromTaskStatus::Failure
                };
                let update = traversal.update_status_and_retrospective_of(
                    &cur_id,
                    status,
                    verdict.retrospective,
                )?;
                if self
                    .approve(
                        traversal,
                        AgentName::PartialSuccessClf,
                        Some(&update),
                        verdict.transcripts,
                    )
                    .await?
                {
                    break update;
                }
            };
            return self.commit_and_backtrack(traversal, update, &cur_id);
        }

        info!(node_id = %cur_id, "checking if ancestors are still worthwhile");
        let plain = StringifyOptions::with_indent(self.json_indent);
        for level in traversal.in_progress_lineage()? {
            let node = level
                .olthad
                .find(&level.node_id)
                .with_context(|| format!("lineage level lost node '{}'", level.node_id))?;
            let inputs = PromptInputs {
                env_state: env_state.to_string(),
                olthad: stringify(&level.olthad, &plain),
                task_in_question: stringify(node, &plain),
            };
            let drop = loop {
                let verdict = self
                    .most_worthwhile_pursuit
                    .ask(&self.prompts, &self.handlers, &cur_id, &inputs)
                    .await?;
                let update = if verdict.answer {
                    None
                } else {
                    Some(traversal.update_status_and_retrospective_of(
                        &level.node_id,
                        BacktrackedFromTaskStatus::Dropped,
                        verdict.retrospective,
                    )?)
                };
                if self
                    .approve(
                        traversal,
                        AgentName::MostWorthwhilePursuitClf,
                        update.as_ref(),
                        verdict.transcripts,
                    )
                    .await?
                {
                    break update;
                }
            };
            if let Some(update) = drop {
                return self.commit_and_backtrack(traversal, update, &level.node_id);
            }
        }

        info!(node_id = %cur_id, "no backtracking warranted");
        Ok(false)
    }

    /// Offer the step to the approver with the diff `update` would cause
    /// (an unchanged OLTHAD when there is none).
    async fn approve(
        &self,
        traversal: &OlthadTraversal,
        agent_name: AgentName,
        update: Option<&PendingOlthadUpdate>,
        transcripts: Vec<Vec<ChatMessage>>,
    ) -> Result<bool> {
        let diff = match update {
            Some(update) => traversal.diff(update, self.json_indent)?,
            None => stringify_diff_lines(
                traversal.root_node(),
                &StringifyOptions::with_indent(self.json_indent),
            ),
        };
        self.handlers.approve(agent_name, diff, transcripts).await
    }

    fn commit_and_backtrack(
        &self,
        traversal: &mut OlthadTraversal,
        update: PendingOlthadUpdate,
        node_id: &str,
    ) -> Result<bool> {
        traversal.commit(update)?;
        let target = parent_id_of(node_id);
        traversal.backtrack_to(target)?;
        info!(from = node_id, to = ?target, "backtracked");
        Ok(true)
    }
}
