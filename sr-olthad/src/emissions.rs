//! Hooks around every LM generation step.
//!
//! Before a step, the [`PreLmGenerationStepHandler`] sees the prompt. After
//! it, the [`PostLmGenerationStepApprover`] sees the resulting OLTHAD diff and
//! decides whether the step stands or is re-run.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::agents::AgentName;
use crate::io::lm::{ChatMessage, LmStreamsHandler, StreamSink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreLmGenerationStepEmission {
    pub agent_name: AgentName,
    pub cur_node_id: String,
    pub prompt_messages: Vec<ChatMessage>,
    /// Number of concurrent LM streams the step will produce.
    pub n_streams_to_handle: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostLmGenerationStepEmission {
    pub agent_name: AgentName,
    /// Differ-style lines (with `"? "` guides) of the OLTHAD before and after the step.
    pub diff: Vec<String>,
    /// One transcript per LM call made during the step.
    pub full_messages: Vec<Vec<ChatMessage>>,
}

#[async_trait]
pub trait PreLmGenerationStepHandler: Send + Sync {
    async fn handle(&self, emission: &PreLmGenerationStepEmission);
}

#[async_trait]
pub trait PostLmGenerationStepApprover: Send + Sync {
    /// Returns `true` to accept the step, `false` to re-run it. An error
    /// aborts the step without touching the OLTHAD.
    async fn approve(&self, emission: &PostLmGenerationStepEmission) -> Result<bool>;
}

/// The optional handlers shared by all agents.
#[derive(Clone, Default)]
pub struct StepHandlers {
    pub pre_step: Option<Arc<dyn PreLmGenerationStepHandler>>,
    pub approver: Option<Arc<dyn PostLmGenerationStepApprover>>,
    pub streams: Option<Arc<dyn LmStreamsHandler>>,
}

impl StepHandlers {
    pub(crate) async fn before_step(
        &self,
        agent_name: AgentName,
        cur_node_id: &str,
        prompt_messages: &[ChatMessage],
        n_streams_to_handle: usize,
    ) {
        let Some(handler) = &self.pre_step else {
            return;
        };
        let emission = PreLmGenerationStepEmission {
            agent_name,
            cur_node_id: cur_node_id.to_string(),
            prompt_messages: prompt_messages.to_vec(),
            n_streams_to_handle,
        };
        handler.handle(&emission).await;
    }

    /// Ask the approver about a finished step; approved when there is none.
    pub(crate) async fn approve(
        &self,
        agent_name: AgentName,
        diff: Vec<String>,
        full_messages: Vec<Vec<ChatMessage>>,
    ) -> Result<bool> {
        let Some(approver) = &self.approver else {
            return Ok(true);
        };
        let emission = PostLmGenerationStepEmission {
            agent_name,
            diff,
            full_messages,
        };
        let approved = approver
            .approve(&emission)
            .await
            .with_context(|| format!("approval of the {agent_name} step"))?;
        if !approved {
            info!(agent = %agent_name, "LM step rejected, re-running");
        }
        Ok(approved)
    }

    pub(crate) fn stream_handler(&self) -> Option<&dyn LmStreamsHandler> {
        self.streams.as_deref()
    }

    pub(crate) fn sink(&self) -> Option<StreamSink<'_>> {
        self.stream_handler()
            .map(|handler| StreamSink::new(handler, None))
    }
}
