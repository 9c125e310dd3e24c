//! Single-turn chat agent: query an instruct LM and parse its JSON answer.

use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, info, warn};

use crate::core::json_extract::{ExtractError, extract_json};
use crate::core::voting::{Ballot, majority_vote};
use crate::io::lm::{ChatMessage, InstructLm, LmError, LmStreamsHandler, StreamSink};

/// JSON data an agent expects to find in the LM's reply.
pub trait LmResponse: DeserializeOwned + Send {
    /// Semantic checks beyond deserialization.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ChatAgentError {
    #[error(transparent)]
    Lm(#[from] LmError),
    #[error("could not parse the LM response: {0}")]
    Extract(#[from] ExtractError),
    #[error("invalid LM response: {0}")]
    Invalid(String),
    #[error("invalid voting setup: {0}")]
    Voting(String),
    #[error("voting semaphore closed")]
    Semaphore(#[from] AcquireError),
}

/// Parsed output plus the transcripts that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReturn<T> {
    pub output: T,
    /// Input messages and assistant reply, one transcript per LM call.
    pub transcripts: Vec<Vec<ChatMessage>>,
}

impl<T: Ballot> Ballot for AgentReturn<T> {
    fn vote(&self) -> String {
        self.output.vote()
    }

    fn reason(&self) -> Option<String> {
        self.output.reason()
    }

    fn with_reason(self, reason: String) -> Self {
        Self {
            output: self.output.with_reason(reason),
            transcripts: self.transcripts,
        }
    }
}

/// Concurrency settings for [`InstructLmChatAgent::chat_with_voting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voting {
    pub n_calls: usize,
    pub max_async_calls: usize,
}

#[derive(Clone)]
pub struct InstructLmChatAgent {
    lm: Arc<dyn InstructLm>,
    max_tries: u32,
}

impl InstructLmChatAgent {
    pub fn new(lm: Arc<dyn InstructLm>, max_tries: u32) -> Self {
        Self {
            lm,
            max_tries: max_tries.max(1),
        }
    }

    /// Query the LM, retrying on any failure until `max_tries` is used up.
    pub async fn chat<T: LmResponse>(
        &self,
        messages: &[ChatMessage],
        stream: Option<StreamSink<'_>>,
    ) -> Result<AgentReturn<T>, ChatAgentError> {
        let mut attempt = 1;
        loop {
            match self.chat_once(messages, stream).await {
                Ok(ret) => return Ok(ret),
                Err(err) if attempt < self.max_tries => {
                    warn!(
                        attempt,
                        tries_remaining = self.max_tries - attempt,
                        error = %err,
                        "retrying LM chat"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn chat_once<T: LmResponse>(
        &self,
        messages: &[ChatMessage],
        stream: Option<StreamSink<'_>>,
    ) -> Result<AgentReturn<T>, ChatAgentError> {
        let response = self.lm.generate(messages, stream).await?;
        debug!(response_len = response.len(), "LM responded");
        let output: T = extract_json(&response)?;
        output.validate().map_err(ChatAgentError::Invalid)?;
        let mut transcript = messages.to_vec();
        transcript.push(ChatMessage::assistant(response));
        Ok(AgentReturn {
            output,
            transcripts: vec![transcript],
        })
    }

    /// Run the chat `voting.n_calls` times and keep the majority answer.
    ///
    /// At most `voting.max_async_calls` calls are in flight at once. Each
    /// call's stream is tagged with its index. The returned transcripts are
    /// those of every successful call.
    pub async fn chat_with_voting<T>(
        &self,
        messages: &[ChatMessage],
        voting: Voting,
        streams: Option<&dyn LmStreamsHandler>,
    ) -> Result<AgentReturn<T>, ChatAgentError>
    where
        T: LmResponse + Ballot + Clone,
    {
        if voting.n_calls == 0 || voting.max_async_calls == 0 {
            return Err(ChatAgentError::Voting(format!(
                "n_calls ({}) and max_async_calls ({}) must be at least 1",
                voting.n_calls, voting.max_async_calls
            )));
        }
        if voting.n_calls == 1 {
            let sink = streams.map(|handler| StreamSink::new(handler, None));
            return self.chat(messages, sink).await;
        }

        let semaphore = Semaphore::new(voting.max_async_calls);
        let calls = (0..voting.n_calls).map(|idx| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await?;
                let sink = streams.map(|handler| StreamSink::new(handler, Some(idx)));
                self.chat::<T>(messages, sink).await
            }
        });
        let results = join_all(calls).await;
        let outcome = majority_vote(results)?;
        info!(
            vote = %outcome.winner.vote(),
            votes = outcome.votes_for_winner,
            n_calls = voting.n_calls,
            n_failed = outcome.n_failed,
            "multi-agent vote finished"
        );

        let transcripts = outcome
            .ballots
            .into_iter()
            .flat_map(|ballot| ballot.transcripts)
            .collect();
        Ok(AgentReturn {
            output: outcome.winner.output,
            transcripts,
        })
    }
}
