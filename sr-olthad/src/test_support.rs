//! Test-only doubles: scripted LMs, recording handlers and sample OLTHADs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::agents::AgentName;
use crate::core::node::TaskNode;
use crate::core::status::TaskStatus;
use crate::core::traversal::OlthadTraversal;
use crate::emissions::{
    PostLmGenerationStepApprover, PostLmGenerationStepEmission, PreLmGenerationStepEmission,
    PreLmGenerationStepHandler, StepHandlers,
};
use crate::io::lm::{ChatMessage, InstructLm, LmError, LmProvider, LmStreamsHandler, StreamSink};
use crate::io::tree_store::write_traversal;
use crate::step::ExecutableActionClassifier;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The example OLTHAD also shown to the LMs in system prompts.
pub fn sample_olthad() -> TaskNode {
    crate::agents::prompts::example_olthad()
}

/// Lunch in progress: two slices eaten, the third being eaten ("1.1.3"),
/// the fourth planned, and a drink planned after the pizza.
pub fn pizza_olthad() -> TaskNode {
    let mut root = TaskNode::new("1", None, "Have lunch.", TaskStatus::InProgress, None);
    let mut pizza = TaskNode::new(
        "1.1",
        Some("1"),
        "Eat all four slices of pizza.",
        TaskStatus::InProgress,
        None,
    );
    pizza.non_planned_subtasks = vec![
        TaskNode::new(
            "1.1.1",
            Some("1.1"),
            "Eat the first slice.",
            TaskStatus::Success,
            Some("You ate the first slice of pizza.".to_string()),
        ),
        TaskNode::new(
            "1.1.2",
            Some("1.1"),
            "Eat the second slice.",
            TaskStatus::Success,
            Some("You ate the second slice of pizza.".to_string()),
        ),
        TaskNode::new(
            "1.1.3",
            Some("1.1"),
            "Eat the third slice.",
            TaskStatus::InProgress,
            None,
        ),
    ];
    pizza.planned_subtasks.push(TaskNode::new(
        "1.1.4",
        Some("1.1"),
        "Eat the fourth slice.",
        TaskStatus::Planned,
        None,
    ));
    root.non_planned_subtasks.push(pizza);
    root.planned_subtasks.push(TaskNode::new(
        "1.2",
        Some("1"),
        "Drink a glass of water.",
        TaskStatus::Planned,
        None,
    ));
    root
}

/// A planner reply wrapping `tasks` in some chatter.
pub fn planner_reply(tasks: &[&str]) -> String {
    let json = serde_json::json!({ "new_planned_subtasks": tasks });
    format!("Here is my plan.\n```json\n{json}\n```")
}

/// A backtracker classifier reply choosing `answer`.
pub fn classifier_reply(answer: &str, retrospective: &str) -> String {
    let json = serde_json::json!({ "answer": answer, "retrospective": retrospective });
    format!("Let me think about it.\n{json}")
}

/// An attempt summarizer reply.
pub fn summary_reply(status: TaskStatus, retrospective: &str) -> String {
    serde_json::json!({
        "status_to_assign": status.as_str(),
        "retrospective_to_assign": retrospective,
    })
    .to_string()
}

/// Write `traversal` as a snapshot inside a fresh temporary directory.
pub fn snapshot_in_tempdir(traversal: &OlthadTraversal) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("olthad.json");
    write_traversal(&path, traversal).expect("write snapshot");
    (dir, path)
}

#[derive(Default)]
struct Script {
    responses: VecDeque<String>,
    prompts: Vec<Vec<ChatMessage>>,
}

/// An LM answering with predetermined responses, in order.
///
/// Clones share the script, so a test can keep a handle to inspect the
/// prompts an agent sent.
#[derive(Clone, Default)]
pub struct ScriptedLm {
    script: Arc<Mutex<Script>>,
    streaming: bool,
}

impl ScriptedLm {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        let script = Script {
            responses: responses.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            streaming: false,
        }
    }

    /// Forward every response word by word to the stream handler.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Number of generations requested so far.
    pub fn calls(&self) -> usize {
        lock(&self.script).prompts.len()
    }

    /// Messages of every generation requested so far.
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.script).prompts.clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).responses.len()
    }
}

#[async_trait]
impl InstructLm for ScriptedLm {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        stream: Option<StreamSink<'_>>,
    ) -> Result<String, LmError> {
        let response = {
            let mut script = lock(&self.script);
            script.prompts.push(messages.to_vec());
            script.responses.pop_front()
        }
        .ok_or_else(|| LmError::Backend("scripted LM ran out of responses".to_string()))?;
        if self.streaming
            && let Some(sink) = stream
        {
            for word in response.split_inclusive(' ') {
                sink.emit(word);
            }
        }
        Ok(response)
    }
}

/// Hands out one [`ScriptedLm`] per agent; unscripted agents get an empty
/// script.
#[derive(Clone, Default)]
pub struct ScriptedLms {
    lms: HashMap<AgentName, ScriptedLm>,
    models: Arc<Mutex<Vec<(AgentName, String)>>>,
}

impl ScriptedLms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, agent: AgentName, lm: ScriptedLm) -> Self {
        self.lms.insert(agent, lm);
        self
    }

    pub fn lm(&self, agent: AgentName) -> ScriptedLm {
        self.lms.get(&agent).cloned().unwrap_or_default()
    }

    /// The `(agent, model)` pairs LMs were requested for.
    pub fn requested_models(&self) -> Vec<(AgentName, String)> {
        lock(&self.models).clone()
    }
}

impl LmProvider for ScriptedLms {
    fn lm_for(&self, agent: AgentName, model: &str) -> Result<Arc<dyn InstructLm>, LmError> {
        lock(&self.models).push((agent, model.to_string()));
        Ok(Arc::new(self.lm(agent)))
    }
}

/// Classifies exactly the listed tasks as executable actions.
#[derive(Debug, Clone, Default)]
pub struct KnownActions(pub HashSet<String>);

impl KnownActions {
    pub fn new<S: Into<String>>(actions: impl IntoIterator<Item = S>) -> Self {
        Self(actions.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl ExecutableActionClassifier for KnownActions {
    async fn is_executable_action(&self, task: &str) -> anyhow::Result<bool> {
        Ok(self.0.contains(task))
    }
}

/// Records every streamed chunk with its stream index.
#[derive(Default)]
pub struct RecordingStreams {
    chunks: Mutex<Vec<(Option<usize>, String)>>,
}

impl RecordingStreams {
    pub fn stream_indices(&self) -> Vec<Option<usize>> {
        lock(&self.chunks).iter().map(|(idx, _)| *idx).collect()
    }

    /// Concatenated chunks of one stream.
    pub fn text_of(&self, stream_idx: Option<usize>) -> String {
        lock(&self.chunks)
            .iter()
            .filter(|(idx, _)| *idx == stream_idx)
            .map(|(_, chunk)| chunk.as_str())
            .collect()
    }
}

impl LmStreamsHandler for RecordingStreams {
    fn handle(&self, chunk: &str, stream_idx: Option<usize>) {
        lock(&self.chunks).push((stream_idx, chunk.to_string()));
    }
}

#[derive(Default)]
struct Recorder {
    approvals: Mutex<VecDeque<bool>>,
    pre: Mutex<Vec<PreLmGenerationStepEmission>>,
    post: Mutex<Vec<PostLmGenerationStepEmission>>,
}

#[async_trait]
impl PreLmGenerationStepHandler for Recorder {
    async fn handle(&self, emission: &PreLmGenerationStepEmission) {
        lock(&self.pre).push(emission.clone());
    }
}

#[async_trait]
impl PostLmGenerationStepApprover for Recorder {
    async fn approve(&self, emission: &PostLmGenerationStepEmission) -> anyhow::Result<bool> {
        lock(&self.post).push(emission.clone());
        Ok(lock(&self.approvals).pop_front().unwrap_or(true))
    }
}

/// Step handlers that record emissions and answer approvals from a script
/// (approving once the script is used up).
#[derive(Clone, Default)]
pub struct RecordingHandlers {
    recorder: Arc<Recorder>,
}

impl RecordingHandlers {
    pub fn approving(answers: impl IntoIterator<Item = bool>) -> Self {
        let recorder = Recorder {
            approvals: Mutex::new(answers.into_iter().collect()),
            ..Recorder::default()
        };
        Self {
            recorder: Arc::new(recorder),
        }
    }

    pub fn handlers(&self) -> StepHandlers {
        StepHandlers {
            pre_step: Some(self.recorder.clone()),
            approver: Some(self.recorder.clone()),
            streams: None,
        }
    }

    pub fn pre_step_agents(&self) -> Vec<AgentName> {
        lock(&self.recorder.pre)
            .iter()
            .map(|emission| emission.agent_name)
            .collect()
    }

    pub fn pre_step_emissions(&self) -> Vec<PreLmGenerationStepEmission> {
        lock(&self.recorder.pre).clone()
    }

    pub fn post_step_emissions(&self) -> Vec<PostLmGenerationStepEmission> {
        lock(&self.recorder.post).clone()
    }
}
