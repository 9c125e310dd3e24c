//! Versioned prompt templates of every agent.
//!
//! Each agent has a system and a user template per prompts version. System
//! prompts show an example OLTHAD rendered with the same stringification the
//! agents see at run time.

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};

use crate::agents::AgentName;
use crate::core::choice::{BinaryChoiceOptions, MultipleChoiceOption};
use crate::core::node::{ROOT_ID, TaskNode};
use crate::core::status::{AttemptedTaskStatus, TaskStatus};
use crate::core::stringify::{StringifyOptions, stringify};
use crate::io::lm::ChatMessage;

const TEMPLATES: &[(&str, &str)] = &[
    (
        "successful_completion_1.0_system.md",
        include_str!("prompts/successful_completion_1.0_system.md"),
    ),
    (
        "exhaustive_effort_1.0_system.md",
        include_str!("prompts/exhaustive_effort_1.0_system.md"),
    ),
    (
        "partial_success_1.0_system.md",
        include_str!("prompts/partial_success_1.0_system.md"),
    ),
    (
        "most_worthwhile_pursuit_1.0_system.md",
        include_str!("prompts/most_worthwhile_pursuit_1.0_system.md"),
    ),
    (
        "backtracker_classifier_1.0_user.md",
        include_str!("prompts/backtracker_classifier_1.0_user.md"),
    ),
    (
        "planner_1.0_system.md",
        include_str!("prompts/planner_1.0_system.md"),
    ),
    (
        "planner_1.0_user.md",
        include_str!("prompts/planner_1.0_user.md"),
    ),
    (
        "attempt_summarizer_1.0_system.md",
        include_str!("prompts/attempt_summarizer_1.0_system.md"),
    ),
    (
        "attempt_summarizer_1.0_user.md",
        include_str!("prompts/attempt_summarizer_1.0_user.md"),
    ),
];

pub const WAS_SUCCESSFULLY_COMPLETED_OPTIONS: BinaryChoiceOptions = BinaryChoiceOptions {
    yes: MultipleChoiceOption {
        letter: "A",
        text: "Yes, the task has been successfully completed.",
    },
    no: MultipleChoiceOption {
        letter: "B",
        text: "No, the task has not (yet) been successfully completed.",
    },
};

pub const EFFORT_WAS_EXHAUSTIVE_OPTIONS: BinaryChoiceOptions = BinaryChoiceOptions {
    yes: MultipleChoiceOption {
        letter: "A",
        text: "Yes, all situationally reasonable strategies have been exhausted.",
    },
    no: MultipleChoiceOption {
        letter: "B",
        text: "No, there are still reasonable things that could be done to accomplish the task.",
    },
};

pub const WAS_PARTIAL_SUCCESS_OPTIONS: BinaryChoiceOptions = BinaryChoiceOptions {
    yes: MultipleChoiceOption {
        letter: "A",
        text: "It's better to think about the stated outcome(s) as having been partially realized.",
    },
    no: MultipleChoiceOption {
        letter: "B",
        text: "It's better to consider the attempt a failure (i.e., semantically, it's more of a one-or-the-other kind of thing).",
    },
};

pub const IS_MOST_WORTHWHILE_OPTIONS: BinaryChoiceOptions = BinaryChoiceOptions {
    yes: MultipleChoiceOption {
        letter: "A",
        text: "The task in question is, at this time, the most worthwhile objective for the actor to be pursuing.",
    },
    no: MultipleChoiceOption {
        letter: "B",
        text: "The task in question should be dropped, at least temporarily, in favor of something else.",
    },
};

const BACKTRACKER_JSON_FORMAT: &str = r#"{
    "answer": "(str) Your answer choice",
    "retrospective": "(str) A BRIEF summary of your earlier reasoning"
}"#;

const PLANNER_JSON_FORMAT: &str = r#"{
    "new_planned_subtasks": "(List[str]) Your decided sequence of tentatively planned tasks."
}"#;

const ATTEMPT_SUMMARIZER_JSON_FORMAT: &str = r#"{
    "status_to_assign": "(str) The status to assign to the attempted subtask.",
    "retrospective_to_assign": "(str) The retrospective to assign to the attempted subtask."
}"#;

/// What a prompt asks and how the answer must be formatted.
struct PromptLayout {
    system_prefix: &'static str,
    user_prefix: &'static str,
    question: Option<&'static str>,
    options: Option<BinaryChoiceOptions>,
    json_format: &'static str,
}

fn prompt_layout(agent: AgentName) -> Option<PromptLayout> {
    let classifier = |system_prefix, question, options| PromptLayout {
        system_prefix,
        user_prefix: "backtracker_classifier",
        question: Some(question),
        options: Some(options),
        json_format: BACKTRACKER_JSON_FORMAT,
    };
    let layout = match agent {
        AgentName::SuccessfulCompletionClf => classifier(
            "successful_completion",
            "Has the task in question been successfully completed? Which of the following statements is more true?",
            WAS_SUCCESSFULLY_COMPLETED_OPTIONS,
        ),
        AgentName::ExhaustiveEffortClf => classifier(
            "exhaustive_effort",
            "Thinking ONLY about what's been done so far, has the task been given an exhaustive effort or, are there still obvious things we could do to accomplish it? Which of the following statements is more true?",
            EFFORT_WAS_EXHAUSTIVE_OPTIONS,
        ),
        AgentName::PartialSuccessClf => classifier(
            "partial_success",
            "Should the task be considered a partial success?",
            WAS_PARTIAL_SUCCESS_OPTIONS,
        ),
        AgentName::MostWorthwhilePursuitClf => classifier(
            "most_worthwhile_pursuit",
            "Which statement is more true?",
            IS_MOST_WORTHWHILE_OPTIONS,
        ),
        AgentName::Planner => PromptLayout {
            system_prefix: "planner",
            user_prefix: "planner",
            question: None,
            options: None,
            json_format: PLANNER_JSON_FORMAT,
        },
        AgentName::AttemptSummarizer => PromptLayout {
            system_prefix: "attempt_summarizer",
            user_prefix: "attempt_summarizer",
            question: Some("Which status is the most appropriate to assign and why?"),
            options: None,
            json_format: ATTEMPT_SUMMARIZER_JSON_FORMAT,
        },
        AgentName::Backtracker => return None,
    };
    Some(layout)
}

/// Stringified data filled into a user prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptInputs {
    pub env_state: String,
    pub olthad: String,
    pub task_in_question: String,
}

/// Template engine holding every prompt version.
pub struct PromptRegistry {
    env: Environment<'static>,
    example_olthad: String,
    example_task_in_question: String,
}

impl PromptRegistry {
    /// `json_indent` is used to render the example OLTHAD in system prompts.
    pub fn new(json_indent: usize) -> Result<Self> {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        let opts = StringifyOptions::with_indent(json_indent);
        Ok(Self {
            env,
            example_olthad: stringify(&example_olthad(), &opts),
            example_task_in_question: stringify(&example_task_in_question(), &opts),
        })
    }

    /// Whether `version` of `agent`'s prompts exists.
    pub fn has_version(&self, agent: AgentName, version: &str) -> bool {
        prompt_layout(agent).is_some_and(|layout| {
            self.env
                .get_template(&template_name(layout.system_prefix, version, "system"))
                .is_ok()
        })
    }

    /// Render the system message (if any) followed by the user message.
    pub fn render(
        &self,
        agent: AgentName,
        version: &str,
        inputs: &PromptInputs,
    ) -> Result<Vec<ChatMessage>> {
        let layout =
            prompt_layout(agent).ok_or_else(|| anyhow!("{agent} has no prompts of its own"))?;
        let statuses: Vec<&str> = AttemptedTaskStatus::ALL
            .iter()
            .map(|s| s.as_str())
            .collect();
        let ctx = context! {
            env_state => inputs.env_state.as_str(),
            olthad => inputs.olthad.as_str(),
            task_in_question => inputs.task_in_question.as_str(),
            example_olthad => self.example_olthad.as_str(),
            example_task_in_question => self.example_task_in_question.as_str(),
            question => layout.question,
            yes => layout.options.map(|o| o.yes),
            no => layout.options.map(|o| o.no),
            json_format => layout.json_format,
            statuses => statuses,
            root_id => ROOT_ID,
        };

        let mut messages = Vec::with_capacity(2);
        let system_name = template_name(layout.system_prefix, version, "system");
        if let Ok(template) = self.env.get_template(&system_name) {
            messages.push(ChatMessage::system(template.render(&ctx)?));
        }
        let user_name = template_name(layout.user_prefix, version, "user");
        let template = self
            .env
            .get_template(&user_name)
            .map_err(|_| anyhow!("no prompts version '{version}' for {agent}"))?;
        messages.push(ChatMessage::user(template.render(&ctx)?));
        Ok(messages)
    }
}

fn template_name(prefix: &str, version: &str, role: &str) -> String {
    format!("{prefix}_{version}_{role}.md")
}

/// The OLTHAD shown to the LM as an example in system prompts.
pub fn example_olthad() -> TaskNode {
    let mut root = TaskNode::new("1", None, "Do a thing.", TaskStatus::InProgress, None);
    let mut third = TaskNode::new(
        "1.3",
        Some("1"),
        "Do this other sub-thing.",
        TaskStatus::InProgress,
        None,
    );
    third.non_planned_subtasks.push(example_task_in_question());
    third.planned_subtasks.push(TaskNode::new(
        "1.3.2",
        Some("1.3"),
        "Do another sub-sub-thing.",
        TaskStatus::Planned,
        None,
    ));
    root.non_planned_subtasks = vec![
        TaskNode::new(
            "1.1",
            Some("1"),
            "Do a sub-thing.",
            TaskStatus::Success,
            Some("This sub-thing was accomplished by doing X, Y, and Z.".to_string()),
        ),
        TaskNode::new(
            "1.2",
            Some("1"),
            "Do another sub-thing.",
            TaskStatus::Dropped,
            Some(
                "This sub-thing wasn't worth pursuing further in light of A, B, and C.".to_string(),
            ),
        ),
        third,
    ];
    root.planned_subtasks.push(TaskNode::new(
        "1.4",
        Some("1"),
        "Do yet another sub-thing.",
        TaskStatus::Planned,
        None,
    ));
    root
}

/// The task in question paired with [`example_olthad`].
pub fn example_task_in_question() -> TaskNode {
    TaskNode::new(
        "1.3.1",
        Some("1.3"),
        "Do a sub-sub-thing.",
        TaskStatus::InProgress,
        None,
    )
}
