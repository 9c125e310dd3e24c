//! End-to-end tests driving `SrOlthad::next_action` with scripted LMs.
//!
//! Every agent talks to its own `ScriptedLm`, so each test spells out the
//! exact sequence of LM steps a session takes.

use std::sync::Arc;

use serde_json::json;
use sr_olthad::agents::AgentName;
use sr_olthad::core::status::TaskStatus;
use sr_olthad::core::traversal::OlthadTraversal;
use sr_olthad::io::config::SrOlthadConfig;
use sr_olthad::io::tree_store::{load_session, load_traversal, write_session};
use sr_olthad::step::SrOlthad;
use sr_olthad::test_support::{
    KnownActions, RecordingHandlers, ScriptedLm, ScriptedLms, classifier_reply, planner_reply,
    pizza_olthad, snapshot_in_tempdir, summary_reply,
};

/// Full session for "Make tea.":
///
/// 1. Call 1: plan (boil, steep), "Boil water." is an action.
/// 2. Call 2: summarize boiling, backtracker keeps going, replan, "Steep the
///    tea bag." is an action.
/// 3. Call 3: summarize steeping, root deemed complete, exit.
/// 4. Call 4: no LM steps at all.
#[tokio::test]
async fn session_plans_acts_and_exits_the_root() {
    let lms = ScriptedLms::new()
        .with(
            AgentName::Planner,
            ScriptedLm::new([
                planner_reply(&["Boil water.", "Steep the tea bag."]),
                planner_reply(&["Pour the tea into a cup."]),
            ]),
        )
        .with(
            AgentName::AttemptSummarizer,
            ScriptedLm::new([
                summary_reply(TaskStatus::Success, "The water boiled."),
                summary_reply(TaskStatus::Success, "The tea steeped."),
            ]),
        )
        .with(
            AgentName::SuccessfulCompletionClf,
            ScriptedLm::new([
                classifier_reply("B", "No tea yet."),
                classifier_reply("A", "Tea is ready."),
            ]),
        )
        .with(
            AgentName::ExhaustiveEffortClf,
            ScriptedLm::new([classifier_reply("B", "Barely started.")]),
        )
        .with(
            AgentName::MostWorthwhilePursuitClf,
            ScriptedLm::new([classifier_reply("A", "Tea is still wanted.")]),
        );
    let classifier = Arc::new(KnownActions::new(["Boil water.", "Steep the tea bag."]));
    let recording = RecordingHandlers::default();
    let mut sr_olthad = SrOlthad::new(
        "Make tea.",
        "A kitchen simulator.",
        classifier,
        &SrOlthadConfig::default(),
        &lms,
        recording.handlers(),
    )
    .expect("sr-olthad");

    let first = sr_olthad.next_action("A cold kettle.").await.expect("call 1");
    assert_eq!(first.as_deref(), Some("Boil water."));
    assert_eq!(recording.pre_step_agents(), vec![AgentName::Planner]);

    let second = sr_olthad
        .next_action(json!({"kettle": "boiling"}))
        .await
        .expect("call 2");
    assert_eq!(second.as_deref(), Some("Steep the tea bag."));

    let third = sr_olthad.next_action("A cup of tea.").await.expect("call 3");
    assert_eq!(third, None);

    let agents = recording.pre_step_agents();
    let fourth = sr_olthad.next_action("Still tea.").await.expect("call 4");
    assert_eq!(fourth, None);
    assert_eq!(recording.pre_step_agents(), agents);

    assert_eq!(
        agents,
        vec![
            AgentName::Planner,
            AgentName::AttemptSummarizer,
            AgentName::SuccessfulCompletionClf,
            AgentName::ExhaustiveEffortClf,
            AgentName::MostWorthwhilePursuitClf,
            AgentName::Planner,
            AgentName::AttemptSummarizer,
            AgentName::SuccessfulCompletionClf,
        ]
    );

    let traversal = sr_olthad.traversal();
    assert!(traversal.is_finished());
    let root = traversal.root_node();
    assert_eq!(root.status, TaskStatus::Success);
    assert_eq!(root.retrospective.as_deref(), Some("Tea is ready."));
    for agent in AgentName::ALL {
        assert_eq!(lms.lm(agent).remaining(), 0, "{agent} left responses unused");
    }

    // The JSON environment state reached the summarizer with a 3-space indent.
    let summarizer_prompts = lms.lm(AgentName::AttemptSummarizer).prompts();
    assert!(summarizer_prompts[0][1].content.contains("{\n   \"kettle\": \"boiling\"\n}"));
}

#[tokio::test]
async fn configured_models_are_requested_per_agent() {
    let lms = ScriptedLms::new();
    SrOlthad::new(
        "t",
        "",
        Arc::new(KnownActions::default()),
        &SrOlthadConfig::default(),
        &lms,
        Default::default(),
    )
    .expect("sr-olthad");

    let requested = lms.requested_models();
    assert_eq!(requested.len(), 6);
    assert!(requested.contains(&(
        AgentName::MostWorthwhilePursuitClf,
        "gpt-4o-mini-2024-07-18".to_string()
    )));
    assert!(requested.contains(&(AgentName::Planner, "gpt-3.5-turbo".to_string())));
}

#[tokio::test]
async fn unknown_prompts_version_is_rejected_up_front() {
    let mut config = SrOlthadConfig::default();
    config.planner.prompts_version = "9.9".to_string();

    let err = SrOlthad::new(
        "t",
        "",
        Arc::new(KnownActions::default()),
        &config,
        &ScriptedLms::new(),
        Default::default(),
    )
    .err()
    .expect("bad version");

    assert!(err.to_string().contains("no prompts version '9.9' for Planner"));
}

/// Resuming the pizza lunch: the backtracker deliberates first, drops the
/// pizza, and the next planned task ("Drink a glass of water.") is an action.
#[tokio::test]
async fn resumed_session_backtracks_before_planning() {
    let (_dir, path) = snapshot_in_tempdir(
        &OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string())).expect("parts"),
    );
    let traversal = load_traversal(&path).expect("load");
    let lms = ScriptedLms::new()
        .with(
            AgentName::SuccessfulCompletionClf,
            ScriptedLm::new([
                classifier_reply("B", "Slices remain."),
                classifier_reply("B", "Still thirsty."),
            ]),
        )
        .with(
            AgentName::ExhaustiveEffortClf,
            ScriptedLm::new([
                classifier_reply("B", "Not yet."),
                classifier_reply("B", "Not yet."),
            ]),
        )
        .with(
            AgentName::MostWorthwhilePursuitClf,
            ScriptedLm::new([
                classifier_reply("A", "Lunch matters."),
                classifier_reply("B", "The pizza is cold."),
                classifier_reply("A", "Lunch matters."),
            ]),
        )
        .with(
            AgentName::Planner,
            ScriptedLm::new([planner_reply(&["Wash the glass."])]),
        );
    let mut sr_olthad = SrOlthad::resume(
        traversal,
        "",
        Arc::new(KnownActions::new(["Drink a glass of water."])),
        &SrOlthadConfig::default(),
        &lms,
        Default::default(),
    )
    .expect("resume");

    let action = sr_olthad.next_action("Cold pizza.").await.expect("next");

    assert_eq!(action.as_deref(), Some("Drink a glass of water."));
    let traversal = sr_olthad.traversal();
    assert_eq!(traversal.cur_node_id(), Some("1"));
    assert_eq!(
        traversal.node("1.1").map(|n| n.status),
        Some(TaskStatus::Dropped)
    );
    assert_eq!(
        traversal.node("1.2").map(|n| n.status),
        Some(TaskStatus::InProgress)
    );
    assert_eq!(
        traversal.node("1.3").map(|n| n.task.as_str()),
        Some("Wash the glass.")
    );
}

/// A restart between two calls: the action handed out before the restart is
/// still summarized by the first call after it.
#[tokio::test]
async fn action_from_before_a_restart_is_summarized_after_resuming() {
    let before = ScriptedLms::new().with(
        AgentName::Planner,
        ScriptedLm::new([planner_reply(&["Boil water.", "Steep the tea bag."])]),
    );
    let classifier = Arc::new(KnownActions::new(["Boil water.", "Steep the tea bag."]));
    let mut sr_olthad = SrOlthad::new(
        "Make tea.",
        "",
        classifier.clone(),
        &SrOlthadConfig::default(),
        &before,
        Default::default(),
    )
    .expect("sr-olthad");
    let first = sr_olthad.next_action("A cold kettle.").await.expect("call 1");
    assert_eq!(first.as_deref(), Some("Boil water."));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("olthad.json");
    write_session(&path, &sr_olthad.snapshot()).expect("write");
    drop(sr_olthad);

    let snapshot = load_session(&path).expect("load");
    assert_eq!(snapshot.last_action_node_id.as_deref(), Some("1.1"));
    let after = ScriptedLms::new()
        .with(
            AgentName::AttemptSummarizer,
            ScriptedLm::new([summary_reply(TaskStatus::Success, "The water boiled.")]),
        )
        .with(
            AgentName::SuccessfulCompletionClf,
            ScriptedLm::new([classifier_reply("B", "No tea yet.")]),
        )
        .with(
            AgentName::ExhaustiveEffortClf,
            ScriptedLm::new([classifier_reply("B", "Barely started.")]),
        )
        .with(
            AgentName::MostWorthwhilePursuitClf,
            ScriptedLm::new([classifier_reply("A", "Tea is still wanted.")]),
        )
        .with(
            AgentName::Planner,
            ScriptedLm::new([planner_reply(&["Pour the tea into a cup."])]),
        );
    let recording = RecordingHandlers::default();
    let mut sr_olthad = SrOlthad::resume(
        snapshot,
        "",
        classifier,
        &SrOlthadConfig::default(),
        &after,
        recording.handlers(),
    )
    .expect("resume");

    let second = sr_olthad.next_action("The kettle is boiling.").await.expect("call 2");

    assert_eq!(second.as_deref(), Some("Steep the tea bag."));
    assert_eq!(after.lm(AgentName::AttemptSummarizer).calls(), 1);
    assert_eq!(recording.pre_step_agents()[0], AgentName::AttemptSummarizer);
    let traversal = sr_olthad.traversal();
    assert_eq!(
        traversal.node("1.1").map(|n| n.status),
        Some(TaskStatus::Success)
    );
    assert_eq!(
        traversal.node("1.2").map(|n| n.status),
        Some(TaskStatus::InProgress)
    );
    assert_eq!(sr_olthad.snapshot().last_action_node_id.as_deref(), Some("1.2"));
}
