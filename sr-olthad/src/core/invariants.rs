//! Semantic invariants not expressible via JSON Schema.

use crate::core::node::{TaskNode, subtask_id};
use crate::core::status::TaskStatus;

/// Check structural invariants of an OLTHAD:
/// - Ids follow the dotted numbering and parent ids match
/// - Planned subtasks are all `Tentatively planned`, non-planned never are
/// - With planned subtasks present, the last non-planned subtask is in progress
/// - At most one in-progress subtask per node, and only under an in-progress parent
pub fn validate_invariants(root: &TaskNode) -> Vec<String> {
    let mut errors = Vec::new();
    if root.parent_id.is_some() {
        errors.push(format!("{}: root must not have a parent", root.id));
    }
    validate_node(root, &mut errors);
    errors
}

fn validate_node(node: &TaskNode, errors: &mut Vec<String>) {
    for (i, subtask) in node.subtasks().enumerate() {
        let expected = subtask_id(&node.id, i + 1);
        if subtask.id != expected {
            errors.push(format!(
                "{}: subtask at position {} has id '{}', expected '{}'",
                node.id,
                i + 1,
                subtask.id,
                expected
            ));
        }
        if subtask.parent_id.as_deref() != Some(node.id.as_str()) {
            errors.push(format!(
                "{}: parent id {:?} does not match '{}'",
                subtask.id, subtask.parent_id, node.id
            ));
        }
    }

    for planned in &node.planned_subtasks {
        if planned.status != TaskStatus::Planned {
            errors.push(format!(
                "{}: planned subtask has status '{}'",
                planned.id, planned.status
            ));
        }
        if planned.has_subtasks() {
            errors.push(format!("{}: planned subtask must not have subtasks", planned.id));
        }
    }
    for non_planned in &node.non_planned_subtasks {
        if non_planned.status == TaskStatus::Planned {
            errors.push(format!(
                "{}: non-planned subtask is '{}'",
                non_planned.id,
                TaskStatus::Planned
            ));
        }
    }

    if !node.planned_subtasks.is_empty()
        && node
            .non_planned_subtasks
            .last()
            .is_none_or(|last| last.status != TaskStatus::InProgress)
    {
        errors.push(format!(
            "{}: last non-planned subtask must be in progress while planned subtasks exist",
            node.id
        ));
    }

    let in_progress = node
        .non_planned_subtasks
        .iter()
        .filter(|n| n.status == TaskStatus::InProgress)
        .count();
    if in_progress > 1 {
        errors.push(format!(
            "{}: {} in-progress subtasks, at most one allowed",
            node.id, in_progress
        ));
    }
    if in_progress > 0 && node.status != TaskStatus::InProgress {
        errors.push(format!(
            "{}: has an in-progress subtask but is '{}'",
            node.id, node.status
        ));
    }

    for subtask in node.subtasks() {
        validate_node(subtask, errors);
    }
}
