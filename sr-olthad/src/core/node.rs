//! Task nodes of an OLTHAD (Open-Language Task Hierarchy of Any Depth).
//!
//! Node ids are dotted paths: the root is `"1"` and the `i`-th (1-based)
//! subtask of node `p` is `p.i`, counting non-planned subtasks first and
//! planned subtasks after them. Lookups rely on that numbering.

use serde::{Deserialize, Serialize};

use crate::core::error::OlthadError;
use crate::core::status::TaskStatus;

/// Id of the root node of every OLTHAD.
pub const ROOT_ID: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub task: String,
    pub status: TaskStatus,
    pub retrospective: Option<String>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub non_planned_subtasks: Vec<TaskNode>,
    #[serde(default)]
    pub planned_subtasks: Vec<TaskNode>,
}

impl TaskNode {
    /// A node without subtasks.
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<&str>,
        task: impl Into<String>,
        status: TaskStatus,
        retrospective: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            status,
            retrospective,
            parent_id: parent_id.map(str::to_string),
            non_planned_subtasks: Vec::new(),
            planned_subtasks: Vec::new(),
        }
    }

    /// Returns whether the node is the root of an OLTHAD.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Non-planned subtasks followed by planned subtasks.
    pub fn subtasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.non_planned_subtasks
            .iter()
            .chain(self.planned_subtasks.iter())
    }

    pub fn subtask_count(&self) -> usize {
        self.non_planned_subtasks.len() + self.planned_subtasks.len()
    }

    pub fn has_subtasks(&self) -> bool {
        self.subtask_count() > 0
    }

    /// The subtask currently being worked on, if the node has subtasks at all.
    ///
    /// When subtasks exist, the last non-planned one must be in progress.
    pub fn in_progress_subtask(&self) -> Result<Option<&TaskNode>, OlthadError> {
        if !self.has_subtasks() {
            return Ok(None);
        }
        match self.non_planned_subtasks.last() {
            Some(last) if last.status == TaskStatus::InProgress => Ok(Some(last)),
            _ => Err(OlthadError::corrupted(format!(
                "node '{}': the last non-planned subtask must be in progress when subtasks exist",
                self.id
            ))),
        }
    }

    /// Copy of the node's own fields with no subtasks.
    pub fn childless_copy(&self) -> TaskNode {
        TaskNode {
            non_planned_subtasks: Vec::new(),
            planned_subtasks: Vec::new(),
            ..self.clone()
        }
    }

    /// Locate a node in this subtree by walking its dotted id.
    pub fn find(&self, id: &str) -> Option<&TaskNode> {
        if id == self.id {
            return Some(self);
        }
        let idx = child_index_towards(&self.id, id)?;
        self.subtask_at(idx)?.find(id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        if id == self.id {
            return Some(self);
        }
        let idx = child_index_towards(&self.id, id)?;
        self.subtask_at_mut(idx)?.find_mut(id)
    }

    fn subtask_at(&self, idx: usize) -> Option<&TaskNode> {
        let n_non_planned = self.non_planned_subtasks.len();
        if idx < n_non_planned {
            self.non_planned_subtasks.get(idx)
        } else {
            self.planned_subtasks.get(idx - n_non_planned)
        }
    }

    fn subtask_at_mut(&mut self, idx: usize) -> Option<&mut TaskNode> {
        let n_non_planned = self.non_planned_subtasks.len();
        if idx < n_non_planned {
            self.non_planned_subtasks.get_mut(idx)
        } else {
            self.planned_subtasks.get_mut(idx - n_non_planned)
        }
    }

    /// Promote the first planned subtask to in progress.
    ///
    /// Returns the id of the promoted subtask, if there was one.
    pub(crate) fn promote_next_planned_subtask(&mut self) -> Option<String> {
        if self.planned_subtasks.is_empty() {
            return None;
        }
        let mut next = self.planned_subtasks.remove(0);
        next.status = TaskStatus::InProgress;
        let id = next.id.clone();
        self.non_planned_subtasks.push(next);
        Some(id)
    }
}

/// Id of the `position`-th (1-based) subtask of `parent_id`.
pub fn subtask_id(parent_id: &str, position: usize) -> String {
    format!("{parent_id}.{position}")
}

/// Parent id derived from a dotted id (`None` for the root).
pub fn parent_id_of(id: &str) -> Option<&str> {
    id.rsplit_once('.').map(|(parent, _)| parent)
}

/// True if `ancestor_id` is a strict ancestor of `id`.
pub fn is_ancestor_id(ancestor_id: &str, id: &str) -> bool {
    id.strip_prefix(ancestor_id)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// 0-based index of the subtask of `from_id` that leads towards `target_id`.
fn child_index_towards(from_id: &str, target_id: &str) -> Option<usize> {
    let rest = target_id.strip_prefix(from_id)?.strip_prefix('.')?;
    let head = rest.split('.').next()?;
    let position: usize = head.parse().ok()?;
    position.checked_sub(1)
}
