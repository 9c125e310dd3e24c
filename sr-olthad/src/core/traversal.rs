//! An ongoing depth-first traversal of an OLTHAD.
//!
//! The traversal owns the tree and tracks the current node by id. Mutations
//! proposed by agents are expressed as [`PendingOlthadUpdate`] values so they
//! can be diffed and approved before [`OlthadTraversal::commit`] applies them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::diff::{diff_lines, split_keep_newlines};
use crate::core::error::OlthadError;
use crate::core::node::{ROOT_ID, TaskNode, is_ancestor_id, parent_id_of, subtask_id};
use crate::core::status::{BacktrackedFromTaskStatus, TaskStatus};
use crate::core::stringify::{StringifyOptions, stringify};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlthadTraversal {
    root: TaskNode,
    /// `None` once the traversal has backtracked out of the root.
    cur_node_id: Option<String>,
}

/// A proposed change to the OLTHAD, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOlthadUpdate {
    /// Replace the planned subtasks of `parent_id`.
    PlannedSubtasks {
        parent_id: String,
        new_subtasks: Vec<TaskNode>,
    },
    /// Close an in-progress node with a status and retrospective.
    StatusAndRetrospective {
        node_id: String,
        status: BacktrackedFromTaskStatus,
        retrospective: String,
    },
}

/// One depth level of the gradually rebuilt in-progress lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageLevel {
    /// The OLTHAD rebuilt down to (and including the subtasks above) this level.
    pub olthad: TaskNode,
    /// The in-progress node at this level.
    pub node_id: String,
}

impl OlthadTraversal {
    pub fn new(highest_level_task: impl Into<String>) -> Self {
        Self {
            root: TaskNode::new(
                ROOT_ID,
                None,
                highest_level_task,
                TaskStatus::InProgress,
                None,
            ),
            cur_node_id: Some(ROOT_ID.to_string()),
        }
    }

    /// Resume a traversal from a stored tree and current node.
    pub fn from_parts(root: TaskNode, cur_node_id: Option<String>) -> Result<Self, OlthadError> {
        if !root.is_root() || root.id != ROOT_ID {
            return Err(OlthadError::usage(format!(
                "root node must have id '{ROOT_ID}' and no parent"
            )));
        }
        if let Some(id) = cur_node_id.as_deref() {
            if root.find(id).is_none() {
                return Err(OlthadError::usage(format!(
                    "current node '{id}' not found in the olthad"
                )));
            }
            // The current node and all its ancestors must form the in-progress lineage.
            let mut walker = Some(id);
            while let Some(lineage_id) = walker {
                let node = root.find(lineage_id).ok_or_else(|| {
                    OlthadError::usage(format!("node '{lineage_id}' not found in the olthad"))
                })?;
                if node.status != TaskStatus::InProgress {
                    return Err(OlthadError::usage(format!(
                        "current node '{id}' is not on the in-progress lineage: \
                         '{lineage_id}' is '{}'",
                        node.status
                    )));
                }
                walker = parent_id_of(lineage_id);
            }
        }
        Ok(Self { root, cur_node_id })
    }

    pub fn root_node(&self) -> &TaskNode {
        &self.root
    }

    pub fn cur_node_id(&self) -> Option<&str> {
        self.cur_node_id.as_deref()
    }

    /// The current node, or `None` once the root was backtracked out of.
    pub fn cur_node(&self) -> Option<&TaskNode> {
        self.cur_node_id.as_deref().and_then(|id| self.root.find(id))
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.root.find(id)
    }

    /// True once the traversal has exited the highest-level task.
    pub fn is_finished(&self) -> bool {
        self.cur_node_id.is_none()
    }

    fn require_cur_node(&self) -> Result<&TaskNode, OlthadError> {
        self.cur_node()
            .ok_or_else(|| OlthadError::usage("the traversal has no current node"))
    }

    /// Backtrack to the ancestor `node_id` (or out of the root for `None`).
    ///
    /// Every node left behind on the way up, including the child of the
    /// target, loses its subtasks, so the target has no grandchildren after
    /// backtracking. Exiting the root prunes the root too.
    pub fn backtrack_to(&mut self, node_id: Option<&str>) -> Result<(), OlthadError> {
        let Some(target) = node_id else {
            debug!("backtracking out of the root node");
            let mut walker = self.cur_node_id.take();
            while let Some(id) = walker {
                let node = self
                    .root
                    .find_mut(&id)
                    .ok_or_else(|| OlthadError::corrupted(format!("node '{id}' vanished")))?;
                node.non_planned_subtasks.clear();
                node.planned_subtasks.clear();
                walker = parent_id_of(&id).map(str::to_string);
            }
            return Ok(());
        };
        if self.root.find(target).is_none() {
            return Err(OlthadError::usage(format!(
                "node with id '{target}' not found in the olthad"
            )));
        }
        let cur = self.require_cur_node()?.id.clone();
        if !is_ancestor_id(target, &cur) {
            return Err(OlthadError::usage(format!(
                "'{target}' is not an ancestor of the current node '{cur}'"
            )));
        }

        let mut walker = cur;
        while walker != target {
            let node = self
                .root
                .find_mut(&walker)
                .ok_or_else(|| OlthadError::corrupted(format!("node '{walker}' vanished")))?;
            node.non_planned_subtasks.clear();
            node.planned_subtasks.clear();
            walker = parent_id_of(&walker)
                .ok_or_else(|| OlthadError::corrupted(format!("'{walker}' has no parent")))?
                .to_string();
        }
        debug!(node_id = target, "backtracked");
        self.cur_node_id = Some(target.to_string());
        Ok(())
    }

    /// Make the in-progress subtask of the current node the current node.
    pub fn recurse_inward(&mut self) -> Result<(), OlthadError> {
        let next = self
            .require_cur_node()?
            .in_progress_subtask()?
            .ok_or_else(|| OlthadError::usage("the current node has no in-progress subtask"))?
            .id
            .clone();
        debug!(node_id = %next, "recursing inward");
        self.cur_node_id = Some(next);
        Ok(())
    }

    /// Propose replacing the planned subtasks of the current node.
    ///
    /// New subtasks are numbered after the existing non-planned subtasks.
    pub fn update_planned_subtasks_of_cur_node(
        &self,
        new_planned_subtasks: Vec<String>,
    ) -> Result<PendingOlthadUpdate, OlthadError> {
        if new_planned_subtasks.is_empty() {
            return Err(OlthadError::usage(
                "the list of new planned subtasks cannot be empty",
            ));
        }
        let cur = self.require_cur_node()?;
        let offset = cur.non_planned_subtasks.len();
        let new_subtasks = new_planned_subtasks
            .into_iter()
            .enumerate()
            .map(|(i, task)| {
                TaskNode::new(
                    subtask_id(&cur.id, offset + i + 1),
                    Some(&cur.id),
                    task,
                    TaskStatus::Planned,
                    None,
                )
            })
            .collect();
        Ok(PendingOlthadUpdate::PlannedSubtasks {
            parent_id: cur.id.clone(),
            new_subtasks,
        })
    }

    /// Propose closing `node_id` with a status and retrospective.
    ///
    /// The node must be in progress and be the current node, one of its
    /// subtasks, or one of its ancestors.
    pub fn update_status_and_retrospective_of(
        &self,
        node_id: &str,
        new_status: BacktrackedFromTaskStatus,
        new_retrospective: impl Into<String>,
    ) -> Result<PendingOlthadUpdate, OlthadError> {
        let cur = self.require_cur_node()?;
        let related = node_id == cur.id
            || parent_id_of(node_id) == Some(cur.id.as_str())
            || is_ancestor_id(node_id, &cur.id);
        if !related {
            return Err(OlthadError::usage(format!(
                "'{node_id}' must be the current node '{}', one of its subtasks or an ancestor",
                cur.id
            )));
        }
        let node = self
            .root
            .find(node_id)
            .ok_or_else(|| OlthadError::usage(format!("node '{node_id}' not found")))?;
        if node.status != TaskStatus::InProgress {
            return Err(OlthadError::usage(format!(
                "only an in-progress task can be closed; '{node_id}' is '{}'",
                node.status
            )));
        }
        Ok(PendingOlthadUpdate::StatusAndRetrospective {
            node_id: node_id.to_string(),
            status: new_status,
            retrospective: new_retrospective.into(),
        })
    }

    /// Diff of the rendered OLTHAD before and after applying `update`.
    pub fn diff(
        &self,
        update: &PendingOlthadUpdate,
        indent: usize,
    ) -> Result<Vec<String>, OlthadError> {
        let mut preview = self.root.clone();
        apply(&mut preview, update)?;
        let opts = StringifyOptions::with_indent(indent);
        let before = stringify(&self.root, &opts);
        let after = stringify(&preview, &opts);
        Ok(diff_lines(
            &split_keep_newlines(&before),
            &split_keep_newlines(&after),
        ))
    }

    /// Apply a pending update.
    pub fn commit(&mut self, update: PendingOlthadUpdate) -> Result<(), OlthadError> {
        apply(&mut self.root, &update)?;
        debug!(?update, "committed olthad update");
        Ok(())
    }

    /// Gradual rebuild of the in-progress lineage from the root down to the
    /// current node.
    ///
    /// Level `k` holds a copy of the OLTHAD containing only the subtasks of
    /// the in-progress nodes above depth `k`, alongside the id of the
    /// in-progress node at depth `k`.
    pub fn in_progress_lineage(&self) -> Result<Vec<LineageLevel>, OlthadError> {
        let cur_id = self.require_cur_node()?.id.clone();
        let mut levels = Vec::new();
        let mut partial = self.root.childless_copy();
        let mut original = &self.root;
        loop {
            if original.status != TaskStatus::InProgress {
                return Err(OlthadError::corrupted(format!(
                    "'{}' lies on the in-progress lineage but is '{}'",
                    original.id, original.status
                )));
            }
            levels.push(LineageLevel {
                olthad: partial.clone(),
                node_id: original.id.clone(),
            });
            if original.id == cur_id {
                break;
            }

            let next = original.in_progress_subtask()?.ok_or_else(|| {
                OlthadError::corrupted(format!(
                    "current node '{cur_id}' is not reachable through in-progress subtasks"
                ))
            })?;
            let copy = partial
                .find_mut(&original.id)
                .ok_or_else(|| OlthadError::corrupted("partial rebuild lost a node"))?;
            copy.non_planned_subtasks = original
                .non_planned_subtasks
                .iter()
                .map(TaskNode::childless_copy)
                .collect();
            copy.planned_subtasks = original
                .planned_subtasks
                .iter()
                .map(TaskNode::childless_copy)
                .collect();
            original = next;
        }
        Ok(levels)
    }
}

fn apply(root: &mut TaskNode, update: &PendingOlthadUpdate) -> Result<(), OlthadError> {
    match update {
        PendingOlthadUpdate::PlannedSubtasks {
            parent_id,
            new_subtasks,
        } => {
            let parent = root
                .find_mut(parent_id)
                .ok_or_else(|| OlthadError::usage(format!("node '{parent_id}' not found")))?;
            parent.planned_subtasks = new_subtasks.clone();
            let has_in_progress = parent
                .non_planned_subtasks
                .last()
                .is_some_and(|last| last.status == TaskStatus::InProgress);
            if !has_in_progress {
                parent.promote_next_planned_subtask();
            }
        }
        PendingOlthadUpdate::StatusAndRetrospective {
            node_id,
            status,
            retrospective,
        } => {
            let node = root
                .find_mut(node_id)
                .ok_or_else(|| OlthadError::usage(format!("node '{node_id}' not found")))?;
            if node.status != TaskStatus::InProgress {
                return Err(OlthadError::usage(format!(
                    "'{node_id}' is no longer in progress"
                )));
            }
            node.status = (*status).into();
            node.retrospective = Some(retrospective.clone());

            // The closed node was its parent's in-progress subtask, so the
            // next planned sibling takes over.
            if let Some(parent_id) = parent_id_of(node_id) {
                let parent = root.find_mut(parent_id).ok_or_else(|| {
                    OlthadError::corrupted(format!("parent '{parent_id}' not found"))
                })?;
                parent.promote_next_planned_subtask();
            }
        }
    }
    Ok(())
}
