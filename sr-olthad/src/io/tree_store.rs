//! OLTHAD session snapshot load/save with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::invariants::validate_invariants;
use crate::core::traversal::OlthadTraversal;

const TRAVERSAL_SCHEMA: &str = include_str!("../../schemas/olthad_traversal.schema.json");

/// Everything needed to continue a session after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub traversal: OlthadTraversal,
    /// Node of the action handed out last and not yet summarized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_node_id: Option<String>,
}

impl SessionSnapshot {
    /// The pending action must still be the in-progress subtask of the
    /// current node.
    pub fn check_last_action(&self) -> Result<()> {
        let Some(id) = self.last_action_node_id.as_deref() else {
            return Ok(());
        };
        let Some(cur) = self.traversal.cur_node() else {
            bail!("last action '{id}' recorded for a traversal that exited the root");
        };
        match cur.in_progress_subtask()? {
            Some(subtask) if subtask.id == id => Ok(()),
            _ => bail!(
                "last action '{id}' is not the in-progress subtask of the current node '{}'",
                cur.id
            ),
        }
    }
}

impl From<OlthadTraversal> for SessionSnapshot {
    fn from(traversal: OlthadTraversal) -> Self {
        Self {
            traversal,
            last_action_node_id: None,
        }
    }
}

/// Load and validate a session snapshot from disk (schema + invariants).
pub fn load_session(path: &Path) -> Result<SessionSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    validate_schema(&value)?;
    let snapshot: SessionSnapshot = serde_json::from_value(value)
        .with_context(|| format!("deserialize snapshot {}", path.display()))?;
    validate_traversal_invariants(&snapshot.traversal)?;
    // Re-check the current node against the tree.
    let traversal = OlthadTraversal::from_parts(
        snapshot.traversal.root_node().clone(),
        snapshot.traversal.cur_node_id().map(str::to_string),
    )
    .with_context(|| format!("restore traversal from {}", path.display()))?;
    let snapshot = SessionSnapshot {
        traversal,
        last_action_node_id: snapshot.last_action_node_id,
    };
    snapshot
        .check_last_action()
        .with_context(|| format!("restore session from {}", path.display()))?;
    Ok(snapshot)
}

/// Load only the traversal of a snapshot.
pub fn load_traversal(path: &Path) -> Result<OlthadTraversal> {
    load_session(path).map(|snapshot| snapshot.traversal)
}

/// Atomically write a session snapshot as pretty JSON.
pub fn write_session(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Write a snapshot of `traversal` with no pending action.
pub fn write_traversal(path: &Path, traversal: &OlthadTraversal) -> Result<()> {
    write_session(path, &SessionSnapshot::from(traversal.clone()))
}

fn validate_schema(snapshot: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(TRAVERSAL_SCHEMA).context("parse embedded snapshot schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(snapshot) {
        let messages = compiled
            .iter_errors(snapshot)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "snapshot schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_traversal_invariants(traversal: &OlthadTraversal) -> Result<()> {
    let errors = validate_invariants(traversal.root_node());
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("olthad invariants failed: {}", errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pizza_olthad, sample_olthad};

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let traversal =
            OlthadTraversal::from_parts(sample_olthad(), Some("1.3.1".to_string())).expect("parts");

        write_traversal(&path, &traversal).expect("write");
        let loaded = load_traversal(&path).expect("load");
        assert_eq!(loaded, traversal);
        assert_eq!(loaded.cur_node_id(), Some("1.3.1"));
    }

    #[test]
    fn finished_traversal_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let mut traversal = OlthadTraversal::new("Build a house");
        traversal.backtrack_to(None).expect("exit root");

        write_traversal(&path, &traversal).expect("write");
        let loaded = load_traversal(&path).expect("load");
        assert!(loaded.is_finished());
    }

    #[test]
    fn unknown_status_fails_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        fs::write(
            &path,
            r#"{"root": {"id": "1", "task": "t", "status": "Done", "retrospective": null, "parent_id": null}, "cur_node_id": "1"}"#,
        )
        .expect("write");
        let err = load_traversal(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn broken_invariants_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let mut root = sample_olthad();
        root.non_planned_subtasks[2].status = crate::core::status::TaskStatus::Failure;
        let traversal = OlthadTraversal::from_parts(root, Some("1".to_string())).expect("parts");
        write_traversal(&path, &traversal).expect("write");

        let err = load_traversal(&path).unwrap_err();
        assert!(format!("{err:#}").contains("olthad invariants failed"));
    }

    #[test]
    fn unknown_current_node_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let traversal = OlthadTraversal::new("t");
        let mut value = serde_json::to_value(&traversal).expect("value");
        value["cur_node_id"] = Value::String("1.9".to_string());
        fs::write(&path, value.to_string()).expect("write");

        let err = load_traversal(&path).unwrap_err();
        assert!(format!("{err:#}").contains("not found"));
    }

    #[test]
    fn pending_action_survives_a_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let snapshot = SessionSnapshot {
            traversal: OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string()))
                .expect("parts"),
            last_action_node_id: Some("1.1.3".to_string()),
        };

        write_session(&path, &snapshot).expect("write");
        let loaded = load_session(&path).expect("load");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn snapshot_without_pending_action_has_no_such_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        write_traversal(&path, &OlthadTraversal::new("t")).expect("write");

        let value: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert!(value.get("last_action_node_id").is_none());
        assert_eq!(load_session(&path).expect("load").last_action_node_id, None);
    }

    #[test]
    fn stale_pending_action_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let snapshot = SessionSnapshot {
            traversal: OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string()))
                .expect("parts"),
            last_action_node_id: Some("1.1.2".to_string()),
        };
        write_session(&path, &snapshot).expect("write");

        let err = load_session(&path).unwrap_err();
        assert!(format!("{err:#}").contains("not the in-progress subtask"));
    }

    #[test]
    fn current_node_off_the_in_progress_lineage_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("olthad.json");
        let traversal =
            OlthadTraversal::from_parts(pizza_olthad(), Some("1.1".to_string())).expect("parts");
        let mut value = serde_json::to_value(&traversal).expect("value");
        value["cur_node_id"] = Value::String("1.1.2".to_string());
        fs::write(&path, value.to_string()).expect("write");

        let err = load_traversal(&path).unwrap_err();
        assert!(format!("{err:#}").contains("not on the in-progress lineage"));
    }
}
