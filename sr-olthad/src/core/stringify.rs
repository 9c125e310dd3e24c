//! LM-friendly rendering of task nodes.
//!
//! A node renders as a JSON-like object whose `subtasks` key holds the
//! rendered subtasks (or `null`). The output is meant to be read by an LM, so
//! it can contain the non-JSON redaction marker.

use crate::core::diff::{split_keep_newlines, unchanged_lines};
use crate::core::node::TaskNode;
use crate::core::status::TaskStatus;

/// Replaces planned subtasks when they are redacted.
pub const REDACTED_PLANS_STR: &str = "(FUTURE PLANNED TASKS REDACTED)";
/// Replaces a status when it is obfuscated.
pub const OBFUSCATED_STATUS_STR: &str = "?";
/// Indent width used when none is configured.
pub const DEFAULT_INDENT: usize = 3;

/// Rendering options for [`stringify`].
#[derive(Debug, Clone, Copy)]
pub struct StringifyOptions<'a> {
    /// Number of spaces per indent level.
    pub indent: usize,
    /// Redact planned subtasks anywhere in the subtree of this node.
    pub redact_planned_subtasks_below: Option<&'a str>,
    /// Hide the status of this node.
    pub obfuscate_status_of: Option<&'a str>,
}

impl Default for StringifyOptions<'_> {
    fn default() -> Self {
        Self {
            indent: DEFAULT_INDENT,
            redact_planned_subtasks_below: None,
            obfuscate_status_of: None,
        }
    }
}

impl<'a> StringifyOptions<'a> {
    pub fn with_indent(indent: usize) -> Self {
        Self {
            indent,
            ..Self::default()
        }
    }

    /// Redact plans below and obfuscate the status of the same node.
    pub fn in_question(mut self, node_id: &'a str) -> Self {
        self.redact_planned_subtasks_below = Some(node_id);
        self.obfuscate_status_of = Some(node_id);
        self
    }
}

/// Render `node` and its subtree.
pub fn stringify(node: &TaskNode, opts: &StringifyOptions<'_>) -> String {
    let mut renderer = Renderer {
        out: String::new(),
        unit: " ".repeat(opts.indent),
        opts,
    };
    renderer.node(node, 0, false);
    renderer.out.trim().to_string()
}

/// Render `node` and mark every line unchanged (a diff with no changes).
pub fn stringify_diff_lines(node: &TaskNode, opts: &StringifyOptions<'_>) -> Vec<String> {
    let rendered = stringify(node, opts);
    unchanged_lines(&split_keep_newlines(&rendered))
}

struct Renderer<'o, 'a> {
    out: String,
    unit: String,
    opts: &'o StringifyOptions<'a>,
}

impl Renderer<'_, '_> {
    fn pad(&self, level: usize) -> String {
        self.unit.repeat(level)
    }

    fn node(&mut self, node: &TaskNode, level: usize, mut redact_planned: bool) {
        self.fields(node, level);
        self.out.push_str(",\n");

        if self.opts.redact_planned_subtasks_below == Some(node.id.as_str()) {
            redact_planned = true;
        }

        if node.has_subtasks() {
            let prepend = self.pad(level + 1);
            self.out.push_str(&prepend);
            self.out.push_str("\"subtasks\": [");

            let n_subtasks = node.subtask_count();
            for (i, subtask) in node.subtasks().enumerate() {
                if redact_planned && subtask.status == TaskStatus::Planned {
                    let pad = self.pad(level + 2);
                    self.out.push('\n');
                    self.out.push_str(&pad);
                    self.out.push_str(REDACTED_PLANS_STR);
                    break;
                }
                self.node(subtask, level + 2, redact_planned);
                if i + 1 < n_subtasks {
                    self.out.push(',');
                }
            }

            self.out.push('\n');
            self.out.push_str(&prepend);
            self.out.push_str("]\n");
        } else {
            let pad = self.pad(level + 1);
            self.out.push_str(&pad);
            self.out.push_str("\"subtasks\": null\n");
        }

        let pad = self.pad(level);
        self.out.push_str(&pad);
        self.out.push('}');
    }

    /// The opening brace and the scalar fields, without the closing brace.
    fn fields(&mut self, node: &TaskNode, level: usize) {
        let status = if self.opts.obfuscate_status_of == Some(node.id.as_str()) {
            OBFUSCATED_STATUS_STR
        } else {
            node.status.as_str()
        };
        let fields = [
            ("id", json_str(&node.id)),
            ("task", json_str(&node.task)),
            ("status", json_str(status)),
            (
                "retrospective",
                node.retrospective
                    .as_deref()
                    .map_or_else(|| "null".to_string(), json_str),
            ),
        ];

        let pad = self.pad(level);
        self.out.push('\n');
        self.out.push_str(&pad);
        self.out.push('{');
        for (i, (key, value)) in fields.iter().enumerate() {
            self.out.push('\n');
            self.out.push_str(&pad);
            self.out.push_str(&self.unit);
            self.out.push('"');
            self.out.push_str(key);
            self.out.push_str("\": ");
            self.out.push_str(value);
            if i + 1 < fields.len() {
                self.out.push(',');
            }
        }
    }
}

fn json_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
