//! Structured Reasoning with Open-Language Task Hierarchies of Any Depth.
//!
//! A highest-level task is decomposed into an OLTHAD, a tree of
//! natural-language tasks, which is traversed depth-first while LM agents
//! plan subtasks, summarize attempted actions and decide when to backtrack.
//!
//! - **[`core`]**: Pure, deterministic logic (the OLTHAD, its traversal and
//!   rendering, answer extraction, voting). No I/O.
//! - **[`io`]**: Side-effecting operations (configuration, snapshots, the
//!   LM backend).
//! - **[`agents`]**: The planner, backtracker and attempt summarizer.
//!
//! [`step::SrOlthad`] ties the agents together into `next_action` calls.

pub mod agents;
pub mod core;
pub mod emissions;
pub mod io;
pub mod logging;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
