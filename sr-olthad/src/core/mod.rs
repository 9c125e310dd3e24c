//! Deterministic, pure logic shared by the agents and the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod choice;
pub mod diff;
pub mod error;
pub mod invariants;
pub mod json_extract;
pub mod node;
pub mod status;
pub mod stringify;
pub mod traversal;
pub mod voting;
