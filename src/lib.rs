//! testagon library crate
//!
//! Generates pytest suites for a Python project with a reasoning service:
//! invariant annotation, test generation with bounded syntax repair, and
//! failure triage of the generated tests.

pub mod config;
pub mod critic;
pub mod editor;
pub mod error;
pub mod generate;
pub mod invariants;
pub mod llm;
pub mod orchestrator;
pub mod runner;
pub mod scanner;
pub mod syntax;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;
