//! Syntax validation and the bounded self-correction loop
//!
//! Generated test files are checked with the same tree-sitter grammar the
//! editor uses. Invalid candidates are sent back to the reasoning service
//! for repair, at most `max_attempts` times.

use crate::editor::python::{first_error_node, parse_python};
use crate::error::ServiceError;
use crate::llm::prompts::{syntax_repair_user, SYNTAX_REPAIR_SYSTEM};
use crate::llm::schema::SyntaxRepair;
use crate::llm::{self, ReasoningService};
use crate::util::truncate;
use std::fmt;

pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Where and why a candidate failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
    pub message: String,
    /// Offending source line, verbatim
    pub text: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  line {}", self.line)?;
        writeln!(f, "    {}", self.text)?;
        writeln!(f, "    {}^", " ".repeat(self.column.saturating_sub(1)))?;
        write!(f, "SyntaxError: {}", self.message)
    }
}

/// A candidate is valid iff it parses without error or missing nodes
pub fn validate(source: &str) -> Result<(), SyntaxError> {
    let tree = match parse_python(source) {
        Ok(tree) => tree,
        Err(e) => {
            return Err(SyntaxError {
                line: 1,
                column: 1,
                message: e.to_string(),
                text: String::new(),
            })
        }
    };

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(());
    }

    let node = first_error_node(root).unwrap_or(root);
    let position = node.start_position();
    let message = if node.is_missing() {
        format!("expected `{}`", node.kind())
    } else {
        let snippet = node
            .utf8_text(source.as_bytes())
            .unwrap_or("")
            .lines()
            .next()
            .unwrap_or("");
        format!("invalid syntax near `{}`", truncate(snippet.trim(), 40))
    };

    Err(SyntaxError {
        line: position.row + 1,
        column: position.column + 1,
        message,
        text: source.lines().nth(position.row).unwrap_or("").to_string(),
    })
}

/// Result of the correction loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Last candidate obtained (the original when no repair ran)
    pub source: String,
    pub valid: bool,
    /// Service round trips used
    pub attempts: usize,
}

enum RepairState {
    Checking,
    RequestingFix(SyntaxError),
    DoneValid,
    DoneExhausted,
}

/// Drives `Checking -> RequestingFix -> Checking ...` until valid or out of attempts
pub struct SyntaxRepairer<'a> {
    service: &'a dyn ReasoningService,
    max_attempts: usize,
}

impl<'a> SyntaxRepairer<'a> {
    pub fn new(service: &'a dyn ReasoningService, max_attempts: usize) -> Self {
        Self {
            service,
            max_attempts,
        }
    }

    /// Repair `source`, which failed validation with `diagnostic`.
    /// Exhaustion is not an error; a failed service call is.
    pub async fn repair(
        &self,
        source: String,
        diagnostic: SyntaxError,
    ) -> Result<RepairOutcome, ServiceError> {
        let mut candidate = source;
        let mut attempts = 0usize;
        let mut state = if self.max_attempts == 0 {
            RepairState::DoneExhausted
        } else {
            RepairState::RequestingFix(diagnostic)
        };

        loop {
            state = match state {
                RepairState::Checking => match validate(&candidate) {
                    Ok(()) => RepairState::DoneValid,
                    Err(_) if attempts >= self.max_attempts => RepairState::DoneExhausted,
                    Err(diagnostic) => RepairState::RequestingFix(diagnostic),
                },
                RepairState::RequestingFix(diagnostic) => {
                    attempts += 1;
                    let reply: SyntaxRepair = llm::request(
                        self.service,
                        SYNTAX_REPAIR_SYSTEM,
                        syntax_repair_user(&candidate, &diagnostic.to_string()),
                    )
                    .await?;
                    tracing::debug!(
                        "Syntax repair attempt {}: {}",
                        attempts,
                        truncate(&reply.explanation, 120)
                    );
                    candidate = reply.updated_file;
                    RepairState::Checking
                }
                RepairState::DoneValid => {
                    if attempts > 0 {
                        tracing::debug!("Syntax correction completed after {} attempts", attempts);
                    }
                    return Ok(RepairOutcome {
                        source: candidate,
                        valid: true,
                        attempts,
                    });
                }
                RepairState::DoneExhausted => {
                    tracing::warn!("Syntax correction not successful after {} attempts", attempts);
                    return Ok(RepairOutcome {
                        source: candidate,
                        valid: false,
                        attempts,
                    });
                }
            };
        }
    }
}
