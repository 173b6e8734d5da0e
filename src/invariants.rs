//! Invariant annotation
//!
//! Asks the reasoning service for per-function invariants and records them in
//! each function's docstring under [`INVARIANTS_HEADER`]. A regenerated
//! section always replaces the previous one.

use crate::editor::python::PythonSource;
use crate::editor::{self, declared_name, SourceEditor};
use crate::error::GenerateError;
use crate::llm::prompts::{invariants_user, INVARIANTS_HEADER, INVARIANTS_SYSTEM};
use crate::llm::schema::InvariantResponse;
use crate::llm::{self, ReasoningService};
use crate::util::write_atomic;
use std::fs;
use std::path::Path;

/// What one annotation pass did to a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    /// Functions whose docstring now carries the returned invariants
    pub applied: Vec<String>,
    /// Functions the service named that do not exist in the file
    pub missing: Vec<String>,
    /// Whether the file on disk was rewritten
    pub changed: bool,
}

pub struct InvariantGenerator<'a> {
    service: &'a dyn ReasoningService,
}

impl<'a> InvariantGenerator<'a> {
    pub fn new(service: &'a dyn ReasoningService) -> Self {
        Self { service }
    }

    /// Annotate every function in `path` and rewrite the file once
    pub async fn annotate(&self, path: &Path) -> Result<AnnotationSummary, GenerateError> {
        let content = fs::read_to_string(path).map_err(|source| GenerateError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        // Reject unparsable files before spending a service call on them
        PythonSource::parse(content.as_str())?;

        let response: InvariantResponse =
            llm::request(self.service, INVARIANTS_SYSTEM, invariants_user(&content)).await?;

        let mut source = PythonSource::parse(content.as_str())?;

        let mut summary = AnnotationSummary::default();
        for function in &response.functions {
            let name = declared_name(&function.declaration);
            let section = format_invariants(&function.invariants);
            let found = editor::apply(&mut source, name, |existing| {
                merge_invariant_section(existing, &section)
            })?;

            if found {
                summary.applied.push(name.to_string());
            } else {
                tracing::debug!(
                    "Function '{}' not found in {}, skipping invariants",
                    name,
                    path.display()
                );
                summary.missing.push(name.to_string());
            }
        }

        let updated = source.serialize();
        if updated != content {
            write_atomic(path, &updated).map_err(|source| GenerateError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            summary.changed = true;
        }

        tracing::debug!(
            "Annotated {} function(s) in {}",
            summary.applied.len(),
            path.display()
        );
        Ok(summary)
    }
}

/// Render the header and a numbered list. Empty input renders nothing.
pub fn format_invariants(invariants: &[String]) -> String {
    if invariants.is_empty() {
        return String::new();
    }
    let mut out = INVARIANTS_HEADER.to_string();
    for (i, invariant) in invariants.iter().enumerate() {
        let flat = invariant.split_whitespace().collect::<Vec<_>>().join(" ");
        out.push_str(&format!("\n{}. {}", i + 1, flat));
    }
    out
}

/// Keep the free text before any previous section and put `section` after it
pub fn merge_invariant_section(existing: &str, section: &str) -> String {
    let prefix = match existing.find(INVARIANTS_HEADER) {
        Some(pos) => &existing[..pos],
        None => existing,
    }
    .trim();

    match (prefix.is_empty(), section.is_empty()) {
        (true, _) => section.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}\n\n{}", prefix, section),
    }
}
