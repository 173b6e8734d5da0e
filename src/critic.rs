//! Critic: run a generated test file and triage its failures
//!
//! Every failing test is classified as a defect in the test or in the code
//! under test. Source defects are only reported, never fixed automatically.

use crate::error::ServiceError;
use crate::llm::prompts::{classify_failures_user, CLASSIFY_FAILURES_SYSTEM};
use crate::llm::schema::{ClassificationResponse, FailureClassification, ProblemSource};
use crate::llm::{self, ReasoningService, Structured};
use crate::runner::{FailingTest, RunOutcome, TestRunner};
use std::fs;
use std::path::Path;

/// Classified failures, split by where the fault lies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feedback {
    pub test_defects: Vec<FailureClassification>,
    pub source_defects: Vec<FailureClassification>,
}

impl Feedback {
    pub fn len(&self) -> usize {
        self.test_defects.len() + self.source_defects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriticVerdict {
    AllPassed,
    /// No usable report; nothing was classified
    UnableToExecute { reason: String },
    Classified(Feedback),
}

pub struct Critic<'a> {
    service: &'a dyn ReasoningService,
    runner: &'a dyn TestRunner,
}

impl<'a> Critic<'a> {
    pub fn new(service: &'a dyn ReasoningService, runner: &'a dyn TestRunner) -> Self {
        Self { service, runner }
    }

    pub async fn run_and_classify(
        &self,
        test_path: &Path,
        source_path: &Path,
        structure: &str,
    ) -> Result<CriticVerdict, ServiceError> {
        let report = match self.runner.run(test_path).await {
            RunOutcome::Passed => {
                tracing::info!("{}: all tests passed", test_path.display());
                return Ok(CriticVerdict::AllPassed);
            }
            RunOutcome::Unavailable { reason } => return Ok(unable(test_path, reason)),
            RunOutcome::Completed(report) => report,
        };

        let failures = report.failures();
        if failures.is_empty() {
            if let Some(reason) = report.collection_error() {
                return Ok(unable(test_path, reason));
            }
            if report.tests.is_empty() {
                return Ok(unable(test_path, "no tests were collected".to_string()));
            }
            return Ok(CriticVerdict::AllPassed);
        }

        let read = (
            fs::read_to_string(source_path),
            fs::read_to_string(test_path),
        );
        let (source, tests) = match read {
            (Ok(source), Ok(tests)) => (source, tests),
            (Err(e), _) => {
                return Ok(unable(
                    test_path,
                    format!("cannot read {}: {}", source_path.display(), e),
                ))
            }
            (_, Err(e)) => {
                return Ok(unable(
                    test_path,
                    format!("cannot read {}: {}", test_path.display(), e),
                ))
            }
        };

        tracing::info!(
            "{}: classifying {} failing test(s)",
            test_path.display(),
            failures.len()
        );

        let pairs: Vec<(String, String)> = failures
            .iter()
            .map(|f| (f.name.clone(), f.message.clone()))
            .collect();
        let response: ClassificationResponse = llm::request(
            self.service,
            CLASSIFY_FAILURES_SYSTEM,
            classify_failures_user(structure, &source, &tests, &pairs),
        )
        .await?;

        let classified = reconcile(&failures, response.classifications)?;
        let feedback = partition(classified);

        for defect in &feedback.source_defects {
            tracing::warn!(
                "Potential bug in {} ({}): {}",
                source_path.display(),
                defect.test_name,
                defect.explanation
            );
        }
        for defect in &feedback.test_defects {
            tracing::debug!("Test defect in {}: {}", defect.test_name, defect.suggestion);
        }

        Ok(CriticVerdict::Classified(feedback))
    }
}

fn unable(test_path: &Path, reason: String) -> CriticVerdict {
    tracing::error!("Cannot execute {}: {}", test_path.display(), reason);
    CriticVerdict::UnableToExecute { reason }
}

/// The service may answer with the bare function name instead of the node id
fn names_match(node_id: &str, reported: &str) -> bool {
    let reported = reported.trim();
    node_id == reported
        || node_id
            .rsplit("::")
            .next()
            .map(|short| short == reported)
            .unwrap_or(false)
}

/// Exactly one classification per failing test, in failure order
fn reconcile(
    failures: &[FailingTest],
    entries: Vec<FailureClassification>,
) -> Result<Vec<FailureClassification>, ServiceError> {
    let mut slots: Vec<Option<FailureClassification>> = vec![None; failures.len()];

    for mut entry in entries {
        // Short names can be shared across classes, so take the first open slot
        let open = failures
            .iter()
            .enumerate()
            .position(|(i, f)| slots[i].is_none() && names_match(&f.name, &entry.test_name));
        let Some(index) = open else {
            if failures.iter().any(|f| names_match(&f.name, &entry.test_name)) {
                tracing::debug!("Dropping duplicate classification for '{}'", entry.test_name);
            } else {
                tracing::debug!("Dropping classification for unknown test '{}'", entry.test_name);
            }
            continue;
        };
        entry.test_name = failures[index].name.clone();
        slots[index] = Some(entry);
    }

    slots
        .into_iter()
        .zip(failures)
        .map(|(slot, failure)| {
            slot.ok_or_else(|| ServiceError::Malformed {
                schema: ClassificationResponse::NAME,
                message: format!("no classification for failing test '{}'", failure.name),
                preview: String::new(),
            })
        })
        .collect()
}

fn partition(classified: Vec<FailureClassification>) -> Feedback {
    let (source_defects, test_defects): (Vec<_>, Vec<_>) = classified
        .into_iter()
        .partition(|c| c.problem_source == ProblemSource::Source);
    Feedback {
        test_defects,
        source_defects,
    }
}
