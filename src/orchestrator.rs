//! Fork-join over every eligible source file
//!
//! One task per file runs invariant annotation and then test generation.
//! Tasks share only read-only handles; each unit's failure (including a
//! panic) is captured in its [`UnitReport`] and never affects its siblings.

use crate::config::Config;
use crate::error::GenerateError;
use crate::generate::{GeneratedTest, TestGenerator};
use crate::invariants::{AnnotationSummary, InvariantGenerator};
use crate::llm::ReasoningService;
use crate::scanner::{ProjectPath, ProjectScanner};
use anyhow::Context;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Successful result of one unit
#[derive(Debug, Clone)]
pub struct UnitSuccess {
    /// `None` when annotation was disabled
    pub annotation: Option<AnnotationSummary>,
    pub generated: GeneratedTest,
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub source: ProjectPath,
    pub test_path: PathBuf,
    pub result: Result<UnitSuccess, String>,
}

impl UnitReport {
    fn failed(source: ProjectPath, test_path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            source,
            test_path,
            result: Err(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// One report per eligible file, in scan order
#[derive(Debug, Clone, Default)]
pub struct GenerationSummary {
    pub units: Vec<UnitReport>,
}

impl GenerationSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| !u.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }
}

pub struct GenerationOrchestrator {
    root: PathBuf,
    config: Arc<Config>,
    service: Arc<dyn ReasoningService>,
}

impl GenerationOrchestrator {
    pub fn new(
        root: impl Into<PathBuf>,
        config: Arc<Config>,
        service: Arc<dyn ReasoningService>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            service,
        }
    }

    /// Whether `path` should get a generated test file
    pub fn is_eligible(&self, path: &ProjectPath) -> bool {
        path.has_extension(&self.config.source_extension)
            && !path.starts_with(&self.config.test_dir)
            && !path
                .file_name()
                .map(|n| n.starts_with(&self.config.test_prefix))
                .unwrap_or(false)
    }

    /// Generate tests for every eligible file. Only a failed scan is an error.
    pub async fn run(&self) -> anyhow::Result<GenerationSummary> {
        let listing = ProjectScanner::new(&self.root)
            .exclude(&self.config.test_dir)
            .scan()
            .with_context(|| format!("Failed to scan {}", self.root.display()))?;

        let structure = Arc::new(listing.structure());
        let test_root = self.config.test_root(&self.root);
        let eligible: Vec<ProjectPath> = listing
            .files
            .into_iter()
            .filter(|p| self.is_eligible(p))
            .collect();

        tracing::info!("Generating tests for {} file(s)", eligible.len());

        let targets: Vec<PathBuf> = eligible
            .iter()
            .map(|p| mirror_test_path(&test_root, p, &self.config.test_prefix))
            .collect();
        let mut reports: Vec<Option<UnitReport>> = (0..eligible.len()).map(|_| None).collect();
        let mut claimed: HashMap<&Path, &ProjectPath> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (index, (source, test_path)) in eligible.iter().zip(&targets).enumerate() {
            if let Some(first) = claimed.get(test_path.as_path()) {
                reports[index] = Some(UnitReport::failed(
                    source.clone(),
                    test_path.clone(),
                    format!("test path {} is already claimed by {}", test_path.display(), first),
                ));
                continue;
            }
            claimed.insert(test_path.as_path(), source);

            if let Some(parent) = test_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    reports[index] = Some(UnitReport::failed(
                        source.clone(),
                        test_path.clone(),
                        format!("failed to create {}: {}", parent.display(), e),
                    ));
                    continue;
                }
            }

            let unit = run_unit(
                Arc::clone(&self.service),
                Arc::clone(&self.config),
                Arc::clone(&structure),
                self.root.clone(),
                source.resolve(&self.root),
                test_path.clone(),
            );
            tasks.spawn(async move { (index, AssertUnwindSafe(unit).catch_unwind().await) });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // Only reachable on cancellation; the unit is filled in below
                    tracing::error!("Generation task did not complete: {}", e);
                    continue;
                }
            };

            let result = match outcome {
                Ok(Ok(success)) => Ok(success),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => Err(format!("task panicked: {}", panic_detail(panic))),
            };
            reports[index] = Some(UnitReport {
                source: eligible[index].clone(),
                test_path: targets[index].clone(),
                result,
            });
        }

        let units: Vec<UnitReport> = reports
            .into_iter()
            .zip(eligible)
            .zip(targets)
            .map(|((report, source), test_path)| {
                report.unwrap_or_else(|| {
                    UnitReport::failed(source, test_path, "task did not complete")
                })
            })
            .collect();

        for unit in &units {
            match &unit.result {
                Ok(success) if !success.generated.validated => tracing::warn!(
                    "{}: wrote {} but it still has syntax errors",
                    unit.source,
                    unit.test_path.display()
                ),
                Ok(_) => tracing::info!("{}: generated {}", unit.source, unit.test_path.display()),
                Err(reason) => tracing::error!("{}: {}", unit.source, reason),
            }
        }

        Ok(GenerationSummary { units })
    }
}

async fn run_unit(
    service: Arc<dyn ReasoningService>,
    config: Arc<Config>,
    structure: Arc<String>,
    root: PathBuf,
    source: PathBuf,
    test_path: PathBuf,
) -> Result<UnitSuccess, GenerateError> {
    let annotation = if config.invariants {
        Some(
            InvariantGenerator::new(service.as_ref())
                .annotate(&source)
                .await?,
        )
    } else {
        None
    };

    let generated = TestGenerator::new(service.as_ref(), config.max_syntax_attempts)
        .with_project_root(&root)
        .generate(&source, &test_path, &structure)
        .await?;

    Ok(UnitSuccess {
        annotation,
        generated,
    })
}

fn panic_detail(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// `<test_root>/<dir of source>/<prefix><file name>`
pub fn mirror_test_path(test_root: &Path, source: &ProjectPath, prefix: &str) -> PathBuf {
    let relative = source.as_path();
    let file_name = source.file_name().unwrap_or_default();
    let dir = relative.parent().unwrap_or_else(|| Path::new(""));
    test_root.join(dir).join(format!("{}{}", prefix, file_name))
}

/// Inverse of [`mirror_test_path`]: the source file a generated test belongs to
pub fn source_for_test_path(
    root: &Path,
    test_root: &Path,
    test_path: &Path,
    prefix: &str,
) -> Option<PathBuf> {
    let relative = test_path.strip_prefix(test_root).ok()?;
    let file_name = relative.file_name()?.to_str()?;
    let source_name = file_name.strip_prefix(prefix)?;
    let dir = relative.parent().unwrap_or_else(|| Path::new(""));
    Some(root.join(dir).join(source_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::llm::schema::{InvariantResponse, TestGenerationResponse};
    use crate::llm::Structured;
    use crate::testing::ScriptedService;
    use serde_json::json;

    fn generation_reply(module: &str) -> String {
        json!({
            "functions": [],
            "pytest_file_content": format!("import {}\n\n\ndef test_ok():\n    assert True\n", module)
        })
        .to_string()
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("alpha.py"), "def a():\n    return 1\n").unwrap();
        fs::write(root.join("beta.py"), "def b():\n    return 2\n").unwrap();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg").join("gamma.py"), "def c():\n    return 3\n").unwrap();
        dir
    }

    fn config(invariants: bool) -> Arc<Config> {
        Arc::new(Config {
            invariants,
            ..Config::default()
        })
    }

    #[test]
    fn test_mirror_and_inverse() {
        let root = Path::new("/repo");
        let test_root = root.join("tests");
        let source = ProjectPath::new("pkg/util.py");

        let test_path = mirror_test_path(&test_root, &source, "test_");
        assert_eq!(test_path, PathBuf::from("/repo/tests/pkg/test_util.py"));
        assert_eq!(
            source_for_test_path(root, &test_root, &test_path, "test_"),
            Some(PathBuf::from("/repo/pkg/util.py"))
        );
        assert_eq!(
            source_for_test_path(root, &test_root, Path::new("/repo/tests/conftest.py"), "test_"),
            None
        );
    }

    #[test]
    fn test_eligibility() {
        let service: Arc<dyn ReasoningService> =
            Arc::new(ScriptedService::new(|_, _| Ok(String::new())));
        let orchestrator = GenerationOrchestrator::new("/repo", config(true), service);

        assert!(orchestrator.is_eligible(&ProjectPath::new("app.py")));
        assert!(orchestrator.is_eligible(&ProjectPath::new("pkg/models.py")));
        assert!(!orchestrator.is_eligible(&ProjectPath::new("README.md")));
        assert!(!orchestrator.is_eligible(&ProjectPath::new("test_app.py")));
        assert!(!orchestrator.is_eligible(&ProjectPath::new("tests/pkg/test_models.py")));
    }

    #[tokio::test]
    async fn test_one_failing_unit_does_not_stop_siblings() {
        let dir = project();
        let root = dir.path().to_path_buf();
        let scripted = Arc::new(ScriptedService::new(|request, _| {
            if request.name == InvariantResponse::NAME {
                return Ok(json!({ "functions": [] }).to_string());
            }
            if request.user.contains("`./beta.py`") {
                return Err(ServiceError::Api("Server error (500)".to_string()));
            }
            Ok(generation_reply("x"))
        }));
        let service: Arc<dyn ReasoningService> = scripted.clone();

        let summary = GenerationOrchestrator::new(&root, config(true), service)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.units.len(), 3);
        assert_eq!(summary.succeeded().count(), 2);
        assert_eq!(summary.failed().count(), 1);

        let names: Vec<String> = summary.units.iter().map(|u| u.source.to_string()).collect();
        assert_eq!(names, vec!["alpha.py", "beta.py", "pkg/gamma.py"]);
        assert!(!summary.units[1].is_success());

        assert!(root.join("tests/test_alpha.py").exists());
        assert!(!root.join("tests/test_beta.py").exists());
        assert!(root.join("tests/pkg/test_gamma.py").exists());
        assert_eq!(scripted.calls_named(InvariantResponse::NAME), 3);
        assert_eq!(scripted.calls_named(TestGenerationResponse::NAME), 3);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_reported() {
        let dir = project();
        let root = dir.path().to_path_buf();
        let service: Arc<dyn ReasoningService> = Arc::new(ScriptedService::new(|request, _| {
            if request.user.contains("`./pkg/gamma.py`") {
                panic!("scripted panic");
            }
            Ok(generation_reply("x"))
        }));

        let summary = GenerationOrchestrator::new(&root, config(false), service)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.units.len(), 3);
        let failed: Vec<&UnitReport> = summary.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source.to_string(), "pkg/gamma.py");
        assert!(failed[0]
            .result
            .as_ref()
            .unwrap_err()
            .contains("scripted panic"));
    }

    #[tokio::test]
    async fn test_generated_tests_are_not_regenerated() {
        let dir = project();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("tests/test_alpha.py"), "def test_old():\n    pass\n").unwrap();
        fs::write(root.join("test_helpers.py"), "def helper():\n    pass\n").unwrap();

        let scripted = Arc::new(ScriptedService::new(|_, _| Ok(generation_reply("x"))));
        let service: Arc<dyn ReasoningService> = scripted.clone();

        let summary = GenerationOrchestrator::new(&root, config(false), service)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.units.len(), 3);
        assert_eq!(scripted.calls(), 3);
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let service: Arc<dyn ReasoningService> =
            Arc::new(ScriptedService::new(|_, _| Ok(String::new())));

        let result = GenerationOrchestrator::new(dir.path().join("missing"), config(false), service)
            .run()
            .await;

        assert!(result.is_err());
    }
}
