//! Test generation for a single source file

use crate::error::GenerateError;
use crate::llm::prompts::{test_generation_user, TEST_GENERATION_SYSTEM};
use crate::llm::schema::{FunctionPlan, TestGenerationResponse};
use crate::llm::{self, ReasoningService};
use crate::syntax::{self, SyntaxRepairer};
use crate::util::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};

/// A test file that has been written to disk
#[derive(Debug, Clone)]
pub struct GeneratedTest {
    pub test_path: PathBuf,
    /// Per-function reasoning the file was built from
    pub functions: Vec<FunctionPlan>,
    /// False when the repair loop gave up and a best-effort body was written
    pub validated: bool,
    pub repair_attempts: usize,
}

pub struct TestGenerator<'a> {
    service: &'a dyn ReasoningService,
    max_attempts: usize,
    project_root: Option<&'a Path>,
}

impl<'a> TestGenerator<'a> {
    pub fn new(service: &'a dyn ReasoningService, max_attempts: usize) -> Self {
        Self {
            service,
            max_attempts,
            project_root: None,
        }
    }

    /// Show paths under `root` to the service as `./relative/path`
    pub fn with_project_root(mut self, root: &'a Path) -> Self {
        self.project_root = Some(root);
        self
    }

    fn prompt_path(&self, path: &Path) -> String {
        match self.project_root.and_then(|root| path.strip_prefix(root).ok()) {
            Some(relative) => format!("./{}", relative.to_string_lossy().replace('\\', "/")),
            None => path.display().to_string(),
        }
    }

    /// Generate, validate and write the pytest file for `source_path`.
    ///
    /// Nothing is written when a service call fails.
    pub async fn generate(
        &self,
        source_path: &Path,
        test_path: &Path,
        structure: &str,
    ) -> Result<GeneratedTest, GenerateError> {
        let content = fs::read_to_string(source_path).map_err(|source| GenerateError::Read {
            path: source_path.to_path_buf(),
            source,
        })?;

        let response: TestGenerationResponse = llm::request(
            self.service,
            TEST_GENERATION_SYSTEM,
            test_generation_user(
                structure,
                &self.prompt_path(source_path),
                &self.prompt_path(test_path),
                &content,
            ),
        )
        .await?;

        let TestGenerationResponse {
            functions,
            pytest_file_content,
        } = response;

        let (body, validated, repair_attempts) = match syntax::validate(&pytest_file_content) {
            Ok(()) => (pytest_file_content, true, 0),
            Err(diagnostic) => {
                tracing::debug!(
                    "Generated tests for {} failed to parse at line {}, repairing",
                    source_path.display(),
                    diagnostic.line
                );
                let outcome = SyntaxRepairer::new(self.service, self.max_attempts)
                    .repair(pytest_file_content, diagnostic)
                    .await?;
                (outcome.source, outcome.valid, outcome.attempts)
            }
        };

        write_atomic(test_path, &body).map_err(|source| GenerateError::Write {
            path: test_path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            "Wrote {} ({} function(s))",
            test_path.display(),
            functions.len()
        );

        Ok(GeneratedTest {
            test_path: test_path.to_path_buf(),
            functions,
            validated,
            repair_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::llm::Structured;
    use crate::llm::schema::SyntaxRepair;
    use crate::testing::ScriptedService;
    use serde_json::json;

    const SOURCE: &str = "def f(x):\n    return x + 1\n";
    const VALID_TESTS: &str = "from app import f\n\n\ndef test_f():\n    assert f(1) == 2\n";
    const BROKEN_TESTS: &str = "from app import f\n\n\ndef test_f(:\n    assert f(1) == 2\n";

    fn generation_reply(body: &str) -> String {
        json!({
            "functions": [{
                "declaration": "f",
                "dependencies": [],
                "reasoning": "adds one",
                "cases": [{ "justification": "basic", "input": "1", "output_properties": ["== 2"] }]
            }],
            "pytest_file_content": body
        })
        .to_string()
    }

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("app.py");
        fs::write(&source, SOURCE).unwrap();
        let test = dir.path().join("tests").join("test_app.py");
        (dir, source, test)
    }

    #[tokio::test]
    async fn test_valid_body_is_written_without_repair() {
        let (_dir, source, test) = setup();
        let service = ScriptedService::new(|request, _| {
            assert!(request.user.contains("def f(x):"));
            assert!(request.user.contains("test_app.py"));
            Ok(generation_reply(VALID_TESTS))
        });

        let generated = TestGenerator::new(&service, 10)
            .generate(&source, &test, "./app.py")
            .await
            .unwrap();

        assert!(generated.validated);
        assert_eq!(generated.repair_attempts, 0);
        assert_eq!(generated.functions.len(), 1);
        assert_eq!(fs::read_to_string(&test).unwrap(), VALID_TESTS);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_prompt_paths_are_project_relative() {
        let (dir, source, test) = setup();
        let root = dir.path().to_path_buf();
        let absolute = root.display().to_string();
        let service = ScriptedService::new(move |request, _| {
            assert!(request.user.contains("# File path #\n`./app.py`"));
            assert!(request.user.contains("`./tests/test_app.py`"));
            assert!(!request.user.contains(&absolute));
            Ok(generation_reply(VALID_TESTS))
        });

        TestGenerator::new(&service, 10)
            .with_project_root(&root)
            .generate(&source, &test, "./app.py")
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&test).unwrap(), VALID_TESTS);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_body_goes_through_repair() {
        let (_dir, source, test) = setup();
        let service = ScriptedService::new(|request, _| {
            if request.name == SyntaxRepair::NAME {
                Ok(json!({ "explanation": "paren", "fix": "close it", "updated_file": VALID_TESTS })
                    .to_string())
            } else {
                Ok(generation_reply(BROKEN_TESTS))
            }
        });

        let generated = TestGenerator::new(&service, 10)
            .generate(&source, &test, "./app.py")
            .await
            .unwrap();

        assert!(generated.validated);
        assert_eq!(generated.repair_attempts, 1);
        assert_eq!(service.calls_named(SyntaxRepair::NAME), 1);
        assert_eq!(fs::read_to_string(&test).unwrap(), VALID_TESTS);
    }

    #[tokio::test]
    async fn test_exhausted_repair_still_writes_best_effort() {
        let (_dir, source, test) = setup();
        let service = ScriptedService::new(|request, _| {
            if request.name == SyntaxRepair::NAME {
                Ok(json!({ "explanation": "?", "fix": "?", "updated_file": BROKEN_TESTS })
                    .to_string())
            } else {
                Ok(generation_reply(BROKEN_TESTS))
            }
        });

        let generated = TestGenerator::new(&service, 2)
            .generate(&source, &test, "./app.py")
            .await
            .unwrap();

        assert!(!generated.validated);
        assert_eq!(generated.repair_attempts, 2);
        assert_eq!(fs::read_to_string(&test).unwrap(), BROKEN_TESTS);
    }

    #[tokio::test]
    async fn test_service_failure_writes_nothing() {
        let (_dir, source, test) = setup();
        let service =
            ScriptedService::new(|_, _| Err(ServiceError::Api("Server error".to_string())));

        let result = TestGenerator::new(&service, 10)
            .generate(&source, &test, "./app.py")
            .await;

        assert!(matches!(result, Err(GenerateError::Service(_))));
        assert!(!test.exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptedService::new(|_, _| Ok(generation_reply(VALID_TESTS)));

        let result = TestGenerator::new(&service, 10)
            .generate(&dir.path().join("gone.py"), &dir.path().join("t.py"), "")
            .await;

        assert!(matches!(result, Err(GenerateError::Read { .. })));
        assert_eq!(service.calls(), 0);
    }
}
