//! Scripted stand-ins for the reasoning service and the test runner

use crate::error::ServiceError;
use crate::llm::{ReasoningService, StructuredRequest};
use crate::runner::{RunOutcome, TestRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Handler = dyn Fn(&StructuredRequest, usize) -> Result<String, ServiceError> + Send + Sync;

/// Answers each request through a closure that sees the request and the call index
pub struct ScriptedService {
    handler: Box<Handler>,
    calls: AtomicUsize,
    names: Mutex<Vec<&'static str>>,
}

impl ScriptedService {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&StructuredRequest, usize) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            names: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.names
            .lock()
            .unwrap()
            .iter()
            .filter(|n| **n == name)
            .count()
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn complete(&self, request: &StructuredRequest) -> Result<String, ServiceError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(request.name);
        (self.handler)(request, index)
    }
}

/// Returns the same outcome for every run and remembers what it ran
pub struct StubRunner {
    outcome: RunOutcome,
    ran: Mutex<Vec<PathBuf>>,
}

impl StubRunner {
    pub fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            ran: Mutex::new(Vec::new()),
        }
    }

    pub fn ran(&self) -> Vec<PathBuf> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestRunner for StubRunner {
    async fn run(&self, test_path: &Path) -> RunOutcome {
        self.ran.lock().unwrap().push(test_path.to_path_buf());
        self.outcome.clone()
    }
}
