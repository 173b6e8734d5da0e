//! Response shapes for every reasoning-service call, with their JSON schemas

use super::Structured;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn string_array() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

/// Invariants for one function
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionInvariants {
    pub declaration: String,
    pub invariants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvariantResponse {
    pub functions: Vec<FunctionInvariants>,
}

impl Structured for InvariantResponse {
    const NAME: &'static str = "generate_invariants";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "functions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "declaration": {
                                "type": "string",
                                "description": "The name of the function for which invariants are being generated."
                            },
                            "invariants": {
                                "type": "array",
                                "items": {
                                    "type": "string",
                                    "description": "A condition that must hold true during the execution of the function."
                                }
                            }
                        },
                        "required": ["declaration", "invariants"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["functions"],
            "additionalProperties": false
        })
    }
}

/// One test scenario; never persisted on its own
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationCase {
    /// What behavior the case enforces
    pub justification: String,
    pub input: String,
    /// Natural-language conditions on the output
    pub output_properties: Vec<String>,
}

/// Per-function reasoning behind a generated test file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionPlan {
    pub declaration: String,
    /// External services and project files the function relies on
    pub dependencies: Vec<String>,
    pub reasoning: String,
    pub cases: Vec<GenerationCase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestGenerationResponse {
    pub functions: Vec<FunctionPlan>,
    pub pytest_file_content: String,
}

impl Structured for TestGenerationResponse {
    const NAME: &'static str = "initial_generation";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "functions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "declaration": { "type": "string" },
                            "dependencies": string_array(),
                            "reasoning": { "type": "string" },
                            "cases": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "justification": { "type": "string" },
                                        "input": { "type": "string" },
                                        "output_properties": string_array()
                                    },
                                    "required": ["justification", "input", "output_properties"],
                                    "additionalProperties": false
                                }
                            }
                        },
                        "required": ["declaration", "dependencies", "reasoning", "cases"],
                        "additionalProperties": false
                    }
                },
                "pytest_file_content": { "type": "string" }
            },
            "required": ["functions", "pytest_file_content"],
            "additionalProperties": false
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntaxRepair {
    /// What the syntax error is
    pub explanation: String,
    /// How it was fixed
    pub fix: String,
    /// Entire file with the fix applied
    pub updated_file: String,
}

impl Structured for SyntaxRepair {
    const NAME: &'static str = "validate_syntax";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "explanation": { "type": "string" },
                "fix": { "type": "string" },
                "updated_file": { "type": "string" }
            },
            "required": ["explanation", "fix", "updated_file"],
            "additionalProperties": false
        })
    }
}

/// Where a failing test's fault lies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemSource {
    /// The code under test is wrong
    Source,
    /// The generated test is wrong
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureClassification {
    pub test_name: String,
    pub explanation: String,
    pub problem_source: ProblemSource,
    pub suggestion: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationResponse {
    pub classifications: Vec<FailureClassification>,
}

impl Structured for ClassificationResponse {
    const NAME: &'static str = "classify_failures";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "classifications": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "test_name": { "type": "string" },
                            "explanation": { "type": "string" },
                            "problem_source": { "type": "string", "enum": ["source", "test"] },
                            "suggestion": { "type": "string" }
                        },
                        "required": ["test_name", "explanation", "problem_source", "suggestion"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["classifications"],
            "additionalProperties": false
        })
    }
}
