/// Header that opens every generated invariant section in a docstring
pub const INVARIANTS_HEADER: &str = "-- INVARIANTS --";

pub const INVARIANTS_SYSTEM: &str = r#"You will be provided with a Python source file.
Analyze each function in the file and produce a list of logical invariants for it.
Invariants are conditions that always hold during the execution of the function:
properties of its arguments, control flow, data types, and the logical relationships
between inputs and outputs.

For each function return:
- `declaration`: the function name, exactly as written in the source file
- `invariants`: short, specific statements, one condition per entry, for example
  "Argument `inp` is a string" or "The return value is never negative"

Only produce relevant and meaningful invariants. Keep them as concise as possible.
Answer with a single JSON object."#;

pub const TEST_GENERATION_SYSTEM: &str = r#"The user will provide the directory structure of their project, the canonical path to a Python file,
the content of that file, and the canonical path where the pytest script will be written. Generate a
comprehensive set of pytest unit tests for every function, taking into account edge cases and places
where the programmer's logic may be faulty. Pay particular attention to outputs that could lead to a
logic-based security vulnerability.

Functions may carry a list of invariants in their docstrings under "-- INVARIANTS --". They describe
arithmetic and logical relationships between inputs, control, loops and outputs. They were written
separately from the code, so they may be incomplete or may not capture the real semantics.

For every function produce:

`declaration`: the function declaration, exactly as written in the source file.

`dependencies`: external libraries, services, and other project files the function calls. These will
likely need to be mocked.

`reasoning`: a scratchpad. What is the function doing? How do the invariants support that goal? What
are valid and invalid inputs, and what should happen for each? Can the invariants be bypassed to
produce unexpected output? Work through the function line by line if it helps.

`cases`: several concrete inputs with the expected properties of the output. Justify each case by the
behavior it enforces or the exploit it rules out. Aim for every line and branch of the function to be
covered.

Once every function is processed, write a complete pytest file in `pytest_file_content` that turns
each case into a proper test, running the inputs and checking the expected properties. Mock every
external service. Answer with a single JSON object."#;

pub const SYNTAX_REPAIR_SYSTEM: &str = r#"The user will provide a Python file that is syntactically incorrect, together with a description
of the syntax error and where it is. Put a description of the error in `explanation`, how to fix it in
`fix`, and the entire corrected file in `updated_file`. Do not change the behavior of the program
except to fix the syntax error. Answer with a single JSON object."#;

pub const CLASSIFY_FAILURES_SYSTEM: &str = r#"You will be provided with failed unit tests (name and failure message), the source of the unit
test file, the source of the file under test, and the project directory structure.

For each failed test, reason in `explanation` about what went wrong. The test itself may have been
written incorrectly, or the source program may not implement its intended logic. Set `problem_source`
to "test" when the test is at fault and to "source" when the program is at fault, and describe the
change you recommend in `suggestion`. Never propose changes that alter the intended behavior of the
program.

Return exactly one entry per failed test, using the test name exactly as given, inside
`classifications`. Answer with a single JSON object."#;

pub fn invariants_user(content: &str) -> String {
    format!("# File content #\n```python\n{}\n```\n", content)
}

/// Paths are shown the way `structure` lists them
pub fn test_generation_user(
    structure: &str,
    source_path: &str,
    test_path: &str,
    content: &str,
) -> String {
    format!(
        "# Project structure #\n```\n{}\n```\n\n# File path #\n`{}`\n\n# Pytest script location #\n`{}`\n\n# File content #\n```python\n{}\n```\n",
        structure, source_path, test_path, content
    )
}

pub fn syntax_repair_user(source: &str, diagnostic: &str) -> String {
    format!(
        "# File #\n```python\n{}\n```\n\n# Error information #\n`{}`\n",
        source, diagnostic
    )
}

pub fn classify_failures_user(
    structure: &str,
    source: &str,
    test_source: &str,
    failures: &[(String, String)],
) -> String {
    let mut out = format!(
        "# Project structure #\n```\n{}\n```\n\n# Source file #\n```python\n{}\n```\n\n# Test file #\n```python\n{}\n```\n\n# Failed tests #\n",
        structure, source, test_source
    );
    for (name, message) in failures {
        out.push_str(&format!("\n## `{}`\n```\n{}\n```\n", name, message));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_prompt_includes_paths_and_structure() {
        let prompt = test_generation_user(
            "./app.py",
            "./app.py",
            "./tests/test_app.py",
            "def f(): pass",
        );
        assert!(prompt.contains("# File path #\n`./app.py`"));
        assert!(prompt.contains("`./tests/test_app.py`"));
        assert!(prompt.contains("def f(): pass"));
    }

    #[test]
    fn test_classify_prompt_lists_every_failure() {
        let failures = vec![
            ("tests/test_a.py::test_one".to_string(), "boom".to_string()),
            ("tests/test_a.py::test_two".to_string(), "bang".to_string()),
        ];
        let prompt = classify_failures_user("", "src", "tests", &failures);
        assert!(prompt.contains("test_one"));
        assert!(prompt.contains("bang"));
    }
}
