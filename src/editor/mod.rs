//! Structural source editing
//!
//! Edits are made against the parsed syntax tree, so rewriting one function's
//! docstring never disturbs the bytes of anything else in the file. The
//! concrete parser sits behind [`SourceEditor`]; callers only use [`apply`] or
//! [`update_docstring`].

pub mod python;

use crate::error::EditError;
use std::ops::Range;

pub use python::PythonSource;

/// Location of a function definition and of its documentation block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSite {
    pub name: String,
    /// Byte range of the whole definition
    pub span: Range<usize>,
    /// Byte range of the existing documentation statement, if any
    pub doc_span: Option<Range<usize>>,
    /// Range replaced when a new documentation block is inserted
    pub insert_span: Range<usize>,
    /// Indentation of the function body
    pub indent: String,
    /// Body shares the declaration's line (`def f(): return 1`)
    pub inline_body: bool,
}

/// Parse / locate / replace / serialize, one method per responsibility
pub trait SourceEditor {
    /// First function definition named `name`, in document order
    fn locate_function(&self, name: &str) -> Option<FunctionSite>;

    /// Cleaned content of the function's documentation block
    fn read_doc_block(&self, site: &FunctionSite) -> Option<String>;

    /// Replace (or insert) the documentation block. The site is invalid afterwards.
    /// An empty `doc` for a function without a block inserts nothing.
    fn replace_doc_block(&mut self, site: &FunctionSite, doc: &str) -> Result<(), EditError>;

    fn serialize(&self) -> String;
}

/// Rewrite `name`'s documentation block through `update`.
///
/// `update` receives the existing block (empty when there is none). Returns
/// `false`, leaving the source untouched, when no such function exists.
pub fn apply<E, F>(editor: &mut E, name: &str, update: F) -> Result<bool, EditError>
where
    E: SourceEditor + ?Sized,
    F: FnOnce(&str) -> String,
{
    let Some(site) = editor.locate_function(name) else {
        return Ok(false);
    };
    let existing = editor.read_doc_block(&site).unwrap_or_default();
    let updated = update(&existing);
    editor.replace_doc_block(&site, &updated)?;
    Ok(true)
}

/// Convenience wrapper over [`PythonSource`]: text in, text out
pub fn update_docstring<F>(source: &str, name: &str, update: F) -> Result<String, EditError>
where
    F: FnOnce(&str) -> String,
{
    let mut editor = PythonSource::parse(source)?;
    apply(&mut editor, name, update)?;
    Ok(editor.serialize())
}

/// Bare function name from whatever the service called the declaration.
///
/// Accepts `f`, `def f(x):`, `async def f(x) -> int:` and `Class.f`.
pub fn declared_name(declaration: &str) -> &str {
    let mut rest = declaration.trim();
    for keyword in ["async ", "def "] {
        if let Some(stripped) = rest.strip_prefix(keyword) {
            rest = stripped.trim_start();
        }
    }
    let end = rest
        .find(|c: char| c == '(' || c == ':' || c.is_whitespace())
        .unwrap_or(rest.len());
    let name = &rest[..end];
    name.rsplit('.').next().unwrap_or(name)
}

/// Dedent docstring content the way Python's `inspect.cleandoc` does
pub fn cleandoc(raw: &str) -> String {
    let expanded = raw.replace("\r\n", "\n").replace('\t', "        ");
    let lines: Vec<&str> = expanded.split('\n').collect();

    let margin = lines
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            cleaned.push(String::new());
        } else if i == 0 {
            cleaned.push(line.trim_start().to_string());
        } else {
            cleaned.push(line[margin..].to_string());
        }
    }

    while cleaned.first().map(|l| l.is_empty()).unwrap_or(false) {
        cleaned.remove(0);
    }
    while cleaned.last().map(|l| l.is_empty()).unwrap_or(false) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_name_variants() {
        assert_eq!(declared_name("f"), "f");
        assert_eq!(declared_name("def f(x: int) -> int:"), "f");
        assert_eq!(declared_name("async def fetch(url):"), "fetch");
        assert_eq!(declared_name("Account.withdraw"), "withdraw");
        assert_eq!(declared_name("  def  spaced (a)"), "spaced");
    }

    #[test]
    fn test_cleandoc_dedents_continuation_lines() {
        let raw = "Summary line.\n\n        Detail one.\n          nested\n        ";
        assert_eq!(cleandoc(raw), "Summary line.\n\nDetail one.\n  nested");
    }

    #[test]
    fn test_cleandoc_strips_blank_edges() {
        assert_eq!(cleandoc("\n    body\n    "), "body");
        assert_eq!(cleandoc(""), "");
    }
}
