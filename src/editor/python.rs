//! Tree-sitter backed editor for Python sources
//!
//! The tree is only used to find byte ranges; the text itself is spliced, so
//! an untouched file serializes back to exactly what was parsed.

use super::{cleandoc, FunctionSite, SourceEditor};
use crate::error::EditError;
use std::cell::RefCell;
use std::ops::Range;
use tree_sitter::{Node, Parser, Tree};

// Tree-sitter parsers are expensive to create; each worker thread keeps its own.
thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Parse Python with the thread-local parser
pub(crate) fn parse_python(content: &str) -> Result<Tree, EditError> {
    PYTHON_PARSER
        .with(|p| p.borrow_mut().parse(content, None))
        .ok_or_else(|| EditError::Parser("tree-sitter produced no tree".to_string()))
}

/// Deepest-first search for the first ERROR or MISSING node
pub(crate) fn first_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(found) = first_error_node(child) {
                return Some(found);
            }
        }
    }
    None
}

/// A parsed Python module that can be edited in place
pub struct PythonSource {
    text: String,
    tree: Tree,
}

impl PythonSource {
    /// Parse `text`; sources with syntax errors are rejected
    pub fn parse(text: impl Into<String>) -> Result<Self, EditError> {
        let text = text.into();
        let tree = checked_parse(&text)?;
        Ok(Self { text, tree })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn function_nodes(&self, name: &str) -> Vec<Node<'_>> {
        let mut found = Vec::new();
        collect_functions(self.tree.root_node(), self.text.as_bytes(), name, &mut found);
        found
    }

    fn site_for(&self, node: Node<'_>, name: &str) -> Option<FunctionSite> {
        let body = node.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first_stmt = body
            .named_children(&mut cursor)
            .find(|child| child.kind() != "comment")?;

        let doc_span =
            is_docstring(first_stmt, self.text.as_bytes()).then(|| first_stmt.byte_range());

        let stmt_start = first_stmt.start_byte();
        let stmt_line = line_start(&self.text, stmt_start);
        let leading = &self.text[stmt_line..stmt_start];
        let inline_body = !leading.chars().all(|c| c == ' ' || c == '\t');

        let (indent, insert_span) = if inline_body {
            let def_line = line_start(&self.text, node.start_byte());
            let def_indent: String = self.text[def_line..]
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect();
            // Swallow the spaces between ':' and the statement
            let ws_start = self.text[..stmt_start].trim_end_matches([' ', '\t']).len();
            (format!("{}    ", def_indent), ws_start..stmt_start)
        } else {
            (leading.to_string(), stmt_line..stmt_line)
        };

        Some(FunctionSite {
            name: name.to_string(),
            span: node.byte_range(),
            doc_span,
            insert_span,
            indent,
            inline_body,
        })
    }

    fn splice(&mut self, range: Range<usize>, replacement: &str) -> Result<(), EditError> {
        let mut updated = String::with_capacity(self.text.len() + replacement.len());
        updated.push_str(&self.text[..range.start]);
        updated.push_str(replacement);
        updated.push_str(&self.text[range.end..]);

        let tree = checked_parse(&updated)?;
        self.text = updated;
        self.tree = tree;
        Ok(())
    }
}

impl SourceEditor for PythonSource {
    fn locate_function(&self, name: &str) -> Option<FunctionSite> {
        let nodes = self.function_nodes(name);
        if nodes.len() > 1 {
            tracing::warn!(
                "{} functions named '{}' in one file; editing the first",
                nodes.len(),
                name
            );
        }
        nodes.first().and_then(|node| self.site_for(*node, name))
    }

    fn read_doc_block(&self, site: &FunctionSite) -> Option<String> {
        let span = site.doc_span.clone()?;
        Some(cleandoc(&literal_body(&self.text[span])))
    }

    fn replace_doc_block(&mut self, site: &FunctionSite, doc: &str) -> Result<(), EditError> {
        let literal = render_docstring(doc, &site.indent);
        match &site.doc_span {
            None if doc.is_empty() => Ok(()),
            Some(span) => {
                if self.text[span.clone()] == literal {
                    return Ok(());
                }
                self.splice(span.clone(), &literal)
            }
            None if site.inline_body => {
                let replacement = format!("\n{indent}{literal}\n{indent}", indent = site.indent);
                self.splice(site.insert_span.clone(), &replacement)
            }
            None => {
                let replacement = format!("{}{}\n", site.indent, literal);
                self.splice(site.insert_span.clone(), &replacement)
            }
        }
    }

    fn serialize(&self) -> String {
        self.text.clone()
    }
}

fn checked_parse(text: &str) -> Result<Tree, EditError> {
    let tree = parse_python(text)?;
    let root = tree.root_node();
    if root.has_error() {
        let at = first_error_node(root).unwrap_or(root).start_position();
        return Err(EditError::Unparsable {
            line: at.row + 1,
            column: at.column + 1,
        });
    }
    Ok(tree)
}

fn collect_functions<'t>(node: Node<'t>, source: &[u8], name: &str, out: &mut Vec<Node<'t>>) {
    if node.kind() == "function_definition" {
        let matches = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
            .map(|text| text == name)
            .unwrap_or(false);
        if matches {
            out.push(node);
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_functions(child, source, name, out);
    }
}

/// A statement consisting only of a plain (non f-) string literal
fn is_docstring(stmt: Node<'_>, source: &[u8]) -> bool {
    if stmt.kind() != "expression_statement" || stmt.named_child_count() != 1 {
        return false;
    }
    let Some(expr) = stmt.named_child(0) else {
        return false;
    };
    if !matches!(expr.kind(), "string" | "concatenated_string") {
        return false;
    }
    let text = expr.utf8_text(source).unwrap_or("");
    let prefix_end = text.find(['"', '\'']).unwrap_or(0);
    !text[..prefix_end].contains(['f', 'F'])
}

fn line_start(text: &str, byte: usize) -> usize {
    text[..byte].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Raw content of a (possibly implicitly concatenated) string literal
fn literal_body(literal: &str) -> String {
    let mut body = String::new();
    let mut rest = literal;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '\\');
        let Some(quote_at) = rest.find(['"', '\'']) else {
            break;
        };
        rest = &rest[quote_at..];

        let quote = ["\"\"\"", "'''", "\"", "'"]
            .into_iter()
            .find(|q| rest.starts_with(q))
            .unwrap_or("\"");
        rest = &rest[quote.len()..];

        let mut end = rest.len();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            if c == '\\' {
                chars.next();
                continue;
            }
            if rest[i..].starts_with(quote) {
                end = i;
                break;
            }
        }

        body.push_str(&rest[..end]);
        rest = &rest[(end + quote.len()).min(rest.len())..];
    }
    body
}

/// Render `doc` as a triple-quoted literal at `indent`
fn render_docstring(doc: &str, indent: &str) -> String {
    let escaped = doc.replace("\"\"\"", "\\\"\\\"\\\"");
    let lines: Vec<&str> = escaped.lines().collect();

    if lines.len() <= 1 {
        let single = lines.first().copied().unwrap_or("");
        // A trailing quote or backslash would fuse with the closing delimiter
        if single.ends_with('"') || single.ends_with('\\') {
            return format!("\"\"\"{}\n{}\"\"\"", single, indent);
        }
        return format!("\"\"\"{}\"\"\"", single);
    }

    let mut out = String::from("\"\"\"");
    out.push_str(lines[0]);
    for line in &lines[1..] {
        out.push('\n');
        if !line.trim().is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
    }
    out.push('\n');
    out.push_str(indent);
    out.push_str("\"\"\"");
    out
}
