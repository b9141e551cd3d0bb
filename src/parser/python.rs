// Regex-based Python extractor.
//
// Definitions are found by line patterns and their extents by indentation.
// Multi-line signatures are folded into one header before matching.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use super::SourceParser;
use crate::model::{CodeRecord, RecordKind};

static DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\((.*)\)\s*(?:->\s*([^:]+?))?\s*:").unwrap()
});
static CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:").unwrap()
});
static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:import\s+\S+|from\s+\S+\s+import\s+.+)").unwrap());
static GLOBAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9_]*)\s*=[^=]").unwrap());
static CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\(").unwrap());

const PY_KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "return", "yield", "with", "assert", "del", "not", "and",
    "or", "lambda", "in", "is", "raise", "except", "def", "class", "match", "case",
];

pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn parse(&self, rel_path: &str, content: &str) -> Result<Vec<CodeRecord>> {
        let lines: Vec<&str> = content.lines().collect();
        let imports: Vec<String> = lines
            .iter()
            .filter(|l| IMPORT_RE.is_match(l))
            .map(|l| l.trim().to_string())
            .collect();

        let mut records = Vec::new();
        let mut class_stack: Vec<(usize, String)> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                i += 1;
                continue;
            }

            let line_indent = indent_of(line);
            while class_stack.last().map(|(d, _)| *d >= line_indent).unwrap_or(false) {
                class_stack.pop();
            }

            if let Some(caps) = CLASS_RE.captures(line) {
                let indent = caps[1].len();
                let name = caps[2].to_string();
                let end = block_end(&lines, i, indent);
                let docstring = extract_docstring(&lines, i + 1, end);
                let body = lines[i..=end].join("\n");

                records.push(CodeRecord {
                    id: String::new(),
                    kind: RecordKind::Class,
                    name: name.clone(),
                    path: rel_path.to_string(),
                    start_line: i as u32,
                    end_line: end as u32,
                    content: body,
                    language: "python".to_string(),
                    docstring,
                    signature: Some(trimmed.trim_end_matches(':').to_string()),
                    return_type: None,
                    parameters: Vec::new(),
                    parent: class_stack.last().map(|(_, n)| n.clone()),
                    imports: imports.clone(),
                    calls: Vec::new(),
                });

                class_stack.push((indent, name));
                i += 1;
                continue;
            }

            if line.trim_start().starts_with("def ") || line.trim_start().starts_with("async def ")
            {
                let (header, header_end) = fold_header(&lines, i);
                if let Some(caps) = DEF_RE.captures(&header) {
                    let indent = caps[1].len();
                    let name = caps[2].to_string();
                    let params = split_params(&caps[3]);
                    let return_type = caps.get(4).map(|m| m.as_str().trim().to_string());

                    let end = block_end(&lines, header_end, indent);
                    let docstring = extract_docstring(&lines, header_end + 1, end);
                    let body_calls = extract_calls(&lines[(header_end + 1).min(end)..=end]);
                    let content = lines[i..=end].join("\n");

                    let parent = class_stack.last().map(|(_, n)| n.clone());
                    records.push(CodeRecord {
                        id: String::new(),
                        kind: if parent.is_some() {
                            RecordKind::Method
                        } else {
                            RecordKind::Function
                        },
                        name,
                        path: rel_path.to_string(),
                        start_line: i as u32,
                        end_line: end as u32,
                        content,
                        language: "python".to_string(),
                        docstring,
                        signature: Some(header.trim().trim_end_matches(':').to_string()),
                        return_type,
                        parameters: params,
                        parent,
                        imports: imports.clone(),
                        calls: body_calls,
                    });

                    i = end + 1;
                    continue;
                }
            }

            if line_indent == 0 {
                if let Some(caps) = GLOBAL_RE.captures(line) {
                    records.push(CodeRecord {
                        id: String::new(),
                        kind: RecordKind::GlobalVar,
                        name: caps[1].to_string(),
                        path: rel_path.to_string(),
                        start_line: i as u32,
                        end_line: i as u32,
                        content: line.to_string(),
                        language: "python".to_string(),
                        docstring: None,
                        signature: None,
                        return_type: None,
                        parameters: Vec::new(),
                        parent: None,
                        imports: imports.clone(),
                        calls: Vec::new(),
                    });
                }
            }

            i += 1;
        }

        Ok(records)
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Join continuation lines of a signature until its parentheses balance
/// and the closing colon is reached.
fn fold_header(lines: &[&str], start: usize) -> (String, usize) {
    let mut header = String::new();
    let mut depth = 0i32;
    let mut end = start;

    for (offset, line) in lines[start..].iter().enumerate() {
        if offset > 0 {
            header.push(' ');
        }
        header.push_str(line.trim_end());
        for ch in line.chars() {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            }
        }
        end = start + offset;
        if depth <= 0 && header.trim_end().ends_with(':') {
            break;
        }
        // Runaway signature; give up after a screenful.
        if offset > 40 {
            break;
        }
    }

    (header, end)
}

/// Last line of the indentation block opened at `header_end`.
fn block_end(lines: &[&str], header_end: usize, indent: usize) -> usize {
    let mut last_content = header_end;
    for (offset, line) in lines[header_end + 1..].iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent_of(line) <= indent {
            break;
        }
        last_content = header_end + 1 + offset;
    }
    last_content
}

/// Leading `"""` / `'''` docstring of a block, with delimiters stripped.
fn extract_docstring(lines: &[&str], from: usize, to: usize) -> Option<String> {
    let mut idx = from;
    while idx <= to && idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }
    if idx > to || idx >= lines.len() {
        return None;
    }

    let first = lines[idx].trim();
    let delim = if first.starts_with("\"\"\"") {
        "\"\"\""
    } else if first.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    let inner = &first[delim.len()..];
    if let Some(pos) = inner.find(delim) {
        let text = inner[..pos].trim();
        return if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
    }

    let mut parts: Vec<String> = vec![inner.trim().to_string()];
    for line in lines[idx + 1..=to.min(lines.len() - 1)].iter() {
        if let Some(pos) = line.find(delim) {
            parts.push(line[..pos].trim().to_string());
            break;
        }
        parts.push(line.trim().to_string());
    }

    let text = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Split a parameter list on top-level commas, dropping annotations,
/// defaults and `*`/`**` markers.
fn split_params(params: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();

    for ch in params.chars() {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                push_param(&mut out, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push_param(&mut out, &current);
    out
}

fn push_param(out: &mut Vec<String>, raw: &str) {
    let name = raw
        .split([':', '='])
        .next()
        .unwrap_or("")
        .trim()
        .trim_start_matches('*')
        .trim();
    if !name.is_empty() {
        out.push(name.to_string());
    }
}

/// Best-effort callee names from a block body, keywords excluded, first
/// occurrence order preserved.
fn extract_calls(lines: &[&str]) -> Vec<String> {
    let mut calls = Vec::new();
    for line in lines {
        let code = line.split('#').next().unwrap_or("");
        for caps in CALL_RE.captures_iter(code) {
            let name = caps[1].to_string();
            if PY_KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            if !calls.contains(&name) {
                calls.push(name);
            }
        }
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import math
from typing import Optional

MAX_DEPTH = 10


def add_numbers(a, b):
    """Return the sum of two values."""
    return a + b


def walk(tree, depth: int = 0) -> Optional[int]:
    if depth > MAX_DEPTH:
        return None
    total = add_numbers(depth, 1)
    return walk(tree, total)


class Accumulator:
    """Keeps a running total."""

    def __init__(self, start=0):
        self.total = start

    def add(self, value):
        self.total = add_numbers(self.total, value)
        return self.total
"#;

    fn parse(content: &str) -> Vec<CodeRecord> {
        PythonParser::new().parse("src/sample.py", content).unwrap()
    }

    #[test]
    fn test_finds_functions_classes_methods() {
        let records = parse(SAMPLE);
        let names: Vec<(&str, RecordKind)> = records
            .iter()
            .map(|r| (r.name.as_str(), r.kind))
            .collect();

        assert!(names.contains(&("add_numbers", RecordKind::Function)));
        assert!(names.contains(&("walk", RecordKind::Function)));
        assert!(names.contains(&("Accumulator", RecordKind::Class)));
        assert!(names.contains(&("__init__", RecordKind::Method)));
        assert!(names.contains(&("add", RecordKind::Method)));
        assert!(names.contains(&("MAX_DEPTH", RecordKind::GlobalVar)));
    }

    #[test]
    fn test_docstring_and_signature() {
        let records = parse(SAMPLE);
        let add = records.iter().find(|r| r.name == "add_numbers").unwrap();
        assert_eq!(add.docstring.as_deref(), Some("Return the sum of two values."));
        assert_eq!(add.signature.as_deref(), Some("def add_numbers(a, b)"));
        assert_eq!(add.parameters, vec!["a", "b"]);
    }

    #[test]
    fn test_return_annotation_and_typed_params() {
        let records = parse(SAMPLE);
        let walk = records.iter().find(|r| r.name == "walk").unwrap();
        assert_eq!(walk.return_type.as_deref(), Some("Optional[int]"));
        assert_eq!(walk.parameters, vec!["tree", "depth"]);
    }

    #[test]
    fn test_methods_carry_parent() {
        let records = parse(SAMPLE);
        let add = records
            .iter()
            .find(|r| r.name == "add" && r.kind == RecordKind::Method)
            .unwrap();
        assert_eq!(add.parent.as_deref(), Some("Accumulator"));
    }

    #[test]
    fn test_call_references() {
        let records = parse(SAMPLE);
        let walk = records.iter().find(|r| r.name == "walk").unwrap();
        assert!(walk.calls.contains(&"add_numbers".to_string()));
        assert!(walk.calls.contains(&"walk".to_string()), "self-recursion is recorded");
        assert!(!walk.calls.contains(&"if".to_string()));
    }

    #[test]
    fn test_imports_attached_to_records() {
        let records = parse(SAMPLE);
        let add = records.iter().find(|r| r.name == "add_numbers").unwrap();
        assert!(add.imports.contains(&"import math".to_string()));
        assert!(add
            .imports
            .contains(&"from typing import Optional".to_string()));
    }

    #[test]
    fn test_multiline_signature_folds() {
        let content = "def configure(\n    host,\n    port=8080,\n) -> bool:\n    return True\n";
        let records = parse(content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].parameters, vec!["host", "port"]);
        assert_eq!(records[0].return_type.as_deref(), Some("bool"));
    }

    #[test]
    fn test_function_extent_stops_at_dedent() {
        let records = parse(SAMPLE);
        let add = records.iter().find(|r| r.name == "add_numbers").unwrap();
        assert!(add.content.contains("return a + b"));
        assert!(!add.content.contains("def walk"));
    }

    #[test]
    fn test_empty_file_yields_no_records() {
        assert!(parse("").is_empty());
        assert!(parse("# just a comment\n").is_empty());
    }
}
