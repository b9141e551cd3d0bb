// Regex-based Rust extractor.
//
// Item extents are tracked by brace counting; `impl` blocks provide the
// parent for methods. Doc comments (`///`) directly above an item become
// its docstring.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use super::SourceParser;
use crate::model::{CodeRecord, RecordKind};

static FN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\s*)(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)"#,
    )
    .unwrap()
});
static STRUCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_]\w*)").unwrap()
});
static ENUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_]\w*)").unwrap()
});
static MACRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^macro_rules!\s+([A-Za-z_]\w*)").unwrap());
static GLOBAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?([A-Za-z_]\w*)\s*:")
        .unwrap()
});
static IMPL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^impl(?:\s*<[^>]*>)?\s+(?:[\w:]+(?:<[^>]*>)?\s+for\s+)?([A-Za-z_][\w]*)")
        .unwrap()
});
static USE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^use\s+.+;").unwrap());
static CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([a-z_]\w*)\(").unwrap());

const RS_KEYWORDS: &[&str] = &[
    "if", "match", "while", "for", "return", "loop", "fn", "as", "in", "move", "else",
    "where", "impl", "let", "mut", "ref", "use",
];

pub struct RustParser;

impl RustParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for RustParser {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn parse(&self, rel_path: &str, content: &str) -> Result<Vec<CodeRecord>> {
        let lines: Vec<&str> = content.lines().collect();
        let imports: Vec<String> = lines
            .iter()
            .filter(|l| USE_RE.is_match(l.trim_start()))
            .map(|l| l.trim().to_string())
            .collect();

        let mut records = Vec::new();
        // (block end line, type name) for the enclosing impl, if any.
        let mut impl_ctx: Option<(usize, String)> = None;
        let mut i = 0;

        while i < lines.len() {
            if let Some((end, _)) = impl_ctx {
                if i > end {
                    impl_ctx = None;
                }
            }

            let line = lines[i];
            let trimmed = line.trim_start();

            if let Some(caps) = IMPL_RE.captures(trimmed) {
                if line.starts_with("impl") {
                    let end = brace_extent(&lines, i).unwrap_or(i);
                    impl_ctx = Some((end, caps[1].to_string()));
                    i += 1;
                    continue;
                }
            }

            if let Some(caps) = FN_RE.captures(line) {
                let name = caps[2].to_string();
                let (header, header_end, is_decl) = fold_fn_header(&lines, i);
                let docstring = doc_comment(&lines, i);

                if is_decl {
                    // Bodyless signature, as in a trait definition.
                    records.push(make_record(
                        rel_path,
                        RecordKind::ForwardDecl,
                        &name,
                        i,
                        header_end,
                        lines[i..=header_end].join("\n"),
                        docstring,
                        Some(clean_signature(&header)),
                        fn_return_type(&header),
                        fn_params(&header),
                        impl_ctx.as_ref().map(|(_, n)| n.clone()),
                        &imports,
                        Vec::new(),
                    ));
                    i = header_end + 1;
                    continue;
                }

                let end = brace_extent(&lines, i).unwrap_or(header_end);
                let body_start = (header_end + 1).min(end);
                let calls = extract_calls(&lines[body_start..=end]);
                let parent = impl_ctx.as_ref().map(|(_, n)| n.clone());

                records.push(make_record(
                    rel_path,
                    if parent.is_some() {
                        RecordKind::Method
                    } else {
                        RecordKind::Function
                    },
                    &name,
                    i,
                    end,
                    lines[i..=end].join("\n"),
                    docstring,
                    Some(clean_signature(&header)),
                    fn_return_type(&header),
                    fn_params(&header),
                    parent,
                    &imports,
                    calls,
                ));

                i = end + 1;
                continue;
            }

            if impl_ctx.is_none() {
                if let Some(caps) = STRUCT_RE.captures(line).or_else(|| ENUM_RE.captures(line)) {
                    let kind = if trimmed.contains("struct ") || trimmed.starts_with("struct") {
                        RecordKind::Struct
                    } else {
                        RecordKind::Enum
                    };
                    let name = caps[2].to_string();
                    let end = if line.contains('{') || !line.contains(';') {
                        brace_extent(&lines, i).unwrap_or(i)
                    } else {
                        i
                    };

                    records.push(make_record(
                        rel_path,
                        kind,
                        &name,
                        i,
                        end,
                        lines[i..=end].join("\n"),
                        doc_comment(&lines, i),
                        None,
                        None,
                        Vec::new(),
                        None,
                        &imports,
                        Vec::new(),
                    ));
                    i = end + 1;
                    continue;
                }

                if let Some(caps) = MACRO_RE.captures(trimmed) {
                    let end = brace_extent(&lines, i).unwrap_or(i);
                    records.push(make_record(
                        rel_path,
                        RecordKind::Macro,
                        &caps[1],
                        i,
                        end,
                        lines[i..=end].join("\n"),
                        doc_comment(&lines, i),
                        None,
                        None,
                        Vec::new(),
                        None,
                        &imports,
                        Vec::new(),
                    ));
                    i = end + 1;
                    continue;
                }

                if !line.starts_with(char::is_whitespace) {
                    if let Some(caps) = GLOBAL_RE.captures(line) {
                        records.push(make_record(
                            rel_path,
                            RecordKind::GlobalVar,
                            &caps[1],
                            i,
                            i,
                            line.to_string(),
                            doc_comment(&lines, i),
                            None,
                            None,
                            Vec::new(),
                            None,
                            &imports,
                            Vec::new(),
                        ));
                    }
                }
            }

            i += 1;
        }

        Ok(records)
    }
}

#[allow(clippy::too_many_arguments)]
fn make_record(
    rel_path: &str,
    kind: RecordKind,
    name: &str,
    start: usize,
    end: usize,
    content: String,
    docstring: Option<String>,
    signature: Option<String>,
    return_type: Option<String>,
    parameters: Vec<String>,
    parent: Option<String>,
    imports: &[String],
    calls: Vec<String>,
) -> CodeRecord {
    CodeRecord {
        id: String::new(),
        kind,
        name: name.to_string(),
        path: rel_path.to_string(),
        start_line: start as u32,
        end_line: end as u32,
        content,
        language: "rust".to_string(),
        docstring,
        signature,
        return_type,
        parameters,
        parent,
        imports: imports.to_vec(),
        calls,
    }
}

/// Join a signature until its opening brace or terminating semicolon.
/// Returns the folded header, the header's last line and whether the item
/// is a bodyless declaration.
fn fold_fn_header(lines: &[&str], start: usize) -> (String, usize, bool) {
    let mut header = String::new();
    let mut end = start;

    for (offset, line) in lines[start..].iter().enumerate() {
        if offset > 0 {
            header.push(' ');
        }
        end = start + offset;

        if let Some(pos) = line.find('{') {
            header.push_str(line[..pos].trim_end());
            return (header, end, false);
        }
        header.push_str(line.trim_end());
        if line.trim_end().ends_with(';') {
            return (header, end, true);
        }
        if offset > 40 {
            break;
        }
    }
    (header, end, false)
}

/// Last line of the brace-delimited block opened on `start`.
fn brace_extent(lines: &[&str], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut opened = false;

    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return Some(start + offset);
        }
    }
    None
}

/// Contiguous `///` lines directly above `start`, attributes skipped.
fn doc_comment(lines: &[&str], start: usize) -> Option<String> {
    let mut docs = Vec::new();
    let mut idx = start;

    while idx > 0 {
        let above = lines[idx - 1].trim();
        if above.starts_with("#[") || above.starts_with("#!") {
            idx -= 1;
            continue;
        }
        if let Some(text) = above.strip_prefix("///") {
            docs.push(text.trim().to_string());
            idx -= 1;
            continue;
        }
        break;
    }

    if docs.is_empty() {
        return None;
    }
    docs.reverse();
    let text = docs.join("\n").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn clean_signature(header: &str) -> String {
    header
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_string()
}

fn fn_return_type(header: &str) -> Option<String> {
    let after = header.split("->").nth(1)?;
    let cut = after.find(" where ").unwrap_or(after.len());
    let ret = after[..cut].trim().trim_end_matches(';').trim();
    if ret.is_empty() {
        None
    } else {
        Some(ret.to_string())
    }
}

/// Parameter names from the first balanced paren group of the signature.
fn fn_params(header: &str) -> Vec<String> {
    let open = match header.find('(') {
        Some(pos) => pos,
        None => return Vec::new(),
    };

    let mut depth = 0i32;
    let mut close = header.len();
    for (pos, ch) in header[open..].char_indices() {
        match ch {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => {
                depth -= 1;
                if depth == 0 {
                    close = open + pos;
                    break;
                }
            }
            _ => {}
        }
    }

    let inner = &header[open + 1..close.min(header.len())];
    let mut out = Vec::new();
    let mut current = String::new();
    let mut nested = 0i32;
    for ch in inner.chars() {
        match ch {
            '(' | '<' | '[' => {
                nested += 1;
                current.push(ch);
            }
            ')' | '>' | ']' => {
                nested -= 1;
                current.push(ch);
            }
            ',' if nested == 0 => {
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
        .split(':')
        .next()
        .unwrap_or("")
        .trim()
        .trim_start_matches('&')
        .trim_start_matches("mut ")
        .trim();
    if !name.is_empty() && name != "_" {
        out.push(name.to_string());
    }
}

/// Best-effort callee names: lowercase identifiers directly followed by an
/// opening paren. Macro invocations never match because of the `!`.
fn extract_calls(lines: &[&str]) -> Vec<String> {
    let mut calls = Vec::new();
    for line in lines {
        let code = line.split("//").next().unwrap_or("");
        for caps in CALL_RE.captures_iter(code) {
            let name = caps[1].to_string();
            if RS_KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            if !calls.contains(&name) {
                calls.push(name);
            }
        }
    }
    calls
}
