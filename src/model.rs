// Core data model shared by the parser boundary, the strategies and the
// search engine.

use serde::{Deserialize, Serialize};

/// Kind of a detected code definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Macro,
    GlobalVar,
    ForwardDecl,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Function => "function",
            RecordKind::Method => "method",
            RecordKind::Class => "class",
            RecordKind::Struct => "struct",
            RecordKind::Enum => "enum",
            RecordKind::Macro => "macro",
            RecordKind::GlobalVar => "global_var",
            RecordKind::ForwardDecl => "forward_decl",
        }
    }
}

/// One parsed definition. Immutable once created for a given file version;
/// a content change produces a new record with a new identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Stable identifier, assigned by [`crate::ident::assign_identifiers`].
    #[serde(default)]
    pub id: String,
    pub kind: RecordKind,
    pub name: String,
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    /// 0-based.
    pub start_line: u32,
    /// 0-based, inclusive.
    pub end_line: u32,
    pub content: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Enclosing class or namespace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// File-level import/include list.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Best-effort callee names from the parser's call-reference hook.
    #[serde(default)]
    pub calls: Vec<String>,
}

/// Longest flattened metadata string stored per field (imports join).
const MAX_FLAT_LEN: usize = 1000;

/// Flattened per-record metadata as kept by the vector and keyword stores.
///
/// Store backends may not support nested structures, so list fields are
/// encoded as single bounded-length strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMeta {
    pub path: String,
    pub name: String,
    pub kind: RecordKind,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imports: Option<String>,
}

impl RecordMeta {
    pub fn from_record(record: &CodeRecord) -> Self {
        Self {
            path: record.path.clone(),
            name: record.name.clone(),
            kind: record.kind,
            language: record.language.clone(),
            start_line: record.start_line,
            end_line: record.end_line,
            parent: record.parent.clone(),
            signature: record.signature.clone(),
            return_type: record.return_type.clone(),
            parameters: flatten_list(&record.parameters),
            imports: flatten_list(&record.imports),
        }
    }
}

fn flatten_list(items: &[String]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let mut joined = items.join(", ");
    if joined.len() > MAX_FLAT_LEN {
        let mut cut = MAX_FLAT_LEN;
        while !joined.is_char_boundary(cut) {
            cut -= 1;
        }
        joined.truncate(cut);
    }
    Some(joined)
}
