// Language parser boundary.
//
// Parsers are best-effort, regex-driven extractors: they find definitions,
// signatures, docstrings and callee names without building a full syntax
// tree. A parser failure on one file never aborts the run; the file is
// counted and skipped.

pub mod python;
pub mod rust;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::CodeRecord;

/// One language handler. Implementations fill every [`CodeRecord`] field
/// except `id`, which is assigned afterwards from record content.
pub trait SourceParser: Send + Sync {
    fn language(&self) -> &'static str;

    /// File extensions (without the dot) this parser claims.
    fn extensions(&self) -> &'static [&'static str];

    /// Extract definitions from one file. `rel_path` is the `/`-separated
    /// path recorded on each definition.
    fn parse(&self, rel_path: &str, content: &str) -> Result<Vec<CodeRecord>>;
}

/// Extension-keyed dispatch table over the registered parsers.
pub struct ParserRegistry {
    by_ext: HashMap<String, Arc<dyn SourceParser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            by_ext: HashMap::new(),
        }
    }

    /// Registry with the built-in Python and Rust handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(python::PythonParser::new()));
        registry.register(Arc::new(rust::RustParser::new()));
        registry
    }

    /// Later registrations win on extension conflicts.
    pub fn register(&mut self, parser: Arc<dyn SourceParser>) {
        for ext in parser.extensions() {
            self.by_ext.insert((*ext).to_string(), Arc::clone(&parser));
        }
    }

    pub fn parser_for(&self, extension: &str) -> Option<&Arc<dyn SourceParser>> {
        self.by_ext.get(extension)
    }

    /// Every extension some parser claims.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_ext.keys().cloned().collect();
        exts.sort();
        exts
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
