pub mod docx;
pub mod json;
pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::error::ExtractError;
use crate::model::Payload;

/// A file handed to an extractor. `extension` is lowercase, without the dot.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub name: String,
    pub extension: String,
}

impl FileInfo {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        Self {
            path: path.to_path_buf(),
            name,
            extension,
        }
    }

    /// A file whose extension is known independently of its path, e.g. a
    /// blob staged under a temporary name.
    pub fn with_extension(path: &Path, name: &str, extension: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            extension: extension.trim_start_matches('.').to_lowercase(),
        }
    }
}

/// One extracted piece of text and what is known about where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub metadata: Payload,
}

impl Segment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Payload::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

pub trait Extractor: Send + Sync {
    /// Extensions this extractor registers for.
    fn extensions(&self) -> &'static [&'static str];

    fn accepts(&self, file: &FileInfo) -> bool {
        self.extensions().contains(&file.extension.as_str())
    }

    /// Converts the file into segments, in document order.
    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError>;
}

/// Extension-keyed lookup table of extractors, assembled at startup.
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    /// Text, JSON, JSON Lines, DOCX and PDF extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(text::PlainTextExtractor));
        registry.register(Arc::new(json::JsonExtractor));
        registry.register(Arc::new(json::JsonLinesExtractor));
        registry.register(Arc::new(docx::DocxExtractor));
        registry.register(Arc::new(pdf::PdfExtractor));
        registry
    }

    /// Registers `extractor` for each of its extensions, replacing any
    /// earlier registration.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            if self
                .by_extension
                .insert(ext.to_string(), Arc::clone(&extractor))
                .is_some()
            {
                tracing::debug!(extension = ext, "Replaced extractor registration");
            }
        }
    }

    pub fn for_file(&self, file: &FileInfo) -> Result<Arc<dyn Extractor>, ExtractError> {
        self.by_extension
            .get(&file.extension)
            .filter(|e| e.accepts(file))
            .cloned()
            .ok_or_else(|| ExtractError::UnsupportedFormat(file.extension.clone()))
    }

    /// Looks up the extractor and converts, tagging every segment with the
    /// file name and extension.
    pub fn extract(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        let extractor = self.for_file(file)?;
        let mut segments = extractor.convert(file)?;
        for segment in &mut segments {
            segment
                .metadata
                .entry("file_name")
                .or_insert_with(|| Value::from(file.name.clone()));
            segment
                .metadata
                .entry("extension")
                .or_insert_with(|| Value::from(file.extension.clone()));
        }
        Ok(segments)
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.by_extension.contains_key(extension)
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|e| ExtractError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })
}
