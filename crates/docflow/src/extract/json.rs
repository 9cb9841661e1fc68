use serde_json::Value;

use crate::error::ExtractError;
use crate::extract::{read_file, Extractor, FileInfo, Segment};

/// A JSON document as one pretty-printed segment.
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        let bytes = read_file(&file.path)?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| ExtractError::Json(e.to_string()))?;
        let text = serde_json::to_string_pretty(&value)
            .map_err(|e| ExtractError::Json(e.to_string()))?;
        Ok(vec![Segment::new(text)])
    }
}

/// JSON Lines: one segment per non-empty line.
pub struct JsonLinesExtractor;

impl Extractor for JsonLinesExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["jsonl"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        let bytes = read_file(&file.path)?;
        let content = String::from_utf8_lossy(&bytes);

        let mut segments = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .map_err(|e| ExtractError::Json(format!("line {}: {}", index + 1, e)))?;
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            segments.push(Segment::new(text).with_meta("line_number", index + 1));
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn file_with(suffix: &str, content: &str) -> NamedTempFile {
        let temp_file = NamedTempFile::with_suffix(suffix).unwrap();
        std::fs::write(temp_file.path(), content).unwrap();
        temp_file
    }

    #[test]
    fn test_json_single_segment() {
        let temp_file = file_with(".json", r#"{"title":"Report","pages":3}"#);
        let segments = JsonExtractor
            .convert(&FileInfo::from_path(temp_file.path()))
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].text.contains("\"title\": \"Report\""));
    }

    #[test]
    fn test_invalid_json_errors() {
        let temp_file = file_with(".json", "{not json");
        let result = JsonExtractor.convert(&FileInfo::from_path(temp_file.path()));
        assert!(matches!(result, Err(ExtractError::Json(_))));
    }

    #[test]
    fn test_jsonl_one_segment_per_line() {
        let temp_file = file_with(".jsonl", "{\"a\":1}\n\n\"plain\"\n[1,2]\n");
        let segments = JsonLinesExtractor
            .convert(&FileInfo::from_path(temp_file.path()))
            .unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "{\"a\":1}");
        assert_eq!(segments[1].text, "plain");
        assert_eq!(segments[1].metadata["line_number"], 3);
        assert_eq!(segments[2].metadata["line_number"], 4);
    }

    #[test]
    fn test_jsonl_reports_bad_line() {
        let temp_file = file_with(".jsonl", "{\"a\":1}\n{oops\n");
        match JsonLinesExtractor.convert(&FileInfo::from_path(temp_file.path())) {
            Err(ExtractError::Json(msg)) => assert!(msg.starts_with("line 2")),
            other => panic!("Expected Json error, got {:?}", other),
        }
    }
}
