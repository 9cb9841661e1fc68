use crate::error::ExtractError;
use crate::extract::{read_file, Extractor, FileInfo, Segment};

/// Plain text formats read as a single segment. Invalid UTF-8 is replaced
/// rather than rejected.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md", "csv"]
    }

    fn convert(&self, file: &FileInfo) -> Result<Vec<Segment>, ExtractError> {
        let bytes = read_file(&file.path)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(vec![Segment::new(text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reads_whole_file() {
        let temp_file = NamedTempFile::with_suffix(".csv").unwrap();
        std::fs::write(temp_file.path(), "a,b\n1,2\n").unwrap();

        let segments = PlainTextExtractor
            .convert(&FileInfo::from_path(temp_file.path()))
            .unwrap();
        assert_eq!(segments, vec![Segment::new("a,b\n1,2\n")]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let temp_file = NamedTempFile::with_suffix(".txt").unwrap();
        std::fs::write(temp_file.path(), [b'o', b'k', 0xFF]).unwrap();

        let segments = PlainTextExtractor
            .convert(&FileInfo::from_path(temp_file.path()))
            .unwrap();
        assert!(segments[0].text.starts_with("ok"));
    }
}
