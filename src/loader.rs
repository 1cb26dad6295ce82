//! Document loading: bytes in, plain UTF-8 text out.
//!
//! Supports plain text/markdown and PDF (via `pdf-extract`). Anything that
//! is neither valid UTF-8 nor a parsable PDF is rejected with a user-facing
//! "unsupported format" validation error.
//!
//! Uploaded content is spooled to a [`tempfile::NamedTempFile`] owned by the
//! [`FileSource`]; the spool file is removed when the source is dropped, so
//! every pipeline exit path (success, failure, cancellation) releases it.

use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::errors::PipelineError;

/// Where a document's bytes come from.
pub enum FileSource {
    /// A file on disk, owned by the caller.
    Path(PathBuf),
    /// An upload spooled to a temp file, removed on drop.
    Spooled {
        file_name: String,
        temp: NamedTempFile,
    },
}

impl FileSource {
    /// Spool uploaded bytes to a temp file.
    pub fn spool(file_name: &str, content: &[u8]) -> Result<Self, PipelineError> {
        let mut temp = NamedTempFile::new()?;
        temp.write_all(content)?;
        temp.flush()?;
        Ok(FileSource::Spooled {
            file_name: file_name.to_string(),
            temp,
        })
    }

    pub fn file_name(&self) -> String {
        match self {
            FileSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            FileSource::Spooled { file_name, .. } => file_name.clone(),
        }
    }

    /// Read the raw bytes without interpreting them.
    pub fn read_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let bytes = match self {
            FileSource::Path(path) => std::fs::read(path)?,
            FileSource::Spooled { temp, .. } => std::fs::read(temp.path())?,
        };
        Ok(bytes)
    }

    /// Read and extract plain text.
    pub fn load_text(&self) -> Result<String, PipelineError> {
        extract_text(&self.read_bytes()?, &self.file_name())
    }
}

/// Extract UTF-8 text from raw bytes, dispatching on the PDF magic and the
/// file extension.
pub fn extract_text(bytes: &[u8], file_name: &str) -> Result<String, PipelineError> {
    let is_pdf = bytes.starts_with(b"%PDF") || file_name.to_lowercase().ends_with(".pdf");

    if is_pdf {
        return pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| PipelineError::Validation(format!("unsupported format: {}", e)));
    }

    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Ok(text),
        Err(_) => Err(PipelineError::Validation("unsupported format".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        let text = extract_text(b"A.5.1 Policies for information security", "iso.txt").unwrap();
        assert!(text.contains("A.5.1"));
    }

    #[test]
    fn test_binary_garbage_is_unsupported() {
        let err = extract_text(&[0xff, 0xfe, 0x00, 0x9c, 0x80], "blob.bin").unwrap_err();
        match err {
            PipelineError::Validation(msg) => assert!(msg.contains("unsupported format")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_pdf_is_unsupported() {
        let err = extract_text(b"%PDF-1.4 truncated nonsense", "doc.pdf").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_spooled_source_roundtrip() {
        let src = FileSource::spool("notes.md", b"# Heading\n\nBody text.").unwrap();
        assert_eq!(src.file_name(), "notes.md");
        let text = src.load_text().unwrap();
        assert!(text.contains("Body text."));
    }

    #[test]
    fn test_spool_file_removed_on_drop() {
        let path;
        {
            let src = FileSource::spool("tmp.txt", b"x").unwrap();
            path = match &src {
                FileSource::Spooled { temp, .. } => temp.path().to_path_buf(),
                _ => unreachable!(),
            };
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
