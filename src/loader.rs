//! Text extraction for uploaded documents, chosen by file extension.

use std::path::Path;

use thiserror::Error;

/// Document types accepted for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// UTF-8 plain text (`.txt`).
    Text,
    /// Paginated PDF document (`.pdf`).
    Pdf,
}

/// Reasons an upload cannot be turned into text.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Extension outside the accepted set.
    #[error("Unsupported file type '{suffix}'. Only .pdf and .txt are accepted.")]
    Unsupported {
        /// Lowercased suffix including the dot, or empty.
        suffix: String,
    },
    /// `.txt` upload that is not UTF-8.
    #[error("file is not valid UTF-8 text: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),
    /// `.pdf` upload that could not be parsed.
    #[error("failed to extract text from PDF: {0}")]
    Pdf(String),
}

impl DocumentKind {
    /// Picks the loader for `filename`, rejecting unknown extensions.
    pub fn from_filename(filename: &str) -> Result<Self, LoadError> {
        let suffix = file_suffix(filename);
        match suffix.as_str() {
            ".txt" => Ok(DocumentKind::Text),
            ".pdf" => Ok(DocumentKind::Pdf),
            _ => Err(LoadError::Unsupported { suffix }),
        }
    }

    /// Extracts the full text of `bytes`.
    pub async fn extract_text(self, bytes: Vec<u8>) -> Result<String, LoadError> {
        match self {
            DocumentKind::Text => {
                let text = String::from_utf8(bytes)?;
                Ok(match text.strip_prefix('\u{feff}') {
                    Some(stripped) => stripped.to_string(),
                    None => text,
                })
            }
            DocumentKind::Pdf => {
                // pdf-extract is CPU bound and may panic on malformed input.
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                    .await
                    .map_err(|err| LoadError::Pdf(format!("extraction task failed: {err}")))?
                    .map_err(|err| LoadError::Pdf(err.to_string()))
            }
        }
    }
}

/// Lowercased extension of `filename` including the leading dot, or an empty
/// string when there is none (dotfiles such as `.txt` have no extension).
pub fn file_suffix(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
