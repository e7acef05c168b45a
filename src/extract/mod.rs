//! Document type handling and the extraction/splitting contract.

use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod splitter;

pub use splitter::{TokenSplitter, determine_chunk_size};

/// Declared file types accepted at upload time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Plain text.
    Txt,
    /// Markdown text.
    Markdown,
    /// HTML markup.
    Html,
    /// PDF binary.
    Pdf,
    /// Word document.
    Docx,
    /// PowerPoint presentation.
    Pptx,
    /// Excel workbook (xlsx).
    Xlsx,
    /// Legacy Excel workbook.
    Xls,
}

impl DocumentKind {
    /// Canonical lowercase name stored in chunk metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }

    /// Whether the raw bytes can be decoded as UTF-8 text directly.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Txt | Self::Markdown | Self::Html)
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Txt),
            "md" | "markdown" => Ok(Self::Markdown),
            "html" | "htm" => Ok(Self::Html),
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "pptx" => Ok(Self::Pptx),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while extracting text and splitting it into chunks.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The declared file type has no extractor registered in this build.
    #[error("no extractor available for '{0}' documents")]
    UnsupportedType(DocumentKind),
    /// Raw bytes could not be decoded as UTF-8 text.
    #[error("document is not valid UTF-8 text")]
    InvalidEncoding,
    /// Splitting was configured with an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Contract implemented by extraction/splitting collaborators.
///
/// Implementations turn raw upload bytes into an ordered sequence of chunk
/// texts. Returning an empty vector is valid: an empty document splits into
/// zero chunks, and the pipeline surfaces that condition at the embedding
/// stage rather than here.
pub trait DocumentSplitter: Send + Sync {
    /// Extract text from `raw` according to the declared `kind` and split it
    /// into chunks of at most `chunk_size` tokens with `overlap` tokens of
    /// sliding context.
    fn split(
        &self,
        raw: &[u8],
        kind: DocumentKind,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<String>, ExtractionError>;
}
