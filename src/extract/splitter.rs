//! Token-budget splitter with chunk-size heuristics.
//!
//! Chunk sizing follows the embedding model rather than a fixed constant:
//! derive a budget from the model's context window, clamp it to a
//! conservative range, and let `TEXT_SPLITTER_CHUNK_SIZE` override the
//! heuristic. Token counting prefers `tiktoken-rs` for OpenAI/known
//! encodings and falls back to a whitespace counter when the model's
//! tokenizer is unavailable (common for some Ollama models).

use crate::config::EmbeddingProvider;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    p50k_edit, r50k_base,
};

use super::{DocumentKind, DocumentSplitter, ExtractionError};

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;

/// Default splitter: UTF-8 decode for textual kinds, semantic token-budget
/// chunking via `semchunk`.
///
/// Binary formats (pdf, docx, spreadsheets) are the responsibility of an
/// external extraction collaborator; this splitter rejects them with
/// [`ExtractionError::UnsupportedType`].
pub struct TokenSplitter {
    provider: EmbeddingProvider,
    model: String,
}

impl TokenSplitter {
    /// Build a splitter for the given embedding provider/model pair.
    pub fn new(provider: EmbeddingProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl DocumentSplitter for TokenSplitter {
    fn split(
        &self,
        raw: &[u8],
        kind: DocumentKind,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<String>, ExtractionError> {
        if !kind.is_textual() {
            return Err(ExtractionError::UnsupportedType(kind));
        }
        let text = std::str::from_utf8(raw).map_err(|_| ExtractionError::InvalidEncoding)?;
        chunk_text(text, chunk_size, overlap, self.provider, &self.model)
    }
}

/// Determine the chunk size for a request, respecting overrides.
///
/// Precedence:
/// 1) Explicit override (e.g., `TEXT_SPLITTER_CHUNK_SIZE`) wins and is clamped at `>= 1`.
/// 2) Otherwise, derive from the provider/model context window divided by `4`,
///    clamped into `[256, 1024]`.
pub fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    let base = (window / 4).max(1);
    base.clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::OpenAI => openai_embedding_context_window(model),
        EmbeddingProvider::Ollama => ollama_embedding_context_window(model),
    }
}

fn openai_embedding_context_window(model: &str) -> usize {
    if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002") {
        return 8192;
    }
    get_context_size(model)
}

fn ollama_embedding_context_window(model: &str) -> usize {
    let normalized = model.to_lowercase();
    match normalized.as_str() {
        "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
        value if value.contains("all-minilm") => 512,
        value if value.contains("e5-large") => 4096,
        _ => {
            tracing::trace!(model, "Using default Ollama context window estimate");
            4096
        }
    }
}

/// Chunk text into semantic segments using the configured token counter.
///
/// - `chunk_size` is a hard upper bound on the token count per segment.
/// - `overlap` requests a sliding token overlap between adjacent chunks after
///   semantic splitting; the final strings still respect the token budget.
///
/// Returns an empty vector when the input text is all whitespace.
fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    provider: EmbeddingProvider,
    model: &str,
) -> Result<Vec<String>, ExtractionError> {
    if chunk_size == 0 {
        return Err(ExtractionError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let token_counter = build_token_counter(provider, model)?;
    Ok(chunk_text_with_counter(
        text,
        chunk_size,
        overlap,
        token_counter,
    ))
}

/// Build a token counter for the given provider/model.
fn build_token_counter(
    provider: EmbeddingProvider,
    model: &str,
) -> Result<TokenCounter, ExtractionError> {
    match provider {
        EmbeddingProvider::OpenAI => build_tiktoken_counter(model),
        EmbeddingProvider::Ollama => match build_tiktoken_counter(model) {
            Ok(counter) => Ok(counter),
            Err(error) => {
                tracing::warn!(
                    model,
                    error = %error,
                    "Tokenizer unavailable for Ollama model; falling back to whitespace counter"
                );
                Ok(whitespace_token_counter())
            }
        },
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ExtractionError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ExtractionError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

/// Prepend a token-limited tail of the previous chunk onto the current one,
/// trimming from the front so the budget still holds.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    if chunks.is_empty() {
        return chunks;
    }

    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter();
    let mut previous = iter
        .next()
        .expect("chunks iterator yielded zero elements despite non-empty guard");
    overlapped.push(previous.clone());

    for current in iter {
        let tail: Vec<&str> = previous
            .split_whitespace()
            .rev()
            .take(effective_overlap)
            .collect();
        let mut combined = tail
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" ");
        if combined.is_empty() {
            combined = current.clone();
        } else {
            combined.push(' ');
            combined.push_str(&current);
        }

        // Trim words from the front until the token budget holds again.
        while token_counter.as_ref()(&combined) > chunk_size {
            match combined.split_once(char::is_whitespace) {
                Some((_, rest)) if !rest.is_empty() => combined = rest.to_string(),
                _ => break,
            }
        }

        overlapped.push(combined);
        previous = current;
    }

    overlapped
}
