//! `FastEmbed`-based semantic embedder.
//!
//! Real semantic embeddings via the all-MiniLM-L6-v2 ONNX model. Only
//! compiled with the `fastembed-embeddings` feature.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;

use crate::Result;
use crate::embedding::{DEFAULT_DIMENSIONS, Embedder};
use crate::error::SearchError;

/// Process-wide model instance, loaded lazily on first embed call so
/// query paths that never touch dense retrieval pay no model cost.
static EMBEDDING_MODEL: OnceLock<std::sync::Mutex<fastembed::TextEmbedding>> = OnceLock::new();

/// `FastEmbed` embedder using all-MiniLM-L6-v2 (384 dimensions).
pub struct FastEmbedEmbedder {
    model_name: &'static str,
}

impl FastEmbedEmbedder {
    /// Creates a new `FastEmbed` embedder. The model itself loads on
    /// first use.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for parity with other
    /// embedder constructors.
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Result<Self> {
        Ok(Self {
            model_name: "all-MiniLM-L6-v2",
        })
    }

    fn get_model() -> Result<&'static std::sync::Mutex<fastembed::TextEmbedding>> {
        if let Some(model) = EMBEDDING_MODEL.get() {
            return Ok(model);
        }

        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| SearchError::Embedding(format!("model load failed: {e}")))?;

        // Another thread may have won the init race; use whichever landed.
        let _ = EMBEDDING_MODEL.set(std::sync::Mutex::new(model));

        EMBEDDING_MODEL
            .get()
            .ok_or_else(|| SearchError::Embedding("model initialization race".to_string()).into())
    }

    /// Returns the model name.
    #[must_use]
    pub const fn model_name(&self) -> &'static str {
        self.model_name
    }

    fn run_model(texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = Self::get_model()?;
        let mut model = model
            .lock()
            .map_err(|e| SearchError::Embedding(format!("model lock poisoned: {e}")))?;

        // The ONNX runtime can panic on malformed input; contain it.
        let result = catch_unwind(AssertUnwindSafe(|| model.embed(texts.to_vec(), None)));

        result
            .map_err(|panic_info| {
                let msg = panic_info
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic_info.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                crate::Error::Search(SearchError::Embedding(format!("ONNX runtime panic: {msg}")))
            })?
            .map_err(|e| crate::Error::Search(SearchError::Embedding(e.to_string())))
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(crate::Error::validation("cannot embed empty text"));
        }
        Self::run_model(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Embedding("model returned no embedding".to_string()).into())
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(crate::Error::validation("cannot embed empty text"));
        }
        Self::run_model(texts)
    }
}
