//! ONNX embedding backend (fastembed).
//!
//! all-MiniLM-L6-v2: 384 dimensions, unit-norm output, fully local inference.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

use super::{EmbeddingError, MAX_TEXT_LENGTH};

/// Global model handle; initialization happens once, lazily.
static EMBEDDING_MODEL_RESULT: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Model cache directory: FASTEMBED_CACHE_PATH, else the platform cache dir.
fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "nexus", "memory") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/nexus/fastembed");
    }

    std::path::PathBuf::from(".fastembed_cache")
}

/// Initialize (or fetch) the global embedding model.
fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = get_cache_dir();

        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("Failed to create cache directory {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| {
                format!(
                    "Failed to initialize all-MiniLM-L6-v2 embedding model: {}. \
                    Ensure ONNX runtime is available and model files can be downloaded.",
                    e
                )
            })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("Lock poisoned: {}", e))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

/// Whether the ONNX model can be (or has been) initialized.
pub fn model_available() -> bool {
    get_model().is_ok()
}

/// Embed a batch through the ONNX model. Inputs longer than
/// [`MAX_TEXT_LENGTH`] are truncated with a logged warning.
pub fn embed_batch(texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut model = get_model()?;

    let truncated: Vec<&str> = texts
        .iter()
        .map(|t| {
            if t.len() > MAX_TEXT_LENGTH {
                tracing::warn!(
                    len = t.len(),
                    max = MAX_TEXT_LENGTH,
                    "truncating oversized text before embedding"
                );
                let mut end = MAX_TEXT_LENGTH;
                while !t.is_char_boundary(end) {
                    end -= 1;
                }
                &t[..end]
            } else {
                *t
            }
        })
        .collect();

    let embeddings = model
        .embed(truncated, None)
        .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

    Ok(embeddings.into_iter().map(super::normalize).collect())
}
