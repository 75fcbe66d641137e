//! Contracts for the runtimes and services the adapters delegate to.
//!
//! Adapters own one boxed implementation each. The ONNX, HTTP and ModelScope
//! implementations live in this crate; [`crate::mock`] provides deterministic
//! stand-ins for tests.

use std::path::PathBuf;

use rag_eval_core::{Embeddings, Options, Result, Scores};

/// Local sentence-embedding runtime (bi-encoder).
pub trait SentenceEncoder: Send + Sync {
    /// Encode a batch of texts, prepending `prompt` to each when given.
    fn encode(&self, texts: &[String], prompt: Option<&str>, options: &Options)
        -> Result<Embeddings>;

    /// Output dimensionality.
    fn dimension(&self) -> usize;

    /// Current maximum tokens per input.
    fn max_seq_length(&self) -> usize;

    /// Change the maximum tokens per input.
    fn set_max_seq_length(&mut self, max_seq_length: usize) -> Result<()>;
}

/// Local cross-encoder runtime.
pub trait PairScorer: Send + Sync {
    /// Score each (query, document) pair.
    fn predict(&self, pairs: &[(String, String)], options: &Options) -> Result<Scores>;
}

/// Remote embedding service client.
pub trait EmbeddingClient: Send + Sync {
    /// Embed texts, splitting into requests of at most `chunk_size` inputs.
    fn embed_documents(&self, texts: &[String], chunk_size: usize) -> Result<Vec<Vec<f32>>>;

    /// Remote model name.
    fn model(&self) -> &str;
}

/// Model hub download-and-cache service.
pub trait ModelDownloader: Send + Sync {
    /// Materialize `model_id` at `revision` locally and return its directory.
    fn download(&self, model_id: &str, revision: Option<&str>) -> Result<PathBuf>;
}
