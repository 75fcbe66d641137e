//! rag-eval-embed - embedding model adapters for RAG evaluation
//!
//! This crate turns a [`LoadRequest`](rag_eval_core::LoadRequest) into one of
//! three adapters sharing the [`EmbeddingModel`] contract:
//!
//! - [`SentenceTransformerModel`]: local bi-encoder on ONNX Runtime
//! - [`CrossEncoderModel`]: local cross-encoder re-ranker on ONNX Runtime
//! - [`ApiEmbeddingModel`]: OpenAI-compatible remote embedding service
//!
//! # Features
//!
//! - Pooling modes read from the model directory or overridden per request
//! - Query prompts for asymmetric retrieval
//! - ModelScope download-and-cache for missing local models
//! - Bounded retry with backoff for remote calls
//! - Partial-batch failure reporting for remote encoding

pub mod api;
pub mod bi_encoder;
pub mod cross_encoder;
pub mod loader;
pub mod mock;
pub mod modelscope;
pub mod onnx;
pub mod openai;
pub mod retry;
pub mod runtime;

pub use api::{ApiEmbeddingModel, BatchFailure, PartialEncoding};
pub use bi_encoder::SentenceTransformerModel;
pub use cross_encoder::CrossEncoderModel;
pub use loader::{load_model, DefaultBackends, LoadedModel, ModelBackends, ModelLoader};
pub use modelscope::ModelScopeDownloader;
pub use openai::{OpenAiConfig, OpenAiEmbeddingClient};
pub use runtime::{EmbeddingClient, ModelDownloader, PairScorer, SentenceEncoder};

// Re-export the EmbeddingModel trait for convenience
pub use rag_eval_core::EmbeddingModel;
