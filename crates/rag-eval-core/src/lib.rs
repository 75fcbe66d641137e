//! rag-eval-core - Core types and traits for the embedding layer
//!
//! This crate provides the shared types, option handling, configuration,
//! error handling and the [`EmbeddingModel`] contract used by the rag-eval
//! embedding adapters.

pub mod config;
pub mod error;
pub mod options;
pub mod tensor;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use options::Options;
pub use traits::*;
pub use types::*;
