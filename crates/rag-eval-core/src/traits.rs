//! The contract every embedding adapter satisfies.

use crate::config::EncoderSettings;
use crate::error::{RagError, Result};
use crate::options::Options;
use crate::tensor::rows_to_vecs;
use crate::types::{Embeddings, ModelMeta, TextUnit};

/// Embedding model trait.
///
/// `encode`, `encode_queries` and `encode_corpus` are variant specific and
/// fail with [`RagError::NotImplemented`] unless an adapter overrides them.
/// `embed_documents` and `embed_query` are the plain-vector entry points used
/// by generic consumers and are derived from the two encode operations.
pub trait EmbeddingModel: Send + Sync {
    /// Settings fixed at construction.
    fn settings(&self) -> &EncoderSettings;

    /// Short adapter name used in diagnostics.
    fn kind(&self) -> &'static str;

    /// Encode raw texts.
    fn encode(&self, texts: &[String], options: &Options) -> Result<Embeddings> {
        let _ = (texts, options);
        Err(RagError::not_implemented("encode", self.kind()))
    }

    /// Encode queries.
    fn encode_queries(&self, queries: &[String], options: &Options) -> Result<Embeddings> {
        let _ = (queries, options);
        Err(RagError::not_implemented("encode_queries", self.kind()))
    }

    /// Encode corpus documents.
    fn encode_corpus(&self, corpus: &[TextUnit], options: &Options) -> Result<Embeddings> {
        let _ = (corpus, options);
        Err(RagError::not_implemented("encode_corpus", self.kind()))
    }

    /// Embed a batch of document texts.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let corpus: Vec<TextUnit> = texts.iter().cloned().map(TextUnit::PlainText).collect();
        let embeddings = self.encode_corpus(&corpus, &Options::new())?;
        Ok(rows_to_vecs(&embeddings))
    }

    /// Embed a single query text.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.encode_queries(&[text.to_string()], &Options::new())?;
        embeddings
            .outer_iter()
            .next()
            .map(|row| row.to_vec())
            .ok_or_else(|| RagError::contract("no embedding returned for query"))
    }

    /// Metadata for benchmark reports.
    fn meta(&self) -> ModelMeta {
        let settings = self.settings();
        ModelMeta::from_identifier(&settings.identifier, settings.revision.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    struct Bare {
        settings: EncoderSettings,
    }

    impl EmbeddingModel for Bare {
        fn settings(&self) -> &EncoderSettings {
            &self.settings
        }

        fn kind(&self) -> &'static str {
            "Bare"
        }
    }

    struct Lengths {
        settings: EncoderSettings,
    }

    impl EmbeddingModel for Lengths {
        fn settings(&self) -> &EncoderSettings {
            &self.settings
        }

        fn kind(&self) -> &'static str {
            "Lengths"
        }

        fn encode(&self, texts: &[String], _options: &Options) -> Result<Embeddings> {
            let flat: Vec<f32> = texts
                .iter()
                .flat_map(|t| [t.len() as f32, 1.0])
                .collect();
            Ok(Array2::from_shape_vec((texts.len(), 2), flat).unwrap())
        }

        fn encode_queries(&self, queries: &[String], options: &Options) -> Result<Embeddings> {
            self.encode(queries, options)
        }

        fn encode_corpus(&self, corpus: &[TextUnit], options: &Options) -> Result<Embeddings> {
            self.encode(&crate::types::corpus_texts(corpus), options)
        }
    }

    #[test]
    fn test_unoverridden_operations_fail() {
        let model = Bare {
            settings: EncoderSettings::for_identifier("bare"),
        };

        for err in [
            model.encode(&["x".to_string()], &Options::new()).unwrap_err(),
            model.embed_query("x").unwrap_err(),
            model.embed_documents(&["x".to_string()]).unwrap_err(),
        ] {
            assert_eq!(err.error_code(), "NOT_IMPLEMENTED");
        }
    }

    #[test]
    fn test_plain_vector_entry_points() {
        let model = Lengths {
            settings: EncoderSettings::for_identifier("/models/lengths"),
        };

        let docs = model
            .embed_documents(&["a".to_string(), "abc".to_string()])
            .unwrap();
        assert_eq!(docs, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);

        let query = model.embed_query("abc").unwrap();
        assert_eq!(query, docs[1]);

        let meta = model.meta();
        assert_eq!(meta.name, "lengths");
        assert_eq!(meta.revision.as_deref(), Some("master"));
    }
}
