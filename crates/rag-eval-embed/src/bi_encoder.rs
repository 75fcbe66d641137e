//! Local bi-encoder adapter.

use std::path::Path;

use tracing::{debug, info};

use rag_eval_core::options::PROMPT_NAME;
use rag_eval_core::tensor::expect_rows;
use rag_eval_core::{
    corpus_texts, EmbeddingModel, Embeddings, EncoderSettings, Options, PoolingMode, Result,
    TextUnit,
};

use crate::onnx::{Pooling, SentenceTransformer, Transformer};
use crate::runtime::SentenceEncoder;

/// Build the ONNX sentence-transformer pipeline for `settings`.
///
/// Without a pooling override the model directory describes the pipeline;
/// with one, a bare transformer is paired with a pooling stage of that mode.
pub fn build_onnx_encoder(
    settings: &EncoderSettings,
    pooling_mode: Option<PoolingMode>,
) -> Result<Box<dyn SentenceEncoder>> {
    let model_dir = Path::new(&settings.identifier);

    let encoder = match pooling_mode {
        None => SentenceTransformer::load(
            model_dir,
            &settings.config_options,
            &settings.model_options,
        )?,
        Some(mode) => {
            let transformer =
                Transformer::load(model_dir, &settings.config_options, &settings.model_options)?;
            let pooling = Pooling::new(transformer.word_embedding_dimension(), mode);
            debug!("Pooling override: {}", mode);
            SentenceTransformer::from_modules(transformer, pooling)
        }
    };

    Ok(Box::new(encoder))
}

/// Sentence-embedding model running locally.
pub struct SentenceTransformerModel {
    runtime: Box<dyn SentenceEncoder>,
    settings: EncoderSettings,
}

impl std::fmt::Debug for SentenceTransformerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceTransformerModel")
            .field("settings", &self.settings)
            .field("dimension", &self.runtime.dimension())
            .finish()
    }
}

impl SentenceTransformerModel {
    /// Load the ONNX pipeline from the local path in `settings`.
    pub fn new(settings: EncoderSettings, pooling_mode: Option<PoolingMode>) -> Result<Self> {
        settings.validate()?;
        let runtime = build_onnx_encoder(&settings, pooling_mode)?;
        Self::with_runtime(runtime, settings)
    }

    /// Wrap an already constructed runtime.
    pub fn with_runtime(
        mut runtime: Box<dyn SentenceEncoder>,
        settings: EncoderSettings,
    ) -> Result<Self> {
        settings.validate()?;
        runtime.set_max_seq_length(settings.max_seq_length)?;

        info!(
            "Bi-encoder ready: model={}, dimension={}, max_seq_length={}",
            settings.identifier,
            runtime.dimension(),
            runtime.max_seq_length()
        );

        Ok(Self { runtime, settings })
    }

    pub fn dimension(&self) -> usize {
        self.runtime.dimension()
    }

    /// Encode with an explicit prompt. Call options win over stored ones.
    pub fn encode_with_prompt(
        &self,
        texts: &[String],
        prompt: Option<&str>,
        options: &Options,
    ) -> Result<Embeddings> {
        let mut merged = self.settings.encode_options.merged(options);
        merged.remove(PROMPT_NAME);

        let embeddings = self.runtime.encode(texts, prompt, &merged)?;
        expect_rows(embeddings, texts.len(), "sentence encoder")
    }
}

impl EmbeddingModel for SentenceTransformerModel {
    fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    fn kind(&self) -> &'static str {
        "SentenceTransformerModel"
    }

    fn encode(&self, texts: &[String], options: &Options) -> Result<Embeddings> {
        self.encode_with_prompt(texts, None, options)
    }

    fn encode_queries(&self, queries: &[String], options: &Options) -> Result<Embeddings> {
        self.encode_with_prompt(queries, Some(&self.settings.prompt), options)
    }

    fn encode_corpus(&self, corpus: &[TextUnit], options: &Options) -> Result<Embeddings> {
        self.encode_with_prompt(&corpus_texts(corpus), None, options)
    }
}
