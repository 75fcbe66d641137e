//! Remote embedding adapter for OpenAI-compatible services.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use rag_eval_core::options::BATCH_SIZE;
use rag_eval_core::tensor::{expect_rows, stack_rows};
use rag_eval_core::{
    corpus_texts, EmbeddingModel, Embeddings, EncoderSettings, LoadOptions, Options, RagError,
    Result, TextUnit,
};

use crate::openai::{OpenAiConfig, OpenAiEmbeddingClient};
use crate::runtime::EmbeddingClient;

/// Encode option hiding the batch progress bar.
pub const SHOW_PROGRESS_BAR: &str = "show_progress_bar";

const DEFAULT_BATCH_SIZE: usize = 10;

/// The chunk that stopped a partial encode.
#[derive(Debug)]
pub struct BatchFailure {
    /// Index of the first input of the failing chunk.
    pub offset: usize,
    pub error: RagError,
}

/// Result of [`ApiEmbeddingModel::encode_partial`].
#[derive(Debug)]
pub struct PartialEncoding {
    /// Vectors for the inputs before the failing chunk, in input order.
    pub embeddings: Vec<Vec<f32>>,
    pub failure: Option<BatchFailure>,
}

impl PartialEncoding {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Everything or the first error.
    pub fn into_result(self) -> Result<Vec<Vec<f32>>> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.embeddings),
        }
    }
}

/// Embedding model served over HTTP.
pub struct ApiEmbeddingModel {
    client: Box<dyn EmbeddingClient>,
    settings: EncoderSettings,
    batch_size: usize,
}

impl std::fmt::Debug for ApiEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiEmbeddingModel")
            .field("model", &self.client.model())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ApiEmbeddingModel {
    /// Connect to the service named by `options` (or the environment).
    pub fn new(model_name: &str, revision: Option<String>, options: &LoadOptions) -> Result<Self> {
        let config = OpenAiConfig::resolve(model_name, options)?;
        let client = OpenAiEmbeddingClient::new(config)?;
        let settings = EncoderSettings::new(model_name.trim(), revision, options);
        Self::with_client(Box::new(client), settings)
    }

    /// Wrap an already constructed client.
    pub fn with_client(client: Box<dyn EmbeddingClient>, settings: EncoderSettings) -> Result<Self> {
        settings.validate()?;
        let batch_size = settings
            .encode_options
            .get_usize(BATCH_SIZE)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        info!(
            "Remote embedding model ready: model={}, batch_size={}",
            client.model(),
            batch_size
        );

        Ok(Self {
            client,
            settings,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn progress_bar(&self, batches: usize, options: &Options) -> ProgressBar {
        let show = self
            .settings
            .encode_options
            .merged(options)
            .get_bool(SHOW_PROGRESS_BAR)
            .unwrap_or(true);
        if !show || batches <= 1 {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }

    /// Encode batch by batch, stopping at the first failing batch.
    ///
    /// Vectors fetched before the failure are returned alongside it.
    pub fn encode_partial(&self, texts: &[String], options: &Options) -> PartialEncoding {
        let batches = texts.len().div_ceil(self.batch_size);
        let pb = self.progress_bar(batches, options);

        let mut embeddings = Vec::with_capacity(texts.len());
        let mut failure = None;

        for (i, chunk) in texts.chunks(self.batch_size).enumerate() {
            let offset = i * self.batch_size;
            debug!("Embedding batch {} ({} texts)", i, chunk.len());

            match self.client.embed_documents(chunk, self.batch_size) {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    embeddings.extend(vectors);
                    pb.inc(1);
                }
                Ok(vectors) => {
                    failure = Some(BatchFailure {
                        offset,
                        error: RagError::contract(format!(
                            "service returned {} embeddings for {} inputs",
                            vectors.len(),
                            chunk.len()
                        )),
                    });
                    break;
                }
                Err(error) => {
                    warn!(offset, error = %error, "Embedding batch failed");
                    failure = Some(BatchFailure { offset, error });
                    break;
                }
            }
        }

        pb.finish_and_clear();
        PartialEncoding {
            embeddings,
            failure,
        }
    }
}

impl EmbeddingModel for ApiEmbeddingModel {
    fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    fn kind(&self) -> &'static str {
        "ApiEmbeddingModel"
    }

    fn encode(&self, texts: &[String], options: &Options) -> Result<Embeddings> {
        if texts.is_empty() {
            return Ok(Embeddings::zeros((0, 0)));
        }
        let vectors = self.encode_partial(texts, options).into_result()?;
        expect_rows(stack_rows(vectors)?, texts.len(), self.client.model())
    }

    fn encode_queries(&self, queries: &[String], options: &Options) -> Result<Embeddings> {
        self.encode(queries, options)
    }

    fn encode_corpus(&self, corpus: &[TextUnit], options: &Options) -> Result<Embeddings> {
        self.encode(&corpus_texts(corpus), options)
    }
}
