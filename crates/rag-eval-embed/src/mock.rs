//! Deterministic stand-ins for the runtimes, for tests that must not need
//! model files or network access.
//!
//! Every mock records its calls into a shared [`CallLog`] so a test can keep
//! a handle after the mock has been boxed into an adapter.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Array1;
use parking_lot::Mutex;

use rag_eval_core::tensor::stack_rows;
use rag_eval_core::{Embeddings, Options, RagError, Result, Scores};

use crate::runtime::{EmbeddingClient, ModelDownloader, PairScorer, SentenceEncoder};

/// Shared, append-only record of calls.
pub type CallLog<T> = Arc<Mutex<Vec<T>>>;

/// Deterministic unit vector for `text`.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    // FNV-1a, so that word order matters
    let hash = text
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
            (acc ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
        });
    let mut embedding = vec![0.0f32; dimension];
    for (i, v) in embedding.iter_mut().enumerate() {
        *v = ((hash.wrapping_mul(i as u64 + 1) >> 11) % 1000) as f32 / 1000.0 - 0.5;
    }
    // L2 normalize
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }
    embedding
}

/// One recorded [`SentenceEncoder::encode`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeCall {
    pub texts: Vec<String>,
    pub prompt: Option<String>,
    pub options: Options,
}

/// Bi-encoder runtime producing hash-based embeddings.
#[derive(Debug)]
pub struct MockSentenceEncoder {
    dimension: usize,
    max_seq_length: usize,
    forced_rows: Option<usize>,
    calls: CallLog<EncodeCall>,
}

impl MockSentenceEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_seq_length: 256,
            forced_rows: None,
            calls: CallLog::default(),
        }
    }

    /// Return `rows` rows regardless of the input count.
    pub fn with_forced_rows(mut self, rows: usize) -> Self {
        self.forced_rows = Some(rows);
        self
    }

    pub fn calls(&self) -> CallLog<EncodeCall> {
        Arc::clone(&self.calls)
    }
}

impl SentenceEncoder for MockSentenceEncoder {
    fn encode(
        &self,
        texts: &[String],
        prompt: Option<&str>,
        options: &Options,
    ) -> Result<Embeddings> {
        self.calls.lock().push(EncodeCall {
            texts: texts.to_vec(),
            prompt: prompt.map(str::to_string),
            options: options.clone(),
        });

        let prefix = prompt.unwrap_or_default();
        let rows = self.forced_rows.unwrap_or(texts.len());
        let vectors: Vec<Vec<f32>> = (0..rows)
            .map(|i| {
                let text = texts.get(i).map(String::as_str).unwrap_or_default();
                hash_embedding(&format!("{}{}", prefix, text), self.dimension)
            })
            .collect();

        if vectors.is_empty() {
            return Ok(Embeddings::zeros((0, self.dimension)));
        }
        stack_rows(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    fn set_max_seq_length(&mut self, max_seq_length: usize) -> Result<()> {
        self.max_seq_length = max_seq_length;
        Ok(())
    }
}

/// Cross-encoder runtime scoring word overlap between query and document.
#[derive(Debug, Default)]
pub struct MockPairScorer {
    forced_len: Option<usize>,
    calls: CallLog<Vec<(String, String)>>,
}

impl MockPairScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `len` scores regardless of the pair count.
    pub fn with_forced_len(mut self, len: usize) -> Self {
        self.forced_len = Some(len);
        self
    }

    pub fn calls(&self) -> CallLog<Vec<(String, String)>> {
        Arc::clone(&self.calls)
    }
}

fn overlap(query: &str, doc: &str) -> f32 {
    let doc = doc.to_lowercase();
    let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| doc.contains(w.as_str())).count();
    hits as f32 / words.len() as f32
}

impl PairScorer for MockPairScorer {
    fn predict(&self, pairs: &[(String, String)], _options: &Options) -> Result<Scores> {
        self.calls.lock().push(pairs.to_vec());
        let len = self.forced_len.unwrap_or(pairs.len());
        Ok(Array1::from_iter((0..len).map(|i| {
            pairs.get(i).map(|(q, d)| overlap(q, d)).unwrap_or(0.0)
        })))
    }
}

/// Remote client returning hash embeddings, optionally failing one call.
#[derive(Debug)]
pub struct MockEmbeddingClient {
    model: String,
    dimension: usize,
    fail_on_call: Option<usize>,
    calls: CallLog<Vec<String>>,
}

impl MockEmbeddingClient {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
            fail_on_call: None,
            calls: CallLog::default(),
        }
    }

    /// Fail the call with this zero-based index with a transport error.
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> CallLog<Vec<String>> {
        Arc::clone(&self.calls)
    }
}

impl EmbeddingClient for MockEmbeddingClient {
    fn embed_documents(&self, texts: &[String], _chunk_size: usize) -> Result<Vec<Vec<f32>>> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(texts.to_vec());
            calls.len() - 1
        };
        if self.fail_on_call == Some(call) {
            return Err(RagError::transport("connection reset by peer"));
        }
        Ok(texts
            .iter()
            .map(|t| hash_embedding(t, self.dimension))
            .collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Downloader that records requests and "materializes" under a fixed root.
#[derive(Debug)]
pub struct MockDownloader {
    root: PathBuf,
    calls: CallLog<(String, Option<String>)>,
}

impl MockDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: CallLog::default(),
        }
    }

    pub fn calls(&self) -> CallLog<(String, Option<String>)> {
        Arc::clone(&self.calls)
    }
}

impl ModelDownloader for MockDownloader {
    fn download(&self, model_id: &str, revision: Option<&str>) -> Result<PathBuf> {
        self.calls
            .lock()
            .push((model_id.to_string(), revision.map(str::to_string)));
        Ok(self.root.join(model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_is_unit_and_deterministic() {
        let e1 = hash_embedding("consistent input", 64);
        let e2 = hash_embedding("consistent input", 64);
        assert_eq!(e1, e2);

        let norm: f32 = e1.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);

        assert_ne!(hash_embedding("ab", 8), hash_embedding("ba", 8));
    }

    #[test]
    fn test_mock_encoder_records_prompt() {
        let encoder = MockSentenceEncoder::new(8);
        let calls = encoder.calls();

        let texts = vec!["hello".to_string()];
        let plain = encoder.encode(&texts, None, &Options::new()).unwrap();
        let prompted = encoder.encode(&texts, Some("query: "), &Options::new()).unwrap();

        assert_eq!(plain.dim(), (1, 8));
        assert_ne!(plain, prompted);
        assert_eq!(calls.lock()[1].prompt.as_deref(), Some("query: "));
    }

    #[test]
    fn test_mock_encoder_empty_input() {
        let encoder = MockSentenceEncoder::new(8);
        let out = encoder.encode(&[], None, &Options::new()).unwrap();
        assert_eq!(out.dim(), (0, 8));
    }

    #[test]
    fn test_mock_scorer_overlap() {
        let scorer = MockPairScorer::new();
        let pairs = vec![
            ("rust borrow".to_string(), "The Rust borrow checker".to_string()),
            ("rust borrow".to_string(), "Python".to_string()),
        ];
        let scores = scorer.predict(&pairs, &Options::new()).unwrap();
        assert_eq!(scores.to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_mock_client_failure() {
        let client = MockEmbeddingClient::new("m", 4).failing_on_call(1);
        assert!(client.embed_documents(&["a".to_string()], 1).is_ok());
        assert!(client.embed_documents(&["b".to_string()], 1).is_err());
        assert_eq!(client.calls().lock().len(), 2);
    }
}
