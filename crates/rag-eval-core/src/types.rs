//! Core domain types shared by every adapter.

use std::path::Path;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// A batch of embeddings, one row per input text in input order.
pub type Embeddings = Array2<f32>;

/// Cross-encoder relevance scores, one per (query, document) pair.
pub type Scores = Array1<f32>;

/// A unit of text to embed: either a raw string or a titled document record.
///
/// Deserializes from a JSON string or from `{ "title"?: string, "text": string }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextUnit {
    PlainText(String),
    TitledDocument {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        text: String,
    },
}

impl TextUnit {
    /// Create a titled document.
    pub fn titled(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self::TitledDocument {
            title: Some(title.into()),
            text: text.into(),
        }
    }

    /// Flatten into the string that gets encoded: `"{title} {text}"`, trimmed.
    pub fn to_text(&self) -> String {
        match self {
            Self::PlainText(text) => text.clone(),
            Self::TitledDocument { title, text } => {
                format!("{} {}", title.as_deref().unwrap_or(""), text)
                    .trim()
                    .to_string()
            }
        }
    }

    /// The body text only, ignoring any title.
    pub fn body(&self) -> &str {
        match self {
            Self::PlainText(text) => text,
            Self::TitledDocument { text, .. } => text,
        }
    }
}

impl From<&str> for TextUnit {
    fn from(text: &str) -> Self {
        Self::PlainText(text.to_string())
    }
}

impl From<String> for TextUnit {
    fn from(text: String) -> Self {
        Self::PlainText(text)
    }
}

/// Flatten a corpus into encodable strings.
pub fn corpus_texts(corpus: &[TextUnit]) -> Vec<String> {
    corpus.iter().map(TextUnit::to_text).collect()
}

/// One row of cross-encoder input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoringInput {
    /// A plain (query, document) pair, scored as given.
    Pair(String, String),

    /// A retrieval-benchmark row: (query, document, instruction).
    Retrieval(String, TextUnit, String),
}

/// Model hub used to resolve identifiers that are not local paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubType {
    #[default]
    ModelScope,
    HuggingFace,
}

impl FromStr for HubType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modelscope" | "ms" => Ok(Self::ModelScope),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            other => Err(RagError::invalid_argument(format!(
                "unknown hub '{}', expected modelscope or huggingface",
                other
            ))),
        }
    }
}

impl std::fmt::Display for HubType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ModelScope => "modelscope",
            Self::HuggingFace => "huggingface",
        };
        write!(f, "{}", s)
    }
}

/// Strategy for reducing per-token vectors to one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolingMode {
    #[serde(rename = "cls")]
    Cls,
    #[serde(rename = "lasttoken")]
    LastToken,
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "mean")]
    Mean,
    #[serde(rename = "mean_sqrt_len_tokens")]
    MeanSqrtLenTokens,
    #[serde(rename = "weightedmean")]
    WeightedMean,
}

impl PoolingMode {
    /// The mode's configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cls => "cls",
            Self::LastToken => "lasttoken",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::MeanSqrtLenTokens => "mean_sqrt_len_tokens",
            Self::WeightedMean => "weightedmean",
        }
    }
}

impl FromStr for PoolingMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cls" => Ok(Self::Cls),
            "lasttoken" => Ok(Self::LastToken),
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "mean_sqrt_len_tokens" => Ok(Self::MeanSqrtLenTokens),
            "weightedmean" => Ok(Self::WeightedMean),
            other => Err(RagError::invalid_argument(format!(
                "unknown pooling mode '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata benchmark harnesses attach to results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    /// Final path component of the model identifier.
    pub name: String,

    /// Revision tag the model was loaded at.
    pub revision: Option<String>,
}

impl ModelMeta {
    pub fn from_identifier(identifier: &str, revision: Option<&str>) -> Self {
        let name = Path::new(identifier)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| identifier.to_string());
        Self {
            name,
            revision: revision.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titled_document_flattening() {
        assert_eq!(TextUnit::titled("A", "b").to_text(), "A b");

        let untitled = TextUnit::TitledDocument {
            title: None,
            text: "body only".to_string(),
        };
        assert_eq!(untitled.to_text(), "body only");

        let empty_title = TextUnit::titled("", "  padded ");
        assert_eq!(empty_title.to_text(), "padded");
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let unit = TextUnit::from("  keep spaces ");
        assert_eq!(unit.to_text(), "  keep spaces ");
        assert_eq!(unit.body(), "  keep spaces ");
    }

    #[test]
    fn test_text_unit_deserialization() {
        let units: Vec<TextUnit> =
            serde_json::from_str(r#"["plain", {"title": "T", "text": "x"}, {"text": "y"}]"#)
                .unwrap();
        assert_eq!(units[0], TextUnit::from("plain"));
        assert_eq!(units[1], TextUnit::titled("T", "x"));
        assert_eq!(
            units[2],
            TextUnit::TitledDocument {
                title: None,
                text: "y".to_string()
            }
        );
        assert_eq!(corpus_texts(&units), vec!["plain", "T x", "y"]);
    }

    #[test]
    fn test_scoring_input_deserialization() {
        let rows: Vec<ScoringInput> =
            serde_json::from_str(r#"[["q", "d"], ["q", {"text": "d"}, "instr"]]"#).unwrap();
        assert_eq!(rows[0], ScoringInput::Pair("q".into(), "d".into()));
        assert!(matches!(rows[1], ScoringInput::Retrieval(..)));
    }

    #[test]
    fn test_hub_and_pooling_parsing() {
        assert_eq!("ModelScope".parse::<HubType>().unwrap(), HubType::ModelScope);
        assert_eq!("hf".parse::<HubType>().unwrap(), HubType::HuggingFace);
        assert!("gitlab".parse::<HubType>().is_err());

        assert_eq!("cls".parse::<PoolingMode>().unwrap(), PoolingMode::Cls);
        assert_eq!(
            PoolingMode::MeanSqrtLenTokens.to_string(),
            "mean_sqrt_len_tokens"
        );
        assert!("median".parse::<PoolingMode>().is_err());
    }

    #[test]
    fn test_model_meta_uses_basename() {
        let meta = ModelMeta::from_identifier("/models/AI-ModelScope/bge-small-zh", Some("master"));
        assert_eq!(meta.name, "bge-small-zh");
        assert_eq!(meta.revision.as_deref(), Some("master"));

        let meta = ModelMeta::from_identifier("text-embedding-3-small", None);
        assert_eq!(meta.name, "text-embedding-3-small");
    }
}
