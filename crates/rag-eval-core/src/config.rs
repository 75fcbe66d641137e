//! Configuration types for loading embedding models.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RagError, Result};
use crate::options::{Options, CONVERT_TO_TENSOR, TRUST_REMOTE_CODE};
use crate::types::{HubType, PoolingMode};

/// Revision loaded when none is given.
pub const DEFAULT_REVISION: &str = "master";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Embedding model to load.
    #[serde(default)]
    pub embedding: LoadRequest,
}

/// Everything the model factory needs to pick and build an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    /// Local model directory or hub model id. Ignored for remote models.
    #[serde(default)]
    pub model_name_or_path: String,

    /// Build a cross-encoder instead of a bi-encoder.
    #[serde(default)]
    pub is_cross_encoder: bool,

    /// Hub used to fetch models that are not on disk.
    #[serde(default)]
    pub hub: HubType,

    /// Revision tag for hub downloads and metadata.
    #[serde(default = "default_revision")]
    pub revision: Option<String>,

    /// Remaining construction options.
    #[serde(flatten)]
    pub options: LoadOptions,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self {
            model_name_or_path: String::new(),
            is_cross_encoder: false,
            hub: HubType::default(),
            revision: default_revision(),
            options: LoadOptions::default(),
        }
    }
}

impl LoadRequest {
    /// Request for a local or hub-hosted model.
    pub fn local(model_name_or_path: impl Into<String>) -> Self {
        Self {
            model_name_or_path: model_name_or_path.into(),
            ..Self::default()
        }
    }

    /// Request for a remote API model.
    pub fn remote(model_name: impl Into<String>) -> Self {
        let mut request = Self::default();
        request.options.model_name = Some(model_name.into());
        request
    }
}

/// Free-form option bag accepted by the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Remote embedding model name. Selects the API adapter when set.
    #[serde(default)]
    pub model_name: Option<String>,

    /// Remote API base URL.
    #[serde(default)]
    pub api_base: Option<String>,

    /// Remote API key.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Fixed output dimensionality requested from the remote API.
    #[serde(default)]
    pub dimensions: Option<usize>,

    /// Maximum tokens per input.
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,

    /// Prefix applied to queries.
    #[serde(default)]
    pub prompt: String,

    /// Explicit pooling mode; builds a transformer + pooling pipeline.
    #[serde(default)]
    pub pooling_mode: Option<PoolingMode>,

    /// Options for model construction.
    #[serde(default)]
    pub model_kwargs: Options,

    /// Options for model config construction.
    #[serde(default)]
    pub config_kwargs: Options,

    /// Options applied on every encode call.
    #[serde(default)]
    pub encode_kwargs: Options,

    /// Retries for transient remote failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Remote request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            model_name: None,
            api_base: None,
            api_key: None,
            dimensions: None,
            max_seq_length: default_max_seq_length(),
            prompt: String::new(),
            pooling_mode: None,
            model_kwargs: Options::default(),
            config_kwargs: Options::default(),
            encode_kwargs: Options::default(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LoadOptions {
    /// The remote model name, if one was given and is not blank.
    pub fn remote_model_name(&self) -> Option<&str> {
        self.model_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Settings shared by every adapter, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    /// Local path or remote model name.
    pub identifier: String,

    /// Maximum tokens per input.
    pub max_seq_length: usize,

    /// Prefix applied to queries.
    pub prompt: String,

    /// Revision tag.
    pub revision: Option<String>,

    /// Options for model construction (custom code always allowed).
    pub model_options: Options,

    /// Options for config construction (custom code always allowed).
    pub config_options: Options,

    /// Options for every encode call (tensor output always requested).
    pub encode_options: Options,
}

impl EncoderSettings {
    /// Build settings, forcing the flags every runtime expects.
    pub fn new(
        identifier: impl Into<String>,
        revision: Option<String>,
        options: &LoadOptions,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            max_seq_length: options.max_seq_length,
            prompt: options.prompt.clone(),
            revision,
            model_options: options.model_kwargs.forcing(TRUST_REMOTE_CODE),
            config_options: options.config_kwargs.forcing(TRUST_REMOTE_CODE),
            encode_options: options.encode_kwargs.forcing(CONVERT_TO_TENSOR),
        }
    }

    /// Settings with default options for `identifier`.
    pub fn for_identifier(identifier: impl Into<String>) -> Self {
        Self::new(identifier, default_revision(), &LoadOptions::default())
    }

    /// Builder-style prompt override.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Fail unless an identifier is present.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(RagError::config(
                "a local model path or a remote model name is required",
            ));
        }
        if self.max_seq_length == 0 {
            return Err(RagError::config("max_seq_length must be positive"));
        }
        Ok(())
    }
}

// Default value functions

fn default_revision() -> Option<String> {
    Some(DEFAULT_REVISION.to_string())
}

fn default_max_seq_length() -> usize {
    512
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    60
}

impl EvalConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rag-eval").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("rag-eval.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}
