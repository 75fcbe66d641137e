//! Pooling stage: per-token vectors to one sentence vector.

use std::path::Path;

use ndarray::{Array2, Array3, Axis};
use serde::Deserialize;
use tracing::warn;

use rag_eval_core::{PoolingMode, RagError, Result};

/// Pooling configuration as exported under `1_Pooling/config.json`.
#[derive(Debug, Default, Deserialize)]
struct PoolingConfig {
    #[serde(default)]
    word_embedding_dimension: Option<usize>,
    #[serde(default)]
    pooling_mode_cls_token: bool,
    #[serde(default)]
    pooling_mode_mean_tokens: bool,
    #[serde(default)]
    pooling_mode_max_tokens: bool,
    #[serde(default)]
    pooling_mode_mean_sqrt_len_tokens: bool,
    #[serde(default)]
    pooling_mode_weightedmean_tokens: bool,
    #[serde(default)]
    pooling_mode_lasttoken: bool,
}

impl PoolingConfig {
    fn enabled_modes(&self) -> Vec<PoolingMode> {
        [
            (self.pooling_mode_cls_token, PoolingMode::Cls),
            (self.pooling_mode_mean_tokens, PoolingMode::Mean),
            (self.pooling_mode_max_tokens, PoolingMode::Max),
            (self.pooling_mode_mean_sqrt_len_tokens, PoolingMode::MeanSqrtLenTokens),
            (self.pooling_mode_weightedmean_tokens, PoolingMode::WeightedMean),
            (self.pooling_mode_lasttoken, PoolingMode::LastToken),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, mode)| mode)
        .collect()
    }
}

/// Reduces `[batch, seq, dim]` token vectors to `[batch, dim]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pooling {
    dimension: usize,
    mode: PoolingMode,
}

impl Pooling {
    pub fn new(dimension: usize, mode: PoolingMode) -> Self {
        Self { dimension, mode }
    }

    /// Read `1_Pooling/config.json` if the model ships one.
    pub fn from_model_dir(model_dir: &Path, dimension: usize) -> Result<Option<Self>> {
        let path = model_dir.join("1_Pooling").join("config.json");
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let config: PoolingConfig = serde_json::from_str(&content).map_err(|e| {
            RagError::model_load(path.display().to_string(), format!("invalid pooling config: {}", e))
        })?;

        let modes = config.enabled_modes();
        if modes.len() > 1 {
            warn!(
                "Pooling config enables {:?}; using {} only",
                modes, modes[0]
            );
        }
        let mode = modes.first().copied().unwrap_or(PoolingMode::Mean);

        Ok(Some(Self::new(
            config.word_embedding_dimension.unwrap_or(dimension),
            mode,
        )))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn mode(&self) -> PoolingMode {
        self.mode
    }

    /// Pool token vectors using the attention mask.
    pub fn pool(&self, hidden: &Array3<f32>, mask: &Array2<f32>) -> Result<Array2<f32>> {
        let (batch, seq, dim) = hidden.dim();
        if dim != self.dimension {
            return Err(RagError::contract(format!(
                "token vectors have {} dimensions, pooling expects {}",
                dim, self.dimension
            )));
        }
        if mask.dim() != (batch, seq) {
            return Err(RagError::contract(format!(
                "attention mask shape {:?} does not match tokens {:?}",
                mask.dim(),
                (batch, seq)
            )));
        }

        let mut pooled = Array2::<f32>::zeros((batch, dim));

        for (i, mut out) in pooled.outer_iter_mut().enumerate() {
            let tokens = hidden.index_axis(Axis(0), i);
            let row_mask = mask.row(i);
            let valid = row_mask.sum();

            match self.mode {
                PoolingMode::Cls => {
                    if seq > 0 {
                        out.assign(&tokens.row(0));
                    }
                }
                PoolingMode::LastToken => {
                    let last = row_mask
                        .iter()
                        .rposition(|&m| m > 0.0)
                        .unwrap_or(0);
                    if seq > 0 {
                        out.assign(&tokens.row(last));
                    }
                }
                PoolingMode::Max => {
                    out.fill(f32::MIN);
                    for (j, token) in tokens.outer_iter().enumerate() {
                        if row_mask[j] > 0.0 {
                            out.zip_mut_with(&token, |o, &t| *o = o.max(t));
                        }
                    }
                    if valid == 0.0 {
                        out.fill(0.0);
                    }
                }
                PoolingMode::Mean | PoolingMode::MeanSqrtLenTokens => {
                    for (j, token) in tokens.outer_iter().enumerate() {
                        out.scaled_add(row_mask[j], &token);
                    }
                    let denom = match self.mode {
                        PoolingMode::Mean => valid.max(1e-9),
                        _ => valid.max(1e-9).sqrt(),
                    };
                    out.mapv_inplace(|x| x / denom);
                }
                PoolingMode::WeightedMean => {
                    // Position weights start at 1 so later tokens count more.
                    let mut total = 0.0f32;
                    for (j, token) in tokens.outer_iter().enumerate() {
                        let weight = row_mask[j] * (j + 1) as f32;
                        total += weight;
                        out.scaled_add(weight, &token);
                    }
                    let denom = total.max(1e-9);
                    out.mapv_inplace(|x| x / denom);
                }
            }
        }

        Ok(pooled)
    }
}
