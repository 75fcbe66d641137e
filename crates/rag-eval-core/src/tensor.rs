//! Conversions between embedding tensors and plain vectors.

use ndarray::Array2;

use crate::error::{RagError, Result};
use crate::types::Embeddings;

/// Split a tensor into one plain vector per row.
pub fn rows_to_vecs(embeddings: &Embeddings) -> Vec<Vec<f32>> {
    embeddings.outer_iter().map(|row| row.to_vec()).collect()
}

/// Stack per-text vectors into a tensor. All rows must share one width.
pub fn stack_rows(rows: Vec<Vec<f32>>) -> Result<Embeddings> {
    let n_rows = rows.len();
    let width = rows.first().map(Vec::len).unwrap_or(0);

    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(RagError::contract(format!(
            "embedding {} has {} dimensions, expected {}",
            i,
            row.len(),
            width
        )));
    }

    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, width), flat)
        .map_err(|e| RagError::contract(format!("cannot stack embeddings: {}", e)))
}

/// Check that a runtime produced exactly one row per input.
pub fn expect_rows(embeddings: Embeddings, expected: usize, source: &str) -> Result<Embeddings> {
    if embeddings.nrows() != expected {
        return Err(RagError::contract(format!(
            "{} returned {} embeddings for {} inputs",
            source,
            embeddings.nrows(),
            expected
        )));
    }
    Ok(embeddings)
}

/// Scale each row to unit L2 norm. Zero rows are left as they are.
pub fn l2_normalize_rows(embeddings: &mut Embeddings) {
    for mut row in embeddings.outer_iter_mut() {
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|x| x / norm);
        }
    }
}
