//! Embedding generation support.
//!
//! The [`EmbeddingGenerator`] trait is implemented by provider
//! adapters; this module owns everything provider-independent: input
//! validation, response-shape normalization, and metadata. Providers
//! answer in one of three shapes — a 2-D array (one vector per input),
//! a 1-D array (single-input shorthand), or a 3-D token-level array
//! that gets mean-pooled down to sentence vectors.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{GenerateFailure, LlmError};
use crate::generator::Generation;
use crate::metadata::{
    GenerationMetadata, METADATA_KEY_EMBEDDING_COUNT, METADATA_KEY_EMBEDDING_DIMS,
};

/// One embedding vector.
pub type EmbeddingVector = Vec<f64>;

/// The caller-facing embedding surface, implemented by adapters.
///
/// `generate` is the single-element case of `generate_batch` and must
/// agree with it elementwise.
pub trait EmbeddingGenerator: Send + Sync {
    /// Embeds one input.
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<EmbeddingVector>, GenerateFailure>> + Send + 'a>>;

    /// Embeds a batch, one vector per input, in input order.
    fn generate_batch<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        inputs: &'a [String],
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Generation<Vec<EmbeddingVector>>, GenerateFailure>>
                + Send
                + 'a,
        >,
    >;
}

/// Validates a batch: at least one input, none blank after trimming.
pub fn validate_embedding_inputs(inputs: &[String]) -> Result<(), LlmError> {
    if inputs.is_empty() {
        return Err(LlmError::InvalidArgument(
            "at least one embedding input is required".into(),
        ));
    }
    for (index, input) in inputs.iter().enumerate() {
        if input.trim().is_empty() {
            return Err(LlmError::InvalidArgument(format!(
                "embedding input at index {index} is empty"
            )));
        }
    }
    Ok(())
}

/// Validates a requested dimensionality.
pub fn validate_embedding_dimensions(dimensions: Option<u32>) -> Result<(), LlmError> {
    match dimensions {
        Some(0) => Err(LlmError::InvalidArgument(
            "embedding dimensions must be greater than zero".into(),
        )),
        _ => Ok(()),
    }
}

/// Averages token-level vectors into a single sentence vector.
pub fn mean_pool(token_vectors: &[Vec<f64>]) -> EmbeddingVector {
    let Some(first) = token_vectors.first() else {
        return Vec::new();
    };
    let dims = first.len();
    let mut pooled = vec![0.0; dims];
    for vector in token_vectors {
        for (slot, value) in pooled.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let count = token_vectors.len() as f64;
    for slot in &mut pooled {
        *slot /= count;
    }
    pooled
}

/// Normalizes a raw embedding payload into one vector per input.
///
/// Accepted shapes, in order of preference:
/// - 2-D array of numbers — one sentence vector per input;
/// - 1-D array of numbers — only when exactly one input was sent;
/// - 3-D array of numbers — token-level; each input is mean-pooled.
///
/// A count that disagrees with `expected` fails with
/// [`LlmError::EmbeddingShapeMismatch`].
pub fn normalize_embedding_payload(
    payload: &Value,
    expected: usize,
) -> Result<Vec<EmbeddingVector>, LlmError> {
    let rows = payload.as_array().ok_or(LlmError::EmbeddingResponseEmpty)?;
    if rows.is_empty() {
        return Err(LlmError::EmbeddingResponseEmpty);
    }

    // 1-D: a bare vector of numbers, valid only for a single input.
    if rows[0].is_number() {
        let vector = as_number_vector(payload).ok_or(LlmError::EmbeddingResponseEmpty)?;
        if expected != 1 {
            return Err(LlmError::EmbeddingShapeMismatch {
                expected,
                actual: 1,
            });
        }
        return Ok(vec![vector]);
    }

    // 2-D: one vector per input.
    if rows[0].as_array().is_some_and(|inner| {
        inner.first().is_some_and(Value::is_number)
    }) {
        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            vectors.push(as_number_vector(row).ok_or(LlmError::EmbeddingResponseEmpty)?);
        }
        return check_count(vectors, expected);
    }

    // 3-D: token-level vectors, mean-pooled per input.
    let mut vectors = Vec::with_capacity(rows.len());
    for row in rows {
        let token_rows = row.as_array().ok_or(LlmError::EmbeddingResponseEmpty)?;
        let mut token_vectors = Vec::with_capacity(token_rows.len());
        for token_row in token_rows {
            token_vectors.push(as_number_vector(token_row).ok_or(LlmError::EmbeddingResponseEmpty)?);
        }
        vectors.push(mean_pool(&token_vectors));
    }
    check_count(vectors, expected)
}

fn check_count(
    vectors: Vec<EmbeddingVector>,
    expected: usize,
) -> Result<Vec<EmbeddingVector>, LlmError> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(LlmError::EmbeddingShapeMismatch {
            expected,
            actual: vectors.len(),
        })
    }
}

fn as_number_vector(value: &Value) -> Option<EmbeddingVector> {
    let items = value.as_array()?;
    items.iter().map(Value::as_f64).collect()
}

/// Reassembles indexed embedding rows (`(index, vector)`) in input
/// order, rejecting out-of-range, duplicate, or missing indices.
pub fn collect_indexed_rows(
    rows: Vec<(usize, EmbeddingVector)>,
    expected: usize,
) -> Result<Vec<EmbeddingVector>, LlmError> {
    if rows.is_empty() {
        return Err(LlmError::EmbeddingResponseEmpty);
    }
    if rows.len() != expected {
        return Err(LlmError::EmbeddingShapeMismatch {
            expected,
            actual: rows.len(),
        });
    }

    let mut vectors: Vec<Option<EmbeddingVector>> = vec![None; expected];
    for (index, vector) in rows {
        let slot = vectors
            .get_mut(index)
            .ok_or(LlmError::EmbeddingShapeMismatch {
                expected,
                actual: index + 1,
            })?;
        if slot.is_some() {
            return Err(LlmError::EmbeddingShapeMismatch {
                expected,
                actual: index + 1,
            });
        }
        *slot = Some(vector);
    }

    vectors
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(LlmError::EmbeddingResponseEmpty)
}

/// Writes `embedding_count` and `embedding_dims` into the metadata map.
pub fn apply_embedding_metadata(meta: &mut GenerationMetadata, vectors: &[EmbeddingVector]) {
    meta.insert(
        METADATA_KEY_EMBEDDING_COUNT.into(),
        vectors.len().to_string(),
    );
    if let Some(first) = vectors.first() {
        meta.insert(METADATA_KEY_EMBEDDING_DIMS.into(), first.len().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_validate_rejects_empty_batch() {
        let err = validate_embedding_inputs(&[]).unwrap_err();
        assert!(matches!(err, LlmError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_blank_input() {
        let err = validate_embedding_inputs(&strings(&["fine", "   "])).unwrap_err();
        assert!(err.contains_message("index 1"));
    }

    #[test]
    fn test_validate_accepts_real_inputs() {
        assert!(validate_embedding_inputs(&strings(&["a", "b"])).is_ok());
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_embedding_dimensions(None).is_ok());
        assert!(validate_embedding_dimensions(Some(256)).is_ok());
        assert!(validate_embedding_dimensions(Some(0)).is_err());
    }

    #[test]
    fn test_normalize_two_dimensional() {
        let payload = json!([[0.1, 0.2], [0.3, 0.4]]);
        let vectors = normalize_embedding_payload(&payload, 2).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn test_normalize_one_dimensional_single_input() {
        let payload = json!([0.5, 0.6, 0.7]);
        let vectors = normalize_embedding_payload(&payload, 1).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.6, 0.7]]);
    }

    #[test]
    fn test_normalize_one_dimensional_rejects_batch() {
        let payload = json!([0.5, 0.6]);
        let err = normalize_embedding_payload(&payload, 2).unwrap_err();
        assert!(matches!(err, LlmError::EmbeddingShapeMismatch { .. }));
    }

    #[test]
    fn test_normalize_three_dimensional_mean_pools() {
        // Two inputs, two token vectors each.
        let payload = json!([
            [[1.0, 3.0], [3.0, 5.0]],
            [[0.0, 0.0], [2.0, 4.0]],
        ]);
        let vectors = normalize_embedding_payload(&payload, 2).unwrap();
        assert_eq!(vectors, vec![vec![2.0, 4.0], vec![1.0, 2.0]]);
    }

    #[test]
    fn test_normalize_count_mismatch() {
        let payload = json!([[0.1, 0.2]]);
        let err = normalize_embedding_payload(&payload, 3).unwrap_err();
        assert!(matches!(
            err,
            LlmError::EmbeddingShapeMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_normalize_empty_payload() {
        assert!(matches!(
            normalize_embedding_payload(&json!([]), 1).unwrap_err(),
            LlmError::EmbeddingResponseEmpty
        ));
        assert!(matches!(
            normalize_embedding_payload(&json!("nope"), 1).unwrap_err(),
            LlmError::EmbeddingResponseEmpty
        ));
    }

    #[test]
    fn test_mean_pool_empty() {
        assert!(mean_pool(&[]).is_empty());
    }

    #[test]
    fn test_collect_indexed_rows_reorders() {
        let rows = vec![(1, vec![0.2]), (0, vec![0.1])];
        let vectors = collect_indexed_rows(rows, 2).unwrap();
        assert_eq!(vectors, vec![vec![0.1], vec![0.2]]);
    }

    #[test]
    fn test_collect_indexed_rows_rejects_duplicates() {
        let rows = vec![(0, vec![0.1]), (0, vec![0.2])];
        assert!(collect_indexed_rows(rows, 2).is_err());
    }

    #[test]
    fn test_collect_indexed_rows_rejects_out_of_range() {
        let rows = vec![(0, vec![0.1]), (5, vec![0.2])];
        assert!(collect_indexed_rows(rows, 2).is_err());
    }

    #[test]
    fn test_collect_indexed_rows_count_mismatch() {
        let rows = vec![(0, vec![0.1])];
        assert!(matches!(
            collect_indexed_rows(rows, 2).unwrap_err(),
            LlmError::EmbeddingShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_apply_embedding_metadata() {
        let mut meta = GenerationMetadata::new();
        apply_embedding_metadata(&mut meta, &[vec![0.0; 1536], vec![0.0; 1536]]);
        assert_eq!(meta[METADATA_KEY_EMBEDDING_COUNT], "2");
        assert_eq!(meta[METADATA_KEY_EMBEDDING_DIMS], "1536");
    }

    #[test]
    fn test_apply_embedding_metadata_empty() {
        let mut meta = GenerationMetadata::new();
        apply_embedding_metadata(&mut meta, &[]);
        assert_eq!(meta[METADATA_KEY_EMBEDDING_COUNT], "0");
        assert!(!meta.contains_key(METADATA_KEY_EMBEDDING_DIMS));
    }
}
