//! Heuristic similarity between expected and recognized text
//!
//! Four sub-scores are combined with fixed weights: set overlap (Jaccard),
//! normalized Levenshtein, positional order, and an optional semantic score
//! from sentence embeddings. When no embedding resource exists for the
//! detected language the semantic weight is redistributed over the other
//! sub-scores, so an exact match still scores 1.0.

use std::collections::HashSet;
use std::sync::Arc;
use strsim::normalized_levenshtein;
use tracing::debug;

use crate::language::LanguageDetector;
use crate::segmenter::{ScriptMode, TextSegmenter, script_mode};
use crate::types::SimilarityResult;

/// Sentence embeddings for the semantic sub-score
pub trait EmbeddingProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Whether an embedding resource exists for the language
    fn supports(&self, language: &str) -> bool;

    /// Embed text; `None` if the resource turned out to be unusable
    fn embed(&self, text: &str, language: &str) -> Option<Vec<f32>>;
}

/// Relative weights of the sub-scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub overlap: f64,
    pub edit: f64,
    pub order: f64,
    pub semantic: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            overlap: 0.3,
            edit: 0.3,
            order: 0.2,
            semantic: 0.2,
        }
    }
}

/// Combines the sub-scores into one confidence value
pub struct SimilarityScorer {
    segmenter: TextSegmenter,
    detector: LanguageDetector,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    weights: ScoreWeights,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(LanguageDetector::default())
    }
}

impl SimilarityScorer {
    pub fn new(detector: LanguageDetector) -> Self {
        Self {
            segmenter: TextSegmenter::new(),
            detector,
            embeddings: None,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_embeddings(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(provider);
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Combined score in [0, 1]
    pub fn score(&self, expected: &str, recognized: &str) -> f64 {
        self.evaluate(expected, recognized).score
    }

    /// Combined score with its sub-scores
    pub fn evaluate(&self, expected: &str, recognized: &str) -> SimilarityResult {
        let mode = script_mode(expected);
        let expected_units = self.spoken_units(expected, mode);
        let recognized_units = self.spoken_units(recognized, mode);
        if expected_units.is_empty() || recognized_units.is_empty() {
            return SimilarityResult::zero();
        }

        let overlap = jaccard(&expected_units, &recognized_units);
        let edit = edit_similarity(
            &expected_units.join(mode.separator()),
            &recognized_units.join(mode.separator()),
        );
        let order = order_similarity(&expected_units, &recognized_units);
        let semantic = self.semantic_similarity(expected, recognized);

        let w = self.weights;
        let mut weighted = w.overlap * overlap + w.edit * edit + w.order * order;
        let mut total_weight = w.overlap + w.edit + w.order;
        if let Some(semantic) = semantic {
            weighted += w.semantic * semantic;
            total_weight += w.semantic;
        }

        let score = if total_weight > 0.0 {
            clamp_unit(weighted / total_weight)
        } else {
            0.0
        };

        debug!(
            "Similarity {:.3} (overlap {:.3}, edit {:.3}, order {:.3}, semantic {:?})",
            score, overlap, edit, order, semantic
        );

        SimilarityResult {
            score,
            overlap,
            edit,
            order,
            semantic,
        }
    }

    /// Normalized, punctuation-free units
    fn spoken_units(&self, text: &str, mode: ScriptMode) -> Vec<String> {
        self.segmenter
            .segment_as(text, mode)
            .into_iter()
            .filter(|u| !u.is_punctuation())
            .map(|u| u.normalized)
            .collect()
    }

    fn semantic_similarity(&self, expected: &str, recognized: &str) -> Option<f64> {
        let provider = self.embeddings.as_ref()?;
        let language = self.detector.detect(expected);
        if !provider.supports(&language) {
            debug!(
                "{} has no embeddings for {}, redistributing weight",
                provider.name(),
                language
            );
            return None;
        }
        let a = provider.embed(expected, &language)?;
        let b = provider.embed(recognized, &language)?;
        cosine_similarity(&a, &b).map(clamp_unit)
    }
}

/// Size of intersection over size of union of the unit sets
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// `1 - levenshtein / max_len` over cleaned text
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    clamp_unit(normalized_levenshtein(a, b))
}

/// Position-wise exact-match rate over the shorter sequence, scaled down by
/// the length ratio of the two sequences
pub fn order_similarity(a: &[String], b: &[String]) -> f64 {
    let shorter = a.len().min(b.len());
    let longer = a.len().max(b.len());
    if shorter == 0 {
        return 0.0;
    }
    let hits = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    let rate = hits as f64 / shorter as f64;
    clamp_unit(rate * shorter as f64 / longer as f64)
}

/// Cosine similarity; `None` for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
