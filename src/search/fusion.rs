//! Rank fusion for hybrid retrieval.
//!
//! Two fusion methods combine the dense and lexical rankings:
//!
//! - **Reciprocal Rank Fusion**: `score(d) = Σ 1 / (k + rank(d))` over
//!   the rankers that returned `d`. Based on: Cormack, Clarke,
//!   Buettcher (2009) - "Reciprocal Rank Fusion outperforms Condorcet
//!   and individual Rank Learning Methods".
//! - **Linear**: `α·z(dense) + (1−α)·z(sparse)` with per-ranker z-score
//!   normalization, for when raw scores are trusted to be calibrated.

use std::collections::HashMap;

/// Configuration for the RRF algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k parameter controls how much weight lower-ranked items
    /// receive. Higher k flattens the contribution curve. Default is
    /// 60, the value recommended in the original paper.
    pub k: u32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60 }
    }
}

impl RrfConfig {
    /// Creates a new RRF config with the specified k value.
    #[must_use]
    pub const fn new(k: u32) -> Self {
        Self { k }
    }
}

/// Performs Reciprocal Rank Fusion on multiple ranked lists of chunk
/// ids.
///
/// Each list is ordered most-relevant-first. Returns `(chunk_id,
/// rrf_score)` tuples sorted by score descending; ties break on the
/// chunk id itself so the ordering is total.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn reciprocal_rank_fusion(ranked_lists: &[&[String]], config: &RrfConfig) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, chunk_id) in list.iter().enumerate() {
            // rank is 0-indexed; the formula uses 1-indexed ranks.
            let rrf_score = 1.0 / f64::from(config.k + (rank as u32) + 1);
            *scores.entry(chunk_id.as_str()).or_insert(0.0) += rrf_score;
        }
    }

    let mut results: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    results
}

/// Linearly fuses two scored lists with z-score normalization.
///
/// `alpha` weights the dense side; `1 - alpha` the sparse side. Items
/// missing from one ranker contribute that ranker's minimum z-score,
/// so single-ranker items are not unfairly favored.
#[must_use]
pub fn linear_fusion(
    dense: &[(String, f64)],
    sparse: &[(String, f64)],
    alpha: f64,
) -> Vec<(String, f64)> {
    let z_dense = z_scores(dense);
    let z_sparse = z_scores(sparse);

    let floor = |m: &HashMap<String, f64>| {
        m.values().copied().fold(f64::INFINITY, f64::min)
    };
    let dense_floor = if z_dense.is_empty() { 0.0 } else { floor(&z_dense) };
    let sparse_floor = if z_sparse.is_empty() { 0.0 } else { floor(&z_sparse) };

    let mut ids: Vec<&String> = z_dense.keys().chain(z_sparse.keys()).collect();
    ids.sort();
    ids.dedup();

    let mut results: Vec<(String, f64)> = ids
        .into_iter()
        .map(|id| {
            let d = z_dense.get(id).copied().unwrap_or(dense_floor);
            let s = z_sparse.get(id).copied().unwrap_or(sparse_floor);
            (id.clone(), alpha * d + (1.0 - alpha) * s)
        })
        .collect();

    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

/// Computes per-item z-scores for one ranker's raw scores.
fn z_scores(scored: &[(String, f64)]) -> HashMap<String, f64> {
    if scored.is_empty() {
        return HashMap::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = scored.len() as f64;
    let mean = scored.iter().map(|(_, s)| s).sum::<f64>() / n;
    let variance = scored.iter().map(|(_, s)| (s - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    scored
        .iter()
        .map(|(id, score)| {
            let z = if std_dev > f64::EPSILON {
                (score - mean) / std_dev
            } else {
                0.0
            };
            (id.clone(), z)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_rrf_single_list() {
        let list = ids(&["a", "b", "c"]);
        let results = reciprocal_rank_fusion(&[&list], &RrfConfig::default());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 > results[1].1);
        assert!(results[1].1 > results[2].1);
    }

    #[test]
    fn test_rrf_item_in_both_lists_wins() {
        // "b" is mid-ranked in both lists; "a" and "c" top one list
        // each. Appearing in both rankers beats topping one.
        let list1 = ids(&["a", "b"]);
        let list2 = ids(&["c", "b"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::new(60));
        assert_eq!(results[0].0, "b");
    }

    #[test]
    fn test_rrf_score_formula() {
        let list = ids(&["a"]);
        let results = reciprocal_rank_fusion(&[&list], &RrfConfig::new(60));
        let expected = 1.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_combined_score() {
        let list1 = ids(&["a"]);
        let list2 = ids(&["a"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::new(60));
        let expected = 2.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_empty_lists() {
        let list: Vec<String> = Vec::new();
        let results = reciprocal_rank_fusion(&[&list], &RrfConfig::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_rrf_tie_breaks_deterministically() {
        let list1 = ids(&["b"]);
        let list2 = ids(&["a"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], &RrfConfig::default());
        // Equal scores; lexical chunk-id order decides.
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "b");
    }

    #[test]
    fn test_rrf_k_parameter() {
        let list = ids(&["a", "b"]);
        let low = reciprocal_rank_fusion(&[&list], &RrfConfig::new(1));
        let high = reciprocal_rank_fusion(&[&list], &RrfConfig::new(100));
        let diff_low = low[0].1 - low[1].1;
        let diff_high = high[0].1 - high[1].1;
        assert!(diff_low > diff_high);
    }

    #[test]
    fn test_linear_fusion_alpha_weighting() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.1)];
        let sparse = vec![("b".to_string(), 10.0), ("a".to_string(), 1.0)];

        // All-dense weighting follows the dense ranking.
        let all_dense = linear_fusion(&dense, &sparse, 1.0);
        assert_eq!(all_dense[0].0, "a");

        // All-sparse weighting follows the sparse ranking.
        let all_sparse = linear_fusion(&dense, &sparse, 0.0);
        assert_eq!(all_sparse[0].0, "b");
    }

    #[test]
    fn test_linear_fusion_missing_item_gets_floor() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
        let sparse = vec![("a".to_string(), 3.0)];
        let results = linear_fusion(&dense, &sparse, 0.5);
        // "a" appears in both rankers and must win.
        assert_eq!(results[0].0, "a");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_linear_fusion_constant_scores() {
        let dense = vec![("a".to_string(), 0.5), ("b".to_string(), 0.5)];
        let sparse: Vec<(String, f64)> = Vec::new();
        let results = linear_fusion(&dense, &sparse, 0.5);
        // Zero variance collapses to z=0; ordering falls back to id.
        assert_eq!(results[0].0, "a");
        assert!((results[0].1 - results[1].1).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_rrf_scores_monotonically_non_increasing(
            list1 in proptest::collection::vec("[a-f]", 0..12),
            list2 in proptest::collection::vec("[a-f]", 0..12),
        ) {
            let mut l1 = list1;
            let mut l2 = list2;
            l1.dedup();
            l2.dedup();
            let results = reciprocal_rank_fusion(&[&l1, &l2], &RrfConfig::default());
            for pair in results.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
            }
        }

        #[test]
        fn prop_rrf_contains_every_input_id(
            list in proptest::collection::hash_set("[a-z]{1,3}", 0..10),
        ) {
            let list: Vec<String> = list.into_iter().collect();
            let results = reciprocal_rank_fusion(&[&list], &RrfConfig::default());
            prop_assert_eq!(results.len(), list.len());
        }

        #[test]
        fn prop_linear_fusion_scores_finite(
            dense in proptest::collection::vec(("[a-e]", 0.0f64..10.0), 0..8),
            sparse in proptest::collection::vec(("[a-e]", 0.0f64..10.0), 0..8),
        ) {
            let dedupe = |v: Vec<(String, f64)>| {
                let mut seen = std::collections::HashSet::new();
                v.into_iter().filter(|(id, _)| seen.insert(id.clone())).collect::<Vec<_>>()
            };
            let dense = dedupe(dense.into_iter().map(|(a, b)| (a, b)).collect());
            let sparse = dedupe(sparse.into_iter().map(|(a, b)| (a, b)).collect());
            let results = linear_fusion(&dense, &sparse, 0.5);
            for (_, score) in results {
                prop_assert!(score.is_finite());
            }
        }
    }
}
