//! Retrieval confidence.
//!
//! ```text
//! confidence = clamp(0.05, 0.99,
//!     0.6 × min(1, top1 / 1.4)
//!   + 0.3 × min(1, mean(top3) / 1.2)
//!   + 0.1 × min(1, coverage))
//! ```
//!
//! No candidates → exactly 0.0.

use crate::index::RankedCandidate;

pub const MIN_CONFIDENCE: f64 = 0.05;
pub const MAX_CONFIDENCE: f64 = 0.99;

const TOP1_WEIGHT: f64 = 0.6;
const TOP1_SCALE: f64 = 1.4;
const TOP3_WEIGHT: f64 = 0.3;
const TOP3_SCALE: f64 = 1.2;
const COVERAGE_WEIGHT: f64 = 0.1;

/// Confidence from fused scores ordered best first.
pub fn confidence_from_scores(scores: &[f64], coverage: f64) -> f64 {
    let Some(&top1) = scores.first() else {
        return 0.0;
    };

    let top3 = &scores[..scores.len().min(3)];
    let avg_top3 = top3.iter().sum::<f64>() / top3.len() as f64;

    let raw = TOP1_WEIGHT * (top1 / TOP1_SCALE).min(1.0)
        + TOP3_WEIGHT * (avg_top3 / TOP3_SCALE).min(1.0)
        + COVERAGE_WEIGHT * coverage.min(1.0);

    raw.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Confidence for a ranked candidate list.
pub fn confidence(candidates: &[RankedCandidate<'_>], coverage: f64) -> f64 {
    let scores: Vec<f64> = candidates.iter().map(|c| c.fused_score).collect();
    confidence_from_scores(&scores, coverage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_candidates_is_zero() {
        assert_eq!(confidence_from_scores(&[], 1.0), 0.0);
        assert_eq!(confidence(&[], 0.5), 0.0);
    }

    #[test]
    fn test_known_value() {
        // top1 0.7 -> 0.6 * 0.5 = 0.3
        // avg(0.7, 0.5, 0.3) = 0.5 -> 0.3 * 0.41666 = 0.125
        // coverage 0.5 -> 0.05
        let c = confidence_from_scores(&[0.7, 0.5, 0.3, 0.1], 0.5);
        assert!((c - (0.3 + 0.125 + 0.05)).abs() < 1e-9);
    }

    #[test]
    fn test_fewer_than_three_scores() {
        let c = confidence_from_scores(&[0.6], 0.0);
        let expected = 0.6 * (0.6 / 1.4) + 0.3 * (0.6 / 1.2);
        assert!((c - expected).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_low_and_high() {
        assert_eq!(confidence_from_scores(&[0.051], 0.0), MIN_CONFIDENCE);
        assert_eq!(confidence_from_scores(&[5.0, 5.0, 5.0], 3.0), MAX_CONFIDENCE);
    }

    #[test]
    fn test_always_in_range_when_nonempty() {
        let cases = vec![
            (vec![0.06], 0.0),
            (vec![1.2, 0.9], 0.7),
            (vec![0.3, 0.2, 0.1], 1.0),
            (vec![2.0, 1.5, 1.4, 1.0], 1.0),
        ];
        for (scores, cov) in cases {
            let c = confidence_from_scores(&scores, cov);
            assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&c), "{}", c);
        }
    }
}
