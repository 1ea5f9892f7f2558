//! Kozak similarity scoring of translation-initiation context.
//!
//! Weights follow the position/base similarity matrix of Gleason et al.
//! (PLoS One, 2022). Rows are window positions, columns the bases
//! `A, U, G, C, other`.

use crate::error::{PipelineError, PipelineResult};

/// Window length: 10 nt upstream, the codon, 10 nt downstream of it
pub const KOZAK_WINDOW: usize = 23;

/// Nucleotides scored before the first base of the candidate codon
pub const KOZAK_UPSTREAM: usize = 10;

const KOZAK_WEIGHTS: [[f64; 5]; KOZAK_WINDOW] = [
    [0.04210526, 0.0, 0.03157895, 0.05263158, 0.0],
    [0.04210526, 0.05263158, 0.10526316, 0.0625, 0.0],
    [0.03157895, 0.04210526, 0.05263158, 0.07368421, 0.0],
    [0.03157895, 0.01052632, 0.04210526, 0.05263158, 0.0],
    [0.08421053, 0.07368421, 0.18947368, 0.10526316, 0.0],
    [0.04210526, 0.05263158, 0.05263158, 0.08421053, 0.0],
    [0.12631579, 0.0625, 0.12631579, 0.21052632, 0.0],
    [0.83157895, 0.12631579, 0.65263158, 0.16842105, 0.0],
    [0.15789474, 0.06315789, 0.11578947, 0.2, 0.0],
    [0.21052632, 0.09473684, 0.31578947, 0.51578947, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.24210526, 0.16666667, 0.53684211, 0.13684211, 0.0],
    [0.15789474, 0.09473684, 0.09473684, 0.24210526, 0.0],
    [0.05263158, 0.08421053, 0.14736842, 0.09473684, 0.0],
    [0.07216495, 0.05263158, 0.10526316, 0.06315789, 0.0],
    [0.0, 0.0, 0.0, 0.05263158, 0.0],
    [0.05263158, 0.05263158, 0.10526316, 0.09473684, 0.0],
    [0.04210526, 0.03157895, 0.05263158, 0.04210526, 0.0],
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.04210526, 0.04210526, 0.08421053, 0.07368421, 0.0],
    [0.0625, 0.04210526, 0.09473684, 0.05263158, 0.0],
];

fn base_index(base: u8) -> usize {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'U' | b'T' => 1,
        b'G' => 2,
        b'C' => 3,
        _ => 4,
    }
}

/// Highest achievable raw score: the sum of every row's maximum
pub fn max_score() -> f64 {
    KOZAK_WEIGHTS
        .iter()
        .map(|row| row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        .sum()
}

/// Normalized Kozak similarity of a 23-nt window, in `[0, 1]`.
///
/// DNA and RNA alphabets are both accepted; any other symbol scores as
/// "other".
pub fn kozak_score(window: &str) -> PipelineResult<f64> {
    if window.len() != KOZAK_WINDOW {
        return Err(PipelineError::input_shape(format!(
            "Kozak window must be {} nt, got {}",
            KOZAK_WINDOW,
            window.len()
        )));
    }
    let raw: f64 = window
        .bytes()
        .zip(KOZAK_WEIGHTS.iter())
        .map(|(base, row)| row[base_index(base)])
        .sum();
    Ok(raw / max_score())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_all_adenine_window() {
        let expected: f64 = KOZAK_WEIGHTS.iter().map(|row| row[0]).sum::<f64>() / max_score();
        let score = kozak_score(&"A".repeat(23)).unwrap();
        assert_relative_eq!(score, expected);
    }

    #[test]
    fn test_consensus_scores_higher_than_poor_context() {
        // gccRccAUGG consensus against a pyrimidine-rich context
        let strong = kozak_score("GCCGCCACCAUGGCGGCCUCGAA").unwrap();
        let weak = kozak_score("UUUUUUUUUAUGUUUUUUUUUUU").unwrap();
        assert!(strong > weak);
    }

    #[test]
    fn test_bounded_and_deterministic() {
        for window in ["NNNNNNNNNNNNNNNNNNNNNNN", "GCCGCCACCATGGCGGCCTCGAA", "CCCCCCCCCCCCCCCCCCCCCCC"] {
            let first = kozak_score(window).unwrap();
            assert!((0.0..=1.0).contains(&first));
            assert_eq!(first, kozak_score(window).unwrap());
        }
        assert_eq!(kozak_score("NNNNNNNNNNNNNNNNNNNNNNN").unwrap(), 0.0);
    }

    #[test]
    fn test_dna_and_rna_agree() {
        assert_eq!(
            kozak_score("GCCGCCACCATGGCGGCCTCGAA").unwrap(),
            kozak_score("GCCGCCACCAUGGCGGCCUCGAA").unwrap()
        );
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(matches!(kozak_score(&"A".repeat(22)), Err(PipelineError::InputShape(_))));
        assert!(kozak_score(&"A".repeat(24)).is_err());
        assert!(kozak_score("").is_err());
    }
}
