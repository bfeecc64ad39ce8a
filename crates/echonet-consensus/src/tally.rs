//! Vote tally.

use crate::{EchoKind, EchoResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate view of the echoes on one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    /// Percentage of votes that are resonant.
    pub resonance_score: f64,
    /// Percentage held by the most common kind.
    pub consensus_strength: f64,
    /// Most common kind, first in [`EchoKind::ALL`] order on ties.
    pub dominant: Option<EchoKind>,
    /// Vote count per kind; every kind is present.
    pub distribution: BTreeMap<EchoKind, usize>,
    /// Number of votes.
    pub total: usize,
    /// True if the dominant share reached the threshold.
    pub convergence_achieved: bool,
}

impl Tally {
    /// Computes the tally for `echoes` against `threshold` (a fraction in `0..=1`).
    pub fn compute<'a>(echoes: impl IntoIterator<Item = &'a EchoResponse>, threshold: f64) -> Self {
        let mut distribution: BTreeMap<EchoKind, usize> =
            EchoKind::ALL.iter().map(|kind| (*kind, 0)).collect();
        let mut total = 0usize;
        for echo in echoes {
            *distribution.entry(echo.kind).or_insert(0) += 1;
            total += 1;
        }

        if total == 0 {
            return Self {
                resonance_score: 0.0,
                consensus_strength: 0.0,
                dominant: None,
                distribution,
                total,
                convergence_achieved: false,
            };
        }

        let mut dominant = EchoKind::Resonant;
        let mut max = 0usize;
        for kind in EchoKind::ALL {
            let count = distribution.get(&kind).copied().unwrap_or(0);
            if count > max {
                dominant = kind;
                max = count;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let (max_f, total_f, resonant_f) = (
            max as f64,
            total as f64,
            distribution.get(&EchoKind::Resonant).copied().unwrap_or(0) as f64,
        );

        Self {
            resonance_score: 100.0 * resonant_f / total_f,
            consensus_strength: 100.0 * max_f / total_f,
            dominant: Some(dominant),
            distribution,
            total,
            convergence_achieved: max_f / total_f >= threshold,
        }
    }
}
