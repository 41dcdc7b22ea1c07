//! Detector score shapes, scalar normalization and aggregation.
//!
//! Detectors report one entry per frame, but the value shape varies: a bare
//! number, a (possibly deeply) nested list whose first element carries the
//! score, or something unusable. [`RawScore`] captures those shapes as a
//! tagged variant and [`RawScore::extract_float`] reduces any of them to a
//! single scalar, or to nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::extract::FrameRef;
use crate::types::JobId;

/// Number of decimal digits kept in the reported average score.
pub const AVERAGE_SCORE_DECIMALS: u32 = 4;

/// Raw per-frame detector output, before normalization.
///
/// Deserialized untagged from the detector's JSON: numbers become
/// [`RawScore::Scalar`], arrays become [`RawScore::Nested`], and anything
/// else (strings, booleans, objects, null) is kept verbatim as
/// [`RawScore::NonNumeric`] so it can still be rendered on the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScore {
    Scalar(f64),
    Nested(Vec<RawScore>),
    NonNumeric(serde_json::Value),
}

impl RawScore {
    /// Reduce this score to one float.
    ///
    /// Scalars are returned as-is; nested sequences unwrap exactly one first
    /// element per level; empty sequences and non-numeric leaves yield `None`.
    pub fn extract_float(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Nested(items) => items.first().and_then(Self::extract_float),
            Self::NonNumeric(_) => None,
        }
    }

    /// Compact JSON rendering of the original value, e.g. `[[0.9]]`.
    pub fn to_display_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "?".to_string())
    }
}

/// Per-frame raw scores keyed by frame identifier (`frame_0`, `frame_1`, ...).
pub type ScoreMap = BTreeMap<String, RawScore>;

/// Drop score entries whose key does not name an extracted frame.
///
/// Returns the dropped keys.
pub fn retain_extracted(scores: &mut ScoreMap, frames: &[FrameRef]) -> Vec<String> {
    let mut dropped = Vec::new();
    scores.retain(|key, _| {
        let known = frames.iter().any(|f| &f.id == key);
        if !known {
            dropped.push(key.clone());
        }
        known
    });
    dropped
}

/// Aggregated view of a [`ScoreMap`].
///
/// `frames_analyzed` counts detector entries; `scores_aggregated` counts the
/// entries that normalized to a scalar. The two differ whenever the detector
/// returns unusable shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStats {
    pub frames_analyzed: usize,
    pub scores_aggregated: usize,
    pub average_score: f64,
}

/// Normalize every score and compute the rounded mean of the survivors.
///
/// An empty set of survivors yields an average of `0.0`.
pub fn aggregate(scores: &ScoreMap) -> ScoreStats {
    let scalars: Vec<f64> = scores.values().filter_map(RawScore::extract_float).collect();

    let average = if scalars.is_empty() {
        0.0
    } else {
        scalars.iter().sum::<f64>() / scalars.len() as f64
    };

    ScoreStats {
        frames_analyzed: scores.len(),
        scores_aggregated: scalars.len(),
        average_score: round_half_away_from_zero(average, AVERAGE_SCORE_DECIMALS),
    }
}

/// Round `value` to `decimals` digits, ties away from zero.
///
/// The tie decision is made on the binary value scaled by `10^decimals`, so
/// only exactly representable ties (such as `0.03125` at 4 digits) round up
/// in magnitude; decimal literals that are not exact in binary round to
/// whichever side their binary value falls on.
pub fn round_half_away_from_zero(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Render a score so it always carries a decimal point: `0.0`, `1.0`,
/// `0.0313`.
pub fn format_score(value: f64) -> String {
    let text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        format!("{text}.0")
    } else {
        text
    }
}

/// Job summary returned alongside the archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub job_id: JobId,
    /// Frame budget requested by the caller.
    pub frames_requested: usize,
    /// Frames the extractor produced.
    pub frames_extracted: usize,
    /// Entries in the ScoreMap.
    pub frames_analyzed: usize,
    /// Entries that normalized to a scalar.
    pub scores_aggregated: usize,
    /// Mean of the normalized scalars, 4 decimals.
    pub average_score: f64,
}

impl Summary {
    pub fn new(
        job_id: JobId,
        frames_requested: usize,
        frames_extracted: usize,
        stats: ScoreStats,
    ) -> Self {
        Self {
            job_id,
            frames_requested,
            frames_extracted,
            frames_analyzed: stats.frames_analyzed,
            scores_aggregated: stats.scores_aggregated,
            average_score: stats.average_score,
        }
    }
}
