//! Core building blocks for the deepfake video pipeline.
//!
//! Everything here is stage-local: workspace layout, the extraction,
//! detection and annotation capabilities, score aggregation and zip
//! packaging. Sequencing lives in `deepscan-pipeline`.

pub mod annotate;
pub mod detect;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod glyph;
pub mod package;
pub mod score;
pub mod subprocess;
pub mod types;
pub mod workspace;
