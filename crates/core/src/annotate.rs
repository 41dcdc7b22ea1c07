//! Annotation capability: stamp each scored frame with its score.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};

use crate::error::PipelineError;
use crate::extract::FRAME_EXTENSION;
use crate::glyph;
use crate::score::{RawScore, ScoreMap};
use crate::workspace;

const BANNER_BACKGROUND: Rgb<u8> = Rgb([16, 16, 16]);
const UNSCORED_COLOR: Rgb<u8> = Rgb([160, 160, 160]);

/// Directory of annotated frames and the files written into it.
#[derive(Debug, Clone)]
pub struct AnnotatedSet {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl AnnotatedSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Capability that overlays each frame's original score onto its image.
///
/// Frames absent from `scores` are left alone.
#[async_trait]
pub trait FrameAnnotator: Send + Sync {
    async fn annotate(&self, workspace: &Path, scores: &ScoreMap) -> Result<AnnotatedSet, PipelineError>;
}

/// [`FrameAnnotator`] drawing a banner, a score-coloured border and the
/// score text with the built-in bitmap font.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageAnnotator;

#[async_trait]
impl FrameAnnotator for ImageAnnotator {
    async fn annotate(&self, workspace: &Path, scores: &ScoreMap) -> Result<AnnotatedSet, PipelineError> {
        let workspace = workspace.to_path_buf();
        let scores = scores.clone();

        tokio::task::spawn_blocking(move || annotate_blocking(&workspace, &scores))
            .await
            .map_err(|e| PipelineError::Annotation(format!("annotation task failed: {e}")))?
    }
}

fn annotate_blocking(root: &Path, scores: &ScoreMap) -> Result<AnnotatedSet, PipelineError> {
    let frames_dir = workspace::frames_dir(root);
    let out_dir = workspace::annotated_dir(root);
    std::fs::create_dir_all(&out_dir).map_err(|e| {
        PipelineError::Annotation(format!("cannot create {}: {e}", out_dir.display()))
    })?;

    let mut files = Vec::with_capacity(scores.len());

    for (key, score) in scores {
        if !is_safe_key(key) {
            tracing::warn!(frame = %key, "Skipping frame with unsafe identifier");
            continue;
        }

        let file_name = format!("{key}.{FRAME_EXTENSION}");
        let src = frames_dir.join(&file_name);
        let dst = out_dir.join(&file_name);

        let mut img = match image::open(&src) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(frame = %key, error = %e, "Cannot load frame for annotation");
                continue;
            }
        };

        draw_overlay(&mut img, score);

        if let Err(e) = img.save_with_format(&dst, ImageFormat::Jpeg) {
            tracing::warn!(frame = %key, error = %e, "Cannot write annotated frame");
            continue;
        }
        files.push(dst);
    }

    if files.is_empty() && !scores.is_empty() {
        return Err(PipelineError::Annotation(format!(
            "none of {} scored frames could be annotated",
            scores.len()
        )));
    }

    Ok(AnnotatedSet { dir: out_dir, files })
}

/// Frame identifiers become file names; reject anything that could escape
/// the frames directory.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Green for 0.0 through red for 1.0; grey when the score has no scalar.
pub fn score_color(score: Option<f64>) -> Rgb<u8> {
    match score {
        Some(s) if s.is_finite() => {
            let s = s.clamp(0.0, 1.0);
            Rgb([(255.0 * s).round() as u8, (255.0 * (1.0 - s)).round() as u8, 40])
        }
        _ => UNSCORED_COLOR,
    }
}

/// Draw the banner, border and score text onto `img`.
pub fn draw_overlay(img: &mut RgbImage, score: &RawScore) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let color = score_color(score.extract_float());
    let scale = (width.min(height) / 160).max(1);
    let pad = 2 * scale;
    let banner_height = (glyph::GLYPH_HEIGHT * scale + 2 * pad).min(height);

    for y in 0..banner_height {
        for x in 0..width {
            img.put_pixel(x, y, BANNER_BACKGROUND);
        }
    }

    let border = scale.min(width / 2).min(height / 2);
    for y in 0..height {
        for x in 0..width {
            if x < border || y < border || x >= width - border || y >= height - border {
                img.put_pixel(x, y, color);
            }
        }
    }

    let mut text = score.to_display_string();
    let room = width.saturating_sub(2 * pad);
    while glyph::text_width(&text, scale) > room {
        text.pop();
    }
    glyph::draw_text(img, pad, pad, &text, scale, color);
}
