//! FFmpeg/FFprobe command utilities used by the frame extractor.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("ffprobe/ffmpeg timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Default wall-clock limit for one ffprobe or ffmpeg invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn inspect_video(path: &Path, timeout: Duration) -> Result<FfprobeOutput, FfmpegError> {
    ensure_exists(path)?;

    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path);
    let stdout = run_tool(&mut cmd, timeout).await?;

    serde_json::from_slice::<FfprobeOutput>(&stdout).map_err(|e| {
        FfmpegError::ParseError(format!("{e}: {}", String::from_utf8_lossy(&stdout)))
    })
}

/// Decode the frame nearest `timestamp_secs` into `output_path` (JPEG,
/// native resolution, audio and subtitles ignored).
pub async fn extract_frame(
    video_path: &Path,
    output_path: &Path,
    timestamp_secs: f64,
    timeout: Duration,
) -> Result<(), FfmpegError> {
    ensure_exists(video_path)?;

    let seek = format!("{timestamp_secs:.3}");
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-ss", &seek, "-i"])
        .arg(video_path)
        .args(["-an", "-sn", "-frames:v", "1", "-q:v", "2"])
        .arg(output_path);
    run_tool(&mut cmd, timeout).await.map(drop)
}

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if path.exists() {
        Ok(())
    } else {
        Err(FfmpegError::VideoNotFound(path.display().to_string()))
    }
}

/// Run an ffmpeg-family tool to completion and return its stdout. The
/// child is killed if it outlives `timeout`.
async fn run_tool(cmd: &mut Command, timeout: Duration) -> Result<Vec<u8>, FfmpegError> {
    let start = Instant::now();
    let output = match tokio::time::timeout(timeout, cmd.kill_on_drop(true).output()).await {
        Ok(output) => output.map_err(FfmpegError::NotFound)?,
        Err(_elapsed) => {
            return Err(FfmpegError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    };

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
pub fn first_video_stream(media: &FfprobeOutput) -> Option<&FfprobeStream> {
    media
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Duration in seconds: the container's if present, else the first video
/// stream's, else `0.0`.
pub fn parse_duration(media: &FfprobeOutput) -> f64 {
    let stream_duration = first_video_stream(media).and_then(|s| s.duration.as_deref());

    [media.format.duration.as_deref(), stream_duration]
        .into_iter()
        .flatten()
        .find_map(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Frames per second of the first video stream; `0.0` when unknown.
pub fn parse_framerate(media: &FfprobeOutput) -> f64 {
    first_video_stream(media)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// `"24000/1001"` → 23.976; a bare number parses as itself; garbage or a zero
/// denominator yields `0.0`.
fn parse_fraction(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => match (num.parse::<f64>(), den.parse::<f64>()) {
            (Ok(num), Ok(den)) if den > 0.0 => num / den,
            _ => 0.0,
        },
        None => s.parse().unwrap_or(0.0),
    }
}

/// Frame count of the first video stream, estimated from duration and
/// framerate when the container does not record it; `0` when unknown.
pub fn parse_total_frames(media: &FfprobeOutput) -> i64 {
    let recorded = first_video_stream(media)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|n| n.parse::<i64>().ok());
    if let Some(n) = recorded {
        return n;
    }

    let (duration, fps) = (parse_duration(media), parse_framerate(media));
    if duration > 0.0 && fps > 0.0 {
        (duration * fps).round() as i64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(r_frame_rate: Option<&str>, duration: Option<&str>, nb_frames: Option<&str>) -> FfprobeStream {
        FfprobeStream {
            index: 0,
            codec_name: Some("h264".into()),
            codec_type: Some("video".into()),
            r_frame_rate: r_frame_rate.map(Into::into),
            duration: duration.map(Into::into),
            nb_frames: nb_frames.map(Into::into),
        }
    }

    fn format(duration: Option<&str>) -> FfprobeFormat {
        FfprobeFormat {
            duration: duration.map(Into::into),
            format_name: None,
        }
    }

    #[test]
    fn fraction_integer_rate() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
    }

    #[test]
    fn fraction_ntsc_rate() {
        let fps = parse_fraction("24000/1001");
        assert!((fps - 23.976).abs() < 0.01);
    }

    #[test]
    fn fraction_zero_denominator_is_zero() {
        assert!((parse_fraction("30/0") - 0.0).abs() < 0.001);
    }

    #[test]
    fn duration_prefers_container() {
        let media = FfprobeOutput {
            streams: vec![],
            format: format(Some("120.5")),
        };
        assert!((parse_duration(&media) - 120.5).abs() < 0.001);
    }

    #[test]
    fn duration_falls_back_to_stream() {
        let media = FfprobeOutput {
            streams: vec![video_stream(Some("30/1"), Some("60.0"), None)],
            format: format(None),
        };
        assert!((parse_duration(&media) - 60.0).abs() < 0.001);
    }

    #[test]
    fn total_frames_uses_recorded_count() {
        let media = FfprobeOutput {
            streams: vec![video_stream(Some("30/1"), Some("10.0"), Some("300"))],
            format: format(Some("10.0")),
        };
        assert_eq!(parse_total_frames(&media), 300);
    }

    #[test]
    fn total_frames_estimated_from_rate() {
        let media = FfprobeOutput {
            streams: vec![video_stream(Some("30/1"), None, None)],
            format: format(Some("10.0")),
        };
        assert_eq!(parse_total_frames(&media), 300);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tool_is_killed_at_timeout() {
        let start = Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let err = run_tool(&mut cmd, Duration::from_millis(100)).await.unwrap_err();

        assert!(matches!(err, FfmpegError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);

        match run_tool(&mut cmd, Duration::from_secs(5)).await {
            Err(FfmpegError::ExecutionFailed { exit_code, stderr }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[test]
    fn audio_only_container_has_no_video_stream() {
        let media: FfprobeOutput = serde_json::from_str(
            r#"{"streams":[{"index":0,"codec_type":"audio"}],"format":{"duration":"3.0"}}"#,
        )
        .unwrap();
        assert!(first_video_stream(&media).is_none());
        assert_eq!(parse_total_frames(&media), 0);
    }
}
