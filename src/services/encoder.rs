//! Encoding backend. One call encodes one bounded segment of the source,
//! which is the unit the orchestrator checkpoints on.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::error::{AppError, AppResult};
use crate::models::quality::Quality;

/// Probed properties of an uploaded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
}

/// One unit of encode work: `[start_ms, start_ms + duration_ms)` of `source`
/// rendered at `quality` into `output`.
#[derive(Debug, Clone)]
pub struct SegmentRequest<'a> {
    pub source: &'a Path,
    pub quality: Quality,
    pub index: u32,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub output: &'a Path,
}

#[async_trait]
pub trait Encoder: Send + Sync {
    async fn probe(&self, source: &Path) -> AppResult<SourceInfo>;

    /// Writes the encoded segment to `req.output`. Dropping the returned
    /// future must abandon the work without leaving a committed segment.
    async fn encode_segment(&self, req: SegmentRequest<'_>) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn segment_args(req: &SegmentRequest<'_>) -> AppResult<Vec<String>> {
        let height = req.quality.height().ok_or_else(|| {
            AppError::InvalidArgument(format!("quality {} cannot be encoded", req.quality))
        })?;
        let kbps = req.quality.bitrate_kbps().unwrap_or(1000);

        Ok(vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-ss".into(),
            format_seconds(req.start_ms),
            "-t".into(),
            format_seconds(req.duration_ms),
            "-i".into(),
            req.source.to_string_lossy().into_owned(),
            "-vf".into(),
            format!("scale=-2:{}", height),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-b:v".into(),
            format!("{}k", kbps),
            "-maxrate".into(),
            format!("{}k", kbps),
            "-bufsize".into(),
            format!("{}k", kbps * 2),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-output_ts_offset".into(),
            format_seconds(req.start_ms),
            "-f".into(),
            "mpegts".into(),
            req.output.to_string_lossy().into_owned(),
        ])
    }
}

fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Extracts the first video stream's size and the container duration from
/// `ffprobe -of json` output.
fn parse_probe(json: &Value) -> AppResult<SourceInfo> {
    let stream = json
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        })
        .ok_or_else(|| AppError::InvalidArgument("source has no video stream".to_string()))?;

    let width = stream.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(AppError::InvalidArgument(
            "source video stream has no dimensions".to_string(),
        ));
    }

    let seconds = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(SourceInfo {
        width,
        height,
        duration_ms: (seconds * 1000.0).round().max(0.0) as u64,
    })
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn probe(&self, source: &Path) -> AppResult<SourceInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_streams", "-show_format", "-of", "json"])
            .arg(source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("ffprobe spawn error: {}", e)))?;

        if !output.status.success() {
            return Err(AppError::Internal(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::Internal(format!("ffprobe json parse: {}", e)))?;
        parse_probe(&json)
    }

    async fn encode_segment(&self, req: SegmentRequest<'_>) -> AppResult<()> {
        if let Some(parent) = req.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args = Self::segment_args(&req)?;
        tracing::debug!(quality = %req.quality, index = req.index, "encoding segment");

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Internal(format!("ffmpeg spawn error: {}", e)))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(req.output).await;
            return Err(AppError::Internal(format!(
                "ffmpeg failed on {} segment {}: {}",
                req.quality,
                req.index,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_output_is_parsed() {
        let raw = json!({
            "streams": [
                {"codec_type": "audio", "sample_rate": "48000"},
                {"codec_type": "video", "width": 1920, "height": 1080}
            ],
            "format": {"duration": "12.345600"}
        });
        let info = parse_probe(&raw).unwrap();
        assert_eq!(
            info,
            SourceInfo { width: 1920, height: 1080, duration_ms: 12346 }
        );
    }

    #[test]
    fn audio_only_source_is_rejected() {
        let raw = json!({"streams": [{"codec_type": "audio"}], "format": {}});
        assert!(matches!(parse_probe(&raw), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn segment_args_scale_to_quality() {
        let src = PathBuf::from("/w/abc/source");
        let out = PathBuf::from("/w/abc/720p/seg_00002.ts");
        let args = FfmpegEncoder::segment_args(&SegmentRequest {
            source: &src,
            quality: Quality::P720,
            index: 2,
            start_ms: 12_000,
            duration_ms: 6_000,
            output: &out,
        })
        .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-ss 12.000 -t 6.000"));
        assert!(joined.contains("scale=-2:720"));
        assert!(joined.contains("-b:v 5000k"));
        assert!(joined.ends_with("-f mpegts /w/abc/720p/seg_00002.ts"));
    }

    #[test]
    fn original_is_not_encodable() {
        let p = PathBuf::from("x");
        let req = SegmentRequest {
            source: &p,
            quality: Quality::Original,
            index: 0,
            start_ms: 0,
            duration_ms: 1,
            output: &p,
        };
        assert!(FfmpegEncoder::segment_args(&req).is_err());
    }
}
