//! Video decoding through the `ffmpeg` / `ffprobe` executables.
//!
//! Each seek runs one `ffmpeg` process that writes a single raw RGBA frame
//! to stdout. Metadata comes from `ffprobe` JSON output at open time.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use framewright_common::config::DecodeConfig;
use framewright_common::error::{FramewrightError, FramewrightResult};
use framewright_project_model::media::MediaKind;

use super::{DecodeBackend, DecoderHandle, SourceDescriptor, SourceInfo};
use crate::bitmap::Bitmap;

/// Decodes video files by shelling out to ffmpeg.
#[derive(Debug)]
pub struct FfmpegCliBackend {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    available: OnceLock<bool>,
}

impl FfmpegCliBackend {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            available: OnceLock::new(),
        }
    }

    pub fn from_config(config: &DecodeConfig) -> Self {
        Self::new(config.ffmpeg_bin.clone(), config.ffprobe_bin.clone())
    }

    pub fn ffmpeg_bin(&self) -> &str {
        &self.ffmpeg_bin
    }

    pub fn ffprobe_bin(&self) -> &str {
        &self.ffprobe_bin
    }

    /// Whether `ffprobe` is runnable.
    pub fn ffprobe_available(&self) -> bool {
        command_runs(&self.ffprobe_bin)
    }

    async fn probe(&self, path: &Path) -> FramewrightResult<SourceInfo> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate:stream_tags=rotate:stream_side_data=rotation:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                FramewrightError::backend_unavailable(format!(
                    "failed to run {}: {e}",
                    self.ffprobe_bin
                ))
            })?;

        if !output.status.success() {
            return Err(FramewrightError::decode(format!(
                "ffprobe failed for {} ({}): {}",
                path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe_output(&output.stdout, path)
    }

    /// Availability check that does not block the runtime. The answer is
    /// shared with [`DecodeBackend::is_available`].
    async fn check_available(&self) -> bool {
        if let Some(available) = self.available.get() {
            return *available;
        }
        let available = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        *self.available.get_or_init(|| available)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees. ffmpeg applies it when decoding.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse().ok())
            })
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(stdout: &[u8], path: &Path) -> FramewrightResult<SourceInfo> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)?;
    let stream = probe.streams.first().ok_or_else(|| {
        FramewrightError::decode(format!("no video stream in {}", path.display()))
    })?;

    let (width, height) = match (stream.width, stream.height) {
        // Quarter turns swap the displayed dimensions.
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            if (stream.rotation().round() as i64).rem_euclid(180) == 90 {
                (h, w)
            } else {
                (w, h)
            }
        }
        _ => {
            return Err(FramewrightError::decode(format!(
                "missing video dimensions in {}",
                path.display()
            )))
        }
    };

    Ok(SourceInfo {
        width,
        height,
        duration_secs: probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0),
        fps: stream.r_frame_rate.as_deref().and_then(parse_rational),
        still: false,
    })
}

/// Parse ffprobe rationals such as `30000/1001`.
fn parse_rational(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/').unwrap_or((raw, "1"));
    let num = num.trim().parse::<f64>().ok()?;
    let den = den.trim().parse::<f64>().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Arguments extracting one RGBA frame at `time_secs`, scaled to the
/// displayed size of `info` so the buffer always matches it.
fn frame_args(path: &Path, time_secs: f64, info: &SourceInfo) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-v", "error", "-ss"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(format!("{time_secs:.6}").into());
    args.push("-i".into());
    args.push(path.as_os_str().to_owned());
    args.push("-vf".into());
    args.push(format!("scale={}:{}", info.width, info.height).into());
    for arg in ["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "-"] {
        args.push(arg.into());
    }
    args
}

fn command_runs(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl DecodeBackend for FfmpegCliBackend {
    fn name(&self) -> &str {
        "ffmpeg-cli"
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| command_runs(&self.ffmpeg_bin))
    }

    async fn open(&self, source: &SourceDescriptor) -> FramewrightResult<Box<dyn DecoderHandle>> {
        if source.kind != MediaKind::Video {
            return Err(FramewrightError::unsupported(format!(
                "ffmpeg backend only decodes video, got {:?}",
                source.kind
            )));
        }
        if !self.check_available().await {
            return Err(FramewrightError::backend_unavailable(format!(
                "{} is not installed or not on PATH",
                self.ffmpeg_bin
            )));
        }
        let path = source.path.clone().ok_or_else(|| {
            FramewrightError::unsupported(format!("not a local file: {}", source.locator))
        })?;
        if !path.exists() {
            return Err(FramewrightError::FileNotFound { path });
        }

        let info = self.probe(&path).await?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = ?info.fps,
            "Opened video source"
        );

        Ok(Box::new(FfmpegDecoder {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            path,
            info,
            current: None,
        }))
    }
}

struct FfmpegDecoder {
    ffmpeg_bin: String,
    path: PathBuf,
    info: SourceInfo,
    current: Option<Bitmap>,
}

#[async_trait::async_trait]
impl DecoderHandle for FfmpegDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn seek(&mut self, time_secs: f64) -> FramewrightResult<()> {
        let time_secs = match self.info.duration_secs {
            Some(end) => time_secs.clamp(0.0, end),
            None => time_secs.max(0.0),
        };

        let output = Command::new(&self.ffmpeg_bin)
            .args(frame_args(&self.path, time_secs, &self.info))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(FramewrightError::decode(format!(
                "ffmpeg frame decode failed at {time_secs:.3}s for {} ({}): {}",
                self.path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(FramewrightError::decode(format!(
                "no frame at {time_secs:.3}s in {}",
                self.path.display()
            )));
        }

        self.current = Some(Bitmap::from_rgba(
            self.info.width,
            self.info.height,
            output.stdout,
        )?);
        Ok(())
    }

    fn current_frame(&self) -> FramewrightResult<Bitmap> {
        self.current
            .clone()
            .ok_or_else(|| FramewrightError::decode("no frame decoded yet"))
    }

    async fn close(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("30/1"), Some(30.0));
        assert!((parse_rational("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rational("25"), Some(25.0));
        assert_eq!(parse_rational("0/0"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "programs": [],
            "streams": [{"width": 1280, "height": 720, "r_frame_rate": "24/1"}],
            "format": {"duration": "12.500000"}
        }"#;
        let info = parse_probe_output(json, Path::new("clip.mp4")).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.fps, Some(24.0));
        assert_eq!(info.duration_secs, Some(12.5));
        assert!(!info.still);
    }

    #[test]
    fn test_rotated_stream_reports_displayed_size() {
        let json = br#"{
            "streams": [{
                "width": 1920, "height": 1080, "r_frame_rate": "30/1",
                "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]
            }],
            "format": {"duration": "4.0"}
        }"#;
        let info = parse_probe_output(json, Path::new("portrait.mp4")).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let json = br#"{"streams": [{"width": 640, "height": 480, "tags": {"rotate": "180"}}]}"#;
        let info = parse_probe_output(json, Path::new("flipped.mp4")).unwrap();
        assert_eq!((info.width, info.height), (640, 480));
    }

    #[test]
    fn test_frame_args_force_displayed_size() {
        let info = SourceInfo {
            width: 1080,
            height: 1920,
            duration_secs: Some(4.0),
            fps: Some(30.0),
            still: false,
        };
        let args: Vec<String> = frame_args(Path::new("portrait.mp4"), 1.5, &info)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "scale=1080:1920");
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "1.500000");
        assert!(ss < args.iter().position(|a| a == "-i").unwrap());
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let json = br#"{"streams": [], "format": {"duration": "3.0"}}"#;
        assert!(parse_probe_output(json, Path::new("song.mp3")).is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_reports_unavailable() {
        let backend = FfmpegCliBackend::new("framewright-no-such-ffmpeg", "framewright-no-such-ffprobe");
        assert!(!backend.is_available());
        assert!(!backend.check_available().await);

        let source = SourceDescriptor {
            source_id: "/tmp/clip.mp4".into(),
            kind: MediaKind::Video,
            locator: "/tmp/clip.mp4".into(),
            path: Some(PathBuf::from("/tmp/clip.mp4")),
        };
        let err = backend.open(&source).await.err().unwrap();
        assert!(!err.is_transient());
    }
}
