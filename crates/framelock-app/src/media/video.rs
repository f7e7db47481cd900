//! Container video streamed from an ffmpeg subprocess (feature-gated behind `video`).
//!
//! `ffprobe` supplies dimensions, rate and frame count once at open. Frames are
//! then read one at a time from `ffmpeg -f rawvideo -pix_fmt rgba`. A seek only
//! moves the cursor and drops the running decoder; the next read restarts
//! ffmpeg at the cursor's timestamp.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, OnceLock};

use serde::Deserialize;

use super::decoder::VideoBackend;
use super::types::{DecodedFrame, VideoMeta};
use crate::error::SyncError;

/// Rate assumed when ffprobe reports none usable.
const FALLBACK_FPS: f64 = 30.0;

/// True when both `ffmpeg` and `ffprobe` start. Checked once per process.
pub fn tools_present() -> bool {
    static PRESENT: OnceLock<bool> = OnceLock::new();
    *PRESENT.get_or_init(|| {
        ["ffprobe", "ffmpeg"].iter().all(|tool| {
            Command::new(tool)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
        })
    })
}

#[derive(Debug, Deserialize)]
struct StreamReport {
    #[serde(default)]
    streams: Vec<ReportedStream>,
    #[serde(default)]
    format: Option<ReportedFormat>,
}

#[derive(Debug, Deserialize)]
struct ReportedStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportedFormat {
    duration: Option<String>,
}

/// Turn ffprobe's JSON report into stream metadata.
fn parse_stream_report(report: &[u8]) -> Result<VideoMeta, SyncError> {
    let report: StreamReport = serde_json::from_slice(report)
        .map_err(|e| SyncError::Decode(format!("unreadable ffprobe report: {e}")))?;
    let stream = report
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| SyncError::Decode("no video stream".into()))?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(SyncError::Decode("video stream has no dimensions".into()));
    };

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(rate_of)
        .or_else(|| stream.avg_frame_rate.as_deref().and_then(rate_of))
        .unwrap_or(FALLBACK_FPS);

    let counted = stream.nb_frames.as_deref().and_then(|n| n.parse::<u64>().ok());
    let duration = stream
        .duration
        .as_deref()
        .or(report.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());
    let frame_count = match (counted, duration) {
        (Some(n), _) if n > 0 => n,
        (_, Some(secs)) if secs > 0.0 => (secs * fps).round() as u64,
        _ => return Err(SyncError::Decode("cannot tell how many frames the video has".into())),
    };

    Ok(VideoMeta {
        width,
        height,
        fps,
        frame_count,
    })
}

/// `"30000/1001"` or `"25"`; `None` for zero, negative or malformed rates.
fn rate_of(text: &str) -> Option<f64> {
    let rate = match text.split_once('/') {
        Some((num, den)) => num.trim().parse::<f64>().ok()? / den.trim().parse::<f64>().ok()?,
        None => text.trim().parse::<f64>().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Timestamp in seconds where frame `index` starts.
fn start_secs(index: u64, fps: f64) -> f64 {
    index as f64 / fps
}

struct Decoder {
    child: Child,
    stdout: ChildStdout,
}

impl Decoder {
    fn stop(mut self) {
        let _ = self.child.kill();
        if let Err(e) = self.child.wait() {
            log::warn!("ffmpeg did not exit cleanly: {e}");
        }
    }
}

/// Streaming video backend: one frame in memory at a time.
pub struct FfmpegVideo {
    path: PathBuf,
    meta: VideoMeta,
    frame_bytes: usize,
    cursor: u64,
    decoder: Option<Decoder>,
    closed: bool,
}

impl FfmpegVideo {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if !tools_present() {
            return Err(SyncError::config(format!(
                "cannot decode '{}': ffmpeg and ffprobe must both be on PATH",
                path.display()
            )));
        }
        let output = Command::new("ffprobe")
            .args(["-v", "error", "-of", "json", "-show_streams", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(SyncError::Decode(format!(
                "ffprobe rejected '{}'",
                path.display()
            )));
        }
        let meta = parse_stream_report(&output.stdout)?;
        log::info!(
            "Opened {}: {}x{}, {} frames at {:.3} fps",
            path.display(),
            meta.width,
            meta.height,
            meta.frame_count,
            meta.fps
        );
        Ok(Self {
            path: path.to_path_buf(),
            frame_bytes: meta.width as usize * meta.height as usize * 4,
            meta,
            cursor: 0,
            decoder: None,
            closed: false,
        })
    }

    fn start_decoder(&self) -> Result<Decoder, SyncError> {
        let at = start_secs(self.cursor, self.meta.fps);
        log::debug!("{}: decoding from frame {} ({at:.3}s)", self.path.display(), self.cursor);
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{at:.6}")])
            .arg("-i")
            .arg(&self.path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba"])
            .args(["-s", &format!("{}x{}", self.meta.width, self.meta.height)])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(SyncError::Decode("ffmpeg started without an output pipe".into()));
        };
        Ok(Decoder { child, stdout })
    }

    fn drop_decoder(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.stop();
        }
    }
}

impl VideoBackend for FfmpegVideo {
    fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn seek(&mut self, index: u64) -> Result<bool, SyncError> {
        if self.closed {
            return Err(SyncError::Decode("video backend is closed".into()));
        }
        if index >= self.meta.frame_count {
            return Ok(false);
        }
        if index != self.cursor {
            self.drop_decoder();
            self.cursor = index;
        }
        Ok(true)
    }

    fn next_frame(&mut self) -> Result<Option<Arc<DecodedFrame>>, SyncError> {
        if self.closed {
            return Err(SyncError::Decode("video backend is closed".into()));
        }
        if self.cursor >= self.meta.frame_count {
            return Ok(None);
        }
        if self.decoder.is_none() {
            self.decoder = Some(self.start_decoder()?);
        }
        let mut data = vec![0u8; self.frame_bytes];
        let read = match self.decoder.as_mut() {
            Some(decoder) => decoder.stdout.read_exact(&mut data),
            None => return Ok(None),
        };
        match read {
            Ok(()) => {
                self.cursor += 1;
                Ok(Some(Arc::new(DecodedFrame {
                    data,
                    width: self.meta.width,
                    height: self.meta.height,
                })))
            }
            // container shorter than the reported count
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.drop_decoder();
                Ok(None)
            }
            Err(e) => {
                self.drop_decoder();
                Err(SyncError::Decode(format!("reading ffmpeg output: {e}")))
            }
        }
    }

    fn close(&mut self) {
        self.drop_decoder();
        self.closed = true;
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        self.drop_decoder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_strings() {
        assert!((rate_of("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(rate_of("25"), Some(25.0));
        assert_eq!(rate_of("0/0"), None);
        assert_eq!(rate_of("24/0"), None);
        assert_eq!(rate_of("fast"), None);
    }

    #[test]
    fn report_uses_frame_count_when_reported() {
        let report = br#"{
            "streams": [
                {"codec_type": "audio", "duration": "99.0"},
                {"codec_type": "video", "width": 640, "height": 360,
                 "r_frame_rate": "24/1", "nb_frames": "300", "duration": "12.5"}
            ],
            "format": {"duration": "12.6"}
        }"#;
        let meta = parse_stream_report(report).unwrap();
        assert_eq!((meta.width, meta.height), (640, 360));
        assert_eq!(meta.fps, 24.0);
        assert_eq!(meta.frame_count, 300);
    }

    #[test]
    fn report_derives_frame_count_from_duration() {
        let report = br#"{
            "streams": [{"codec_type": "video", "width": 8, "height": 8,
                         "r_frame_rate": "0/0", "avg_frame_rate": "25/1"}],
            "format": {"duration": "4.0"}
        }"#;
        let meta = parse_stream_report(report).unwrap();
        assert_eq!(meta.fps, 25.0);
        assert_eq!(meta.frame_count, 100);
    }

    #[test]
    fn rejects_unusable_reports() {
        let audio_only = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(parse_stream_report(audio_only), Err(SyncError::Decode(_))));
        let no_length = br#"{"streams": [{"codec_type": "video", "width": 8, "height": 8}]}"#;
        assert!(matches!(parse_stream_report(no_length), Err(SyncError::Decode(_))));
        assert!(matches!(parse_stream_report(b"not json"), Err(SyncError::Decode(_))));
    }

    #[test]
    fn restart_point_follows_cursor() {
        assert_eq!(start_secs(0, 25.0), 0.0);
        assert!((start_secs(50, 25.0) - 2.0).abs() < 1e-12);
        assert!((start_secs(1001, 30000.0 / 1001.0) - 33.4).abs() < 1e-3);
    }
}
