use std::path::Path;
use std::sync::Arc;

use super::types::{DecodedFrame, VideoMeta};
use crate::error::SyncError;

/// Container/codec collaborator behind the video frame source.
pub trait VideoBackend: Send + 'static {
    fn meta(&self) -> &VideoMeta;
    /// Index of the frame the next `next_frame` call returns.
    fn position(&self) -> u64;
    /// Move the cursor to `index`. Returns false when `index` is past the data.
    fn seek(&mut self, index: u64) -> Result<bool, SyncError>;
    /// Decode the frame under the cursor and advance; `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Arc<DecodedFrame>>, SyncError>;
    fn close(&mut self) {}
}

impl<B: VideoBackend + ?Sized> VideoBackend for Box<B> {
    fn meta(&self) -> &VideoMeta {
        (**self).meta()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn seek(&mut self, index: u64) -> Result<bool, SyncError> {
        (**self).seek(index)
    }

    fn next_frame(&mut self) -> Result<Option<Arc<DecodedFrame>>, SyncError> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Fully pre-decoded frames held in memory; seeking is an index move.
#[derive(Debug)]
pub struct FrameStore {
    meta: VideoMeta,
    frames: Vec<Arc<DecodedFrame>>,
    cursor: u64,
    closed: bool,
}

impl FrameStore {
    pub fn new(frames: Vec<DecodedFrame>, fps: f64) -> Result<Self, SyncError> {
        let Some(first) = frames.first() else {
            return Err(SyncError::config("video has no frames"));
        };
        if !fps.is_finite() || fps <= 0.0 {
            return Err(SyncError::config(format!("invalid frame rate {fps}")));
        }
        let meta = VideoMeta {
            width: first.width,
            height: first.height,
            fps,
            frame_count: frames.len() as u64,
        };
        Ok(Self {
            meta,
            frames: frames.into_iter().map(Arc::new).collect(),
            cursor: 0,
            closed: false,
        })
    }
}

impl VideoBackend for FrameStore {
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
        self.cursor = index;
        Ok(true)
    }

    fn next_frame(&mut self) -> Result<Option<Arc<DecodedFrame>>, SyncError> {
        if self.closed {
            return Err(SyncError::Decode("video backend is closed".into()));
        }
        let frame = usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.frames.get(i))
            .cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        self.frames = Vec::new();
        self.closed = true;
    }
}

/// Open a video file, dispatching on extension. GIFs are pre-decoded into a
/// `FrameStore`; other containers stream through ffmpeg.
pub fn open_video(path: &Path) -> Result<Box<dyn VideoBackend>, SyncError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if ext == "gif" {
        return Ok(Box::new(load_gif(path)?));
    }
    open_container(path, &ext)
}

#[cfg(feature = "video")]
fn open_container(path: &Path, _ext: &str) -> Result<Box<dyn VideoBackend>, SyncError> {
    Ok(Box::new(super::video::FfmpegVideo::open(path)?))
}

#[cfg(not(feature = "video"))]
fn open_container(_path: &Path, ext: &str) -> Result<Box<dyn VideoBackend>, SyncError> {
    Err(SyncError::config(format!(
        "unsupported video format '{ext}' (build with the `video` feature for ffmpeg decoding)"
    )))
}

/// Load an animated GIF, pre-decoding and compositing all frames.
fn load_gif(path: &Path) -> Result<FrameStore, SyncError> {
    let file = std::fs::File::open(path)?;
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut reader = options.read_info(file)?;

    let width = u32::from(reader.width());
    let height = u32::from(reader.height());

    let mut frames = Vec::new();
    let mut total_delay_ms = 0u64;

    // GIF frames can be partial updates over the previous canvas
    let mut canvas = vec![0u8; (width * height * 4) as usize];

    while let Some(frame) = reader.read_next_frame()? {
        // centiseconds, with a 20ms floor against zero-delay frames
        total_delay_ms += u64::from((u32::from(frame.delay) * 10).max(20));

        let fx = u32::from(frame.left);
        let fy = u32::from(frame.top);
        let fw = u32::from(frame.width);
        let fh = u32::from(frame.height);

        for y in 0..fh {
            for x in 0..fw {
                let src_idx = ((y * fw + x) * 4) as usize;
                let dst_x = fx + x;
                let dst_y = fy + y;
                if dst_x < width && dst_y < height {
                    let dst_idx = ((dst_y * width + dst_x) * 4) as usize;
                    let src = &frame.buffer[src_idx..src_idx + 4];
                    if src[3] > 0 {
                        canvas[dst_idx..dst_idx + 4].copy_from_slice(src);
                    }
                }
            }
        }

        frames.push(DecodedFrame {
            data: canvas.clone(),
            width,
            height,
        });
    }

    if frames.is_empty() {
        return Err(SyncError::config(format!("'{}' has no frames", path.display())));
    }

    let fps = frames.len() as f64 * 1000.0 / total_delay_ms as f64;
    log::info!(
        "Loaded GIF: {}x{}, {} frames at {:.2} fps",
        width,
        height,
        frames.len(),
        fps
    );
    FrameStore::new(frames, fps)
}
