/// A decoded video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub data: Vec<u8>, // RGBA8
    pub width: u32,
    pub height: u32,
}

/// What a video backend reports at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoMeta {
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// What an audio backend reports at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMeta {
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames (one sample per channel).
    pub frames: u64,
}

impl AudioMeta {
    /// Number of whole or partial blocks of `block_size` frames.
    pub fn block_count(&self, block_size: u32) -> u64 {
        self.frames.div_ceil(u64::from(block_size.max(1)))
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames as f64 / f64::from(self.sample_rate)
        }
    }
}
