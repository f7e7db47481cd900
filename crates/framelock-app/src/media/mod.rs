pub mod audio_file;
pub mod audio_source;
pub mod decoder;
pub mod types;
#[cfg(feature = "video")]
pub mod video;
pub mod video_source;

pub use audio_file::{AudioBackend, WavFile};
pub use audio_source::AudioBlockSource;
pub use decoder::{VideoBackend, open_video};
pub use video_source::{FrameSlot, VideoFrameSource};
