use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::decoder::VideoBackend;
use super::types::DecodedFrame;
use crate::error::SyncError;
use crate::sync::{FrameProducer, Production};

/// Where produced frames go to be displayed.
pub trait FrameSink: Send + 'static {
    fn present(&mut self, index: u64, frame: &Arc<DecodedFrame>);
}

/// Shared latest-frame slot; a display thread polls it.
#[derive(Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<(u64, Arc<DecodedFrame>)>>>,
    presented: Arc<AtomicU64>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently presented frame and its index.
    pub fn latest(&self) -> Option<(u64, Arc<DecodedFrame>)> {
        self.latest.lock().ok().and_then(|g| g.clone())
    }

    /// Total presentations, holds included.
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl FrameSink for FrameSlot {
    fn present(&mut self, index: u64, frame: &Arc<DecodedFrame>) {
        if let Ok(mut g) = self.latest.lock() {
            *g = Some((index, frame.clone()));
        }
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}

/// Video frame producer: native frame index maps directly to container frame.
pub struct VideoFrameSource<B: VideoBackend, S: FrameSink> {
    backend: B,
    sink: S,
    last: Option<(u64, Arc<DecodedFrame>)>,
}

impl<B: VideoBackend, S: FrameSink> VideoFrameSource<B, S> {
    pub fn new(backend: B, sink: S) -> Self {
        Self {
            backend,
            sink,
            last: None,
        }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: VideoBackend, S: FrameSink> FrameProducer for VideoFrameSource<B, S> {
    fn produce(&mut self, index: u64) -> Result<Production, SyncError> {
        if self.backend.position() != index && !self.backend.seek(index)? {
            return Ok(Production::EndOfStream);
        }
        let Some(frame) = self.backend.next_frame()? else {
            return Ok(Production::EndOfStream);
        };
        self.sink.present(index, &frame);
        self.last = Some((index, frame));
        Ok(Production::Delivered)
    }

    fn hold(&mut self) {
        if let Some((index, frame)) = &self.last {
            self.sink.present(*index, frame);
        }
    }

    fn reposition(&mut self, index: u64) -> Result<(), SyncError> {
        // past the end is left to produce(), which reports EndOfStream
        self.backend.seek(index).map(|_| ())
    }

    fn release(&mut self) {
        self.backend.close();
    }
}
