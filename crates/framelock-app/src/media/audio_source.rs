use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::audio_file::AudioBackend;
use crate::audio::SampleRing;
use crate::error::SyncError;
use crate::sync::{FrameProducer, Production};

/// Audio block producer: native frame index is the block index.
///
/// Blocks are pushed into the ring the transport output drains. While paused
/// nothing is pushed, so the output plays silence once the ring runs dry.
pub struct AudioBlockSource<B: AudioBackend> {
    backend: B,
    ring: Arc<SampleRing>,
    buf: Vec<f32>,
    dropped: Arc<AtomicU64>,
}

impl<B: AudioBackend> AudioBlockSource<B> {
    pub fn new(backend: B, ring: Arc<SampleRing>) -> Self {
        let samples = backend.block_size() as usize * usize::from(backend.meta().channels);
        Self {
            backend,
            ring,
            buf: Vec::with_capacity(samples),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of samples the ring refused because the output fell behind.
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl<B: AudioBackend> FrameProducer for AudioBlockSource<B> {
    fn produce(&mut self, index: u64) -> Result<Production, SyncError> {
        if self.backend.block_position() != index && !self.backend.seek_block(index)? {
            return Ok(Production::EndOfStream);
        }
        if self.backend.read_block(&mut self.buf)? == 0 {
            return Ok(Production::EndOfStream);
        }
        let written = self.ring.push(&self.buf);
        if written < self.buf.len() {
            self.dropped
                .fetch_add((self.buf.len() - written) as u64, Ordering::Relaxed);
            log::debug!("audio ring full, dropped {} samples", self.buf.len() - written);
        }
        Ok(Production::Delivered)
    }

    fn hold(&mut self) {}

    fn reposition(&mut self, index: u64) -> Result<(), SyncError> {
        self.backend.seek_block(index).map(|_| ())
    }

    fn release(&mut self) {
        self.backend.close();
    }
}
