use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::state::{RendererInfo, RendererState, Status, StepOutcome};
use crate::error::SyncError;

/// What a producer delivered for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Production {
    Delivered,
    /// Underlying source ran out before the advertised frame count.
    EndOfStream,
}

/// Media-specific capabilities the shared player loop drives.
///
/// All calls happen on the renderer's own worker thread and may block on I/O.
pub trait FrameProducer: Send + 'static {
    /// Produce and deliver the frame at `index`.
    fn produce(&mut self, index: u64) -> Result<Production, SyncError>;
    /// Re-present the last delivered frame without advancing decode state.
    fn hold(&mut self);
    /// Move the read cursor so the next `produce` yields frame `index`.
    fn reposition(&mut self, index: u64) -> Result<(), SyncError>;
    /// Release file handles and other production resources.
    fn release(&mut self) {}
}

/// Sequential advance loop for one renderer.
pub struct PlayerLoop<P: FrameProducer> {
    state: Arc<RendererState>,
    producer: P,
}

impl<P: FrameProducer> PlayerLoop<P> {
    pub fn new(state: Arc<RendererState>, producer: P) -> Self {
        Self { state, producer }
    }

    /// Run until the renderer stops. Parks while no step is requested.
    pub fn run(mut self) {
        self.state.attach_worker(thread::current());
        log::debug!("{}: renderer loop started", self.state.name());

        loop {
            if self.state.status() == Status::Stopped {
                break;
            }
            if self.state.take_step_request() {
                match self.state.consume_step(&mut self.producer) {
                    StepOutcome::Advanced(index) => {
                        log::trace!("{}: frame {index}", self.state.name());
                    }
                    StepOutcome::EndOfMedia | StepOutcome::EndOfStream | StepOutcome::Failed => {
                        break;
                    }
                    StepOutcome::Idle => {}
                }
            } else {
                thread::park();
            }
        }

        self.producer.release();
        log::info!("{}: renderer stopped at frame {}", self.state.name(), self.state.frame_index());
    }
}

/// Handle to a running renderer: its shared state plus the worker thread.
pub struct Renderer {
    state: Arc<RendererState>,
    worker: Option<JoinHandle<()>>,
}

impl Renderer {
    /// Spawn the renderer's loop on a dedicated named thread.
    pub fn spawn<P: FrameProducer>(state: Arc<RendererState>, producer: P) -> Result<Self, SyncError> {
        let player = PlayerLoop::new(state.clone(), producer);
        let worker = thread::Builder::new()
            .name(format!("framelock-{}", state.name()))
            .spawn(move || player.run())?;
        log::info!(
            "{}: renderer ready ({} frames at {:.3} fps, {:.3} frames/cycle)",
            state.name(),
            state.total_frames(),
            state.rate().native_rate(),
            state.frames_per_cycle(),
        );
        Ok(Self {
            state,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn state(&self) -> &Arc<RendererState> {
        &self.state
    }

    pub fn play(&self) {
        self.state.play();
    }

    pub fn pause(&self) {
        self.state.pause();
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn info(&self) -> RendererInfo {
        self.state.info()
    }

    /// Stop the renderer and wait for its loop to release resources and exit.
    pub fn stop(&mut self) {
        self.state.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{}: renderer thread panicked", self.state.name());
            }
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop();
    }
}
