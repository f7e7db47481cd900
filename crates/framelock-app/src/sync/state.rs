use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::Thread;

use super::player::{FrameProducer, Production};
use super::rate::RateConverter;
use crate::error::SyncError;

/// Sentinel for "no seek pending" in `seek_target`.
const NO_SEEK: u64 = u64::MAX;

/// Slack for float error when a rate pair lands exactly on one frame per cycle.
const RATIO_EPSILON: f64 = 1e-9;

/// Renderer playback status. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Playing = 0,
    Paused = 1,
    Stopped = 2,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Playing,
            1 => Status::Paused,
            _ => Status::Stopped,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Playing => "playing",
            Status::Paused => "paused",
            Status::Stopped => "stopped",
        }
    }
}

/// Result of one `consume_step` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Index moved and the produce or hold hook ran.
    Advanced(u64),
    /// Index passed the last native frame; renderer is now stopped.
    EndOfMedia,
    /// The producer ran dry before the frame count said it would.
    EndOfStream,
    /// The producer failed; renderer is now stopped.
    Failed,
    /// Renderer already stopped, nothing happened.
    Idle,
}

/// Read-only snapshot for status queries.
#[derive(Debug, Clone)]
pub struct RendererInfo {
    pub name: String,
    pub status: Status,
    pub frame_index: u64,
    pub total_frames: u64,
    pub steps: u64,
    pub seeks: u64,
    /// Native frames the renderer trails the last transport position by.
    pub lag: u64,
    /// Why the renderer stopped, when it stopped on an error.
    pub failure: Option<String>,
}

/// Synchronization state shared between the transport callback and one renderer loop.
///
/// The transport side only ever sets flags and targets; `frame_index` is written
/// exclusively by the owning loop through `consume_step`. Every field is an atomic,
/// and the loop is woken with `Thread::unpark`, so the real-time path never takes a lock.
pub struct RendererState {
    name: String,
    rate: RateConverter,
    frames_per_cycle: f64,
    total_frames: u64,
    status: AtomicU8,
    frame_index: AtomicU64,
    step_requested: AtomicBool,
    seek_target: AtomicU64,
    last_position: AtomicU64,
    steps: AtomicU64,
    seeks: AtomicU64,
    failure: OnceLock<String>,
    worker: OnceLock<Thread>,
}

impl RendererState {
    pub fn new(
        name: impl Into<String>,
        rate: RateConverter,
        cycle_size: u32,
        total_frames: u64,
    ) -> Result<Self, SyncError> {
        let name = name.into();
        if total_frames == 0 {
            return Err(SyncError::config(format!("{name}: media has no frames")));
        }
        if cycle_size == 0 {
            return Err(SyncError::config(format!("{name}: transport cycle size is zero")));
        }
        // a step advances one frame, so a faster source could never keep up
        let frames_per_cycle = rate.frames_per_cycle(cycle_size);
        if frames_per_cycle > 1.0 + RATIO_EPSILON {
            return Err(SyncError::config(format!(
                "{name}: {frames_per_cycle:.2} native frames per {cycle_size}-sample cycle; \
                 at most one frame can advance per cycle, use a smaller cycle"
            )));
        }
        Ok(Self {
            frames_per_cycle,
            name,
            rate,
            total_frames,
            status: AtomicU8::new(Status::Paused as u8),
            frame_index: AtomicU64::new(0),
            step_requested: AtomicBool::new(false),
            seek_target: AtomicU64::new(NO_SEEK),
            last_position: AtomicU64::new(0),
            steps: AtomicU64::new(0),
            seeks: AtomicU64::new(0),
            failure: OnceLock::new(),
            worker: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate(&self) -> &RateConverter {
        &self.rate
    }

    pub fn frames_per_cycle(&self) -> f64 {
        self.frames_per_cycle
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn pending_seek(&self) -> Option<u64> {
        match self.seek_target.load(Ordering::Acquire) {
            NO_SEEK => None,
            target => Some(target),
        }
    }

    #[cfg(test)]
    pub fn step_pending(&self) -> bool {
        self.step_requested.load(Ordering::Acquire)
    }

    pub fn play(&self) {
        self.transition(Status::Playing);
    }

    pub fn pause(&self) {
        self.transition(Status::Paused);
    }

    /// One-way transition to Stopped. Returns true only for the call that stopped it.
    pub fn stop(&self) -> bool {
        let was = self.status.swap(Status::Stopped as u8, Ordering::AcqRel);
        self.wake();
        Status::from_u8(was) != Status::Stopped
    }

    /// Playing <-> Paused; refuses to leave Stopped.
    fn transition(&self, to: Status) -> bool {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (Status::from_u8(cur) != Status::Stopped).then_some(to as u8)
            })
            .is_ok()
    }

    /// Real-time path: flag a step when the renderer is behind `position`.
    pub fn request_step(&self, position: u64) {
        if self.status() == Status::Stopped {
            return;
        }
        self.last_position.store(position, Ordering::Relaxed);
        let index = self.frame_index.load(Ordering::Acquire);
        if self.rate.to_transport(index) < position {
            self.step_requested.store(true, Ordering::Release);
            self.wake();
        }
    }

    /// Real-time path: jump to `native_index` and resume playback. Overwrites any
    /// pending seek.
    pub fn request_seek(&self, native_index: u64) {
        if !self.transition(Status::Playing) {
            return;
        }
        self.seek_target
            .store(native_index.min(NO_SEEK - 1), Ordering::Release);
        self.step_requested.store(true, Ordering::Release);
        self.wake();
    }

    /// Clear the step flag, returning whether it was set.
    pub fn take_step_request(&self) -> bool {
        self.step_requested.swap(false, Ordering::AcqRel)
    }

    /// Perform exactly one advance. Only the owning renderer loop calls this.
    pub fn consume_step<P: FrameProducer + ?Sized>(&self, producer: &mut P) -> StepOutcome {
        if self.status() == Status::Stopped {
            return StepOutcome::Idle;
        }

        let target = self.seek_target.swap(NO_SEEK, Ordering::AcqRel);
        let index = if target == NO_SEEK {
            self.frame_index.load(Ordering::Acquire) + 1
        } else {
            self.seeks.fetch_add(1, Ordering::Relaxed);
            if target <= self.total_frames {
                if let Err(e) = producer.reposition(target) {
                    self.fail(e);
                    return StepOutcome::Failed;
                }
            }
            target
        };
        self.frame_index.store(index, Ordering::Release);
        self.steps.fetch_add(1, Ordering::Relaxed);

        if index > self.total_frames {
            if self.halt() {
                log::info!("{}: end of media at frame {index}", self.name);
            }
            return StepOutcome::EndOfMedia;
        }

        match self.status() {
            Status::Playing => match producer.produce(index) {
                Ok(Production::Delivered) => StepOutcome::Advanced(index),
                Ok(Production::EndOfStream) => {
                    log::info!("{}: source exhausted at frame {index}, stopping", self.name);
                    self.halt();
                    StepOutcome::EndOfStream
                }
                Err(e) => {
                    self.fail(e);
                    StepOutcome::Failed
                }
            },
            Status::Paused => {
                producer.hold();
                StepOutcome::Advanced(index)
            }
            // stop() raced with this step
            Status::Stopped => StepOutcome::Idle,
        }
    }

    /// Stop on a producer error, keeping the first failure for status reports.
    fn fail(&self, e: SyncError) {
        let e = if matches!(e, SyncError::Production { .. }) {
            e
        } else {
            SyncError::production(&self.name, e)
        };
        log::error!("{e}");
        let _ = self.failure.set(e.to_string());
        self.halt();
    }

    fn halt(&self) -> bool {
        let was = self.status.swap(Status::Stopped as u8, Ordering::AcqRel);
        Status::from_u8(was) != Status::Stopped
    }

    pub(super) fn attach_worker(&self, thread: Thread) {
        if self.worker.set(thread).is_err() {
            log::warn!("{}: renderer loop attached twice", self.name);
        }
    }

    fn wake(&self) {
        if let Some(worker) = self.worker.get() {
            worker.unpark();
        }
    }

    pub fn info(&self) -> RendererInfo {
        let index = self.frame_index();
        let target = self
            .rate
            .to_native(self.last_position.load(Ordering::Relaxed));
        RendererInfo {
            name: self.name.clone(),
            status: self.status(),
            frame_index: index,
            total_frames: self.total_frames,
            steps: self.steps.load(Ordering::Relaxed),
            seeks: self.seeks.load(Ordering::Relaxed),
            lag: target.saturating_sub(index),
            failure: self.failure.get().cloned(),
        }
    }
}

impl std::fmt::Debug for RendererState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererState")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("frame_index", &self.frame_index())
            .field("total_frames", &self.total_frames)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Produce(u64),
        Hold,
        Reposition(u64),
        Release,
    }

    /// Producer that records every hook call.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub events: Vec<Event>,
        pub dry_after: Option<u64>,
        pub fail_at: Option<u64>,
    }

    impl FrameProducer for Recorder {
        fn produce(&mut self, index: u64) -> Result<Production, SyncError> {
            if self.fail_at == Some(index) {
                return Err(SyncError::production("recorder", "injected"));
            }
            if self.dry_after.is_some_and(|n| index > n) {
                return Ok(Production::EndOfStream);
            }
            self.events.push(Event::Produce(index));
            Ok(Production::Delivered)
        }

        fn hold(&mut self) {
            self.events.push(Event::Hold);
        }

        fn reposition(&mut self, index: u64) -> Result<(), SyncError> {
            self.events.push(Event::Reposition(index));
            Ok(())
        }

        fn release(&mut self) {
            self.events.push(Event::Release);
        }
    }

    fn state(total: u64) -> RendererState {
        let rate = RateConverter::new(25.0, 48000.0).unwrap();
        RendererState::new("test", rate, 512, total).unwrap()
    }

    #[test]
    fn starts_paused_at_zero() {
        let s = state(10);
        assert_eq!(s.status(), Status::Paused);
        assert_eq!(s.frame_index(), 0);
        assert!(s.pending_seek().is_none());
        assert!(!s.step_pending());
    }

    #[test]
    fn rejects_empty_media() {
        let rate = RateConverter::new(25.0, 48000.0).unwrap();
        assert!(RendererState::new("empty", rate, 512, 0).is_err());
        assert!(RendererState::new("no-cycle", rate, 0, 10).is_err());
    }

    #[test]
    fn frames_per_cycle_precomputed() {
        let s = state(10);
        assert!((s.frames_per_cycle() - 512.0 * 25.0 / 48000.0).abs() < 1e-12);
    }

    #[test]
    fn paused_step_holds() {
        let s = state(10);
        let mut rec = Recorder::default();
        assert_eq!(s.consume_step(&mut rec), StepOutcome::Advanced(1));
        assert_eq!(rec.events, vec![Event::Hold]);
    }

    #[test]
    fn playing_step_produces() {
        let s = state(10);
        s.play();
        let mut rec = Recorder::default();
        s.consume_step(&mut rec);
        s.consume_step(&mut rec);
        assert_eq!(rec.events, vec![Event::Produce(1), Event::Produce(2)]);
        assert_eq!(s.frame_index(), 2);
    }

    #[test]
    fn step_due_only_when_behind() {
        let s = state(10);
        s.request_step(0);
        assert!(!s.step_pending());
        s.request_step(1);
        assert!(s.step_pending());
    }

    #[test]
    fn repeated_step_requests_advance_once() {
        let s = state(100);
        s.play();
        for pos in [10_000, 20_000, 30_000] {
            s.request_step(pos);
        }
        let mut rec = Recorder::default();
        assert!(s.take_step_request());
        s.consume_step(&mut rec);
        assert_eq!(s.frame_index(), 1);
        assert!(!s.take_step_request());
    }

    #[test]
    fn last_seek_wins() {
        let s = state(100);
        s.request_seek(40);
        s.request_seek(7);
        assert_eq!(s.pending_seek(), Some(7));
        let mut rec = Recorder::default();
        assert_eq!(s.consume_step(&mut rec), StepOutcome::Advanced(7));
        assert_eq!(rec.events, vec![Event::Reposition(7), Event::Produce(7)]);
        assert!(s.pending_seek().is_none());
        // next step is a plain increment from the seek target
        assert_eq!(s.consume_step(&mut rec), StepOutcome::Advanced(8));
    }

    #[test]
    fn seek_resumes_playback() {
        let s = state(100);
        s.pause();
        s.request_seek(3);
        assert_eq!(s.status(), Status::Playing);
        assert!(s.step_pending());
    }

    #[test]
    fn index_moves_by_one_except_on_seek() {
        let s = state(1000);
        s.play();
        let mut rec = Recorder::default();
        let mut prev = s.frame_index();
        for i in 0..200u64 {
            let seeking = i % 37 == 5;
            if seeking {
                s.request_seek((i * 7) % 300);
            }
            s.consume_step(&mut rec);
            let now = s.frame_index();
            if !seeking {
                assert_eq!(now, prev + 1);
            }
            prev = now;
        }
    }

    #[test]
    fn passing_total_stops_exactly_once() {
        let s = state(3);
        s.play();
        let mut rec = Recorder::default();
        for expected in 1..=3 {
            assert_eq!(s.consume_step(&mut rec), StepOutcome::Advanced(expected));
        }
        assert_eq!(s.consume_step(&mut rec), StepOutcome::EndOfMedia);
        assert_eq!(s.frame_index(), 4);
        assert_eq!(s.status(), Status::Stopped);

        assert_eq!(s.consume_step(&mut rec), StepOutcome::Idle);
        assert_eq!(s.consume_step(&mut rec), StepOutcome::Idle);
        assert_eq!(s.frame_index(), 4);
        assert_eq!(rec.events.len(), 3);
    }

    #[test]
    fn seek_past_end_stops_without_reposition() {
        let s = state(10);
        s.request_seek(50);
        let mut rec = Recorder::default();
        assert_eq!(s.consume_step(&mut rec), StepOutcome::EndOfMedia);
        assert!(rec.events.is_empty());
        assert_eq!(s.status(), Status::Stopped);
    }

    #[test]
    fn stopped_is_terminal() {
        let s = state(10);
        assert!(s.stop());
        assert!(!s.stop());
        s.play();
        assert_eq!(s.status(), Status::Stopped);
        s.pause();
        assert_eq!(s.status(), Status::Stopped);
        s.request_seek(2);
        assert!(s.pending_seek().is_none());
        s.request_step(1_000_000);
        assert!(!s.step_pending());
    }

    #[test]
    fn exhausted_source_stops_gracefully() {
        let s = state(10);
        s.play();
        let mut rec = Recorder {
            dry_after: Some(2),
            ..Default::default()
        };
        s.consume_step(&mut rec);
        s.consume_step(&mut rec);
        assert_eq!(s.consume_step(&mut rec), StepOutcome::EndOfStream);
        assert_eq!(s.status(), Status::Stopped);
    }

    #[test]
    fn production_failure_stops_renderer() {
        let s = state(10);
        s.play();
        let mut rec = Recorder {
            fail_at: Some(1),
            ..Default::default()
        };
        assert_eq!(s.consume_step(&mut rec), StepOutcome::Failed);
        assert_eq!(s.status(), Status::Stopped);
        assert_eq!(
            s.info().failure.as_deref(),
            Some("recorder: production failed: injected")
        );
    }

    #[test]
    fn collaborator_errors_become_production_failures() {
        struct Broken;
        impl FrameProducer for Broken {
            fn produce(&mut self, _index: u64) -> Result<Production, SyncError> {
                Err(SyncError::Decode("truncated packet".into()))
            }
            fn hold(&mut self) {}
            fn reposition(&mut self, _index: u64) -> Result<(), SyncError> {
                Ok(())
            }
        }

        let s = state(10);
        s.play();
        assert!(s.info().failure.is_none());
        assert_eq!(s.consume_step(&mut Broken), StepOutcome::Failed);
        assert_eq!(
            s.info().failure.as_deref(),
            Some("test: production failed: decode error: truncated packet")
        );
    }

    #[test]
    fn rejects_more_than_one_frame_per_cycle() {
        // 60 fps against 1024-sample cycles at 48 kHz is 1.28 frames per cycle
        let rate = RateConverter::new(60.0, 48000.0).unwrap();
        let err = RendererState::new("video", rate, 1024, 100).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(RendererState::new("video", rate, 800, 100).is_ok());

        // audio blocks smaller than the cycle
        let blocks = RateConverter::new(48000.0 / 240.0, 48000.0).unwrap();
        assert!(RendererState::new("audio", blocks, 480, 100).is_err());
        let blocks = RateConverter::new(48000.0 / 480.0, 48000.0).unwrap();
        assert!(RendererState::new("audio", blocks, 480, 100).is_ok());
    }

    #[test]
    fn info_reports_lag() {
        let s = state(1000);
        // 48000 samples = 25 frames at 25 fps
        s.request_step(48000);
        let info = s.info();
        assert_eq!(info.lag, 25);
        assert_eq!(info.status, Status::Paused);
        assert_eq!(info.total_frames, 1000);
    }
}
