pub mod clock;
pub mod free_run;
pub mod output;

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::audio::mixer::OutputPort;
use crate::error::SyncError;

pub use clock::TransportClock;

/// Transport state as reported once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Rolling = 1,
    Starting = 2,
}

impl TransportState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportState::Rolling,
            2 => TransportState::Starting,
            _ => TransportState::Stopped,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransportState::Stopped => "stopped",
            TransportState::Rolling => "rolling",
            TransportState::Starting => "starting",
        }
    }
}

/// One transport callback: state and position at the start of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCycle {
    pub state: TransportState,
    /// Absolute sample offset into the transport timeline.
    pub position: u64,
    /// Samples covered by this cycle.
    pub cycle_size: u32,
}

const NO_LOCATE: u64 = u64::MAX;

struct ControlInner {
    sample_rate: u32,
    roll_requested: AtomicBool,
    locate: AtomicU64,
    position: AtomicU64,
    state: AtomicU8,
}

/// User-facing transport commands and the published transport position.
///
/// Commands are latched in atomics and applied by the provider at the next cycle.
#[derive(Clone)]
pub struct TransportControl {
    inner: Arc<ControlInner>,
}

impl TransportControl {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                sample_rate,
                roll_requested: AtomicBool::new(false),
                locate: AtomicU64::new(NO_LOCATE),
                position: AtomicU64::new(0),
                state: AtomicU8::new(TransportState::Stopped as u8),
            }),
        }
    }

    pub fn start(&self) {
        self.inner.roll_requested.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.inner.roll_requested.store(false, Ordering::Release);
    }

    /// Start if stopped, stop if rolling. Returns the new roll request.
    pub fn toggle(&self) -> bool {
        !self.inner.roll_requested.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn locate(&self, samples: u64) {
        self.inner
            .locate
            .store(samples.min(NO_LOCATE - 1), Ordering::Release);
    }

    pub fn locate_seconds(&self, seconds: f64) {
        let samples = (seconds.max(0.0) * f64::from(self.inner.sample_rate)).round() as u64;
        self.locate(samples);
    }

    pub fn roll_requested(&self) -> bool {
        self.inner.roll_requested.load(Ordering::Acquire)
    }

    pub(crate) fn take_locate(&self) -> Option<u64> {
        match self.inner.locate.swap(NO_LOCATE, Ordering::AcqRel) {
            NO_LOCATE => None,
            target => Some(target),
        }
    }

    pub(crate) fn publish(&self, state: TransportState, position: u64) {
        self.inner.state.store(state as u8, Ordering::Relaxed);
        self.inner.position.store(position, Ordering::Relaxed);
    }

    pub fn position(&self) -> u64 {
        self.inner.position.load(Ordering::Relaxed)
    }

    pub fn seconds(&self) -> f64 {
        self.position() as f64 / f64::from(self.inner.sample_rate)
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.inner.state.load(Ordering::Relaxed))
    }

    pub fn is_rolling(&self) -> bool {
        self.state() == TransportState::Rolling
    }
}

pub type ProcessHook = Box<dyn FnMut(TransportCycle) + Send>;
pub type ShutdownHook = Box<dyn FnOnce(String) + Send>;
pub type SizeHook = Box<dyn FnMut(u32) + Send>;
pub type XrunHook = Box<dyn FnMut(Duration) + Send>;

/// Named callback slots a provider invokes.
///
/// - `process`: once per cycle on the provider's real-time thread; must not block.
/// - `shutdown`: at most once, when the provider goes away underneath the session.
/// - `blocksize` / `samplerate`: at activation and whenever the value changes.
/// - `xrun`: when a cycle was delivered late, with the observed delay.
pub struct TransportHooks {
    pub process: ProcessHook,
    pub shutdown: Option<ShutdownHook>,
    pub blocksize: Option<SizeHook>,
    pub samplerate: Option<SizeHook>,
    pub xrun: Option<XrunHook>,
}

impl TransportHooks {
    pub fn new(process: impl FnMut(TransportCycle) + Send + 'static) -> Self {
        Self {
            process: Box::new(process),
            shutdown: None,
            blocksize: None,
            samplerate: None,
            xrun: None,
        }
    }

    pub fn on_shutdown(mut self, hook: impl FnOnce(String) + Send + 'static) -> Self {
        self.shutdown = Some(Box::new(hook));
        self
    }

    pub fn on_blocksize(mut self, hook: impl FnMut(u32) + Send + 'static) -> Self {
        self.blocksize = Some(Box::new(hook));
        self
    }

    pub fn on_samplerate(mut self, hook: impl FnMut(u32) + Send + 'static) -> Self {
        self.samplerate = Some(Box::new(hook));
        self
    }

    pub fn on_xrun(mut self, hook: impl FnMut(Duration) + Send + 'static) -> Self {
        self.xrun = Some(Box::new(hook));
        self
    }
}

/// Shutdown slot shared between the provider's threads; fires at most once.
#[derive(Clone, Default)]
pub struct ShutdownSlot {
    hook: Arc<Mutex<Option<ShutdownHook>>>,
}

impl ShutdownSlot {
    pub fn new(hook: Option<ShutdownHook>) -> Self {
        Self {
            hook: Arc::new(Mutex::new(hook)),
        }
    }

    /// Invoke the hook if it has not fired yet. Returns whether it fired now.
    pub fn fire(&self, reason: impl Into<String>) -> bool {
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match hook {
            Some(hook) => {
                hook(reason.into());
                true
            }
            None => false,
        }
    }
}

/// An external clock that delivers periodic transport cycles.
pub trait TransportProvider {
    fn name(&self) -> &str;
    fn sample_rate(&self) -> u32;
    /// Samples per cycle.
    fn cycle_size(&self) -> u32;
    /// Cycles per second.
    fn cycle_rate(&self) -> f64 {
        f64::from(self.sample_rate()) / f64::from(self.cycle_size().max(1))
    }
    /// Number of physical playback inputs output ports can be wired to.
    fn physical_inputs(&self) -> usize;
    /// True until the provider has been activated once.
    fn first_activation(&self) -> bool;
    fn control(&self) -> TransportControl;
    /// Declare an output port; wiring happens at activation.
    fn connect_output(&mut self, port: OutputPort);
    fn activate(&mut self, hooks: TransportHooks) -> Result<(), SyncError>;
    fn deactivate(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_roll_request() {
        let c = TransportControl::new(48000);
        assert!(!c.roll_requested());
        assert!(c.toggle());
        assert!(c.roll_requested());
        assert!(!c.toggle());
        assert!(!c.roll_requested());
    }

    #[test]
    fn locate_is_latched_once() {
        let c = TransportControl::new(48000);
        c.locate_seconds(1.5);
        assert_eq!(c.take_locate(), Some(72000));
        assert_eq!(c.take_locate(), None);
        c.locate(10);
        c.locate(20);
        assert_eq!(c.take_locate(), Some(20));
    }

    #[test]
    fn shutdown_fires_at_most_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let slot = ShutdownSlot::new(Some(Box::new(move |reason: String| {
            let _ = tx.send(reason);
        })));
        let other = slot.clone();
        assert!(slot.fire("device unplugged"));
        assert!(!other.fire("again"));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["device unplugged".to_string()]);
    }

    #[test]
    fn state_round_trips_through_u8() {
        for s in [TransportState::Stopped, TransportState::Rolling, TransportState::Starting] {
            assert_eq!(TransportState::from_u8(s as u8), s);
        }
    }
}
