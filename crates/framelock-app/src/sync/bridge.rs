use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use super::state::RendererState;
use crate::transport::{TransportCycle, TransportState};

type RendererList = Arc<Vec<Arc<RendererState>>>;

struct RegistryInner {
    renderers: Mutex<RendererList>,
    generation: AtomicU64,
}

/// The set of renderers included in the per-cycle fan-out.
///
/// Mutations copy the list and swap it in; the real-time side only clones the
/// `Arc` when the generation moved, and only if the lock is free.
#[derive(Clone)]
pub struct RendererRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                renderers: Mutex::new(Arc::new(Vec::new())),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn register(&self, state: Arc<RendererState>) {
        self.mutate(|list| {
            if !list.iter().any(|r| Arc::ptr_eq(r, &state)) {
                log::debug!("Registered renderer '{}'", state.name());
                list.push(state);
            }
        });
    }

    /// Remove a renderer by name. Returns true if one was removed.
    pub fn deregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.mutate(|list| {
            let before = list.len();
            list.retain(|r| r.name() != name);
            removed = list.len() != before;
        });
        if removed {
            log::debug!("Deregistered renderer '{name}'");
        }
        removed
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<Arc<RendererState>>)) {
        let mut guard = self
            .inner
            .renderers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.as_ref().clone();
        f(&mut next);
        *guard = Arc::new(next);
        self.inner.generation.fetch_add(1, Ordering::Release);
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Non-blocking snapshot; `None` when a mutation currently holds the lock.
    fn try_snapshot(&self) -> Option<RendererList> {
        match self.inner.renderers.try_lock() {
            Ok(guard) => Some(guard.clone()),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner().clone()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Counters the bridge publishes for status queries off the real-time thread.
#[derive(Default)]
pub struct BridgeMonitor {
    cycles: AtomicU64,
    position: AtomicU64,
    state: AtomicU8,
}

impl BridgeMonitor {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Relaxed))
    }
}

/// Fans each transport cycle out to every registered renderer as step/seek requests.
///
/// Runs inside the transport's real-time callback: it only touches atomics and
/// never waits on a renderer.
pub struct TransportBridge {
    registry: RendererRegistry,
    snapshot: RendererList,
    seen_generation: u64,
    previous: Option<TransportState>,
    pause_on_stop: bool,
    monitor: Arc<BridgeMonitor>,
}

impl TransportBridge {
    pub fn new(registry: RendererRegistry, pause_on_stop: bool) -> Self {
        Self {
            registry,
            snapshot: Arc::new(Vec::new()),
            // force a refresh on the first cycle
            seen_generation: u64::MAX,
            previous: None,
            pause_on_stop,
            monitor: Arc::new(BridgeMonitor::default()),
        }
    }

    pub fn monitor(&self) -> Arc<BridgeMonitor> {
        self.monitor.clone()
    }

    pub fn on_cycle(&mut self, cycle: TransportCycle) {
        self.refresh();

        let roll_start =
            cycle.state == TransportState::Rolling && self.previous != Some(TransportState::Rolling);
        let roll_end = self.pause_on_stop
            && cycle.state == TransportState::Stopped
            && self.previous == Some(TransportState::Rolling);

        for renderer in self.snapshot.iter() {
            if roll_start {
                renderer.request_seek(renderer.rate().to_native(cycle.position));
            } else if roll_end {
                renderer.pause();
            }
            renderer.request_step(cycle.position);
        }

        self.previous = Some(cycle.state);
        self.monitor.cycles.fetch_add(1, Ordering::Relaxed);
        self.monitor.position.store(cycle.position, Ordering::Relaxed);
        self.monitor.state.store(cycle.state as u8, Ordering::Relaxed);
    }

    fn refresh(&mut self) {
        let generation = self.registry.generation();
        if generation == self.seen_generation {
            return;
        }
        if let Some(list) = self.registry.try_snapshot() {
            self.snapshot = list;
            self.seen_generation = generation;
        }
    }
}
