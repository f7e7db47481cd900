use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{
    ShutdownSlot, TransportClock, TransportControl, TransportHooks, TransportProvider,
};
use crate::audio::{OutputMixer, OutputPort, PortConnection, plan_connections};
use crate::error::SyncError;

/// Transport driven by a software timer instead of audio hardware.
///
/// Cycles are paced to the nominal period; audio sent to its outputs is mixed
/// and discarded. Used for headless sessions and tests.
pub struct FreeRunningTransport {
    sample_rate: u32,
    cycle_size: u32,
    physical_inputs: usize,
    auto_connect: bool,
    max_cycles: Option<u64>,
    control: TransportControl,
    ports: Vec<OutputPort>,
    connections: Vec<PortConnection>,
    activations: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FreeRunningTransport {
    pub fn new(sample_rate: u32, cycle_size: u32, physical_inputs: usize) -> Result<Self, SyncError> {
        if sample_rate == 0 || cycle_size == 0 {
            return Err(SyncError::config(format!(
                "free-running transport needs a positive rate and cycle size (got {sample_rate} Hz, {cycle_size} samples)"
            )));
        }
        Ok(Self {
            sample_rate,
            cycle_size,
            physical_inputs,
            auto_connect: true,
            max_cycles: None,
            control: TransportControl::new(sample_rate),
            ports: Vec::new(),
            connections: Vec::new(),
            activations: 0,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Shut the transport down (firing the shutdown hook) after this many cycles.
    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    #[cfg(test)]
    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }
}

impl TransportProvider for FreeRunningTransport {
    fn name(&self) -> &str {
        "free-running"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn cycle_size(&self) -> u32 {
        self.cycle_size
    }

    fn physical_inputs(&self) -> usize {
        self.physical_inputs
    }

    fn first_activation(&self) -> bool {
        self.activations == 0
    }

    fn control(&self) -> TransportControl {
        self.control.clone()
    }

    fn connect_output(&mut self, port: OutputPort) {
        log::debug!("Output port '{}' ({} ch) registered", port.name, port.channels);
        self.ports.push(port);
    }

    fn activate(&mut self, hooks: TransportHooks) -> Result<(), SyncError> {
        if self.worker.is_some() {
            return Err(SyncError::config("transport is already active"));
        }
        if self.first_activation() && self.auto_connect {
            let outputs = self.ports.iter().map(|p| p.channels).sum();
            self.connections = plan_connections(outputs, self.physical_inputs);
            for c in &self.connections {
                log::info!("Connected output {} -> playback_{}", c.output, c.input + 1);
            }
        }
        self.activations += 1;

        let TransportHooks {
            mut process,
            shutdown,
            blocksize,
            samplerate,
            mut xrun,
        } = hooks;
        if let Some(mut hook) = samplerate {
            hook(self.sample_rate);
        }
        if let Some(mut hook) = blocksize {
            hook(self.cycle_size);
        }
        let shutdown = ShutdownSlot::new(shutdown);

        let cycle_size = self.cycle_size;
        let period = Duration::from_secs_f64(f64::from(cycle_size) / f64::from(self.sample_rate));
        let max_cycles = self.max_cycles;
        let device_channels = self.physical_inputs.max(1);
        let mut mixer = OutputMixer::new(
            self.ports.clone(),
            device_channels,
            &self.connections,
            cycle_size as usize,
        );
        let routes = mixer.route_count();
        let mut clock = TransportClock::new(self.control.clone());
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let worker = thread::Builder::new()
            .name("framelock-transport".into())
            .spawn(move || {
                let mut buf = vec![0.0f32; cycle_size as usize * device_channels];
                let mut cycles = 0u64;
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    process(clock.next_cycle(cycle_size));
                    mixer.mix(&mut buf);
                    cycles += 1;

                    if max_cycles.is_some_and(|max| cycles >= max) {
                        running.store(false, Ordering::Release);
                        log::info!("Free-running transport finished after {cycles} cycles");
                        shutdown.fire("free-running transport reached its cycle limit");
                        break;
                    }

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else if now - next > period {
                        if let Some(hook) = xrun.as_mut() {
                            hook(now - next);
                        }
                        next = now;
                    }
                }
            })?;
        self.worker = Some(worker);
        log::info!(
            "Free-running transport active: {} Hz, {} samples/cycle ({:.1} cycles/s), {routes} output route(s)",
            self.sample_rate,
            self.cycle_size,
            self.cycle_rate()
        );
        Ok(())
    }

    fn deactivate(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Transport thread panicked");
            }
            log::info!("Free-running transport deactivated");
        }
    }
}

impl Drop for FreeRunningTransport {
    fn drop(&mut self) {
        self.deactivate();
    }
}
