use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig, StreamInstant};

use super::{ShutdownSlot, TransportClock, TransportControl, TransportHooks, TransportProvider};
use crate::audio::{OutputMixer, OutputPort, PortConnection, plan_connections};
use crate::error::SyncError;

/// Largest callback we preallocate mixing buffers for.
const MAX_CALLBACK_FRAMES: usize = 8192;

/// Transport clocked by a cpal output stream: every device callback is one cycle.
///
/// The callback advances the transport clock, runs the process hook, then mixes
/// the connected output ports into the device buffer. Device loss reported by the
/// stream error callback fires the shutdown hook.
pub struct CpalTransport {
    device: cpal::Device,
    device_name: String,
    sample_rate: u32,
    cycle_size: u32,
    channels: u16,
    auto_connect: bool,
    control: TransportControl,
    ports: Vec<OutputPort>,
    connections: Vec<PortConnection>,
    activations: u32,
    stream: Option<Stream>,
}

impl CpalTransport {
    /// Open the named output device, or the default one.
    pub fn open(device_name: Option<&str>, cycle_size: u32) -> Result<Self, SyncError> {
        if cycle_size == 0 || cycle_size as usize > MAX_CALLBACK_FRAMES {
            return Err(SyncError::config(format!(
                "cycle size must be between 1 and {MAX_CALLBACK_FRAMES}, got {cycle_size}"
            )));
        }
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .output_devices()
                .map_err(|e| SyncError::config(format!("cannot list output devices: {e}")))?
                .find(|d| describe(d) == wanted)
                .ok_or_else(|| SyncError::config(format!("output device '{wanted}' not found")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| SyncError::config("no audio output device found"))?,
        };
        let device_name = describe(&device);

        let config = device
            .default_output_config()
            .map_err(|e| SyncError::config(format!("{device_name}: no output config: {e}")))?;
        if config.sample_format() != SampleFormat::F32 {
            return Err(SyncError::config(format!(
                "{device_name}: unsupported sample format {:?}",
                config.sample_format()
            )));
        }
        let sample_rate = config.sample_rate();
        let channels = config.channels();
        log::info!("Audio output device: {device_name} ({sample_rate} Hz, {channels} ch)");

        Ok(Self {
            device,
            device_name,
            sample_rate,
            cycle_size,
            channels,
            auto_connect: true,
            control: TransportControl::new(sample_rate),
            ports: Vec::new(),
            connections: Vec::new(),
            activations: 0,
            stream: None,
        })
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.map(|d| describe(&d)).collect())
            .unwrap_or_default()
    }
}

/// How late a callback arrived when the gap since the previous one exceeds two
/// periods of `frames` samples. `None` for on-time callbacks.
fn lateness(gap: Duration, frames: u32, sample_rate: u32) -> Option<Duration> {
    if sample_rate == 0 {
        return None;
    }
    let period = Duration::from_secs_f64(f64::from(frames) / f64::from(sample_rate));
    let late = gap.checked_sub(period)?;
    (late > period).then_some(late)
}

/// Stream setup failures abort startup as configuration errors.
fn setup_failed(action: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::config(format!("cannot {action} output stream: {e}"))
}

fn describe(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "Unknown".into())
}

impl TransportProvider for CpalTransport {
    fn name(&self) -> &str {
        &self.device_name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn cycle_size(&self) -> u32 {
        self.cycle_size
    }

    fn physical_inputs(&self) -> usize {
        usize::from(self.channels)
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
        if self.stream.is_some() {
            return Err(SyncError::config("transport is already active"));
        }
        if self.first_activation() && self.auto_connect {
            let outputs = self.ports.iter().map(|p| p.channels).sum();
            self.connections = plan_connections(outputs, self.physical_inputs());
            for c in &self.connections {
                log::info!("Connected output {} -> {}:playback_{}", c.output, self.device_name, c.input + 1);
            }
        }
        self.activations += 1;

        let TransportHooks {
            mut process,
            shutdown,
            mut blocksize,
            samplerate,
            mut xrun,
        } = hooks;
        if let Some(mut hook) = samplerate {
            hook(self.sample_rate);
        }
        let shutdown = ShutdownSlot::new(shutdown);

        let channels = usize::from(self.channels);
        let mut mixer = OutputMixer::new(
            self.ports.clone(),
            channels,
            &self.connections,
            MAX_CALLBACK_FRAMES,
        );
        let routes = mixer.route_count();
        let mut clock = TransportClock::new(self.control.clone());
        let mut last_size = 0u32;
        let mut last_callback: Option<StreamInstant> = None;
        let sample_rate = self.sample_rate;

        let config = StreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            buffer_size: BufferSize::Fixed(self.cycle_size),
        };
        let device_name = self.device_name.clone();

        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let frames = (data.len() / channels) as u32;
                    let now = info.timestamp().callback;
                    let gap = last_callback.and_then(|prev| now.duration_since(&prev));
                    if let Some(late) = gap.and_then(|g| lateness(g, frames, sample_rate)) {
                        if let Some(hook) = xrun.as_mut() {
                            hook(late);
                        }
                    }
                    last_callback = Some(now);
                    if frames != last_size {
                        last_size = frames;
                        if let Some(hook) = blocksize.as_mut() {
                            hook(frames);
                        }
                    }
                    process(clock.next_cycle(frames));
                    mixer.mix(data);
                },
                move |err| {
                    log::error!("Audio output stream error: {err}");
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        shutdown.fire(format!("{device_name} is no longer available"));
                    }
                },
                None,
            )
            .map_err(|e| setup_failed("open", e))?;
        stream
            .play()
            .map_err(|e| setup_failed("start", e))?;
        self.stream = Some(stream);
        log::info!(
            "Audio transport active on {}: {} samples/cycle ({:.1} cycles/s), {routes} output route(s)",
            self.device_name,
            self.cycle_size,
            self.cycle_rate()
        );
        Ok(())
    }

    fn deactivate(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause output stream: {e}");
            }
            drop(stream);
            log::info!("Audio transport on {} deactivated", self.device_name);
        }
    }
}

impl Drop for CpalTransport {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_time_callbacks_are_not_late() {
        // 480 samples at 48 kHz is a 10ms period
        assert_eq!(lateness(Duration::from_millis(10), 480, 48000), None);
        assert_eq!(lateness(Duration::from_millis(19), 480, 48000), None);
        assert_eq!(lateness(Duration::ZERO, 480, 48000), None);
    }

    #[test]
    fn callback_late_by_more_than_a_period() {
        let late = lateness(Duration::from_millis(35), 480, 48000).unwrap();
        assert!((late.as_secs_f64() - 0.025).abs() < 1e-9);
        assert_eq!(lateness(Duration::from_millis(35), 480, 0), None);
    }

    #[test]
    fn stream_setup_failures_are_configuration_errors() {
        let e = setup_failed("open", "device busy");
        assert!(matches!(e, SyncError::Configuration(_)));
        assert_eq!(e.to_string(), "configuration error: cannot open output stream: device busy");
    }
}
