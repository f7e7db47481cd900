use std::sync::Arc;

use super::ports::PortConnection;
use super::ring::SampleRing;

/// A renderer's audio output as seen by the transport provider.
#[derive(Clone)]
pub struct OutputPort {
    pub name: String,
    pub ring: Arc<SampleRing>,
    pub channels: usize,
}

impl OutputPort {
    pub fn new(name: impl Into<String>, ring: Arc<SampleRing>, channels: usize) -> Self {
        Self {
            name: name.into(),
            ring,
            channels: channels.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Route {
    port: usize,
    channel: usize,
    input: usize,
}

/// Pulls queued samples from every output port and routes them to device channels.
///
/// All buffers are allocated up front; `mix` runs on the real-time thread.
pub struct OutputMixer {
    ports: Vec<OutputPort>,
    routes: Vec<Route>,
    scratch: Vec<Vec<f32>>,
    device_channels: usize,
    max_frames: usize,
}

impl OutputMixer {
    pub fn new(
        ports: Vec<OutputPort>,
        device_channels: usize,
        connections: &[PortConnection],
        max_frames: usize,
    ) -> Self {
        // flattened output index -> (port, channel), in declaration order
        let flat: Vec<(usize, usize)> = ports
            .iter()
            .enumerate()
            .flat_map(|(p, port)| (0..port.channels).map(move |ch| (p, ch)))
            .collect();

        let routes = connections
            .iter()
            .filter(|c| c.input < device_channels)
            .filter_map(|c| {
                flat.get(c.output).map(|&(port, channel)| Route {
                    port,
                    channel,
                    input: c.input,
                })
            })
            .collect();

        let scratch = ports
            .iter()
            .map(|p| vec![0.0; max_frames * p.channels])
            .collect();

        Self {
            ports,
            routes,
            scratch,
            device_channels: device_channels.max(1),
            max_frames,
        }
    }

    /// Total output channels across all ports.
    #[cfg(test)]
    pub fn output_channels(&self) -> usize {
        self.ports.iter().map(|p| p.channels).sum()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Fill an interleaved device buffer. Unconnected ports are still drained.
    pub fn mix(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = (out.len() / self.device_channels).min(self.max_frames);

        for (port, scratch) in self.ports.iter().zip(self.scratch.iter_mut()) {
            let want = frames * port.channels;
            let got = port.ring.read(&mut scratch[..want]);
            scratch[got..want].fill(0.0);
        }

        for route in &self.routes {
            let channels = self.ports[route.port].channels;
            let src = &self.scratch[route.port];
            for f in 0..frames {
                out[f * self.device_channels + route.input] += src[f * channels + route.channel];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ports::plan_connections;

    fn port(name: &str, channels: usize) -> OutputPort {
        OutputPort::new(name, Arc::new(SampleRing::new(1024)), channels)
    }

    #[test]
    fn mono_port_fills_both_device_channels() {
        let mono = port("audio", 1);
        mono.ring.push(&[0.1, 0.2, 0.3]);
        let mut mixer = OutputMixer::new(vec![mono], 2, &plan_connections(1, 2), 64);
        let mut out = [9.0; 6];
        mixer.mix(&mut out);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn stereo_port_maps_one_to_one() {
        let stereo = port("audio", 2);
        stereo.ring.push(&[1.0, -1.0, 0.5, -0.5]);
        let mut mixer = OutputMixer::new(vec![stereo], 2, &plan_connections(2, 2), 64);
        let mut out = [0.0; 4];
        mixer.mix(&mut out);
        assert_eq!(out, [1.0, -1.0, 0.5, -0.5]);
    }

    #[test]
    fn underrun_pads_with_silence() {
        let stereo = port("audio", 2);
        stereo.ring.push(&[1.0, 1.0]);
        let mut mixer = OutputMixer::new(vec![stereo], 2, &plan_connections(2, 2), 64);
        let mut out = [0.0; 6];
        mixer.mix(&mut out);
        assert_eq!(out, [1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn unconnected_port_is_drained() {
        let mono = port("audio", 1);
        mono.ring.push(&[0.7; 4]);
        let ring = mono.ring.clone();
        let mut mixer = OutputMixer::new(vec![mono], 2, &[], 64);
        let mut out = [0.0; 8];
        mixer.mix(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(ring.available(), 0);
        assert_eq!(mixer.route_count(), 0);
    }

    #[test]
    fn routes_past_device_width_are_dropped() {
        let quad = port("audio", 4);
        let connections = plan_connections(4, 4);
        let mixer = OutputMixer::new(vec![quad], 2, &connections, 64);
        assert_eq!(mixer.route_count(), 2);
        assert_eq!(mixer.output_channels(), 4);
    }
}
