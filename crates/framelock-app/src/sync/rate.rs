use crate::error::SyncError;

/// Maps transport sample positions to a renderer's native frame indices and back.
///
/// Pure arithmetic over two rates fixed at construction; no hidden state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateConverter {
    /// Native frames per second (video fps, audio blocks per second).
    native_rate: f64,
    /// Transport units per second (the transport's sample rate).
    transport_rate: f64,
}

impl RateConverter {
    pub fn new(native_rate: f64, transport_rate: f64) -> Result<Self, SyncError> {
        if !native_rate.is_finite() || native_rate <= 0.0 {
            return Err(SyncError::config(format!(
                "native frame rate must be positive, got {native_rate}"
            )));
        }
        if !transport_rate.is_finite() || transport_rate <= 0.0 {
            return Err(SyncError::config(format!(
                "transport rate must be positive, got {transport_rate}"
            )));
        }
        Ok(Self {
            native_rate,
            transport_rate,
        })
    }

    pub fn native_rate(&self) -> f64 {
        self.native_rate
    }

    /// Native frame index covering the given transport position.
    pub fn to_native(&self, transport_samples: u64) -> u64 {
        (transport_samples as f64 * self.native_rate / self.transport_rate).round() as u64
    }

    /// Transport position at which the given native frame begins.
    pub fn to_transport(&self, native_index: u64) -> u64 {
        (native_index as f64 * self.transport_rate / self.native_rate).round() as u64
    }

    /// Native frames elapsing per transport cycle of `cycle_size` samples.
    pub fn frames_per_cycle(&self, cycle_size: u32) -> f64 {
        f64::from(cycle_size) * self.native_rate / self.transport_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_rates() {
        assert!(RateConverter::new(0.0, 48000.0).is_err());
        assert!(RateConverter::new(25.0, -1.0).is_err());
        assert!(RateConverter::new(f64::NAN, 48000.0).is_err());
        assert!(RateConverter::new(25.0, f64::INFINITY).is_err());
    }

    #[test]
    fn video_rate_against_sample_rate() {
        let r = RateConverter::new(25.0, 48000.0).unwrap();
        assert_eq!(r.to_native(0), 0);
        assert_eq!(r.to_native(48000), 25);
        assert_eq!(r.to_native(1920), 1);
        assert_eq!(r.to_transport(25), 48000);
        assert_eq!(r.to_transport(1), 1920);
    }

    #[test]
    fn to_native_rounds_to_nearest() {
        let r = RateConverter::new(25.0, 48000.0).unwrap();
        // 5000 / 1920 = 2.604
        assert_eq!(r.to_native(5000), 3);
        // 4000 / 1920 = 2.083
        assert_eq!(r.to_native(4000), 2);
    }

    #[test]
    fn to_native_is_monotonic() {
        let pairs = [(25.0, 48000.0), (30.0, 44100.0), (23.976, 48000.0), (43.07, 44100.0), (25.0, 100.0)];
        for (native, transport) in pairs {
            let r = RateConverter::new(native, transport).unwrap();
            let mut prev = 0;
            for pos in (0..200_000u64).step_by(97) {
                let n = r.to_native(pos);
                assert!(n >= prev, "non-monotonic at {pos} for {native}/{transport}");
                prev = n;
            }
        }
    }

    #[test]
    fn round_trip_within_one_frame() {
        let pairs = [(25.0, 48000.0), (29.97, 44100.0), (86.13, 44100.0), (60.0, 96000.0)];
        for (native, transport) in pairs {
            let r = RateConverter::new(native, transport).unwrap();
            for n in [0u64, 1, 2, 59, 1000, 12_345, 1_000_000] {
                let back = r.to_native(r.to_transport(n));
                assert!(back.abs_diff(n) <= 1, "{n} -> {back} for {native}/{transport}");
            }
        }
    }

    #[test]
    fn frames_per_cycle_ratio() {
        let r = RateConverter::new(25.0, 100.0).unwrap();
        assert!((r.frames_per_cycle(10) - 2.5).abs() < 1e-9);
        let audio = RateConverter::new(48000.0 / 512.0, 48000.0).unwrap();
        assert!((audio.frames_per_cycle(512) - 1.0).abs() < 1e-9);
    }
}
