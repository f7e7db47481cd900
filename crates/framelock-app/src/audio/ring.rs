use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Lock-free single-producer single-consumer ring of interleaved f32 samples.
///
/// The renderer loop pushes decoded blocks; the transport callback reads them.
/// Samples are stored as raw bits in atomics so neither side needs `unsafe`.
pub struct SampleRing {
    data: Box<[AtomicU32]>,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl SampleRing {
    /// Capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let size = capacity.max(2).next_power_of_two();
        Self {
            data: (0..size).map(|_| AtomicU32::new(0)).collect(),
            mask: size - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Push as many samples as fit. Returns the number written.
    pub fn push(&self, samples: &[f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Relaxed);
        let rp = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity() - wp.wrapping_sub(rp);
        let to_write = free.min(samples.len());
        for (i, &sample) in samples[..to_write].iter().enumerate() {
            let idx = wp.wrapping_add(i) & self.mask;
            self.data[idx].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write_pos
            .store(wp.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read available samples into dst. Returns number of samples read.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        let available = wp.wrapping_sub(rp);
        let to_read = available.min(dst.len());
        for (i, out) in dst[..to_read].iter_mut().enumerate() {
            let idx = rp.wrapping_add(i) & self.mask;
            *out = f32::from_bits(self.data[idx].load(Ordering::Relaxed));
        }
        self.read_pos
            .store(rp.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Number of samples available to read.
    pub fn available(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        wp.wrapping_sub(rp)
    }
}
