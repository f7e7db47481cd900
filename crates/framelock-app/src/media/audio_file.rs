use std::path::Path;

use super::types::AudioMeta;
use crate::error::SyncError;

/// Block-addressed audio collaborator behind the audio block source.
pub trait AudioBackend: Send + 'static {
    fn meta(&self) -> &AudioMeta;
    /// Sample frames per block.
    fn block_size(&self) -> u32;
    /// Block the next `read_block` call returns.
    fn block_position(&self) -> u64;
    /// Move the read cursor to `block`. Returns false when it lies past the data.
    fn seek_block(&mut self, block: u64) -> Result<bool, SyncError>;
    /// Read the block under the cursor as interleaved samples into `out` and
    /// advance. Returns the sample frames read; 0 means the source is exhausted.
    /// A final partial block is padded with silence.
    fn read_block(&mut self, out: &mut Vec<f32>) -> Result<usize, SyncError>;
    fn close(&mut self) {}
}

/// WAV file decoded up front into interleaved f32.
pub struct WavFile {
    meta: AudioMeta,
    samples: Vec<f32>,
    block_size: u32,
    cursor: u64,
    closed: bool,
}

impl WavFile {
    pub fn open(path: &Path, block_size: u32) -> Result<Self, SyncError> {
        if block_size == 0 {
            return Err(SyncError::config("audio block size must be positive"));
        }
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        if spec.channels == 0 {
            return Err(SyncError::Decode(format!("'{}' has no channels", path.display())));
        }
        let meta = AudioMeta {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            frames: (samples.len() / usize::from(spec.channels)) as u64,
        };
        if meta.frames == 0 {
            return Err(SyncError::config(format!("'{}' contains no audio", path.display())));
        }
        log::info!(
            "Loaded WAV: {} ({} Hz, {} ch, {:.2}s, {} blocks of {})",
            path.display(),
            meta.sample_rate,
            meta.channels,
            meta.duration_secs(),
            meta.block_count(block_size),
            block_size
        );
        Ok(Self {
            meta,
            samples,
            block_size,
            cursor: 0,
            closed: false,
        })
    }
}

impl AudioBackend for WavFile {
    fn meta(&self) -> &AudioMeta {
        &self.meta
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_position(&self) -> u64 {
        self.cursor
    }

    fn seek_block(&mut self, block: u64) -> Result<bool, SyncError> {
        if self.closed {
            return Err(SyncError::Decode("audio backend is closed".into()));
        }
        if block >= self.meta.block_count(self.block_size) {
            return Ok(false);
        }
        self.cursor = block;
        Ok(true)
    }

    fn read_block(&mut self, out: &mut Vec<f32>) -> Result<usize, SyncError> {
        if self.closed {
            return Err(SyncError::Decode("audio backend is closed".into()));
        }
        let channels = usize::from(self.meta.channels);
        let block = self.block_size as usize;
        let start_frame = self.cursor.saturating_mul(u64::from(self.block_size));
        if start_frame >= self.meta.frames {
            out.clear();
            return Ok(0);
        }
        let start = start_frame as usize * channels;
        let end = (start + block * channels).min(self.samples.len());

        out.clear();
        out.extend_from_slice(&self.samples[start..end]);
        out.resize(block * channels, 0.0);
        self.cursor += 1;
        Ok((end - start) / channels)
    }

    fn close(&mut self) {
        self.samples = Vec::new();
        self.closed = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for f in 0..frames {
            for _ in 0..channels {
                writer.write_sample((f % 100) as i16 * 100).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_int_wav_as_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 48000, 2, 1000);

        let wav = WavFile::open(&path, 256).unwrap();
        assert_eq!(wav.meta().sample_rate, 48000);
        assert_eq!(wav.meta().channels, 2);
        assert_eq!(wav.meta().frames, 1000);
        assert_eq!(wav.meta().block_count(256), 4);
        assert!((wav.samples[2] - 100.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn blocks_read_in_order_with_padded_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 8000, 1, 10);

        let mut wav = WavFile::open(&path, 4).unwrap();
        let mut buf = Vec::new();
        assert_eq!(wav.read_block(&mut buf).unwrap(), 4);
        assert_eq!(wav.read_block(&mut buf).unwrap(), 4);
        assert_eq!(wav.read_block(&mut buf).unwrap(), 2);
        assert_eq!(buf.len(), 4);
        assert_eq!(&buf[2..], &[0.0, 0.0]);
        assert_eq!(wav.read_block(&mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_block_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.wav");
        write_wav(&path, 8000, 1, 10);

        let mut wav = WavFile::open(&path, 4).unwrap();
        assert!(wav.seek_block(2).unwrap());
        assert_eq!(wav.block_position(), 2);
        assert!(!wav.seek_block(3).unwrap());
        assert_eq!(wav.block_position(), 2);
    }

    #[test]
    fn zero_block_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("z.wav");
        write_wav(&path, 8000, 1, 10);
        assert!(matches!(WavFile::open(&path, 0), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn closed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        write_wav(&path, 8000, 1, 10);
        let mut wav = WavFile::open(&path, 4).unwrap();
        wav.close();
        assert!(wav.read_block(&mut Vec::new()).is_err());
    }
}
