//! Typed audio chunk shared by the wake detector (80ms frames) and the command
//! listener (variable-length utterance clips) — both are just `AudioChunk`s of
//! different length, produced off the ring buffer consumer on the reader thread.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Allocated once per read — never on the real-time capture callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
