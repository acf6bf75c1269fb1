//! Transcriber: turns a captured utterance clip into text.
//!
//! `Transcriber` is the extensibility point — a pure function from clip to
//! text. The default `StubTranscriber` always returns empty (treated as
//! noise); production deployments plug in a real ASR model.

use crate::buffering::chunk::AudioChunk;

/// Minimum clip length worth sending to the ASR backend at all.
const MIN_TRANSCRIBABLE_SECS: f64 = 0.1;

/// Converts an utterance clip to text.
pub trait Transcriber: Send + 'static {
    /// Transcribes `clip`. Returns an empty string for silence/noise.
    fn transcribe(&mut self, clip: &AudioChunk) -> String;
}

/// Always returns an empty transcript — used where no real ASR model is
/// wired in (tests, fast-router-only deployments).
#[derive(Debug, Default, Clone, Copy)]
pub struct StubTranscriber;

impl Transcriber for StubTranscriber {
    fn transcribe(&mut self, _clip: &AudioChunk) -> String {
        String::new()
    }
}

/// Whether `text` should be treated as noise (too short or empty) rather
/// than a real command the user spoke.
pub fn is_noise(text: &str) -> bool {
    text.trim().chars().count() < 2
}

/// Runs a clip through a transcriber, filtering out too-short clips before
/// even invoking it (ASR backends tend to hallucinate on very short audio).
pub fn transcribe_clip<T: Transcriber>(transcriber: &mut T, clip: &AudioChunk) -> String {
    if clip.duration_secs() < MIN_TRANSCRIBABLE_SECS {
        return String::new();
    }
    transcriber.transcribe(clip)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedText(&'static str);

    impl Transcriber for FixedText {
        fn transcribe(&mut self, _clip: &AudioChunk) -> String {
            self.0.to_string()
        }
    }

    fn clip(secs: f64) -> AudioChunk {
        let n = (16_000.0 * secs) as usize;
        AudioChunk::new(vec![0.1; n], 16_000)
    }

    #[test]
    fn stub_transcriber_returns_empty() {
        let mut t = StubTranscriber;
        assert_eq!(transcribe_clip(&mut t, &clip(1.0)), "");
    }

    #[test]
    fn too_short_clip_never_reaches_transcriber() {
        let mut t = FixedText("hallucinated text");
        assert_eq!(transcribe_clip(&mut t, &clip(0.01)), "");
    }

    #[test]
    fn long_enough_clip_reaches_transcriber() {
        let mut t = FixedText("turn on the lights");
        assert_eq!(transcribe_clip(&mut t, &clip(1.0)), "turn on the lights");
    }

    #[test]
    fn is_noise_rejects_empty_and_single_char() {
        assert!(is_noise(""));
        assert!(is_noise(" a "));
        assert!(!is_noise("ok"));
    }
}
