//! Wake Detector: continuously scores 80 ms frames from the audio source and
//! fires once a wake phrase is detected, subject to a cooldown.
//!
//! `WakeClassifier` is the extensibility point — a pure function from one
//! frame to a confidence score. The default `StubClassifier` never fires;
//! production deployments plug in a real keyword-spotting model.

use std::time::{Duration, Instant};

use crate::buffering::chunk::AudioChunk;

/// Scores a single audio frame for wake-phrase presence.
///
/// Implementors may be stateful (e.g. an RNN hidden state) — `reset` is
/// called whenever the detector resumes after a pause, so internal state
/// never leaks stale activations across a conversation turn.
pub trait WakeClassifier: Send + 'static {
    /// Returns a confidence score in `[0.0, 1.0]` for this frame.
    fn detect(&mut self, frame: &AudioChunk) -> f32;

    /// Clear any internal state.
    fn reset(&mut self);
}

/// Always returns 0.0 — used where no real wake model is wired in (tests,
/// hotkey-only deployments).
#[derive(Debug, Default, Clone, Copy)]
pub struct StubClassifier;

impl WakeClassifier for StubClassifier {
    fn detect(&mut self, _frame: &AudioChunk) -> f32 {
        0.0
    }

    fn reset(&mut self) {}
}

/// Drives a [`WakeClassifier`] against a stream of frames, applying a
/// confidence threshold and a cooldown so a single utterance cannot fire
/// twice.
pub struct WakeDetector<C: WakeClassifier> {
    classifier: C,
    threshold: f32,
    cooldown: Duration,
    last_activation: Option<Instant>,
    paused: bool,
}

impl<C: WakeClassifier> WakeDetector<C> {
    pub fn new(classifier: C, threshold: f32, cooldown_secs: f32) -> Self {
        Self {
            classifier,
            threshold: threshold.clamp(0.0, 1.0),
            cooldown: Duration::from_secs_f32(cooldown_secs.max(0.0)),
            last_activation: None,
            paused: false,
        }
    }

    /// Feed one frame. Returns `true` once per detected activation — never
    /// twice within `cooldown`, and never while paused.
    pub fn process(&mut self, frame: &AudioChunk) -> bool {
        if self.paused {
            return false;
        }
        let score = self.classifier.detect(frame);
        if score < self.threshold {
            return false;
        }
        let now = Instant::now();
        if let Some(last) = self.last_activation {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_activation = Some(now);
        self.classifier.reset();
        true
    }

    /// Pause detection — the classifier retains its state but `process`
    /// becomes a no-op until `resume` is called.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume detection and reset classifier state so stale activations
    /// from the paused period cannot leak into the next conversation turn.
    pub fn resume(&mut self) {
        self.paused = false;
        self.classifier.reset();
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScore(f32);

    impl WakeClassifier for FixedScore {
        fn detect(&mut self, _frame: &AudioChunk) -> f32 {
            self.0
        }
        fn reset(&mut self) {}
    }

    fn frame() -> AudioChunk {
        AudioChunk::new(vec![0.0; 1280], 16000)
    }

    #[test]
    fn fires_above_threshold() {
        let mut wd = WakeDetector::new(FixedScore(0.9), 0.35, 0.0);
        assert!(wd.process(&frame()));
    }

    #[test]
    fn does_not_fire_below_threshold() {
        let mut wd = WakeDetector::new(FixedScore(0.1), 0.35, 0.0);
        assert!(!wd.process(&frame()));
    }

    #[test]
    fn cooldown_suppresses_repeat_activation() {
        let mut wd = WakeDetector::new(FixedScore(0.9), 0.35, 10.0);
        assert!(wd.process(&frame()));
        assert!(!wd.process(&frame()), "second activation within cooldown should be suppressed");
    }

    #[test]
    fn paused_detector_never_fires() {
        let mut wd = WakeDetector::new(FixedScore(0.9), 0.35, 0.0);
        wd.pause();
        assert!(!wd.process(&frame()));
        assert!(wd.is_paused());
        wd.resume();
        assert!(wd.process(&frame()));
    }

    #[test]
    fn stub_classifier_never_fires() {
        let mut wd = WakeDetector::new(StubClassifier, 0.0, 0.0);
        assert!(!wd.process(&frame()));
    }
}
