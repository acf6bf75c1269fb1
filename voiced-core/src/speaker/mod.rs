//! Speaker Verifier: rejects commands spoken by anyone other than the
//! enrolled speaker (background audio, music, other people in the room).
//!
//! `SpeakerEmbedder` is the extensibility point — a pure function mapping an
//! utterance clip to a fixed-length embedding. A cosine similarity against
//! the enrolled profile decides the match. With no profile on disk,
//! verification is a pass-through (mirrors the original design: enrollment
//! is opt-in, not required to use the system).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, VoicedError};

/// Extracts a fixed-length voice embedding from an utterance clip.
pub trait SpeakerEmbedder: Send + Sync + 'static {
    /// Returns an embedding vector. Implementations are expected to be
    /// deterministic for the same input.
    fn embed(&self, clip: &AudioChunk) -> Vec<f32>;
}

/// Deterministic placeholder embedder — buckets RMS energy across fixed-size
/// windows into a low-dimensional vector. Good enough to exercise the
/// verification plumbing in tests; production deployments plug in a real
/// voice-encoder model.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubEmbedder;

const STUB_DIMS: usize = 16;

impl SpeakerEmbedder for StubEmbedder {
    fn embed(&self, clip: &AudioChunk) -> Vec<f32> {
        if clip.samples.is_empty() {
            return vec![0.0; STUB_DIMS];
        }
        let window = clip.samples.len().div_ceil(STUB_DIMS).max(1);
        clip.samples
            .chunks(window)
            .map(|w| {
                let sum_sq: f32 = w.iter().map(|s| s * s).sum();
                (sum_sq / w.len() as f32).sqrt()
            })
            .chain(std::iter::repeat(0.0))
            .take(STUB_DIMS)
            .collect()
    }
}

/// Minimum clip length accepted for enrollment/verification — matches the
/// floor used by the original embedding model (0.1s at 16 kHz).
const MIN_CLIP_SAMPLES: usize = 1_600;

#[derive(Debug, Serialize, Deserialize)]
struct Profile {
    embedding: Vec<f32>,
}

/// Compares utterance clips against an enrolled speaker profile.
pub struct SpeakerVerifier<E: SpeakerEmbedder> {
    embedder: E,
    threshold: f32,
    profile: Option<Vec<f32>>,
    profile_path: PathBuf,
}

impl<E: SpeakerEmbedder> SpeakerVerifier<E> {
    pub fn new(embedder: E, threshold: f32, profile_path: PathBuf) -> Self {
        let profile = load_profile(&profile_path);
        Self {
            embedder,
            threshold: threshold.clamp(0.0, 1.0),
            profile,
            profile_path,
        }
    }

    pub fn is_enrolled(&self) -> bool {
        self.profile.is_some()
    }

    /// Average embeddings from multiple enrollment samples and persist the
    /// result as JSON at `profile_path`.
    pub fn enroll(&mut self, samples: &[AudioChunk]) -> Result<()> {
        let embeddings: Vec<Vec<f32>> = samples
            .iter()
            .filter(|clip| clip.samples.len() >= MIN_CLIP_SAMPLES)
            .map(|clip| self.embedder.embed(clip))
            .collect();

        if embeddings.is_empty() {
            return Err(VoicedError::Config(
                "no valid audio samples for enrollment".into(),
            ));
        }

        let dims = embeddings[0].len();
        let mut avg = vec![0.0f32; dims];
        for emb in &embeddings {
            for (a, v) in avg.iter_mut().zip(emb.iter()) {
                *a += v;
            }
        }
        for a in &mut avg {
            *a /= embeddings.len() as f32;
        }

        if let Some(parent) = self.profile_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Profile {
            embedding: avg.clone(),
        })?;
        fs::write(&self.profile_path, json)?;

        self.profile = Some(avg);
        Ok(())
    }

    /// Compare a clip against the enrolled profile.
    ///
    /// Returns `(true, 1.0)` when no profile is enrolled — verification is
    /// then a pass-through rather than a hard requirement.
    pub fn verify(&self, clip: &AudioChunk) -> (bool, f32) {
        let Some(profile) = &self.profile else {
            return (true, 1.0);
        };
        if clip.samples.len() < MIN_CLIP_SAMPLES {
            return (false, 0.0);
        }
        let embedding = self.embedder.embed(clip);
        let similarity = cosine_similarity(&embedding, profile);
        (similarity >= self.threshold, similarity)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn load_profile(path: &Path) -> Option<Vec<f32>> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Profile>(&raw) {
        Ok(p) => Some(p.embedding),
        Err(e) => {
            tracing::warn!(?path, error = %e, "malformed speaker profile, treating as unenrolled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(amplitude: f32, secs: f32) -> AudioChunk {
        let n = (16_000.0 * secs) as usize;
        AudioChunk::new(vec![amplitude; n], 16_000)
    }

    #[test]
    fn no_profile_is_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = SpeakerVerifier::new(StubEmbedder, 0.65, dir.path().join("profile.json"));
        assert!(!verifier.is_enrolled());
        let (is_match, score) = verifier.verify(&clip(0.3, 1.0));
        assert!(is_match);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn enroll_then_verify_same_voice_matches() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = SpeakerVerifier::new(StubEmbedder, 0.65, dir.path().join("profile.json"));
        verifier
            .enroll(&[clip(0.3, 1.0), clip(0.32, 1.0)])
            .unwrap();
        assert!(verifier.is_enrolled());
        let (is_match, score) = verifier.verify(&clip(0.3, 1.0));
        assert!(is_match, "similarity={score}");
    }

    #[test]
    fn verify_rejects_short_clip() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = SpeakerVerifier::new(StubEmbedder, 0.65, dir.path().join("profile.json"));
        verifier.enroll(&[clip(0.3, 1.0)]).unwrap();
        let (is_match, score) = verifier.verify(&clip(0.3, 0.01));
        assert!(!is_match);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn enroll_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        {
            let mut verifier = SpeakerVerifier::new(StubEmbedder, 0.65, path.clone());
            verifier.enroll(&[clip(0.4, 1.0)]).unwrap();
        }
        let reloaded = SpeakerVerifier::new(StubEmbedder, 0.65, path);
        assert!(reloaded.is_enrolled());
    }

    #[test]
    fn enroll_with_no_valid_samples_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = SpeakerVerifier::new(StubEmbedder, 0.65, dir.path().join("profile.json"));
        let err = verifier.enroll(&[clip(0.3, 0.01)]).unwrap_err();
        assert!(matches!(err, VoicedError::Config(_)));
    }
}
