//! TTS Engine: speaks text aloud and supports mid-utterance interruption
//! (barge-in) when the wake word fires again while speaking.
//!
//! Playback runs as a child process (`ffplay`) so `stop` can terminate it
//! deterministically: SIGTERM, then SIGKILL if it hasn't exited within 1s.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::Command;

use crate::error::{Result, VoicedError};

const PLAYER: &str = "ffplay";
const TERM_GRACE: Duration = Duration::from_secs(1);

/// Default voice for [`HttpSynthesizer`] — least robotic of the catalog.
pub const DEFAULT_VOICE: &str = "en-GB-RyanNeural";

/// Phrases pre-rendered at startup so they can be played back instantly
/// without waiting on the TTS backend.
pub const PRECACHE_PHRASES: &[(&str, &str)] = &[
    ("busy", "One moment."),
    ("listening", "Listening."),
    ("error", "Something went wrong."),
];

/// Synthesizes speech audio for a line of text, writing it to `path`.
///
/// The extensibility point for swapping in a different TTS backend (a cloud
/// API, a local neural model, `espeak`, ...).
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    async fn synthesize_to_file(&self, text: &str, path: &Path) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Synthesizes speech by POSTing text to a neural TTS HTTP endpoint and
/// writing the returned audio bytes straight to disk.
///
/// Production deployments point `base_url` at a local edge-tts bridge or any
/// other HTTP front for a neural voice — this client only speaks the
/// request/response shape, not a particular vendor's protocol.
pub struct HttpSynthesizer {
    base_url: String,
    voice: String,
    http: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(base_url: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            voice: voice.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize_to_file(&self, text: &str, path: &Path) -> Result<()> {
        let url = format!("{}/synthesize", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(&SpeakRequest {
                text,
                voice: &self.voice,
            })
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| VoicedError::Tts(e.to_string()))?
            .error_for_status()
            .map_err(|e| VoicedError::Tts(e.to_string()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| VoicedError::Tts(e.to_string()))?;
        tokio::fs::write(path, &bytes).await?;
        Ok(())
    }
}

/// Speaks text by invoking a player binary over an audio file that some
/// external synthesizer already produced. Owns the single active playback
/// child process so `stop` can always find it.
pub struct TtsEngine<S: SpeechSynthesizer> {
    synth: S,
    cache_dir: PathBuf,
    /// PID of the currently-playing child, if any — `stop` signals it by
    /// PID rather than sharing ownership of the `Child` handle, since this
    /// engine is already subprocess-heavy end to end.
    active_pid: Mutex<Option<u32>>,
}

impl<S: SpeechSynthesizer> TtsEngine<S> {
    pub fn new(synth: S, cache_dir: PathBuf) -> Self {
        Self {
            synth,
            cache_dir,
            active_pid: Mutex::new(None),
        }
    }

    /// Speak `text`, blocking until playback finishes or `stop` is called.
    pub async fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let tmp = self.cache_dir.join(format!("utterance-{}.mp3", std::process::id()));
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        self.synth.synthesize_to_file(text, &tmp).await?;
        let result = self.play(&tmp).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        result
    }

    /// Stop whatever is currently playing. SIGTERM first, then SIGKILL if it
    /// hasn't exited within 1s.
    pub async fn stop(&self) {
        let Some(pid) = self.active_pid.lock().take() else {
            return;
        };
        let _ = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .output()
            .await;
        tokio::time::sleep(TERM_GRACE).await;
        let _ = Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .output()
            .await;
    }

    async fn play(&self, path: &Path) -> Result<()> {
        let mut child = Command::new(PLAYER)
            .args(["-nodisp", "-autoexit", "-loglevel", "quiet"])
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoicedError::Subprocess {
                command: PLAYER.to_string(),
                detail: e.to_string(),
            })?;

        *self.active_pid.lock() = child.id();
        let status = child.wait().await.map_err(|e| VoicedError::Subprocess {
            command: PLAYER.to_string(),
            detail: e.to_string(),
        })?;
        *self.active_pid.lock() = None;

        if status.success() {
            Ok(())
        } else {
            Err(VoicedError::Subprocess {
                command: PLAYER.to_string(),
                detail: format!("exited with {status}"),
            })
        }
    }

    /// Pre-generate the fixed set of short phrases at startup so they can be
    /// played back instantly later via `play_cached`.
    pub async fn precache(&self) -> Vec<(&'static str, PathBuf)> {
        let mut cached = Vec::new();
        for (key, phrase) in PRECACHE_PHRASES {
            let path = self.cache_dir.join(format!("{key}.mp3"));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                cached.push((*key, path));
                continue;
            }
            if self.synth.synthesize_to_file(phrase, &path).await.is_ok() {
                cached.push((*key, path));
            }
        }
        cached
    }

    /// Play a pre-cached phrase file without blocking for its completion.
    pub async fn play_cached(&self, path: &Path) -> Result<()> {
        Command::new(PLAYER)
            .args(["-nodisp", "-autoexit", "-loglevel", "quiet"])
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoicedError::Subprocess {
                command: PLAYER.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn speak_request_serializes_text_and_voice() {
        let req = SpeakRequest {
            text: "hello there",
            voice: DEFAULT_VOICE,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"text\":\"hello there\""));
        assert!(json.contains(DEFAULT_VOICE));
    }

    struct CountingSynth(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl SpeechSynthesizer for CountingSynth {
        async fn synthesize_to_file(&self, _text: &str, path: &Path) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(path, b"fake-mp3-bytes").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_text_never_synthesizes() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir = tempfile::tempdir().unwrap();
        let engine = TtsEngine::new(CountingSynth(count.clone()), dir.path().to_path_buf());
        engine.speak("   ").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn precache_writes_all_phrases() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir = tempfile::tempdir().unwrap();
        let engine = TtsEngine::new(CountingSynth(count.clone()), dir.path().to_path_buf());
        let cached = engine.precache().await;
        assert_eq!(cached.len(), PRECACHE_PHRASES.len());
        assert_eq!(count.load(Ordering::SeqCst), PRECACHE_PHRASES.len());
    }

    #[tokio::test]
    async fn precache_is_idempotent_on_existing_files() {
        let count = Arc::new(AtomicUsize::new(0));
        let dir = tempfile::tempdir().unwrap();
        let engine = TtsEngine::new(CountingSynth(count.clone()), dir.path().to_path_buf());
        engine.precache().await;
        engine.precache().await;
        assert_eq!(count.load(Ordering::SeqCst), PRECACHE_PHRASES.len());
    }
}
