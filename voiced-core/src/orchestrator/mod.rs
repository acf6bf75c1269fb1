//! Orchestrator Core: the conversation state machine gluing every other
//! module together — wake detection, speaker verification, transcription,
//! three-tier routing (local LLM → fast router → brain agent), speech
//! playback, and pane-transition alerts.
//!
//! # State machine
//!
//! ```text
//! IDLE --wake/hotkey--> LISTENING --utterance--> THINKING --reply ready--> SPEAKING
//!   ^                       |                                                 |
//!   |                       +--end phrase / two listen timeouts---------------+
//!   +-------------------------------- playback done, no more input -----------+
//! ```
//!
//! Only one conversation turn runs at a time; the wake detector is paused for
//! the full duration of a turn so a TTS reply can never be mistaken for a
//! fresh wake phrase.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;

use crate::audio::AudioSource;
use crate::brain::Brain;
use crate::config::Settings;
use crate::error::{Result, VoicedError};
use crate::fast_router;
use crate::knowledge::{is_relevant, render_context, KnowledgeBaseClient};
use crate::local_llm::LocalLlmClient;
use crate::pane::{PaneState, PaneTransition};
use crate::speaker::{SpeakerEmbedder, SpeakerVerifier};
use crate::task_router::TaskRouter;
use crate::transcribe::{is_noise, transcribe_clip, Transcriber};
use crate::tts::{SpeechSynthesizer, TtsEngine};
use crate::wake::{WakeClassifier, WakeDetector};

/// Phrase cap for one spoken utterance; matches the original recognizer's
/// `phrase_time_limit`.
const PHRASE_LIMIT_SECS: f32 = 15.0;
/// Trailing silence that ends an utterance; matches `pause_threshold = 1.0`.
const SILENCE_TAIL_SECS: f32 = 1.0;
/// How long to wait for speech to begin before declaring a listen timeout.
const LISTEN_TIMEOUT_SECS: f32 = 5.0;
/// Two consecutive empty listens (timeout or noise) end the turn.
const MAX_EMPTY_STRIKES: u32 = 2;
/// Number of knowledge-base hits requested for the `knowledge` intent tier.
const KNOWLEDGE_SEARCH_K: usize = 5;

const BASE_END_PHRASES: &[&str] = &[
    "end conversation",
    "stop conversation",
    "goodbye",
    "bye",
    "that's all",
    "thats all",
    "never mind",
    "nevermind",
    "dismiss",
];

/// Lifecycle state of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

/// Builds the set of phrases that end a conversation, including
/// `"<wake-name> end"` / `"<wake-name> stop"` variants for whatever wake
/// name this deployment is configured with.
fn end_phrases(wake_name: &str) -> Vec<String> {
    let mut phrases: Vec<String> = BASE_END_PHRASES.iter().map(|s| s.to_string()).collect();
    let wake_name = wake_name.trim();
    if !wake_name.is_empty() {
        let lower = wake_name.to_lowercase();
        phrases.push(format!("{lower} end"));
        phrases.push(format!("{lower} stop"));
    }
    phrases
}

/// Whether `text` is an end-of-conversation command. Matches anywhere in the
/// utterance, lower-cased and with leading/trailing punctuation stripped.
fn is_end_command(text: &str, wake_name: &str) -> bool {
    let lowered = text.to_lowercase();
    let trimmed = lowered.trim_matches(|c: char| ".,!?".contains(c));
    end_phrases(wake_name).iter().any(|p| trimmed.contains(p.as_str()))
}

/// Dedup bucket for a pane alert: alerts for the same window within the same
/// bucket are suppressed. `window_secs` is the dedup window
/// (`completion_dedup_secs`/`error_dedup_secs`).
fn alert_bucket(now_secs: u64, window_secs: u64) -> u64 {
    now_secs / window_secs.max(1)
}

fn unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Wires every other module into one conversation-turn state machine.
///
/// Generic over the four "pure function" extensibility traits, matching
/// [`WakeDetector`]/[`SpeakerVerifier`]/[`TtsEngine`]'s own shape. The
/// task-state and knowledge-base clients are ambient external collaborators
/// held as optional trait objects rather than additional type parameters,
/// since they're wired up (or not) purely at construction time.
pub struct Orchestrator<C: WakeClassifier, E: SpeakerEmbedder, Tr: Transcriber, S: SpeechSynthesizer> {
    audio: Arc<StdMutex<AudioSource>>,
    wake: WakeDetector<C>,
    speaker: SpeakerVerifier<E>,
    transcriber: Tr,
    tts: TtsEngine<S>,
    local_llm: LocalLlmClient,
    brain: Brain,
    task_router: TaskRouter,
    knowledge: Option<Arc<dyn KnowledgeBaseClient>>,
    settings: Settings,
    state: OrchestratorState,
    cached_phrases: std::collections::HashMap<&'static str, PathBuf>,
    completed_alerted: HashSet<(u32, u64)>,
    errored_alerted: HashSet<(u32, u64)>,
}

impl<C: WakeClassifier, E: SpeakerEmbedder, Tr: Transcriber, S: SpeechSynthesizer>
    Orchestrator<C, E, Tr, S>
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        audio: AudioSource,
        wake: WakeDetector<C>,
        speaker: SpeakerVerifier<E>,
        transcriber: Tr,
        tts: TtsEngine<S>,
        local_llm: LocalLlmClient,
        brain: Brain,
        task_router: TaskRouter,
        knowledge: Option<Arc<dyn KnowledgeBaseClient>>,
        settings: Settings,
    ) -> Self {
        Self {
            audio: Arc::new(StdMutex::new(audio)),
            wake,
            speaker,
            transcriber,
            tts,
            local_llm,
            brain,
            task_router,
            knowledge,
            settings,
            state: OrchestratorState::Idle,
            cached_phrases: std::collections::HashMap::new(),
            completed_alerted: HashSet::new(),
            errored_alerted: HashSet::new(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn set_state(&mut self, state: OrchestratorState) {
        tracing::info!(from = ?self.state, to = ?state, "orchestrator state change");
        self.state = state;
    }

    /// Pre-synthesize the fixed phrase set so `busy`/`error` replies play
    /// back instantly instead of round-tripping the TTS backend mid-turn.
    pub async fn precache_phrases(&mut self) {
        for (key, path) in self.tts.precache().await {
            self.cached_phrases.insert(key, path);
        }
    }

    async fn read_frame(&self) -> Result<crate::buffering::chunk::AudioChunk> {
        let audio = self.audio.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = audio.lock().expect("audio mutex poisoned");
            guard.read_frame()
        })
        .await
        .map_err(|e| VoicedError::AudioStream(format!("audio thread panicked: {e}")))?
    }

    async fn read_clip(&self) -> Result<Option<crate::buffering::chunk::AudioChunk>> {
        let audio = self.audio.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = audio.lock().expect("audio mutex poisoned");
            guard.read_clip(PHRASE_LIMIT_SECS, SILENCE_TAIL_SECS, LISTEN_TIMEOUT_SECS)
        })
        .await
        .map_err(|e| VoicedError::AudioStream(format!("audio thread panicked: {e}")))?
    }

    /// Runs until the wake classifier fires. Cancel-safe as a `select!`
    /// branch: each loop iteration completes a single frame read before
    /// looping, so dropping this future mid-wait just abandons one
    /// in-flight blocking read.
    async fn wait_for_wake(&mut self) -> Result<()> {
        loop {
            let frame = self.read_frame().await?;
            if self.wake.process(&frame) {
                return Ok(());
            }
        }
    }

    /// Main loop: while idle, wait on wake detection, a hotkey signal, or a
    /// pane transition; whichever fires first starts (or handles) a turn.
    /// Stale pane transitions that queued up during a non-idle turn are
    /// drained on re-entering idle, since alerts are suppressed while busy.
    pub async fn run(
        mut self,
        mut pane_rx: mpsc::Receiver<PaneTransition>,
        mut hotkey_rx: mpsc::Receiver<()>,
    ) {
        self.precache_phrases().await;
        loop {
            while pane_rx.try_recv().is_ok() {}

            tokio::select! {
                wake = self.wait_for_wake() => {
                    match wake {
                        Ok(()) => self.run_turn().await,
                        Err(e) => {
                            tracing::warn!(error = %e, "wake loop audio error, retrying shortly");
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                        }
                    }
                }
                Some(()) = hotkey_rx.recv() => {
                    self.run_turn().await;
                }
                Some(transition) = pane_rx.recv() => {
                    self.handle_pane_transition(transition).await;
                }
                else => return,
            }
        }
    }

    /// Drives one full conversation turn: pauses the wake detector, loops
    /// listen → route → speak until an end condition, then resets brain
    /// history and resumes wake detection.
    async fn run_turn(&mut self) {
        self.wake.pause();
        self.set_state(OrchestratorState::Listening);
        tracing::info!("conversation turn started");

        if let Err(e) = self.conversation_loop().await {
            tracing::warn!(error = %e, "error during conversation turn");
            if let Some(path) = self.cached_phrases.get("error").cloned() {
                let _ = self.tts.play_cached(&path).await;
            }
        }

        self.brain.reset();
        self.wake.resume();
        self.set_state(OrchestratorState::Idle);
        tracing::info!("conversation ended, wake listening resumed");
    }

    async fn conversation_loop(&mut self) -> Result<()> {
        loop {
            let text = self.listen_for_command().await?;
            if is_noise(&text) {
                break;
            }
            if is_end_command(&text, &self.settings.wake_name) {
                self.set_state(OrchestratorState::Speaking);
                let _ = self.tts.speak("Alright, talk to you later.").await;
                break;
            }

            self.set_state(OrchestratorState::Thinking);
            let response = self.route(&text).await;

            if !response.trim().is_empty() {
                self.set_state(OrchestratorState::Speaking);
                let _ = self.tts.speak(&response).await;
            }
            self.set_state(OrchestratorState::Listening);
        }
        Ok(())
    }

    /// Listens for one command, retrying through speaker rejections
    /// (discarded without counting against the strike budget) until either a
    /// real utterance is transcribed or two consecutive timeouts/noise
    /// results end the turn.
    async fn listen_for_command(&mut self) -> Result<String> {
        let mut empty_strikes = 0u32;
        loop {
            let clip = self.read_clip().await?;
            let Some(clip) = clip else {
                empty_strikes += 1;
                if empty_strikes >= MAX_EMPTY_STRIKES {
                    return Ok(String::new());
                }
                continue;
            };

            let (accepted, score) = self.speaker.verify(&clip);
            if !accepted {
                tracing::info!(score = score as f64, "speaker rejected, discarding utterance");
                continue;
            }

            let text = transcribe_clip(&mut self.transcriber, &clip);
            if is_noise(&text) {
                empty_strikes += 1;
                if empty_strikes >= MAX_EMPTY_STRIKES {
                    return Ok(String::new());
                }
                continue;
            }
            return Ok(text);
        }
    }

    /// Three-tier routing waterfall: local LLM intent classification (with a
    /// knowledge-base-grounded answer for `knowledge` intents), then the fast
    /// router for window management, then the brain agent as the final
    /// escalation.
    async fn route(&mut self, text: &str) -> String {
        if self.local_llm.available().await {
            let intent = self.local_llm.classify_intent(text).await;
            match intent.as_str() {
                "simple" => {
                    if let Some(answer) = self.local_llm.quick_answer(text).await {
                        return answer;
                    }
                }
                "knowledge" => {
                    if let Some(answer) = self.try_knowledge_answer(text).await {
                        return answer;
                    }
                }
                _ => {}
            }
        }

        if let Some(routed) = fast_router::try_route(&mut self.task_router, text).await {
            return routed.response;
        }

        match self.brain.think(text).await {
            Ok(reply) => reply,
            Err(VoicedError::SubprocessTimeout { .. }) => {
                "That took too long. Could you try a simpler request?".to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "brain agent failed");
                "Sorry, something went wrong handling that.".to_string()
            }
        }
    }

    async fn try_knowledge_answer(&self, text: &str) -> Option<String> {
        let kb = self.knowledge.as_ref()?;
        let hits = match kb.search(text, KNOWLEDGE_SEARCH_K, None).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "knowledge base search failed");
                return None;
            }
        };
        let relevant: Vec<_> = hits.into_iter().filter(|h| is_relevant(h.distance)).collect();
        if relevant.is_empty() {
            return None;
        }
        let context = render_context(&relevant);
        let prompt = format!("{context}\nQuestion: {text}");
        self.local_llm.quick_answer(&prompt).await
    }

    /// Handles one pane-monitor transition: completion/error alerts are
    /// deduplicated per window within a rolling time bucket, and suppressed
    /// entirely while a turn is active (callers only deliver this while
    /// idle, since [`Self::run`] drains stale transitions on idle re-entry).
    async fn handle_pane_transition(&mut self, t: PaneTransition) {
        let now = unix_secs();
        match (t.old_state, t.new_state) {
            (PaneState::Working, PaneState::Idle) => {
                let bucket = alert_bucket(now, self.settings.completion_dedup_secs);
                if self.completed_alerted.insert((t.window, bucket)) {
                    let desc = self
                        .task_router
                        .assignment(t.window)
                        .map(|a| truncate(&a.prompt, 50))
                        .unwrap_or_else(|| "its task".to_string());
                    self.task_router.mark_completed(t.window);
                    let msg = format!("Window {} has finished {}.", t.window, desc);
                    tracing::info!(window = t.window, "{msg}");
                    let _ = self.tts.speak(&msg).await;
                }
            }
            (PaneState::Working, PaneState::Errored) => {
                let bucket = alert_bucket(now, self.settings.error_dedup_secs);
                if self.errored_alerted.insert((t.window, bucket)) {
                    self.task_router.mark_errored(t.window);
                    let msg = format!("Window {} encountered an error.", t.window);
                    tracing::info!(window = t.window, "{msg}");
                    let _ = self.tts.speak(&msg).await;
                }
            }
            _ => {}
        }
    }
}

/// Polls for a sentinel file (created by a hotkey binding external to this
/// process) and synthesizes a wake event whenever it appears, removing it
/// immediately so the trigger fires exactly once.
pub async fn signal_file_watcher(path: PathBuf, tx: mpsc::Sender<()>) {
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
            if tx.send(()).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_phrase_matches_base_phrase_anywhere_in_utterance() {
        assert!(is_end_command("ok, goodbye then", "jarvis"));
        assert!(is_end_command("That's all!", "jarvis"));
    }

    #[test]
    fn end_phrase_matches_wake_name_variants() {
        assert!(is_end_command("jarvis end", "jarvis"));
        assert!(is_end_command("Jarvis, stop.", "jarvis"));
        assert!(!is_end_command("jarvis end", "friday"));
    }

    #[test]
    fn end_phrase_strips_punctuation_and_case() {
        assert!(is_end_command("NEVER MIND!!", "jarvis"));
    }

    #[test]
    fn non_end_command_does_not_match() {
        assert!(!is_end_command("what's the weather like", "jarvis"));
    }

    #[test]
    fn blank_wake_name_still_matches_base_phrases() {
        assert!(is_end_command("dismiss", ""));
        assert!(!is_end_command(" end", ""));
    }

    #[test]
    fn alert_bucket_groups_within_same_window() {
        assert_eq!(alert_bucket(100, 30), alert_bucket(110, 30));
        assert_ne!(alert_bucket(100, 30), alert_bucket(131, 30));
    }

    #[test]
    fn alert_bucket_uses_independent_windows_for_completion_and_error() {
        let completion_bucket = alert_bucket(1000, 30);
        let error_bucket = alert_bucket(1000, 60);
        assert_ne!(completion_bucket, error_bucket);
    }

    #[test]
    fn truncate_is_char_count_based() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
    }
}
