//! # voiced-core
//!
//! The always-on concurrent controller behind a hands-free voice orchestrator:
//! wake detection, speaker verification, transcription, multi-tier command
//! routing, tmux pane monitoring, and TTS playback with barge-in.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ──(80ms frames)──► WakeDetector ──on_wake──► Orchestrator
//!      │                                                       │
//!      └──(read_clip, VAD-segmented)──► SpeakerVerifier ──► Transcriber
//!                                                               │
//!                                                        FastRouter / LocalLlm / Brain
//!                                                               │
//!                                                           TtsEngine
//! ```
//!
//! PaneMonitor runs independently on its own poll loop and posts transitions
//! to the Orchestrator's worker; it never blocks on orchestrator state.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod brain;
pub mod buffering;
pub mod config;
pub mod error;
pub mod fast_router;
pub mod knowledge;
pub mod local_llm;
pub mod orchestrator;
pub mod pane;
pub mod screen;
pub mod speaker;
pub mod task_router;
pub mod taskstate;
pub mod transcribe;
pub mod tts;
pub mod vad;
pub mod wake;

pub use config::Settings;
pub use error::{Result, VoicedError};
pub use orchestrator::{Orchestrator, OrchestratorState};
