//! Voice orchestrator daemon: wires every `voiced-core` component together
//! and drives the conversation state machine, plus a handful of peripheral
//! CLI utilities (`enroll`, `status`, `signal`) for operating it without a
//! GUI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use voiced_core::audio::AudioSource;
use voiced_core::brain::Brain;
use voiced_core::config::{self, Settings};
use voiced_core::knowledge::{KnowledgeBaseClient, StdioKnowledgeBaseClient};
use voiced_core::local_llm::LocalLlmClient;
use voiced_core::orchestrator::{self, Orchestrator};
use voiced_core::pane::PaneMonitor;
use voiced_core::speaker::{SpeakerVerifier, StubEmbedder};
use voiced_core::task_router::TaskRouter;
use voiced_core::transcribe::StubTranscriber;
use voiced_core::tts::{HttpSynthesizer, TtsEngine, DEFAULT_VOICE};
use voiced_core::wake::{StubClassifier, WakeDetector};

#[derive(Parser)]
#[command(name = "voiced", about = "Voice orchestrator daemon and utilities")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator daemon.
    Run {
        /// Path to the settings file. Defaults to the XDG config location.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Record a few seconds of audio and enroll it as the verified speaker.
    Enroll {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of enrollment samples to record.
        #[arg(long, default_value_t = 3)]
        samples: usize,
    },
    /// Print the current tmux window / task assignment table.
    Status,
    /// Trigger a wake event from outside the process (hotkey bindings).
    Signal,
}

/// `/tmp/voice_orchestrator_trigger` by default — a hotkey binding `touch`es
/// this file, [`orchestrator::signal_file_watcher`] removes it on pickup.
fn signal_file_path() -> PathBuf {
    std::env::var_os("VOICED_SIGNAL_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("voice_orchestrator_trigger"))
}

fn load_settings(config: Option<PathBuf>) -> Settings {
    let path = config.unwrap_or_else(config::default_settings_path);
    let mut settings = config::load_settings(&path);
    settings.apply_env_overrides();
    settings
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Enroll { config, samples } => enroll(config, samples).await,
        Command::Status => status().await,
        Command::Signal => signal(),
    }
}

async fn run(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config);
    tracing::info!(
        wake_name = %settings.wake_name,
        signal_file = %signal_file_path().display(),
        "starting voice orchestrator"
    );

    let audio = AudioSource::open(settings.preferred_input_device.clone())?;
    let wake = WakeDetector::new(StubClassifier, settings.wake_threshold, settings.wake_cooldown_secs);
    let speaker = SpeakerVerifier::new(
        StubEmbedder,
        settings.speaker_threshold,
        config::cache_dir().join("speaker_profile.json"),
    );
    let transcriber = StubTranscriber;

    let tts_url = std::env::var("VOICED_TTS_URL").unwrap_or_else(|_| "http://localhost:5500".to_string());
    let tts_voice = std::env::var("VOICED_TTS_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());
    let tts = TtsEngine::new(
        HttpSynthesizer::new(tts_url, tts_voice),
        config::cache_dir().join("tts"),
    );

    let local_llm = LocalLlmClient::new(settings.ollama_url.clone(), settings.ollama_model.clone());
    let brain = Brain::new(settings.brain_command.clone()).with_max_history(settings.history_turns);
    let task_router = TaskRouter::new();

    let knowledge: Option<std::sync::Arc<dyn KnowledgeBaseClient>> =
        match std::env::var("VOICED_KNOWLEDGE_COMMAND") {
            Ok(command) => match StdioKnowledgeBaseClient::connect(&command, &[]).await {
                Ok(client) => Some(std::sync::Arc::new(client)),
                Err(e) => {
                    tracing::warn!(error = %e, "knowledge base service unavailable, continuing without it");
                    None
                }
            },
            Err(_) => None,
        };

    let (mut pane_monitor, pane_rx) = PaneMonitor::new(settings.pane_poll_interval_secs);
    for window in discover_tmux_windows().await {
        pane_monitor.watch(window).await;
    }
    tokio::spawn(pane_monitor.run());

    let (hotkey_tx, hotkey_rx) = tokio::sync::mpsc::channel(4);
    tokio::spawn(orchestrator::signal_file_watcher(signal_file_path(), hotkey_tx));

    let orchestrator = Orchestrator::new(
        audio, wake, speaker, transcriber, tts, local_llm, brain, task_router, knowledge, settings,
    );
    orchestrator.run(pane_rx, hotkey_rx).await;
    Ok(())
}

/// `tmux list-windows -F '#{window_index}'`, so pre-existing windows are
/// watched from startup rather than only ones created afterward.
async fn discover_tmux_windows() -> Vec<u32> {
    let output = tokio::process::Command::new("tmux")
        .args(["list-windows", "-F", "#{window_index}"])
        .output()
        .await;
    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect()
}

async fn enroll(config: Option<PathBuf>, samples: usize) -> anyhow::Result<()> {
    let settings = load_settings(config);
    let profile_path = config::cache_dir().join("speaker_profile.json");
    println!("Recording {samples} samples for speaker enrollment. Speak naturally after each prompt.");

    let preferred = settings.preferred_input_device.clone();
    let clips = tokio::task::spawn_blocking(
        move || -> voiced_core::Result<Vec<voiced_core::buffering::chunk::AudioChunk>> {
            let mut audio = AudioSource::open(preferred)?;
            let mut clips = Vec::new();
            for i in 0..samples {
                println!("Sample {}/{samples}: speak now...", i + 1);
                match audio.read_clip(10.0, 1.0, 8.0)? {
                    Some(clip) => clips.push(clip),
                    None => println!("  (no speech detected, skipping)"),
                }
            }
            Ok(clips)
        },
    )
    .await??;

    if clips.is_empty() {
        eprintln!("No usable audio captured; enrollment aborted.");
        std::process::exit(1);
    }

    let mut verifier = SpeakerVerifier::new(StubEmbedder, settings.speaker_threshold, profile_path.clone());
    match verifier.enroll(&clips) {
        Ok(()) => {
            println!("Enrolled speaker profile at {}", profile_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("Enrollment failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn status() -> anyhow::Result<()> {
    let task_router = TaskRouter::new();
    match task_router.list().await {
        Ok(windows) => {
            if windows.is_empty() {
                println!("No tmux windows found.");
            }
            for w in windows {
                let task = w.task.as_deref().unwrap_or("-");
                let status = w
                    .task_status
                    .map(|s| format!("{s:?}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>3}  {:<20}  {:<9}  task={} status={}",
                    w.window,
                    w.name,
                    if w.active { "active" } else { "" },
                    task,
                    status
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to query tmux windows: {e}");
            std::process::exit(1);
        }
    }
}

fn signal() -> anyhow::Result<()> {
    let path = signal_file_path();
    match std::fs::write(&path, b"") {
        Ok(()) => {
            println!("Signaled wake event via {}", path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to write signal file {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}
