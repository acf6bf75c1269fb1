//! Persistent orchestrator settings (JSON file in an XDG-aware location) plus
//! environment-variable overrides for quick threshold tuning.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub preferred_input_device: Option<String>,
    /// Name spoken before "end"/"stop" to end a conversation (e.g. "jarvis
    /// end"). Never hardcoded to one assistant's name.
    pub wake_name: String,
    pub wake_threshold: f32,
    pub wake_cooldown_secs: f32,
    pub vad_threshold: f32,
    pub speaker_threshold: f32,
    pub pane_poll_interval_secs: f32,
    pub ollama_url: String,
    pub ollama_model: String,
    pub brain_command: String,
    pub history_turns: usize,
    pub completion_dedup_secs: u64,
    pub error_dedup_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            wake_name: "assistant".into(),
            wake_threshold: 0.35,
            wake_cooldown_secs: 2.0,
            vad_threshold: 0.02,
            speaker_threshold: 0.65,
            pane_poll_interval_secs: 2.5,
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "qwen2.5:3b".into(),
            brain_command: "codex".into(),
            history_turns: 10,
            completion_dedup_secs: 30,
            error_dedup_secs: 60,
        }
    }
}

impl Settings {
    /// Clamp every tunable into a sane range and drop empty strings back to defaults.
    pub fn normalize(&mut self) {
        if self.wake_name.trim().is_empty() {
            self.wake_name = Self::default().wake_name;
        }
        self.wake_threshold = self.wake_threshold.clamp(0.0, 1.0);
        self.wake_cooldown_secs = self.wake_cooldown_secs.clamp(0.0, 30.0);
        self.vad_threshold = self.vad_threshold.clamp(0.0, 1.0);
        self.speaker_threshold = self.speaker_threshold.clamp(0.0, 1.0);
        self.pane_poll_interval_secs = self.pane_poll_interval_secs.clamp(0.25, 60.0);
        self.history_turns = self.history_turns.clamp(1, 100);
        self.completion_dedup_secs = self.completion_dedup_secs.clamp(1, 3600);
        self.error_dedup_secs = self.error_dedup_secs.clamp(1, 3600);
        if self.ollama_url.trim().is_empty() {
            self.ollama_url = Self::default().ollama_url;
        }
        if self.ollama_model.trim().is_empty() {
            self.ollama_model = Self::default().ollama_model;
        }
        if self.brain_command.trim().is_empty() {
            self.brain_command = Self::default().brain_command;
        }
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Apply `VOICED_<FIELD>` environment overrides on top of whatever was loaded
    /// from disk, without ever writing them back to the settings file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VOICED_WAKE_NAME") {
            self.wake_name = v;
        }
        if let Some(v) = env_f32("VOICED_WAKE_THRESHOLD") {
            self.wake_threshold = v;
        }
        if let Some(v) = env_f32("VOICED_WAKE_COOLDOWN_SECS") {
            self.wake_cooldown_secs = v;
        }
        if let Some(v) = env_f32("VOICED_VAD_THRESHOLD") {
            self.vad_threshold = v;
        }
        if let Some(v) = env_f32("VOICED_SPEAKER_THRESHOLD") {
            self.speaker_threshold = v;
        }
        if let Some(v) = env_f32("VOICED_PANE_POLL_INTERVAL_SECS") {
            self.pane_poll_interval_secs = v;
        }
        if let Ok(v) = std::env::var("VOICED_OLLAMA_URL") {
            self.ollama_url = v;
        }
        if let Ok(v) = std::env::var("VOICED_OLLAMA_MODEL") {
            self.ollama_model = v;
        }
        if let Ok(v) = std::env::var("VOICED_BRAIN_COMMAND") {
            self.brain_command = v;
        }
        self.normalize();
    }
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// `<config-home>/voice-orchestrator/settings.json`, Windows APPDATA-rooted for parity.
pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// `<user-cache>/voice-orchestrator/` — speaker profile and TTS cache live here.
pub fn cache_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("voice-orchestrator")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".cache")
            })
            .join("voice-orchestrator")
    }
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("voice-orchestrator")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("voice-orchestrator")
    }
}

/// Loads settings from `path`, falling back to (and logging a warning for) a
/// default value on any read or parse failure. Missing files are not an error.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Settings>(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(?path, error = %e, "malformed settings file, using defaults");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &Settings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_already_normalized() {
        let mut s = Settings::default();
        let before = s.clone();
        s.normalize();
        assert_eq!(s, before);
    }

    #[test]
    fn normalize_clamps_out_of_range_thresholds() {
        let mut s = Settings {
            wake_threshold: 5.0,
            speaker_threshold: -1.0,
            history_turns: 0,
            ..Settings::default()
        };
        s.normalize();
        assert_eq!(s.wake_threshold, 1.0);
        assert_eq!(s.speaker_threshold, 0.0);
        assert_eq!(s.history_turns, 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = Path::new("/nonexistent/voiced-settings-test.json");
        let s = load_settings(path);
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not valid json").unwrap();
        let s = load_settings(&path);
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        s.wake_threshold = 0.5;
        save_settings(&path, &s).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.wake_threshold, 0.5);
    }
}
