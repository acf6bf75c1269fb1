use thiserror::Error;

/// All errors produced by voiced-core.
#[derive(Debug, Error)]
pub enum VoicedError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("listen timed out waiting for speech")]
    ListenTimeout,

    #[error("ring buffer is full — reader cannot keep up")]
    RingBufferFull,

    #[error("wake detector is already paused")]
    AlreadyPaused,

    #[error("speaker profile not found at {path}")]
    ProfileNotFound { path: std::path::PathBuf },

    #[error("subprocess '{command}' failed: {detail}")]
    Subprocess { command: String, detail: String },

    #[error("subprocess '{command}' timed out after {secs}s")]
    SubprocessTimeout { command: String, secs: u64 },

    #[error("local LLM request failed: {0}")]
    LocalLlm(String),

    #[error("brain agent produced no output")]
    BrainEmptyOutput,

    #[error("task-state operation failed: {0}")]
    TaskState(String),

    #[error("task-state validation failed: {0}")]
    TaskStateValidation(String),

    #[error("knowledge base operation failed: {0}")]
    Knowledge(String),

    #[error("speech synthesis failed: {0}")]
    Tts(String),

    #[error("orchestrator is not in the expected state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoicedError>;
