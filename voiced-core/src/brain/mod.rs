//! Brain Client: escalation path for anything the fast router and local LLM
//! can't handle. Shells out to a configurable agentic CLI (`codex exec` by
//! default) with full tool access, a capability preamble, screen context,
//! and rolling conversation history.

use std::time::Duration;

use tokio::process::Command;

use crate::error::{Result, VoicedError};
use crate::screen;

/// Action-ish keywords that force "full" complexity (screen context +
/// vision) even for a short utterance.
const ACTION_KEYWORDS: &[&str] = &[
    "click", "type", "open", "mouse", "screen", "browser", "window", "scroll", "fill",
    "form", "cursor", "move", "press", "close", "focus", "switch", "tab", "desktop",
    "display", "launch", "run",
];

/// Word-count threshold below which a request with no action keyword is
/// treated as "quick" (no screen/vision context needed).
const QUICK_WORD_LIMIT: usize = 12;

const MAX_RESPONSE_CHARS: usize = 500;
const MAX_HISTORY_DEFAULT: usize = 10;
const BRAIN_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Quick,
    Full,
}

/// Decide whether a request needs full screen context or just a quick pass.
pub fn classify_complexity(text: &str) -> Complexity {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.iter().any(|w| ACTION_KEYWORDS.contains(w)) {
        return Complexity::Full;
    }
    if words.len() <= QUICK_WORD_LIMIT {
        Complexity::Quick
    } else {
        Complexity::Full
    }
}

struct Turn {
    user: String,
    response: String,
}

/// Capability preamble describing the agent's shell/screen/input tools, in
/// the voice/spoken-response register the brain is expected to answer in.
/// The concrete command names (task-router-equivalent CLI, screenshot tool,
/// input-injection tool) are configuration, not hardcoded to one vendor.
pub struct CapabilityPreamble {
    pub text: String,
}

impl CapabilityPreamble {
    pub fn default_for(brain_command: &str) -> Self {
        Self {
            text: format!(
                "You are a voice AI orchestrator managing multiple AI assistant instances in tmux windows.\n\
                 The user is speaking to you via voice. Your response will be read aloud via text-to-speech.\n\n\
                 RULES:\n\
                 - Keep responses SHORT and conversational (1-3 sentences max)\n\
                 - No markdown, code blocks, bullet points, or formatting — plain spoken English only\n\
                 - You have full shell access. Use tmux commands to manage windows.\n\
                 - To send a prompt to a window: tmux set-buffer \"text\" && tmux paste-buffer -t WINDOW && tmux send-keys -t WINDOW Enter\n\
                 - To check a window: tmux capture-pane -t WINDOW -p -S -30\n\
                 - To list windows: tmux list-windows\n\
                 - To switch window: tmux select-window -t WINDOW\n\
                 - To cancel: tmux send-keys -t WINDOW C-c\n\n\
                 SCREEN & DESKTOP CONTROL:\n\
                 - You can see the user's screen — open windows and active app are provided in context\n\
                 - You can take a screenshot and OCR it, move the mouse, click, type, and switch focus via the\n\
                   desktop automation tools available in your shell\n\n\
                 CONVERSATION:\n\
                 - You have memory of previous exchanges in this conversation (shown below)\n\
                 - Reference earlier context naturally — the user doesn't need to repeat themselves\n\
                 - When the user says to assign work, send the prompt to the appropriate tmux window\n\
                 - When checking status, read the pane output and summarize what's happening\n\
                 - NEVER include shell commands in your spoken response — just tell the user what you did or found\n\n\
                 You invoke work via `{brain_command}`."
            ),
        }
    }
}

/// Drives the escalation-tier agent: builds a prompt from screen context and
/// rolling history, invokes `brain_command` as a subprocess, and extracts a
/// short spoken reply.
pub struct Brain {
    brain_command: String,
    preamble: CapabilityPreamble,
    history: Vec<Turn>,
    max_history: usize,
    vision_api_base: String,
    vision_api_key: String,
}

impl Brain {
    pub fn new(brain_command: impl Into<String>) -> Self {
        let brain_command = brain_command.into();
        Self {
            preamble: CapabilityPreamble::default_for(&brain_command),
            brain_command,
            history: Vec::new(),
            max_history: MAX_HISTORY_DEFAULT,
            vision_api_base: "https://api.openai.com/v1".to_string(),
            vision_api_key: std::env::var("VOICED_VISION_API_KEY").unwrap_or_default(),
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Process one user utterance through the brain agent and return a
    /// short spoken response.
    pub async fn think(&mut self, user_text: &str) -> Result<String> {
        let complexity = classify_complexity(user_text);
        let needs_vision = screen::needs_vision(user_text);

        let screen_ctx = if complexity == Complexity::Full && needs_vision {
            screen::screen_context_with_vision(&self.vision_api_base, &self.vision_api_key, user_text)
                .await
        } else if complexity == Complexity::Full {
            screen::screen_context().await
        } else {
            String::new()
        };

        let history_str = self.render_history();
        let prompt = format!(
            "{preamble}\n\nCURRENT SCREEN STATE:\n{screen_ctx}\n{history_str}\n\
             The user said: \"{user_text}\"\n\n\
             Do what they asked (run commands if needed), then respond with a SHORT spoken sentence.",
            preamble = self.preamble.text,
        );

        let response = self.invoke(&prompt).await?;
        let cleaned = clean_and_truncate(&response);
        self.history.push(Turn {
            user: user_text.to_string(),
            response: cleaned.clone(),
        });
        Ok(cleaned)
    }

    fn render_history(&self) -> String {
        if self.history.is_empty() {
            return String::new();
        }
        let mut out = String::from("\nCONVERSATION HISTORY:\n");
        let start = self.history.len().saturating_sub(self.max_history);
        for turn in &self.history[start..] {
            out.push_str(&format!("User: {}\nAssistant: {}\n", turn.user, turn.response));
        }
        out
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let output_file = std::env::temp_dir().join(format!(
            "voiced-brain-{}.txt",
            std::process::id()
        ));
        let _ = tokio::fs::remove_file(&output_file).await;

        let invocation = tokio::time::timeout(
            Duration::from_secs(BRAIN_TIMEOUT_SECS),
            Command::new(&self.brain_command)
                .arg("exec")
                .arg("--dangerously-bypass-approvals-and-sandbox")
                .arg("--skip-git-repo-check")
                .arg("-o")
                .arg(&output_file)
                .arg(prompt)
                .output(),
        )
        .await;

        let output = match invocation {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(VoicedError::Subprocess {
                    command: self.brain_command.clone(),
                    detail: e.to_string(),
                })
            }
            Err(_) => {
                return Err(VoicedError::SubprocessTimeout {
                    command: self.brain_command.clone(),
                    secs: BRAIN_TIMEOUT_SECS,
                })
            }
        };

        let from_file = tokio::fs::read_to_string(&output_file)
            .await
            .unwrap_or_default()
            .trim()
            .to_string();
        let _ = tokio::fs::remove_file(&output_file).await;

        if !from_file.is_empty() {
            return Ok(from_file);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let spoken: Vec<&str> = stdout
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('$') && !l.starts_with('+'))
            .collect();
        if spoken.is_empty() {
            return Err(VoicedError::BrainEmptyOutput);
        }
        let tail = spoken.len().saturating_sub(3);
        Ok(spoken[tail..].join(" "))
    }

    /// Clear conversation memory between sessions.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

fn clean_and_truncate(response: &str) -> String {
    let mut cleaned = response
        .replace("```", "")
        .replace("**", "")
        .replace('`', "")
        .replace('#', "");
    cleaned = cleaned.trim().to_string();

    if cleaned.len() > MAX_RESPONSE_CHARS {
        let truncated = &cleaned[..MAX_RESPONSE_CHARS];
        cleaned = match truncated.rsplit_once('.') {
            Some((head, _)) => format!("{head}."),
            None => truncated.to_string(),
        };
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_short_request_without_action_keyword_is_quick() {
        assert_eq!(classify_complexity("what time is it"), Complexity::Quick);
    }

    #[test]
    fn classify_request_with_action_keyword_is_full() {
        assert_eq!(classify_complexity("click the submit button"), Complexity::Full);
    }

    #[test]
    fn classify_long_request_without_action_keyword_is_full() {
        let text = "can you please walk me through a detailed history of the project and its goals";
        assert_eq!(classify_complexity(text), Complexity::Full);
    }

    #[test]
    fn clean_and_truncate_strips_markdown() {
        let out = clean_and_truncate("**bold** and `code` and # heading");
        assert!(!out.contains('*'));
        assert!(!out.contains('`'));
        assert!(!out.contains('#'));
    }

    #[test]
    fn clean_and_truncate_respects_sentence_boundary() {
        let long = format!("{}. {}", "x".repeat(480), "trailing fragment without a period");
        let out = clean_and_truncate(&long);
        assert!(out.len() <= MAX_RESPONSE_CHARS + 1);
        assert!(out.ends_with('.'));
    }

    #[test]
    fn brain_history_renders_recent_turns_only() {
        let mut brain = Brain::new("codex").with_max_history(2);
        brain.history.push(Turn {
            user: "a".into(),
            response: "1".into(),
        });
        brain.history.push(Turn {
            user: "b".into(),
            response: "2".into(),
        });
        brain.history.push(Turn {
            user: "c".into(),
            response: "3".into(),
        });
        let rendered = brain.render_history();
        assert!(!rendered.contains("User: a"));
        assert!(rendered.contains("User: b"));
        assert!(rendered.contains("User: c"));
    }

    #[test]
    fn reset_clears_history() {
        let mut brain = Brain::new("codex");
        brain.history.push(Turn {
            user: "a".into(),
            response: "1".into(),
        });
        brain.reset();
        assert!(brain.history.is_empty());
    }
}
