//! Local LLM Client: talks to an Ollama-compatible HTTP endpoint for fast,
//! cheap first-pass inference — intent classification and quick answers —
//! before a request is escalated to the (slow, capable) brain agent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const QUICK_ANSWER_SYSTEM: &str = "You are a voice assistant. \
Give a SHORT spoken answer (1-2 sentences max). \
No markdown, no code blocks, no bullet points. Plain conversational English only.";

const INTENTS: &[&str] = &["simple", "complex", "action", "tmux", "knowledge"];

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for a local Ollama-style completion endpoint.
pub struct LocalLlmClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LocalLlmClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Returns `true` if the endpoint responds to a tags probe within 2s.
    pub async fn available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.http
                .get(url)
                .timeout(Duration::from_secs(2))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    /// Raw completion call. Returns `None` on any transport/parse failure —
    /// callers treat this as "fall back to the brain agent", not a hard error.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Option<String> {
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_tokens,
                temperature: 0.3,
            },
            system,
        };
        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(&req)
            .timeout(timeout)
            .send()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "local LLM request failed"))
            .ok()?;
        let parsed: GenerateResponse = resp.json().await.ok()?;
        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Classify user intent into one of [`INTENTS`], defaulting to `"complex"`
    /// whenever classification is unavailable or ambiguous.
    pub async fn classify_intent(&self, text: &str) -> String {
        let prompt = format!(
            "Classify this voice command into exactly one category:\n\
             - simple: greetings, facts, time, math, definitions, yes/no questions\n\
             - complex: coding, debugging, multi-step tasks, analysis\n\
             - action: desktop control (click, type, open app, move mouse, screenshots)\n\
             - tmux: window management (tell window, check window, list windows, switch window)\n\
             - knowledge: questions about past work, decisions, what we did before\n\n\
             Command: \"{text}\"\n\n\
             Reply with ONLY the category name, nothing else."
        );
        let Some(result) = self.generate(&prompt, None, 10, Duration::from_secs(5)).await else {
            return "complex".to_string();
        };
        let category = result
            .trim()
            .to_lowercase()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches(['.', ',', ':'])
            .to_string();
        if INTENTS.contains(&category.as_str()) {
            category
        } else {
            "complex".to_string()
        }
    }

    /// Try to answer a simple question locally. `None` means "escalate".
    pub async fn quick_answer(&self, text: &str) -> Option<String> {
        self.generate(
            text,
            Some(QUICK_ANSWER_SYSTEM),
            100,
            Duration::from_secs(8),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_system_when_absent() {
        let req = GenerateRequest {
            model: "qwen2.5:3b",
            prompt: "hi",
            stream: false,
            options: GenerateOptions {
                num_predict: 10,
                temperature: 0.3,
            },
            system: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("system"));
    }

    #[test]
    fn request_serializes_with_system_when_present() {
        let req = GenerateRequest {
            model: "qwen2.5:3b",
            prompt: "hi",
            stream: false,
            options: GenerateOptions {
                num_predict: 10,
                temperature: 0.3,
            },
            system: Some("be terse"),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"system\":\"be terse\""));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_not_available() {
        let client = LocalLlmClient::new("http://127.0.0.1:1", "qwen2.5:3b");
        assert!(!client.available().await);
    }
}
