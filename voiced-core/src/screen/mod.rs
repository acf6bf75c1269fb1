//! Screen Context: gathers what's visible on the desktop (active window,
//! window list, mouse position) for the brain agent's prompt, with an
//! optional vision-model pass over a screenshot when the user's request
//! seems to need it.

use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use tokio::process::Command;

const SCREENSHOT_DIR: &str = "/tmp/voice-orchestrator-screenshots";

/// Keywords in the user's utterance that indicate the brain needs more than
/// the cheap window-list summary — a full screenshot + vision pass.
pub const SCREEN_KEYWORDS: &[&str] = &[
    "screen", "see", "looking at", "open", "running", "browser", "window", "app",
    "application", "tab", "showing", "display", "what's on", "what is on", "desktop",
    "fill", "form", "click", "type", "mouse", "cursor",
];

pub fn needs_vision(user_text: &str) -> bool {
    let lower = user_text.to_lowercase();
    SCREEN_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

async fn run_with_display(cmd: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(cmd)
        .args(args)
        .env("DISPLAY", std::env::var("DISPLAY").unwrap_or_else(|_| ":0".into()))
        .output()
        .await
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

pub async fn active_window() -> Option<String> {
    run_with_display("xdotool", &["getactivewindow", "getwindowname"]).await
}

pub async fn mouse_position() -> Option<(i32, i32)> {
    let out = run_with_display("xdotool", &["getmouselocation"]).await?;
    parse_mouse_location(&out)
}

fn parse_mouse_location(out: &str) -> Option<(i32, i32)> {
    let mut x = None;
    let mut y = None;
    for field in out.split_whitespace() {
        if let Some(v) = field.strip_prefix("x:") {
            x = v.parse().ok();
        } else if let Some(v) = field.strip_prefix("y:") {
            y = v.parse().ok();
        }
    }
    Some((x?, y?))
}

pub async fn window_list() -> Vec<String> {
    let Some(out) = run_with_display("wmctrl", &["-l", "-p"]).await else {
        return Vec::new();
    };
    out.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.splitn(5, char::is_whitespace).collect();
            cols.get(4).or_else(|| cols.get(3)).map(|s| s.to_string())
        })
        .collect()
}

async fn take_screenshot() -> Option<PathBuf> {
    tokio::fs::create_dir_all(SCREENSHOT_DIR).await.ok()?;
    let path = PathBuf::from(SCREENSHOT_DIR).join(format!("screen_{}.png", uuid_like()));
    let output = Command::new("scrot")
        .arg(&path)
        .env("DISPLAY", std::env::var("DISPLAY").unwrap_or_else(|_| ":0".into()))
        .output()
        .await
        .ok()?;
    if output.status.success() && tokio::fs::try_exists(&path).await.unwrap_or(false) {
        Some(path)
    } else {
        None
    }
}

fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

async fn ocr_screenshot(path: &std::path::Path) -> String {
    let Ok(output) = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("--psm")
        .arg("3")
        .output()
        .await
    else {
        return String::new();
    };
    if output.status.success() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        String::new()
    }
}

#[derive(Debug, Serialize)]
struct VisionContent {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "image_url")]
    image_url: Option<VisionImageUrl>,
}

#[derive(Debug, Serialize)]
struct VisionImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<VisionContent>,
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: &'static str,
    max_tokens: u32,
    messages: Vec<VisionMessage>,
}

#[derive(Debug, serde::Deserialize)]
struct VisionChoice {
    message: VisionChoiceMessage,
}

#[derive(Debug, serde::Deserialize)]
struct VisionChoiceMessage {
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
}

/// Describes an image via a vision-capable chat-completions endpoint.
/// Returns an empty string if no API key is configured or the call fails —
/// callers fall back to OCR.
pub async fn vision_describe(
    api_base: &str,
    api_key: &str,
    image_path: &std::path::Path,
    question: &str,
) -> String {
    if api_key.is_empty() {
        return String::new();
    }
    let Ok(bytes) = tokio::fs::read(image_path).await else {
        return String::new();
    };
    let b64 = BASE64.encode(bytes);
    let request = VisionRequest {
        model: "gpt-4o",
        max_tokens: 300,
        messages: vec![VisionMessage {
            role: "user",
            content: vec![
                VisionContent {
                    kind: "text",
                    text: Some(format!(
                        "{question} Keep your answer to 2-3 short sentences for voice readback."
                    )),
                    image_url: None,
                },
                VisionContent {
                    kind: "image_url",
                    text: None,
                    image_url: Some(VisionImageUrl {
                        url: format!("data:image/png;base64,{b64}"),
                        detail: "low",
                    }),
                },
            ],
        }],
    };

    let client = reqwest::Client::new();
    let Ok(resp) = client
        .post(format!("{api_base}/chat/completions"))
        .bearer_auth(api_key)
        .json(&request)
        .timeout(Duration::from_secs(20))
        .send()
        .await
    else {
        return String::new();
    };
    let Ok(parsed) = resp.json::<VisionResponse>().await else {
        return String::new();
    };
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.trim().to_string())
        .unwrap_or_default()
}

/// Cheap text summary of what's on screen: active window + window list.
pub async fn screen_context() -> String {
    let mut parts = Vec::new();
    if let Some(active) = active_window().await {
        if !active.is_empty() {
            parts.push(format!("Active window: {active}"));
        }
    }
    let windows = window_list().await;
    if !windows.is_empty() {
        let lines: Vec<String> = windows.iter().map(|w| format!("  - {w}")).collect();
        parts.push(format!("Open windows:\n{}", lines.join("\n")));
    }
    if let Some((x, y)) = mouse_position().await {
        parts.push(format!("Mouse position: ({x}, {y})"));
    }
    if parts.is_empty() {
        "No screen info available.".to_string()
    } else {
        parts.join("\n")
    }
}

/// Full screen context augmented with a vision-model description (falling
/// back to OCR) of a fresh screenshot. The screenshot is deleted afterward.
pub async fn screen_context_with_vision(
    api_base: &str,
    api_key: &str,
    question: &str,
) -> String {
    let mut ctx = screen_context().await;

    let Some(path) = take_screenshot().await else {
        return ctx;
    };

    let vision_result = vision_describe(api_base, api_key, &path, question).await;
    if !vision_result.is_empty() {
        ctx.push_str(&format!("\n\nScreen vision analysis:\n{vision_result}"));
    } else {
        let mut ocr_text = ocr_screenshot(&path).await;
        if !ocr_text.is_empty() {
            if ocr_text.len() > 1500 {
                ocr_text.truncate(1500);
                ocr_text.push_str("...");
            }
            ctx.push_str(&format!("\n\nVisible screen text (OCR):\n{ocr_text}"));
        }
    }

    let _ = tokio::fs::remove_file(&path).await;
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_vision_detects_screen_keywords() {
        assert!(needs_vision("what's on my screen right now"));
        assert!(needs_vision("click the submit button"));
        assert!(!needs_vision("what time is it"));
    }

    #[test]
    fn parses_mouse_location_output() {
        let out = "x:1024 y:768 screen:0 window:12345";
        assert_eq!(parse_mouse_location(out), Some((1024, 768)));
    }

    #[test]
    fn malformed_mouse_location_is_none() {
        assert_eq!(parse_mouse_location("garbage"), None);
    }
}
