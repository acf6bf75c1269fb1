//! Fast Router: handles simple window-management commands locally so they
//! never need a round trip through the brain agent.
//!
//! Patterns are tried in a fixed order against an ordered `(Regex, Handler)`
//! table — the first match wins, mirroring the sequence of `re.match` checks
//! in the original router.

use route_table::RouteTable;
use tracing::debug;

use crate::task_router::TaskRouter;

/// Outcome of a fast-routed command: an action tag plus the spoken response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResult {
    pub action: &'static str,
    pub response: String,
}

/// Tries to resolve `text` against the fast-route table.
///
/// Returns `None` when no pattern matches — callers should fall back to the
/// brain agent.
pub async fn try_route(task_router: &mut TaskRouter, text: &str) -> Option<RouteResult> {
    let text = text.to_lowercase();
    let text = text.trim();

    if let Some((window, prompt)) = RouteTable::assign_to_window(text) {
        if prompt.is_empty() {
            return None;
        }
        return Some(match task_router.assign(window, &prompt).await {
            Ok(()) => RouteResult {
                action: "assign",
                response: format!("Sent to window {window}."),
            },
            Err(_) => RouteResult {
                action: "error",
                response: format!("Couldn't reach window {window}."),
            },
        });
    }

    if let Some((name, prompt)) = RouteTable::assign_to_named_agent(text) {
        if prompt.is_empty() {
            return None;
        }
        let window = match task_router.list().await {
            Ok(windows) => windows
                .into_iter()
                .find(|w| w.name.to_lowercase().contains(&name))
                .map(|w| w.window),
            Err(_) => None,
        };
        return Some(match window {
            Some(window) => match task_router.assign(window, &prompt).await {
                Ok(()) => RouteResult {
                    action: "assign",
                    response: format!("Sent to {name} in window {window}."),
                },
                Err(_) => RouteResult {
                    action: "error",
                    response: format!("Couldn't reach {name}'s window."),
                },
            },
            None => RouteResult {
                action: "error",
                response: format!("I can't find a window named {name}."),
            },
        });
    }

    if let Some((window,)) = RouteTable::check_status(text) {
        let snippet = crate::pane::capture_pane(window, 10).await;
        return Some(match snippet {
            Some(s) => {
                let lines: Vec<&str> = s.lines().filter(|l| !l.trim().is_empty()).collect();
                let tail: String = lines
                    .iter()
                    .rev()
                    .take(3)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ");
                let summary: String = tail.chars().take(200).collect();
                RouteResult {
                    action: "status",
                    response: format!("Window {window}: {summary}"),
                }
            }
            None => RouteResult {
                action: "error",
                response: format!("Couldn't read window {window}."),
            },
        });
    }

    if let Some((window,)) = RouteTable::switch_window(text) {
        let _ = task_router.switch(window).await;
        return Some(RouteResult {
            action: "switch",
            response: format!("Switched to window {window}."),
        });
    }

    if let Some((window,)) = RouteTable::cancel_window(text) {
        let _ = task_router.cancel(window).await;
        return Some(RouteResult {
            action: "cancel",
            response: format!("Cancelled window {window}."),
        });
    }

    if RouteTable::list_windows(text) {
        return Some(match task_router.list().await {
            Ok(windows) if !windows.is_empty() => {
                let names: Vec<String> = windows
                    .iter()
                    .map(|w| format!("window {} {}", w.window, w.name))
                    .collect();
                RouteResult {
                    action: "list",
                    response: format!(
                        "You have {} windows: {}.",
                        windows.len(),
                        names.join(", ")
                    ),
                }
            }
            _ => RouteResult {
                action: "list",
                response: "No tmux windows found.".into(),
            },
        });
    }

    debug!(text, "no fast route matched, falling back to brain");
    None
}

/// Thin namespace around the compiled regex patterns so `try_route` stays
/// declarative. Patterns are compiled once via `std::sync::OnceLock`.
mod route_table {
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct RouteTable;

    fn assign_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^(?:tell|send|ask|have|get)\s+(?:window\s+)?(\d+)\s+(?:to\s+)?(.*)$")
                .expect("static pattern")
        })
    }

    fn assign_by_name_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^(?:tell|send|ask|have|get)\s+(claude|gemini|codex|opencode)\s+(?:to\s+)?(.*)$")
                .expect("static pattern")
        })
    }

    fn status_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^(?:check|status)\s+(?:on\s+|of\s+)?(?:window\s+)?(\d+)")
                .expect("static pattern")
        })
    }

    fn switch_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^(?:switch|go)\s+(?:to\s+)?(?:window\s+)?(\d+)").expect("static pattern")
        })
    }

    fn cancel_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^(?:cancel|stop|kill)\s+(?:window\s+)?(\d+)").expect("static pattern")
        })
    }

    fn list_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r"^(?:list|show)\s+(?:all\s+)?windows").expect("static pattern")
        })
    }

    impl RouteTable {
        pub fn assign_to_window(text: &str) -> Option<(u32, String)> {
            let caps = assign_re().captures(text)?;
            let window = caps.get(1)?.as_str().parse().ok()?;
            let prompt = caps.get(2)?.as_str().trim().to_string();
            Some((window, prompt))
        }

        pub fn assign_to_named_agent(text: &str) -> Option<(String, String)> {
            let caps = assign_by_name_re().captures(text)?;
            let name = caps.get(1)?.as_str().to_string();
            let prompt = caps.get(2)?.as_str().trim().to_string();
            Some((name, prompt))
        }

        pub fn check_status(text: &str) -> Option<(u32,)> {
            let caps = status_re().captures(text)?;
            Some((caps.get(1)?.as_str().parse().ok()?,))
        }

        pub fn switch_window(text: &str) -> Option<(u32,)> {
            let caps = switch_re().captures(text)?;
            Some((caps.get(1)?.as_str().parse().ok()?,))
        }

        pub fn cancel_window(text: &str) -> Option<(u32,)> {
            let caps = cancel_re().captures(text)?;
            Some((caps.get(1)?.as_str().parse().ok()?,))
        }

        pub fn list_windows(text: &str) -> bool {
            list_re().is_match(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assign_pattern_routes_to_window() {
        let mut router = TaskRouter::new();
        // tmux is not present in the test sandbox, so assign() will error —
        // we only assert that the pattern matched and produced a response.
        let result = try_route(&mut router, "tell window 2 to fix the tests").await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn unmatched_text_falls_through() {
        let mut router = TaskRouter::new();
        let result = try_route(&mut router, "what is the meaning of life").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_windows_pattern_matches() {
        let mut router = TaskRouter::new();
        let result = try_route(&mut router, "list windows").await;
        assert!(result.is_some());
        assert_eq!(result.unwrap().action, "list");
    }

    #[test]
    fn assign_pattern_extracts_window_and_prompt() {
        let parsed = route_table::RouteTable::assign_to_window(
            "send window 1 refactor the auth module",
        );
        assert_eq!(parsed, Some((1, "refactor the auth module".to_string())));
    }

    #[test]
    fn cancel_pattern_extracts_window() {
        let parsed = route_table::RouteTable::cancel_window("cancel window 3");
        assert_eq!(parsed, Some((3,)));
    }

    #[test]
    fn assign_by_name_pattern_extracts_agent_and_prompt() {
        let parsed = route_table::RouteTable::assign_to_named_agent(
            "tell claude to fix the tests",
        );
        assert_eq!(parsed, Some(("claude".to_string(), "fix the tests".to_string())));
    }

    #[test]
    fn assign_by_name_pattern_does_not_match_numeric_window() {
        let parsed = route_table::RouteTable::assign_to_named_agent("tell window 2 to fix the tests");
        assert_eq!(parsed, None);
    }

    #[tokio::test]
    async fn assign_by_name_with_no_matching_window_errors() {
        let mut router = TaskRouter::new();
        let result = try_route(&mut router, "tell gemini to run the build").await;
        assert!(result.is_some());
        assert_eq!(result.unwrap().action, "error");
    }
}
