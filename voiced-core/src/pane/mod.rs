//! Pane Monitor: watches tmux windows for AI agents finishing or erroring
//! out, by periodically capturing pane output and classifying its tail.
//!
//! Runs as a single-owner polling actor: one task owns all watched panes and
//! posts transitions onto a bounded channel, so callers never contend for
//! pane state across threads.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

/// Lifecycle state of a monitored pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneState {
    Unknown,
    /// Agent is actively producing output.
    Working,
    /// Prompt returned — waiting for input.
    Idle,
    /// An error pattern was observed in recent output.
    Errored,
}

/// Record kept per watched tmux window.
#[derive(Debug, Clone)]
struct PaneRecord {
    state: PaneState,
    output_hash: u64,
    last_change: Instant,
}

/// Emitted on the monitor's transition channel when a pane's state changes.
#[derive(Debug, Clone)]
pub struct PaneTransition {
    pub window: u32,
    pub old_state: PaneState,
    pub new_state: PaneState,
    /// Last non-empty lines of pane output, for building a notification.
    pub snippet: String,
}

fn idle_patterns() -> Vec<Regex> {
    [
        r"^❯\s*$",
        r"^\$\s*$",
        r"^>\s*$",
        r"^%\s*$",
        r"^\w+@.*[\$#]\s*$",
        r"^\(.*\)\s*❯\s*$",
        r"^\(.*\)\s*>\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static idle pattern"))
    .collect()
}

fn error_patterns() -> Vec<Regex> {
    [
        r"(?mi)^error[:\s]",
        r"(?mi)^Traceback \(most recent",
        r"(?mi)^.*Exception:",
        r"(?mi)^fatal:",
        r"(?mi)^FAILED",
        r"(?mi)^panic:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static error pattern"))
    .collect()
}

/// Classify pane output by checking the last non-empty line against idle
/// patterns, then the recent tail against error patterns.
pub fn detect_state(output: &str) -> PaneState {
    let lines: Vec<&str> = output.lines().collect();
    if lines.is_empty() {
        return PaneState::Unknown;
    }

    let idle_re = idle_patterns();
    let tail: Vec<&str> = lines
        .iter()
        .rev()
        .take(5)
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if let Some(last_line) = tail.first() {
        if idle_re.iter().any(|re| re.is_match(last_line)) {
            return PaneState::Idle;
        }
    }

    let error_re = error_patterns();
    let recent: String = lines
        .iter()
        .rev()
        .take(15)
        .rev()
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if error_re.iter().any(|re| re.is_match(&recent)) {
        return PaneState::Errored;
    }

    PaneState::Working
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Capture the last `lines` lines of a tmux window's pane.
pub async fn capture_pane(window: u32, lines: u32) -> Option<String> {
    let output = Command::new("tmux")
        .args([
            "capture-pane",
            "-t",
            &window.to_string(),
            "-p",
            "-S",
            &format!("-{lines}"),
        ])
        .output()
        .await
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        None
    }
}

/// Polls a set of tmux windows on a fixed interval and reports state
/// transitions on a bounded channel.
pub struct PaneMonitor {
    poll_interval: Duration,
    panes: HashMap<u32, PaneRecord>,
    tx: mpsc::Sender<PaneTransition>,
}

impl PaneMonitor {
    /// Returns the monitor plus the receiving half of its transition channel.
    pub fn new(poll_interval_secs: f32) -> (Self, mpsc::Receiver<PaneTransition>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                poll_interval: Duration::from_secs_f32(poll_interval_secs.max(0.25)),
                panes: HashMap::new(),
                tx,
            },
            rx,
        )
    }

    /// Start watching a window, taking a baseline snapshot so pre-existing
    /// content never triggers a spurious transition.
    pub async fn watch(&mut self, window: u32) {
        if self.panes.contains_key(&window) {
            return;
        }
        let (state, hash) = match capture_pane(window, 30).await {
            Some(output) => (detect_state(&output), hash_str(&output)),
            None => (PaneState::Unknown, 0),
        };
        self.panes.insert(
            window,
            PaneRecord {
                state,
                output_hash: hash,
                last_change: Instant::now(),
            },
        );
    }

    pub fn unwatch(&mut self, window: u32) {
        self.panes.remove(&window);
    }

    pub fn state(&self, window: u32) -> PaneState {
        self.panes
            .get(&window)
            .map(|r| r.state)
            .unwrap_or(PaneState::Unknown)
    }

    /// Run the poll loop until the task is dropped/aborted.
    pub async fn run(mut self) {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let windows: Vec<u32> = self.panes.keys().copied().collect();
            for window in windows {
                let Some(output) = capture_pane(window, 30).await else {
                    continue;
                };
                let new_hash = hash_str(&output);
                let record = self.panes.get_mut(&window).expect("just listed");
                if new_hash == record.output_hash {
                    continue;
                }
                record.output_hash = new_hash;
                let new_state = detect_state(&output);
                if new_state != record.state {
                    let old_state = record.state;
                    record.state = new_state;
                    record.last_change = Instant::now();
                    let snippet = output
                        .lines()
                        .rev()
                        .take(5)
                        .collect::<Vec<_>>()
                        .into_iter()
                        .rev()
                        .collect::<Vec<_>>()
                        .join("\n");
                    let transition = PaneTransition {
                        window,
                        old_state,
                        new_state,
                        snippet,
                    };
                    if self.tx.send(transition).await.is_err() {
                        warn!("pane transition receiver dropped, stopping monitor");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_idle_prompt() {
        assert_eq!(detect_state("building...\n$ "), PaneState::Idle);
    }

    #[test]
    fn detects_error_line() {
        assert_eq!(
            detect_state("running tests\nError: assertion failed\n"),
            PaneState::Errored
        );
    }

    #[test]
    fn defaults_to_working_on_ambiguous_output() {
        assert_eq!(
            detect_state("Compiling crate v0.1.0\nChecking deps\n"),
            PaneState::Working
        );
    }

    #[test]
    fn empty_output_is_unknown() {
        assert_eq!(detect_state(""), PaneState::Unknown);
    }

    #[test]
    fn trailing_word_error_does_not_false_positive() {
        // "error" mid-sentence, not at line start, must not trip ERRORED
        assert_eq!(
            detect_state("no error handling needed here\n$ "),
            PaneState::Idle
        );
    }
}
