//! Task Router: assigns prompts to tmux windows and tracks their status.
//!
//! Every mutation goes through a tmux subprocess (`set-buffer`/`paste-buffer`/
//! `send-keys`), so a window never needs to be "owned" by this process —
//! multiple orchestrator instances could in principle share the same tmux
//! server.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::Command;

use crate::error::{Result, VoicedError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Cancelled,
    Errored,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub window: u32,
    pub prompt: String,
    pub assigned_at: Instant,
    pub status: AssignmentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowInfo {
    pub window: u32,
    pub name: String,
    pub active: bool,
    pub task: Option<String>,
    pub task_status: Option<AssignmentStatus>,
}

async fn run_tmux(args: &[&str]) -> Result<std::process::Output> {
    Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(|e| VoicedError::Subprocess {
            command: format!("tmux {}", args.join(" ")),
            detail: e.to_string(),
        })
}

/// Tracks prompt assignments to tmux windows and mediates all tmux mutation.
#[derive(Default)]
pub struct TaskRouter {
    assignments: HashMap<u32, Assignment>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paste a prompt into `window`'s buffer and submit it with Enter.
    pub async fn assign(&mut self, window: u32, prompt: &str) -> Result<()> {
        let set = run_tmux(&["set-buffer", prompt]).await?;
        if !set.status.success() {
            return Err(VoicedError::Subprocess {
                command: "tmux set-buffer".into(),
                detail: "non-zero exit".into(),
            });
        }
        let window_s = window.to_string();
        let paste = run_tmux(&["paste-buffer", "-t", &window_s]).await?;
        if !paste.status.success() {
            return Err(VoicedError::Subprocess {
                command: "tmux paste-buffer".into(),
                detail: "non-zero exit".into(),
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let enter = run_tmux(&["send-keys", "-t", &window_s, "Enter"]).await?;
        if !enter.status.success() {
            return Err(VoicedError::Subprocess {
                command: "tmux send-keys".into(),
                detail: "non-zero exit".into(),
            });
        }

        self.assignments.insert(
            window,
            Assignment {
                window,
                prompt: prompt.to_string(),
                assigned_at: Instant::now(),
                status: AssignmentStatus::Active,
            },
        );
        Ok(())
    }

    /// Paste text into a window's buffer without submitting.
    pub async fn type_to_window(&self, window: u32, text: &str) -> Result<()> {
        let set = run_tmux(&["set-buffer", text]).await?;
        if !set.status.success() {
            return Err(VoicedError::Subprocess {
                command: "tmux set-buffer".into(),
                detail: "non-zero exit".into(),
            });
        }
        let window_s = window.to_string();
        let paste = run_tmux(&["paste-buffer", "-t", &window_s]).await?;
        if !paste.status.success() {
            return Err(VoicedError::Subprocess {
                command: "tmux paste-buffer".into(),
                detail: "non-zero exit".into(),
            });
        }
        Ok(())
    }

    /// Send Ctrl-C to interrupt whatever is running in `window`.
    pub async fn cancel(&mut self, window: u32) -> Result<()> {
        let window_s = window.to_string();
        let r = run_tmux(&["send-keys", "-t", &window_s, "C-c"]).await?;
        if let Some(a) = self.assignments.get_mut(&window) {
            a.status = AssignmentStatus::Cancelled;
        }
        if r.status.success() {
            Ok(())
        } else {
            Err(VoicedError::Subprocess {
                command: "tmux send-keys C-c".into(),
                detail: "non-zero exit".into(),
            })
        }
    }

    pub async fn switch(&self, window: u32) -> Result<()> {
        let window_s = window.to_string();
        let r = run_tmux(&["select-window", "-t", &window_s]).await?;
        if r.status.success() {
            Ok(())
        } else {
            Err(VoicedError::Subprocess {
                command: "tmux select-window".into(),
                detail: "non-zero exit".into(),
            })
        }
    }

    pub fn mark_completed(&mut self, window: u32) {
        if let Some(a) = self.assignments.get_mut(&window) {
            a.status = AssignmentStatus::Completed;
        }
    }

    pub fn mark_errored(&mut self, window: u32) {
        if let Some(a) = self.assignments.get_mut(&window) {
            a.status = AssignmentStatus::Errored;
        }
    }

    pub fn assignment(&self, window: u32) -> Option<&Assignment> {
        self.assignments.get(&window)
    }

    pub fn active_assignments(&self) -> Vec<&Assignment> {
        self.assignments
            .values()
            .filter(|a| a.status == AssignmentStatus::Active)
            .collect()
    }

    /// List all tmux windows, annotated with any tracked assignment.
    pub async fn list(&self) -> Result<Vec<WindowInfo>> {
        let r = run_tmux(&[
            "list-windows",
            "-F",
            "#{window_index} #{window_name} #{window_active}",
        ])
        .await?;
        if !r.status.success() {
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&r.stdout);
        let mut windows = Vec::new();
        for line in stdout.lines() {
            let mut parts = line.splitn(3, ' ');
            let Some(idx) = parts.next().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let name = parts.next().unwrap_or("").to_string();
            let active = parts.next() == Some("1");
            let assignment = self.assignment(idx);
            windows.push(WindowInfo {
                window: idx,
                name,
                active,
                task: assignment.map(|a| truncate(&a.prompt, 60)),
                task_status: assignment.map(|a| a.status),
            });
        }
        Ok(windows)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_completed_updates_existing_assignment() {
        let mut router = TaskRouter::new();
        router.assignments.insert(
            1,
            Assignment {
                window: 1,
                prompt: "fix the tests".into(),
                assigned_at: Instant::now(),
                status: AssignmentStatus::Active,
            },
        );
        router.mark_completed(1);
        assert_eq!(router.assignment(1).unwrap().status, AssignmentStatus::Completed);
    }

    #[test]
    fn mark_completed_on_unknown_window_is_noop() {
        let mut router = TaskRouter::new();
        router.mark_completed(99);
        assert!(router.assignment(99).is_none());
    }

    #[test]
    fn active_assignments_filters_by_status() {
        let mut router = TaskRouter::new();
        router.assignments.insert(
            1,
            Assignment {
                window: 1,
                prompt: "a".into(),
                assigned_at: Instant::now(),
                status: AssignmentStatus::Active,
            },
        );
        router.assignments.insert(
            2,
            Assignment {
                window: 2,
                prompt: "b".into(),
                assigned_at: Instant::now(),
                status: AssignmentStatus::Completed,
            },
        );
        assert_eq!(router.active_assignments().len(), 1);
    }

    #[test]
    fn truncate_adds_ellipsis_only_when_needed() {
        assert_eq!(truncate("short", 60), "short");
        let long = "x".repeat(100);
        assert!(truncate(&long, 60).ends_with("..."));
    }
}
