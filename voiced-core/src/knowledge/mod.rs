//! Knowledge Base Client: narrow async client for the external RAG service's
//! `search`/`save_conversation` operations, used by THINKING to ground a
//! brain prompt in past tasks, decisions, and conversation history.
//!
//! Speaks the same line-delimited JSON-RPC-over-stdio transport as the
//! task-state client. The vector index and embedding model backing the
//! service are out of scope — this module only implements the two
//! operations the orchestrator depends on.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Result, VoicedError};

/// The four collections the orchestrator searches across by default.
pub const DEFAULT_COLLECTIONS: &[&str] = &["tasks", "context", "conversations", "docs"];

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub document: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub collection: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

/// `search`/`save_conversation` against the RAG knowledge base.
#[async_trait::async_trait]
pub trait KnowledgeBaseClient: Send + Sync + 'static {
    async fn search(
        &self,
        query: &str,
        k: usize,
        collections: Option<&[&str]>,
    ) -> Result<Vec<SearchResult>>;

    async fn save_conversation(&self, summary: &str, id: Option<&str>) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// Speaks the knowledge-base wire protocol over a spawned child process's
/// stdin/stdout. The child is kept alive for the client's lifetime.
pub struct StdioKnowledgeBaseClient {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
    _child: Child,
}

impl StdioKnowledgeBaseClient {
    pub async fn connect(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoicedError::Subprocess {
                command: command.to_string(),
                detail: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| VoicedError::Subprocess {
            command: command.to_string(),
            detail: "child has no stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| VoicedError::Subprocess {
            command: command.to_string(),
            detail: "child has no stdout".to_string(),
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
            _child: child,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let request = RpcRequest {
            id: &id,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| VoicedError::Knowledge(e.to_string()))?;
            stdin
                .flush()
                .await
                .map_err(|e| VoicedError::Knowledge(e.to_string()))?;
        }

        let mut response_line = String::new();
        {
            let mut stdout = self.stdout.lock().await;
            let n = stdout
                .read_line(&mut response_line)
                .await
                .map_err(|e| VoicedError::Knowledge(e.to_string()))?;
            if n == 0 {
                return Err(VoicedError::Knowledge(
                    "knowledge base service closed its output".to_string(),
                ));
            }
        }

        let response: RpcResponse = serde_json::from_str(response_line.trim())?;
        if let Some(err) = response.error {
            return Err(VoicedError::Knowledge(err.message));
        }
        response
            .result
            .ok_or_else(|| VoicedError::Knowledge("response missing result".to_string()))
    }
}

#[async_trait::async_trait]
impl KnowledgeBaseClient for StdioKnowledgeBaseClient {
    async fn search(
        &self,
        query: &str,
        k: usize,
        collections: Option<&[&str]>,
    ) -> Result<Vec<SearchResult>> {
        let collections = collections.unwrap_or(DEFAULT_COLLECTIONS);
        let result = self
            .call(
                "search",
                json!({ "query": query, "n_results": k, "collections": collections }),
            )
            .await?;
        let mut results: Vec<SearchResult> = serde_json::from_value(result)?;
        results.sort_by(|a, b| {
            a.distance
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.distance.unwrap_or(f64::INFINITY))
        });
        results.truncate(k);
        Ok(results)
    }

    async fn save_conversation(&self, summary: &str, id: Option<&str>) -> Result<()> {
        self.call(
            "save_conversation",
            json!({ "summary": summary, "session_id": id.unwrap_or("") }),
        )
        .await?;
        Ok(())
    }
}

/// Whether a search hit is close enough to be worth quoting in a brain
/// prompt. Matches the distance cutoff the orchestrator applies for
/// `knowledge`-classified intents.
pub fn is_relevant(distance: Option<f64>) -> bool {
    distance.is_some_and(|d| d < 1.5)
}

/// Renders search hits into a short context block for a brain/LLM prompt.
pub fn render_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant past context:\n");
    for r in results {
        out.push_str(&format!("- [{}] {}\n", r.collection, truncate(&r.document, 300)));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_relevant_respects_cutoff() {
        assert!(is_relevant(Some(0.2)));
        assert!(!is_relevant(Some(1.5)));
        assert!(!is_relevant(Some(3.0)));
        assert!(!is_relevant(None));
    }

    #[test]
    fn render_context_formats_hits() {
        let results = vec![SearchResult {
            id: "a".into(),
            document: "decided to use sqlite".into(),
            metadata: None,
            collection: "context".into(),
            distance: Some(0.1),
        }];
        let ctx = render_context(&results);
        assert!(ctx.contains("[context]"));
        assert!(ctx.contains("decided to use sqlite"));
    }

    #[test]
    fn render_context_empty_is_empty_string() {
        assert_eq!(render_context(&[]), "");
    }

    #[test]
    fn truncate_adds_ellipsis_when_over_limit() {
        let long = "x".repeat(310);
        let out = truncate(&long, 300);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 303);
    }

    #[test]
    fn search_response_parses_and_sorts_by_distance() {
        let raw = serde_json::json!([
            {"id": "b", "document": "doc b", "collection": "docs", "distance": 0.9},
            {"id": "a", "document": "doc a", "collection": "tasks", "distance": 0.2},
        ]);
        let mut results: Vec<SearchResult> = serde_json::from_value(raw).unwrap();
        results.sort_by(|a, b| {
            a.distance
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.distance.unwrap_or(f64::INFINITY))
        });
        assert_eq!(results[0].id, "a");
    }
}
