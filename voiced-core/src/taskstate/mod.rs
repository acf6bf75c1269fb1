//! Task-State Client: narrow async client for the external task-tracking
//! service's line-delimited JSON-RPC-over-stdio protocol.
//!
//! The service's own persistence (task storage, instance heartbeats) is out
//! of scope here — this module only implements the nine operations the
//! orchestrator calls and the wire framing they ride on: one JSON object per
//! line, `{"id", "method", "params"}` requests answered by `{"id", "result"}`
//! or `{"id", "error"}`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Result, VoicedError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<i64>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub subtask_ids: Vec<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceState {
    pub instance_id: String,
    #[serde(default)]
    pub current_task_id: Option<i64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub last_heartbeat: Option<String>,
}

/// Fields accepted by `create_task`. Everything but `title` is optional and
/// left to the service's own defaults (`pending`/`medium`) when omitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The nine task/instance operations the orchestrator depends on. All
/// business-rule validation (enum membership, parent existence) happens
/// service-side and surfaces here as [`VoicedError::TaskState`] /
/// [`VoicedError::TaskStateValidation`].
#[async_trait::async_trait]
pub trait TaskStateClient: Send + Sync + 'static {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task>;
    async fn update_task(&self, id: i64, updates: Value) -> Result<Task>;
    async fn delete_task(&self, id: i64) -> Result<Task>;
    async fn get_task(&self, id: i64) -> Result<Task>;
    async fn query_tasks(&self, filters: Option<Value>) -> Result<Vec<Task>>;
    async fn heartbeat(&self, instance_id: &str) -> Result<InstanceState>;
    async fn set_instance_state(&self, instance_id: &str, state: Value) -> Result<InstanceState>;
    async fn get_instance_state(&self, instance_id: &str) -> Result<InstanceState>;
    async fn list_active_instances(&self) -> Result<Vec<InstanceState>>;
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

/// Speaks the task-state wire protocol over a spawned child process's
/// stdin/stdout. The child is kept alive for the client's lifetime.
pub struct StdioTaskStateClient {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
    _child: Child,
}

impl StdioTaskStateClient {
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
                .map_err(|e| VoicedError::TaskState(e.to_string()))?;
            stdin
                .flush()
                .await
                .map_err(|e| VoicedError::TaskState(e.to_string()))?;
        }

        let mut response_line = String::new();
        {
            let mut stdout = self.stdout.lock().await;
            let n = stdout
                .read_line(&mut response_line)
                .await
                .map_err(|e| VoicedError::TaskState(e.to_string()))?;
            if n == 0 {
                return Err(VoicedError::TaskState(
                    "task-state service closed its output".to_string(),
                ));
            }
        }

        let response: RpcResponse = serde_json::from_str(response_line.trim())?;
        if let Some(err) = response.error {
            return Err(VoicedError::TaskStateValidation(err.message));
        }
        response
            .result
            .ok_or_else(|| VoicedError::TaskState("response missing result".to_string()))
    }
}

#[async_trait::async_trait]
impl TaskStateClient for StdioTaskStateClient {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task> {
        let result = self.call("create_task", serde_json::to_value(req)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn update_task(&self, id: i64, updates: Value) -> Result<Task> {
        let result = self
            .call("update_task", json!({ "id": id, "updates": updates }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn delete_task(&self, id: i64) -> Result<Task> {
        let result = self.call("delete_task", json!({ "id": id })).await?;
        let task = result
            .get("deleted_task")
            .cloned()
            .unwrap_or(result);
        Ok(serde_json::from_value(task)?)
    }

    async fn get_task(&self, id: i64) -> Result<Task> {
        let result = self.call("get_task", json!({ "id": id })).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn query_tasks(&self, filters: Option<Value>) -> Result<Vec<Task>> {
        let result = self
            .call("query_tasks", json!({ "filters": filters }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn heartbeat(&self, instance_id: &str) -> Result<InstanceState> {
        let result = self
            .call("heartbeat", json!({ "instance_id": instance_id }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn set_instance_state(&self, instance_id: &str, state: Value) -> Result<InstanceState> {
        let result = self
            .call(
                "set_instance_state",
                json!({ "instance_id": instance_id, "state": state }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_instance_state(&self, instance_id: &str) -> Result<InstanceState> {
        let result = self
            .call("get_instance_state", json!({ "instance_id": instance_id }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn list_active_instances(&self) -> Result<Vec<InstanceState>> {
        let result = self.call("list_active_instances", json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_task_request_omits_absent_fields() {
        let req = CreateTaskRequest {
            title: "ship it".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"title\":\"ship it\""));
        assert!(!json.contains("description"));
        assert!(!json.contains("priority"));
    }

    #[test]
    fn rpc_error_response_parses() {
        let raw = r#"{"id":"1","error":{"message":"Task 9 not found"}}"#;
        let response: RpcResponse = serde_json::from_str(raw).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().message, "Task 9 not found");
    }

    #[test]
    fn rpc_result_response_parses_into_task() {
        let raw = r#"{"id":"1","result":{"id":7,"title":"t","status":"pending","priority":"medium"}}"#;
        let response: RpcResponse = serde_json::from_str(raw).unwrap();
        let task: Task = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(task.id, 7);
        assert_eq!(task.title, "t");
    }

    #[test]
    fn delete_task_unwraps_deleted_task_field() {
        let wrapped = json!({
            "success": true,
            "deleted_task": {"id": 3, "title": "x", "status": "pending", "priority": "low"}
        });
        let task = wrapped.get("deleted_task").cloned().unwrap();
        let task: Task = serde_json::from_value(task).unwrap();
        assert_eq!(task.id, 3);
    }
}
