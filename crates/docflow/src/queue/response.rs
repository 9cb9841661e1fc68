use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Payload;
use crate::queue::task::TaskContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Error,
    Pending,
}

/// Envelope stored in a job's `task` column. The shape is the same for
/// every task type; only `task_info` varies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: TaskStatus,
    pub task_id: String,
    pub task_name: String,
    pub task_retry: u32,
    pub task_info: Payload,
    pub message: String,
}

impl TaskResponse {
    pub fn success(ctx: &TaskContext, task_info: Payload, message: impl Into<String>) -> Self {
        Self::with_status(TaskStatus::Success, ctx, task_info, message)
    }

    pub fn error(ctx: &TaskContext, task_info: Payload, message: impl Into<String>) -> Self {
        Self::with_status(TaskStatus::Error, ctx, task_info, message)
    }

    fn with_status(
        status: TaskStatus,
        ctx: &TaskContext,
        task_info: Payload,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            task_id: ctx.task_id.clone(),
            task_name: ctx.task_name.clone(),
            task_retry: ctx.attempt,
            task_info,
            message: message.into(),
        }
    }

    /// The envelope as a JSON object, in the shape `from_payload` reads.
    pub fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(payload)) => payload,
            // Strings, numbers and a map always serialize to an object.
            _ => Payload::new(),
        }
    }

    /// Reads an envelope back from a stored payload.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        serde_json::from_value(Value::Object(payload.clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::{RetryPolicy, TaskMessage};

    #[test]
    fn test_envelope_shape() {
        let msg = TaskMessage::new("job-1", "document.parse", vec![]).next_attempt();
        let ctx = TaskContext::new(&msg, &RetryPolicy::default());
        let mut info = Payload::new();
        info.insert("chunk_count".into(), Value::from(2));

        let payload = TaskResponse::success(&ctx, info, "done").to_payload();
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["task_id"], "job-1");
        assert_eq!(payload["task_name"], "document.parse");
        assert_eq!(payload["task_retry"], 1);
        assert_eq!(payload["task_info"]["chunk_count"], 2);
        assert_eq!(payload["message"], "done");

        let back = TaskResponse::from_payload(&payload).unwrap();
        assert_eq!(back.status, TaskStatus::Success);
        assert_eq!(back.task_retry, 1);
    }

    #[test]
    fn test_payload_round_trips_every_status() {
        let ctx = TaskContext::new(
            &TaskMessage::new("job-2", "document.upload", vec![]),
            &RetryPolicy::default(),
        );
        let mut response = TaskResponse::error(&ctx, Payload::new(), "failed");
        response.status = TaskStatus::Pending;

        let payload = response.to_payload();
        assert_eq!(payload["status"], "pending");
        assert_eq!(payload.len(), 6);
        assert_eq!(TaskResponse::from_payload(&payload), Some(response));
    }

    #[test]
    fn test_from_payload_rejects_other_shapes() {
        let mut payload = Payload::new();
        payload.insert("error".into(), Value::from("boom"));
        assert!(TaskResponse::from_payload(&payload).is_none());
    }
}
