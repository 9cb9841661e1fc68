//! Domain records shared by the store, the orchestrator and the executors.
//!
//! Enum values are persisted as lowercase text, which is also their JSON form.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

/// Schema-less payload stored in `task` and `extra_info` columns.
pub type Payload = Map<String, Value>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobType {
    Upload,
    Parse,
    Delete,
    Other,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Status only moves forward; terminal statuses are final.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentStep {
    Upload,
    Parse,
    Generate,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Uploaded,
    Parsing,
    Parsed,
    Failed,
}

/// Whether `(step, status)` is one of the pairs a document may occupy.
pub fn is_reachable_state(step: DocumentStep, status: DocumentStatus) -> bool {
    use DocumentStatus::*;
    match step {
        DocumentStep::Upload => matches!(status, Uploading | Uploaded | Failed),
        DocumentStep::Parse => matches!(status, Parsing | Parsed | Failed),
        DocumentStep::Generate => true,
    }
}

macro_rules! sql_text_enum {
    ($($ty:ty),+ $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_ref()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

sql_text_enum!(JobType, JobStatus, DocumentStep, DocumentStatus);

/// A tracked unit of background work. `uuid` doubles as the task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub uuid: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub file: Option<String>,
    pub task: Option<Payload>,
    pub progress: u8,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub source: String,
    pub extension: String,
    /// Base64 payload staged at creation.
    #[serde(skip_serializing, default)]
    pub text: String,
    pub step: DocumentStep,
    pub status: DocumentStatus,
    pub extra_info: Payload,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn state(&self) -> (DocumentStep, DocumentStatus) {
        (self.step, self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: i64,
    pub uuid: String,
    pub document_uuid: String,
    pub chunk_index: u32,
    pub text: String,
    pub token_count: u32,
    pub vector: Option<Vec<f32>>,
    pub extra_info: Payload,
    pub created_at: DateTime<Utc>,
}
