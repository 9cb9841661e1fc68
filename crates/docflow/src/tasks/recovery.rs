use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::{document_repo, job_repo, DatabaseError, JobUpdate, Scope};
use crate::model::{DocumentStatus, JobStatus, Payload};
use crate::queue::{TaskResponse, TaskStatus};
use crate::tasks::task_name_for;

const INTERRUPTED: &str = "Interrupted before completion";

/// Fails every job a previous process left PENDING or PROCESSING, together
/// with its document if that document is still mid-step. The in-process
/// queue does not survive a restart, so these jobs would never finish.
///
/// Returns the number of jobs failed.
pub fn fail_interrupted(conn: &Connection) -> Result<usize, DatabaseError> {
    let scope = Scope::begin_immediate(conn)?;
    let jobs = job_repo::list_unfinished(&scope)?;

    for job in &jobs {
        let mut task_info = Payload::new();
        task_info.insert("error".into(), Value::from(INTERRUPTED));
        let envelope = TaskResponse {
            status: TaskStatus::Error,
            task_id: job.uuid.clone(),
            task_name: task_name_for(job.job_type).to_string(),
            task_retry: 0,
            task_info,
            message: INTERRUPTED.to_string(),
        };

        job_repo::update(
            &scope,
            &job.uuid,
            &JobUpdate::default()
                .status(JobStatus::Failed)
                .message(INTERRUPTED)
                .task(envelope.to_payload()),
        )?;

        if let Some(document) = document_repo::find_by_job(&scope, &job.uuid)? {
            if matches!(
                document.status,
                DocumentStatus::Uploading | DocumentStatus::Parsing
            ) {
                document_repo::set_state(
                    &scope,
                    &document.uuid,
                    document.step,
                    DocumentStatus::Failed,
                )?;
            }
        }
        warn!(job_uuid = %job.uuid, job_type = %job.job_type, "Failed interrupted job");
    }

    scope.commit()?;
    if !jobs.is_empty() {
        info!(count = jobs.len(), "Recovered interrupted jobs");
    }
    Ok(jobs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;
    use crate::db::{NewDocument, NewJob};
    use crate::model::{DocumentStep, JobType};

    fn seed(conn: &Connection, job: &str, doc: &str, job_type: JobType) {
        job_repo::insert(
            conn,
            &NewJob {
                uuid: job.into(),
                job_type,
                file: None,
                message: None,
            },
        )
        .unwrap();
        document_repo::insert(
            conn,
            &NewDocument {
                uuid: doc.into(),
                name: "a.txt".into(),
                extension: "txt".into(),
                text: String::new(),
                extra_info: Payload::new(),
            },
        )
        .unwrap();
        document_repo::link(conn, doc, job).unwrap();
    }

    #[test]
    fn test_unfinished_jobs_and_documents_fail() {
        let (_dir, db) = temp_db();
        let conn = db.connect().unwrap();
        seed(&conn, "j1", "d1", JobType::Upload);
        seed(&conn, "j2", "d2", JobType::Upload);
        job_repo::update(&conn, "j2", &JobUpdate::default().status(JobStatus::Completed)).unwrap();
        document_repo::mark_uploaded(&conn, "d2", "/x").unwrap();

        assert_eq!(fail_interrupted(&conn).unwrap(), 1);

        let job = job_repo::find_by_uuid(&conn, "j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message.as_deref(), Some(INTERRUPTED));
        assert_eq!(job.task.unwrap()["task_name"], "document.upload");
        let doc = document_repo::find_by_uuid(&conn, "d1").unwrap().unwrap();
        assert_eq!(doc.state(), (DocumentStep::Upload, DocumentStatus::Failed));

        let done = document_repo::find_by_uuid(&conn, "d2").unwrap().unwrap();
        assert_eq!(done.state(), (DocumentStep::Upload, DocumentStatus::Uploaded));

        assert_eq!(fail_interrupted(&conn).unwrap(), 0);
    }
}
