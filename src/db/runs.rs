use anyhow::{Result, anyhow};
use serde::Serialize;
use tokio_rusqlite::{Connection, params, rusqlite};

use crate::core::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// The volume disappeared mid-run; counts cover what finished before that.
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// One journaled run, as stored.
#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub id: String,
    pub volume_root: String,
    pub volume_label: String,
    pub destination: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub files_copied: i64,
    pub duplicates_skipped: i64,
    pub failures: i64,
    pub bytes_copied: i64,
    pub error: Option<String>,
}

pub async fn record(
    conn: &Connection,
    summary: &RunSummary,
    status: RunStatus,
    error: Option<String>,
) -> Result<()> {
    let row = RunRow {
        id: summary.run_id.clone(),
        volume_root: summary.volume_root.display().to_string(),
        volume_label: summary.volume_label.clone(),
        destination: summary.destination.display().to_string(),
        started_at: summary.started_at.to_rfc3339(),
        finished_at: summary.finished_at.map(|t| t.to_rfc3339()),
        status: status.as_str().to_string(),
        files_copied: summary.files_copied as i64,
        duplicates_skipped: summary.duplicates_skipped as i64,
        failures: summary.failures.len() as i64,
        bytes_copied: summary.bytes_copied as i64,
        error,
    };

    conn.call(move |c| {
        c.execute(
            "INSERT INTO runs (id, volume_root, volume_label, destination, started_at,
                               finished_at, status, files_copied, duplicates_skipped,
                               failures, bytes_copied, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.id,
                row.volume_root,
                row.volume_label,
                row.destination,
                row.started_at,
                row.finished_at,
                row.status,
                row.files_copied,
                row.duplicates_skipped,
                row.failures,
                row.bytes_copied,
                row.error
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await
    .map_err(|e| anyhow!("Failed to journal run: {}", e))
}

/// Most recent runs first.
pub async fn recent(conn: &Connection, limit: u32) -> Result<Vec<RunRow>> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, volume_root, volume_label, destination, started_at, finished_at,
                    status, files_copied, duplicates_skipped, failures, bytes_copied, error
             FROM runs
             ORDER BY started_at DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(RunRow {
                    id: row.get(0)?,
                    volume_root: row.get(1)?,
                    volume_label: row.get(2)?,
                    destination: row.get(3)?,
                    started_at: row.get(4)?,
                    finished_at: row.get(5)?,
                    status: row.get(6)?,
                    files_copied: row.get(7)?,
                    duplicates_skipped: row.get(8)?,
                    failures: row.get(9)?,
                    bytes_copied: row.get(10)?,
                    error: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok::<_, rusqlite::Error>(rows)
    })
    .await
    .map_err(|e| anyhow!("Failed to list runs: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{FileFailure, Volume};
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    fn summary(label: &str, offset_secs: i64) -> RunSummary {
        let mut summary = RunSummary::new(
            uuid::Uuid::now_v7().to_string(),
            &Volume::new(format!("/media/{}", label)),
            PathBuf::from("/backup"),
        );
        summary.started_at = Utc::now() + Duration::seconds(offset_secs);
        summary.finished_at = Some(summary.started_at + Duration::seconds(5));
        summary.files_copied = 3;
        summary.bytes_copied = 4096;
        summary
    }

    #[tokio::test]
    async fn recorded_runs_are_listed_newest_first() {
        let conn = crate::db::init_in_memory().await.unwrap();

        record(&conn, &summary("OLD", 0), RunStatus::Completed, None)
            .await
            .unwrap();

        let mut aborted = summary("NEW", 60);
        aborted.failures.push(FileFailure {
            path: PathBuf::from("/media/NEW/a.jpg"),
            kind: "io".into(),
            message: "boom".into(),
        });
        record(
            &conn,
            &aborted,
            RunStatus::Aborted,
            Some("drive removed".into()),
        )
        .await
        .unwrap();

        let rows = recent(&conn, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].volume_label, "NEW");
        assert_eq!(rows[0].status, "aborted");
        assert_eq!(rows[0].failures, 1);
        assert_eq!(rows[0].error.as_deref(), Some("drive removed"));
        assert_eq!(rows[1].files_copied, 3);
        assert_eq!(rows[1].bytes_copied, 4096);
    }

    #[tokio::test]
    async fn limit_is_respected() {
        let conn = crate::db::init_in_memory().await.unwrap();
        for i in 0..3 {
            record(&conn, &summary("CARD", i), RunStatus::Completed, None)
                .await
                .unwrap();
        }
        assert_eq!(recent(&conn, 2).await.unwrap().len(), 2);
    }
}
