//! Run journal: a history of every orchestration run, kept in SQLite.
//!
//! The journal is informational only. Skip decisions come from the copy
//! state, never from here.

use anyhow::{Context, Result};
use std::path::Path;
use tokio_rusqlite::Connection;

pub mod runs;

const SCHEMA: &str = include_str!("schema.sql");

pub async fn init(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create journal directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .await
        .with_context(|| format!("Failed to open journal {}", path.display()))?;
    apply_schema(&conn).await?;
    Ok(conn)
}

/// Journal that lives only as long as the connection, for tests and
/// ephemeral sessions.
pub async fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().await?;
    apply_schema(&conn).await?;
    Ok(conn)
}

async fn apply_schema(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok::<(), tokio_rusqlite::rusqlite::Error>(())
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to apply journal schema: {}", e))
}
