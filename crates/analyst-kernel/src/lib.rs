//! Durable state for the orchestration engine: the job ledger and the
//! per-job result stores.

mod job;
mod results;

pub use job::{JobConfig, JobRecord};
pub use results::ResultStore;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const LEDGER_FILE: &str = "ledger.sqlite";

fn busy_timeout() -> std::time::Duration {
    let busy_ms: u64 = std::env::var("ANALYST_SQLITE_BUSY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);
    std::time::Duration::from_millis(busy_ms)
}

/// Apply the pragmas shared by every database this crate opens.
pub(crate) fn tune(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy_timeout())?;
    let _ = conn.pragma_update(None, "temp_store", "MEMORY");
    Ok(())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Key-value store of job records keyed by job id.
#[derive(Clone)]
pub struct Ledger {
    db_path: PathBuf,
}

impl Ledger {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(LEDGER_FILE);
        let conn = Connection::open(&db_path)?;
        tune(&conn)?;
        Self::init_schema(&conn)?;
        Ok(Self { db_path })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              project_id TEXT NOT NULL,
              complete INTEGER NOT NULL DEFAULT 0,
              data TEXT NOT NULL,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_complete ON jobs(complete);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(busy_timeout())?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Persist `record`, assigning an id on first save.
    pub fn save(&self, record: &mut JobRecord) -> Result<()> {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().simple().to_string();
            tracing::info!(job_id = %record.id, "created job");
        }
        record.updated_at = chrono::Utc::now();
        let data = serde_json::to_string(record)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs(id,project_id,complete,data,created,updated) VALUES(?,?,?,?,?,?)
             ON CONFLICT(id) DO UPDATE SET project_id=excluded.project_id,
               complete=excluded.complete, data=excluded.data, updated=excluded.updated",
            params![
                record.id,
                record.project_id,
                record.complete as i64,
                data,
                record
                    .created_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                now_rfc3339(),
            ],
        )?;
        tracing::debug!(job_id = %record.id, complete = record.complete, "saved job");
        Ok(())
    }

    /// Overwrite an existing record. Returns `false` without writing when
    /// the row is gone, so a deleted job is never brought back.
    pub fn update(&self, record: &mut JobRecord) -> Result<bool> {
        if record.id.is_empty() {
            return Err(anyhow!("cannot update a job that was never saved"));
        }
        record.updated_at = chrono::Utc::now();
        let data = serde_json::to_string(record)?;
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE jobs SET project_id=?, complete=?, data=?, updated=? WHERE id=?",
            params![
                record.project_id,
                record.complete as i64,
                data,
                now_rfc3339(),
                record.id,
            ],
        )?;
        tracing::debug!(job_id = %record.id, complete = record.complete, updated = n > 0, "updated job");
        Ok(n > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM jobs WHERE id=? LIMIT 1")?;
        let data: Option<String> = stmt.query_row([id], |row| row.get(0)).optional()?;
        data.map(|s| decode(&s)).transpose()
    }

    pub fn list_all(&self) -> Result<Vec<JobRecord>> {
        self.select("SELECT data FROM jobs ORDER BY created ASC", params![])
    }

    pub fn list_by_project(&self, project_id: &str) -> Result<Vec<JobRecord>> {
        self.select(
            "SELECT data FROM jobs WHERE project_id=? ORDER BY created ASC",
            [project_id],
        )
    }

    /// Jobs whose results have not yet been fully ingested.
    pub fn list_incomplete(&self) -> Result<Vec<JobRecord>> {
        self.select(
            "SELECT data FROM jobs WHERE complete=0 ORDER BY created ASC",
            params![],
        )
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM jobs WHERE id=?", [id])?;
        if n > 0 {
            tracing::info!(job_id = %id, "deleted job");
        }
        Ok(n > 0)
    }

    fn select<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let data: String = r.get(0)?;
            out.push(decode(&data)?);
        }
        Ok(out)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    /// Saves a copy of `record` and hands it back with its id and timestamps set.
    pub async fn save_async(&self, record: JobRecord) -> Result<JobRecord> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut record = record;
            k.save(&mut record)?;
            Ok(record)
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    /// Like [`Ledger::update`]; `None` means the job no longer exists.
    pub async fn update_async(&self, record: JobRecord) -> Result<Option<JobRecord>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut record = record;
            Ok(k.update(&mut record)?.then_some(record))
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_async(&self, id: &str) -> Result<Option<JobRecord>> {
        let k = self.clone();
        let s = id.to_string();
        tokio::task::spawn_blocking(move || k.get(&s))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_all_async(&self) -> Result<Vec<JobRecord>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_all())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_by_project_async(&self, project_id: &str) -> Result<Vec<JobRecord>> {
        let k = self.clone();
        let s = project_id.to_string();
        tokio::task::spawn_blocking(move || k.list_by_project(&s))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_incomplete_async(&self) -> Result<Vec<JobRecord>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_incomplete())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn delete_async(&self, id: &str) -> Result<bool> {
        let k = self.clone();
        let s = id.to_string();
        tokio::task::spawn_blocking(move || k.delete(&s))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

fn decode(data: &str) -> Result<JobRecord> {
    serde_json::from_str(data).map_err(|e| anyhow!("corrupt job record: {}", e))
}
