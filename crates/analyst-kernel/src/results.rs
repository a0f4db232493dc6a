use analyst_protocol::ResultEnvelope;
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Envelopes of one job, one SQLite file per job. Writes are serialized
/// internally so concurrent ingestion from several fetch tasks is safe.
pub struct ResultStore {
    job_id: String,
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl ResultStore {
    pub fn path_for(dir: &Path, job_id: &str) -> PathBuf {
        dir.join(format!("{job_id}.sqlite"))
    }

    pub fn open(dir: &Path, job_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_for(dir, job_id);
        let conn = Connection::open(&path)?;
        crate::tune(&conn)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS envelopes (
              unit_id TEXT PRIMARY KEY,
              job_id TEXT,
              payload TEXT NOT NULL,
              stored TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            job_id: job_id.to_string(),
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the envelope for its unit; storing the same unit
    /// twice leaves a single row.
    pub fn store(&self, env: &ResultEnvelope) -> Result<()> {
        let payload = serde_json::to_string(env)?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO envelopes(unit_id,job_id,payload,stored) VALUES(?,?,?,?)",
            params![env.unit_id, env.job_id, payload, now],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(1) FROM envelopes", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn get(&self, unit_id: &str) -> Result<Option<ResultEnvelope>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM envelopes WHERE unit_id=? LIMIT 1",
                [unit_id],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|s| serde_json::from_str(&s).map_err(|e| anyhow!("corrupt envelope: {}", e)))
            .transpose()
    }

    pub fn envelopes(&self) -> Result<Vec<ResultEnvelope>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload FROM envelopes ORDER BY unit_id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let payload: String = r.get(0)?;
            out.push(serde_json::from_str(&payload).map_err(|e| anyhow!("corrupt envelope: {}", e))?);
        }
        Ok(out)
    }

    /// Checkpoint the write-ahead log into the main file and close.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        conn.close().map_err(|(_, e)| anyhow!(e))?;
        tracing::debug!(job_id = %self.job_id, path = %self.path.display(), "closed result store");
        Ok(())
    }

    /// Remove the store file (and its WAL companions) for `job_id`.
    pub fn remove(dir: &Path, job_id: &str) -> Result<bool> {
        let path = Self::path_for(dir, job_id);
        let existed = path.exists();
        for suffix in ["", "-wal", "-shm"] {
            let p = PathBuf::from(format!("{}{}", path.display(), suffix));
            match std::fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }
}
