//! SQLite database for jobs, records and structures
//!
//! One connection guarded by a mutex. Every write the pipeline issues comes
//! from the single persistence writer, so contention is limited to readers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{JobStore, RecordStore, StructureStore};
use crate::types::{Job, JobStatus, Record, RecordStatus, Structure, XRef};

const JOB_COLUMNS: &str =
    "id, status, message, payload_id, payload_name, processed, failed, created_at, updated_at";

const RECORD_COLUMNS: &str = "r.id, r.name, r.status, r.message, r.job_id, r.created_at, \
     x.id, x.kind, x.ref_id";

const STRUCTURE_COLUMNS: &str =
    "id, digest, smiles, molfile, formula, atom_count, bond_count, charge, created_at";

/// SQLite-backed pipeline store
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDbStats {
    pub jobs: usize,
    pub records: usize,
    pub structures: usize,
}

impl PipelineDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::persistence(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::persistence(format!("Failed to open in-memory database: {}", e))
        })?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::persistence(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                message TEXT,
                payload_id TEXT,
                payload_name TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_payload_id ON jobs(payload_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            -- Correlation keys of the workers that touched a job
            CREATE TABLE IF NOT EXISTS job_keys (
                job_id TEXT NOT NULL,
                key TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE,
                PRIMARY KEY (job_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_job_keys_key ON job_keys(key);

            CREATE TABLE IF NOT EXISTS structures (
                id TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                smiles TEXT,
                molfile TEXT,
                formula TEXT NOT NULL,
                atom_count INTEGER NOT NULL,
                bond_count INTEGER NOT NULL,
                charge INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_structures_digest ON structures(digest);

            CREATE TABLE IF NOT EXISTS xrefs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                ref_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                xref_id TEXT,
                job_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (xref_id) REFERENCES xrefs(id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_job_id ON records(job_id);
        "#,
        )
        .map_err(|e| Error::persistence(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Row counts for the summary printed by the CLI
    pub fn stats(&self) -> Result<PipelineDbStats> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| Error::persistence(format!("Failed to count {}: {}", table, e)))
        };

        Ok(PipelineDbStats {
            jobs: count("jobs")?,
            records: count("records")?,
            structures: count("structures")?,
        })
    }

    fn load_keys(conn: &Connection, job_id: &str) -> Result<BTreeSet<String>> {
        let mut stmt = conn
            .prepare("SELECT key FROM job_keys WHERE job_id = ?1")
            .map_err(|e| Error::persistence(format!("Failed to prepare query: {}", e)))?;

        let keys = stmt
            .query_map(params![job_id], |row| row.get::<_, String>(0))
            .map_err(|e| Error::persistence(format!("Failed to load job keys: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(keys)
    }

    /// Run a job query and attach the key set of every row
    fn query_jobs(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Job>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::persistence(format!("Failed to prepare query: {}", e)))?;

        let rows: Vec<Job> = stmt
            .query_map(params, row_to_job)
            .map_err(|e| Error::persistence(format!("Failed to list jobs: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(|mut job| {
                job.keys = Self::load_keys(conn, &job.id.to_string())?;
                Ok(job)
            })
            .collect()
    }

    fn insert_keys(tx: &Transaction<'_>, job: &Job) -> Result<()> {
        let job_id = job.id.to_string();
        for key in &job.keys {
            tx.execute(
                "INSERT OR IGNORE INTO job_keys (job_id, key) VALUES (?1, ?2)",
                params![job_id, key],
            )
            .map_err(|e| Error::persistence(format!("Failed to add job key: {}", e)))?;
        }
        Ok(())
    }

    fn insert_structure(conn: &Connection, structure: &Structure) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO structures (
                id, digest, smiles, molfile, formula, atom_count, bond_count, charge, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                structure.id.to_string(),
                structure.digest,
                structure.smiles,
                structure.molfile,
                structure.formula,
                structure.atom_count as i64,
                structure.bond_count as i64,
                structure.charge as i64,
                structure.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::persistence(format!("Failed to save structure: {}", e)))?;
        Ok(())
    }

    fn insert_record(conn: &Connection, record: &Record) -> Result<()> {
        if let Some(xref) = &record.xref {
            conn.execute(
                "INSERT INTO xrefs (id, kind, ref_id) VALUES (?1, ?2, ?3)",
                params![xref.id.to_string(), xref.kind, xref.ref_id],
            )
            .map_err(|e| Error::persistence(format!("Failed to save xref: {}", e)))?;
        }

        conn.execute(
            r#"
            INSERT INTO records (id, name, status, message, xref_id, job_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id.to_string(),
                record.name,
                record.status.as_str(),
                record.message,
                record.xref.as_ref().map(|x| x.id.to_string()),
                record.job_id.to_string(),
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::persistence(format!("Failed to save record: {}", e)))?;
        Ok(())
    }

    fn query_records(
        conn: &Connection,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {} FROM records r LEFT JOIN xrefs x ON r.xref_id = x.id WHERE {} \
             ORDER BY r.created_at ASC",
            RECORD_COLUMNS, filter
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::persistence(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(params, row_to_record)
            .map_err(|e| Error::persistence(format!("Failed to list records: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }
}

impl JobStore for PipelineDb {
    fn create(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::persistence(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                JOB_COLUMNS
            ),
            params![
                job.id.to_string(),
                job.status.as_str(),
                job.message,
                job.payload_id.map(|id| id.to_string()),
                job.payload_name,
                job.processed as i64,
                job.failed as i64,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::persistence(format!("Failed to create job: {}", e)))?;

        Self::insert_keys(&tx, job)?;

        tx.commit()
            .map_err(|e| Error::persistence(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn update(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::persistence(format!("Failed to begin transaction: {}", e)))?;

        let changed = tx
            .execute(
                r#"
                UPDATE jobs SET
                    status = ?2,
                    message = ?3,
                    payload_id = ?4,
                    payload_name = ?5,
                    updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    job.id.to_string(),
                    job.status.as_str(),
                    job.message,
                    job.payload_id.map(|id| id.to_string()),
                    job.payload_name,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| Error::persistence(format!("Failed to update job: {}", e)))?;

        if changed == 0 {
            return Err(Error::persistence(format!("Job {} does not exist", job.id)));
        }

        Self::insert_keys(&tx, job)?;

        tx.commit()
            .map_err(|e| Error::persistence(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn add_key(&self, job_id: Uuid, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE jobs SET updated_at = ?2 WHERE id = ?1",
                params![job_id.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::persistence(format!("Failed to update job: {}", e)))?;

        if changed == 0 {
            return Err(Error::persistence(format!("Job {} does not exist", job_id)));
        }

        conn.execute(
            "INSERT OR IGNORE INTO job_keys (job_id, key) VALUES (?1, ?2)",
            params![job_id.to_string(), key],
        )
        .map_err(|e| Error::persistence(format!("Failed to add job key: {}", e)))?;
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
            .map_err(|e| Error::persistence(format!("Failed to delete job: {}", e)))?;
        Ok(count > 0)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        let jobs = Self::query_jobs(
            &conn,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id.to_string()],
        )?;
        Ok(jobs.into_iter().next())
    }

    fn find_by_key(&self, key: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        let jobs = Self::query_jobs(
            &conn,
            &format!(
                "SELECT {} FROM jobs WHERE id IN (SELECT job_id FROM job_keys WHERE key = ?1) \
                 ORDER BY created_at DESC LIMIT 1",
                JOB_COLUMNS
            ),
            params![key],
        )?;
        Ok(jobs.into_iter().next())
    }

    fn find_by_payload(&self, payload_id: Uuid) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        Self::query_jobs(
            &conn,
            &format!(
                "SELECT {} FROM jobs WHERE payload_id = ?1 ORDER BY created_at ASC",
                JOB_COLUMNS
            ),
            params![payload_id.to_string()],
        )
    }

    fn find_active_by_payload(&self, payload_id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        let active: Vec<String> = JobStatus::ACTIVE
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect();
        let jobs = Self::query_jobs(
            &conn,
            &format!(
                "SELECT {} FROM jobs WHERE payload_id = ?1 AND status IN ({}) \
                 ORDER BY created_at DESC LIMIT 1",
                JOB_COLUMNS,
                active.join(", ")
            ),
            params![payload_id.to_string()],
        )?;
        Ok(jobs.into_iter().next())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        Self::query_jobs(
            &conn,
            &format!(
                "SELECT {} FROM jobs ORDER BY created_at DESC LIMIT ?1",
                JOB_COLUMNS
            ),
            params![limit as i64],
        )
    }
}

impl RecordStore for PipelineDb {
    fn save(&self, record: &Record) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::persistence(format!("Failed to begin transaction: {}", e)))?;
        Self::insert_record(&tx, record)?;
        tx.commit()
            .map_err(|e| Error::persistence(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn persist_outcome(&self, structure: Option<&Structure>, record: &Record) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::persistence(format!("Failed to begin transaction: {}", e)))?;

        if let Some(structure) = structure {
            Self::insert_structure(&tx, structure)?;
        }
        Self::insert_record(&tx, record)?;

        let failed = i64::from(record.status == RecordStatus::Failed);
        tx.execute(
            r#"
            UPDATE jobs SET
                processed = processed + 1,
                failed = failed + ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
            params![record.job_id.to_string(), failed, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::persistence(format!("Failed to update job counters: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::persistence(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::persistence(format!("Failed to begin transaction: {}", e)))?;

        let xref_id: Option<String> = tx
            .query_row(
                "SELECT xref_id FROM records WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::persistence(format!("Failed to get record: {}", e)))?
            .flatten();

        let count = tx
            .execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])
            .map_err(|e| Error::persistence(format!("Failed to delete record: {}", e)))?;
        if let Some(xref_id) = xref_id {
            tx.execute("DELETE FROM xrefs WHERE id = ?1", params![xref_id])
                .map_err(|e| Error::persistence(format!("Failed to delete xref: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::persistence(format!("Failed to commit transaction: {}", e)))?;
        Ok(count > 0)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let records = Self::query_records(&conn, "r.id = ?1", params![id.to_string()])?;
        Ok(records.into_iter().next())
    }

    fn find_by_job(&self, job_id: Uuid) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        Self::query_records(&conn, "r.job_id = ?1", params![job_id.to_string()])
    }
}

impl StructureStore for PipelineDb {
    fn save(&self, structure: &Structure) -> Result<()> {
        let conn = self.conn.lock();
        Self::insert_structure(&conn, structure)
    }

    fn update(&self, structure: &Structure) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                r#"
                UPDATE structures SET
                    digest = ?2,
                    smiles = ?3,
                    molfile = ?4,
                    formula = ?5,
                    atom_count = ?6,
                    bond_count = ?7,
                    charge = ?8
                WHERE id = ?1
                "#,
                params![
                    structure.id.to_string(),
                    structure.digest,
                    structure.smiles,
                    structure.molfile,
                    structure.formula,
                    structure.atom_count as i64,
                    structure.bond_count as i64,
                    structure.charge as i64,
                ],
            )
            .map_err(|e| Error::persistence(format!("Failed to update structure: {}", e)))?;

        if changed == 0 {
            return Err(Error::persistence(format!(
                "Structure {} does not exist",
                structure.id
            )));
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM structures WHERE id = ?1", params![id.to_string()])
            .map_err(|e| Error::persistence(format!("Failed to delete structure: {}", e)))?;
        Ok(count > 0)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Structure>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM structures WHERE id = ?1",
                STRUCTURE_COLUMNS
            ))
            .map_err(|e| Error::persistence(format!("Failed to prepare query: {}", e)))?;

        let structure = stmt
            .query_row(params![id.to_string()], row_to_structure)
            .optional()
            .map_err(|e| Error::persistence(format!("Failed to get structure: {}", e)))?;

        Ok(structure)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM structures", [], |row| row.get(0))
            .map_err(|e| Error::persistence(format!("Failed to count structures: {}", e)))?;
        Ok(count as usize)
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(1)?;
    let message: Option<String> = row.get(2)?;
    let payload_id_str: Option<String> = row.get(3)?;
    let payload_name: Option<String> = row.get(4)?;
    let processed: i64 = row.get(5)?;
    let failed: i64 = row.get(6)?;
    let created_at_str: String = row.get(7)?;
    let updated_at_str: String = row.get(8)?;

    Ok(Job {
        id: parse_uuid(&id_str),
        status: JobStatus::parse(&status_str),
        message,
        keys: BTreeSet::new(),
        payload_id: payload_id_str.and_then(|s| Uuid::parse_str(&s).ok()),
        payload_name,
        processed: processed as u32,
        failed: failed as u32,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let message: Option<String> = row.get(3)?;
    let job_id_str: String = row.get(4)?;
    let created_at_str: String = row.get(5)?;
    let xref_id: Option<String> = row.get(6)?;
    let xref_kind: Option<String> = row.get(7)?;
    let xref_ref: Option<String> = row.get(8)?;

    let xref = match (xref_id, xref_kind, xref_ref) {
        (Some(id), Some(kind), Some(ref_id)) => Some(XRef {
            id: parse_uuid(&id),
            kind,
            ref_id,
        }),
        _ => None,
    };

    Ok(Record {
        id: parse_uuid(&id_str),
        name,
        status: RecordStatus::parse(&status_str),
        message,
        xref,
        job_id: parse_uuid(&job_id_str),
        created_at: parse_timestamp(&created_at_str),
    })
}

fn row_to_structure(row: &rusqlite::Row) -> rusqlite::Result<Structure> {
    let id_str: String = row.get(0)?;
    let atom_count: i64 = row.get(5)?;
    let bond_count: i64 = row.get(6)?;
    let charge: i64 = row.get(7)?;
    let created_at_str: String = row.get(8)?;

    Ok(Structure {
        id: parse_uuid(&id_str),
        digest: row.get(1)?,
        smiles: row.get(2)?,
        molfile: row.get(3)?,
        formula: row.get(4)?,
        atom_count: atom_count as u32,
        bond_count: bond_count as u32,
        charge: charge as i32,
        created_at: parse_timestamp(&created_at_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::BasicNormalizer;
    use crate::providers::StructureNormalizer;
    use crate::types::{Molecule, Payload};

    fn running_job(payload: &Payload, key: &str) -> Job {
        Job::for_payload(payload, key).with_status(JobStatus::Running, None)
    }

    #[test]
    fn test_job_create_and_find() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "C\n");
        let job = running_job(&payload, "k1");

        JobStore::create(&db, &job).unwrap();

        let by_id = JobStore::find_by_id(&db, job.id).unwrap().unwrap();
        assert_eq!(by_id.status, JobStatus::Running);
        assert!(by_id.has_key("k1"));
        assert_eq!(by_id.payload_name.as_deref(), Some("lib.smi"));

        let by_key = db.find_by_key("k1").unwrap().unwrap();
        assert_eq!(by_key.id, job.id);
        assert!(db.find_by_key("missing").unwrap().is_none());
    }

    #[test]
    fn test_job_update_adds_keys_and_keeps_counters() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "C\n");
        let mut job = running_job(&payload, "k1");
        JobStore::create(&db, &job).unwrap();

        let record = Record::new("C", job.id).ok();
        db.persist_outcome(None, &record).unwrap();

        job.add_key("k2");
        job.status = JobStatus::Complete;
        job.processed = 0;
        JobStore::update(&db, &job).unwrap();

        let stored = JobStore::find_by_id(&db, job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        assert_eq!(stored.keys.len(), 2);
        assert_eq!(stored.processed, 1);
    }

    #[test]
    fn test_add_key_keeps_status() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "C\n");
        let job = running_job(&payload, "k1");
        JobStore::create(&db, &job).unwrap();
        let done = job.clone().with_status(JobStatus::Complete, None);
        JobStore::update(&db, &done).unwrap();

        db.add_key(job.id, "k2").unwrap();
        db.add_key(job.id, "k2").unwrap();

        let stored = db.find_by_key("k2").unwrap().unwrap();
        assert_eq!(stored.id, job.id);
        assert_eq!(stored.status, JobStatus::Complete);
        assert_eq!(stored.keys.len(), 2);
        assert!(db.add_key(Uuid::new_v4(), "k3").is_err());
    }

    #[test]
    fn test_active_lookup_follows_status() {
        let db = PipelineDb::in_memory().unwrap();
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::NotRun,
            JobStatus::Failed,
            JobStatus::Complete,
            JobStatus::Stopped,
            JobStatus::Unknown,
        ] {
            let payload = Payload::from_bytes("lib.smi", "", "C\n");
            let job = Job::for_payload(&payload, status.as_str()).with_status(status, None);
            JobStore::create(&db, &job).unwrap();
            let active = db.find_active_by_payload(payload.id).unwrap();
            assert_eq!(active.is_some(), status.is_active(), "{}", status);
        }
    }

    #[test]
    fn test_update_missing_job_fails() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "C\n");
        let job = running_job(&payload, "k1");
        assert!(matches!(JobStore::update(&db, &job), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_active_job_lookup() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "C\n");

        let done = Job::for_payload(&payload, "k1").with_status(JobStatus::Complete, None);
        JobStore::create(&db, &done).unwrap();
        assert!(db.find_active_by_payload(payload.id).unwrap().is_none());

        let running = running_job(&payload, "k2");
        JobStore::create(&db, &running).unwrap();
        let active = db.find_active_by_payload(payload.id).unwrap().unwrap();
        assert_eq!(active.id, running.id);
        assert_eq!(db.find_by_payload(payload.id).unwrap().len(), 2);
        assert_eq!(db.list_recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_persist_outcome_writes_structure_xref_and_counters() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "CCO\n");
        let job = running_job(&payload, "k1");
        JobStore::create(&db, &job).unwrap();

        let structure = BasicNormalizer::new()
            .normalize(&Molecule::smiles("CCO"))
            .unwrap();
        let mut ok = Record::new("ethanol", job.id).ok();
        ok.xref = Some(XRef::structure(&structure));
        db.persist_outcome(Some(&structure), &ok).unwrap();

        let failed = Record::new("broken", job.id).failed("unclosed ring 1");
        db.persist_outcome(None, &failed).unwrap();

        let stored = JobStore::find_by_id(&db, job.id).unwrap().unwrap();
        assert_eq!(stored.processed, 2);
        assert_eq!(stored.failed, 1);

        let records = db.find_by_job(job.id).unwrap();
        assert_eq!(records.len(), 2);
        let ok_record = RecordStore::find_by_id(&db, ok.id).unwrap().unwrap();
        assert_eq!(ok_record.status, RecordStatus::Ok);
        assert_eq!(
            ok_record.xref.unwrap().ref_id,
            structure.id.to_string()
        );

        let loaded = StructureStore::find_by_id(&db, structure.id).unwrap().unwrap();
        assert_eq!(loaded.formula, "C2O");
        assert_eq!(loaded.digest, structure.digest);
        assert_eq!(db.stats().unwrap(), PipelineDbStats { jobs: 1, records: 2, structures: 1 });
    }

    #[test]
    fn test_duplicate_structure_rolls_back_outcome() {
        let db = PipelineDb::in_memory().unwrap();
        let structure = BasicNormalizer::new()
            .normalize(&Molecule::smiles("C"))
            .unwrap();
        StructureStore::save(&db, &structure).unwrap();

        let record = Record::new("methane", Uuid::new_v4()).ok();
        assert!(db.persist_outcome(Some(&structure), &record).is_err());
        assert!(RecordStore::find_by_id(&db, record.id).unwrap().is_none());
    }

    #[test]
    fn test_structure_update() {
        let db = PipelineDb::in_memory().unwrap();
        let mut structure = BasicNormalizer::new()
            .normalize(&Molecule::smiles("CC"))
            .unwrap();
        StructureStore::save(&db, &structure).unwrap();

        structure.formula = "C2H6".to_string();
        StructureStore::update(&db, &structure).unwrap();
        let loaded = StructureStore::find_by_id(&db, structure.id).unwrap().unwrap();
        assert_eq!(loaded.formula, "C2H6");

        assert!(StructureStore::delete(&db, structure.id).unwrap());
        assert!(StructureStore::update(&db, &structure).is_err());
    }

    #[test]
    fn test_delete_cascades_keys() {
        let db = PipelineDb::in_memory().unwrap();
        let payload = Payload::from_bytes("lib.smi", "", "C\n");
        let job = running_job(&payload, "k1");
        JobStore::create(&db, &job).unwrap();

        assert!(JobStore::delete(&db, job.id).unwrap());
        assert!(db.find_by_key("k1").unwrap().is_none());
        assert!(!JobStore::delete(&db, job.id).unwrap());
    }

    #[test]
    fn test_on_disk_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.db");
        let structure = BasicNormalizer::new()
            .normalize(&Molecule::smiles("O"))
            .unwrap();
        {
            let db = PipelineDb::new(&path).unwrap();
            StructureStore::save(&db, &structure).unwrap();
        }
        let db = PipelineDb::new(&path).unwrap();
        assert_eq!(StructureStore::count(&db).unwrap(), 1);
    }
}
