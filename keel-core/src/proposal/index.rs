//! SQLite index of proposals.
//!
//! Proposals live outside the repository so that proposing never writes to
//! a project tree. Status changes are conditional on `status = 'pending'`,
//! which makes the Pending -> Applied/Rejected move happen at most once.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Proposal, ProposalStatus};

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: "001",
    name: "initial",
    sql: include_str!("migrations/001_initial.sql"),
}];

const COLUMNS: &str = "id, project_key, intent, base_revision, file_changes, status, commit_id, \
                       created_by, created_at, resolved_at";

#[derive(Clone)]
pub struct ProposalIndex {
    conn: Arc<Mutex<Connection>>,
}

impl ProposalIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Index(format!("cannot create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        index.migrate()?;
        Ok(index)
    }

    pub fn open_memory() -> Result<Self> {
        let index = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        index.migrate()?;
        Ok(index)
    }

    fn migrate(&self) -> Result<()> {
        run_migrations(&*self.conn()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Index("proposal index lock poisoned".to_string()))
    }

    pub fn insert(&self, proposal: &Proposal) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO proposals ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            (
                proposal.proposal_id.to_string(),
                &proposal.project_key,
                &proposal.intent,
                &proposal.base_revision,
                serde_json::to_string(&proposal.file_changes)?,
                proposal.status.as_str(),
                &proposal.commit_id,
                &proposal.created_by,
                proposal.created_at.to_rfc3339(),
                proposal.resolved_at.map(|t| t.to_rfc3339()),
            ),
        )?;
        Ok(())
    }

    pub fn get(&self, project_key: &str, id: Uuid) -> Result<Option<Proposal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM proposals WHERE id = ? AND project_key = ?"
        ))?;
        let raw = stmt
            .query_row((id.to_string(), project_key), RawProposal::from_row)
            .optional()?;
        raw.map(RawProposal::into_proposal).transpose()
    }

    /// Newest first.
    pub fn list(&self, project_key: &str, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM proposals
             WHERE project_key = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
            .query_map((project_key, status.map(|s| s.as_str())), RawProposal::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawProposal::into_proposal).collect()
    }

    /// Pending -> Applied. Returns false if the proposal was no longer pending.
    pub fn mark_applied(&self, id: Uuid, commit_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE proposals SET status = 'applied', commit_id = ?, resolved_at = ?
             WHERE id = ? AND status = 'pending'",
            (commit_id, at.to_rfc3339(), id.to_string()),
        )?;
        Ok(updated == 1)
    }

    /// Pending -> Rejected. Returns false if the proposal was no longer pending.
    pub fn mark_rejected(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE proposals SET status = 'rejected', resolved_at = ?
             WHERE id = ? AND status = 'pending'",
            (at.to_rfc3339(), id.to_string()),
        )?;
        Ok(updated == 1)
    }
}

struct RawProposal {
    id: String,
    project_key: String,
    intent: String,
    base_revision: Option<String>,
    file_changes: String,
    status: String,
    commit_id: Option<String>,
    created_by: String,
    created_at: String,
    resolved_at: Option<String>,
}

impl RawProposal {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_key: row.get(1)?,
            intent: row.get(2)?,
            base_revision: row.get(3)?,
            file_changes: row.get(4)?,
            status: row.get(5)?,
            commit_id: row.get(6)?,
            created_by: row.get(7)?,
            created_at: row.get(8)?,
            resolved_at: row.get(9)?,
        })
    }

    fn into_proposal(self) -> Result<Proposal> {
        let corrupt = |field: &str| Error::Index(format!("proposal {} has a corrupt {field}", self.id));
        Ok(Proposal {
            proposal_id: Uuid::parse_str(&self.id).map_err(|_| corrupt("id"))?,
            status: ProposalStatus::from_str(&self.status).ok_or_else(|| corrupt("status"))?,
            file_changes: serde_json::from_str(&self.file_changes).map_err(|_| corrupt("file_changes"))?,
            created_at: parse_datetime(&self.created_at).ok_or_else(|| corrupt("created_at"))?,
            resolved_at: match &self.resolved_at {
                Some(s) => Some(parse_datetime(s).ok_or_else(|| corrupt("resolved_at"))?),
                None => None,
            },
            project_key: self.project_key,
            intent: self.intent,
            base_revision: self.base_revision,
            commit_id: self.commit_id,
            created_by: self.created_by,
        })
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    let applied = applied_migrations(conn)?;
    for migration in MIGRATIONS {
        if applied.iter().any(|v| v == migration.version) {
            continue;
        }
        tracing::info!("Applying migration {}: {}", migration.version, migration.name);
        conn.execute_batch(&format!("BEGIN TRANSACTION; {} COMMIT;", migration.sql))
            .map_err(|e| {
                Error::Index(format!(
                    "migration {} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
            (migration.version, migration.name, Utc::now().to_rfc3339()),
        )?;
    }
    Ok(())
}

fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(versions)
}
