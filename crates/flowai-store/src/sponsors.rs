use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use flowai_core::{BatchOutcome, Sponsor, Status};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};
use crate::{clients, sessions};

const TABLE: &str = "sponsors";
const COLUMNS: &str =
    "id, uuid, client_id, name, job_title, objectives, status, created_at, updated_at";

fn row_to_sponsor(row: &rusqlite::Row<'_>) -> Result<Sponsor, StoreError> {
    Ok(Sponsor {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        client_id: row_helpers::get(row, 2, TABLE, "client_id")?,
        name: row_helpers::get(row, 3, TABLE, "name")?,
        job_title: row_helpers::get(row, 4, TABLE, "job_title")?,
        objectives: row_helpers::get(row, 5, TABLE, "objectives")?,
        status: row_helpers::get_status(row, 6, TABLE)?,
        created_at: row_helpers::get(row, 7, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 8, TABLE, "updated_at")?,
    })
}

fn find(conn: &Connection, id: i64) -> Result<Option<Sponsor>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM sponsors WHERE id = ?1");
    query_opt(conn, &sql, [id], row_to_sponsor)
}

fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Sponsor>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM sponsors WHERE uuid = ?1");
    query_opt(conn, &sql, [uuid.to_string()], row_to_sponsor)
}

/// Drop session links to sponsors of a different client than the session.
pub(crate) fn prune_foreign_links(conn: &Connection) -> Result<usize, StoreError> {
    let removed = conn.execute(
        "DELETE FROM session_sponsors
         WHERE EXISTS (
             SELECT 1 FROM sessions s, sponsors sp
             WHERE s.id = session_sponsors.session_id
               AND sp.id = session_sponsors.sponsor_id
               AND s.client_id != sp.client_id
         )",
        [],
    )?;
    Ok(removed)
}

pub struct SponsorRepo {
    db: Database,
}

impl SponsorRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, sponsor), fields(client_id = sponsor.client_id, name = %sponsor.name))]
    pub fn create(&self, mut sponsor: Sponsor) -> Result<Sponsor, StoreError> {
        if sponsor.name.trim().is_empty() {
            return Err(StoreError::Validation("sponsor requires a non-empty name".into()));
        }
        if sponsor.uuid.is_nil() {
            sponsor.uuid = Uuid::now_v7();
        }
        self.db.with_conn(|conn| {
            if clients::find(conn, sponsor.client_id)?.is_none() {
                return Err(StoreError::Validation(format!(
                    "unknown client {}",
                    sponsor.client_id
                )));
            }
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sponsors (uuid, client_id, name, job_title, objectives, status,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    sponsor.uuid.to_string(),
                    sponsor.client_id,
                    sponsor.name,
                    sponsor.job_title,
                    sponsor.objectives,
                    sponsor.status.to_string(),
                    now,
                    now,
                ],
            )?;
            sponsor.id = conn.last_insert_rowid();
            sponsor.created_at = now.clone();
            sponsor.updated_at = now;
            Ok(sponsor)
        })
    }

    /// Create each sponsor independently; failures are recorded by index.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub fn bulk_create(&self, items: Vec<Sponsor>) -> BatchOutcome<Sponsor> {
        let outcome = BatchOutcome::collect(items, |sponsor| self.create(sponsor));
        info!(
            created = outcome.success.len(),
            failed = outcome.errors.len(),
            "bulk sponsor create"
        );
        outcome
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Sponsor, StoreError> {
        self.db
            .with_conn(|conn| find(conn, id))?
            .ok_or_else(|| StoreError::NotFound(format!("sponsor {id}")))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Sponsor, StoreError> {
        self.db
            .with_conn(|conn| find_by_uuid(conn, uuid))?
            .ok_or_else(|| StoreError::NotFound(format!("sponsor {uuid}")))
    }

    #[instrument(skip(self, sponsor), fields(sponsor_id = sponsor.id))]
    pub fn update(&self, mut sponsor: Sponsor) -> Result<Sponsor, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sponsors SET name = ?1, job_title = ?2, objectives = ?3, status = ?4,
                        updated_at = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    sponsor.name,
                    sponsor.job_title,
                    sponsor.objectives,
                    sponsor.status.to_string(),
                    now,
                    sponsor.id,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("sponsor {}", sponsor.id)));
            }
            sponsor.updated_at = now;
            Ok(sponsor)
        })
    }

    #[instrument(skip(self), fields(status = %status))]
    pub fn set_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| crate::entities::set_status_in(conn, TABLE, id, status))
    }

    #[instrument(skip(self))]
    pub fn list_for_client(
        &self,
        client_id: i64,
        status: Option<Status>,
    ) -> Result<Vec<Sponsor>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM sponsors
                 WHERE client_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY id"
            );
            query_all(
                conn,
                &sql,
                rusqlite::params![client_id, row_helpers::status_param(status)],
                row_to_sponsor,
            )
        })
    }

    #[instrument(skip(self))]
    pub fn list_for_session(&self, session_id: i64) -> Result<Vec<Sponsor>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sponsors sp
                 JOIN session_sponsors ss ON ss.sponsor_id = sp.id
                 WHERE ss.session_id = ?1
                 ORDER BY sp.id",
                qualified("sp")
            );
            query_all(conn, &sql, [session_id], row_to_sponsor)
        })
    }

    /// Link a sponsor to a session of the same client. Linking twice is a no-op.
    #[instrument(skip(self))]
    pub fn add_to_session(&self, session_id: i64, sponsor_id: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let session = sessions::find(conn, session_id)?
                .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
            let sponsor = find(conn, sponsor_id)?
                .ok_or_else(|| StoreError::NotFound(format!("sponsor {sponsor_id}")))?;
            if sponsor.client_id != session.client_id {
                return Err(StoreError::Validation(format!(
                    "sponsor {sponsor_id} belongs to another client"
                )));
            }
            conn.execute(
                "INSERT OR IGNORE INTO session_sponsors (session_id, sponsor_id) VALUES (?1, ?2)",
                [session_id, sponsor_id],
            )?;
            Ok(())
        })
    }

    /// Returns whether a link existed.
    #[instrument(skip(self))]
    pub fn remove_from_session(
        &self,
        session_id: i64,
        sponsor_id: i64,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM session_sponsors WHERE session_id = ?1 AND sponsor_id = ?2",
                [session_id, sponsor_id],
            )?;
            Ok(removed > 0)
        })
    }
}

fn qualified(alias: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}
