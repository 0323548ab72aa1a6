use chrono::Utc;
use rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

use flowai_core::{BreakOut, Status};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};
use crate::sequences;

const TABLE: &str = "breakouts";
pub(crate) const COLUMNS: &str =
    "id, uuid, sequence_id, title, description, objective, status, created_at, updated_at";

pub(crate) fn row_to_breakout(row: &rusqlite::Row<'_>) -> Result<BreakOut, StoreError> {
    Ok(BreakOut {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        sequence_id: row_helpers::get(row, 2, TABLE, "sequence_id")?,
        title: row_helpers::get(row, 3, TABLE, "title")?,
        description: row_helpers::get(row, 4, TABLE, "description")?,
        objective: row_helpers::get(row, 5, TABLE, "objective")?,
        status: row_helpers::get_status(row, 6, TABLE)?,
        created_at: row_helpers::get(row, 7, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 8, TABLE, "updated_at")?,
    })
}

pub fn insert(conn: &Connection, breakout: &mut BreakOut) -> Result<(), StoreError> {
    if breakout.uuid.is_nil() {
        breakout.uuid = Uuid::now_v7();
    }
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO breakouts (uuid, sequence_id, title, description, objective, status,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            breakout.uuid.to_string(),
            breakout.sequence_id,
            breakout.title,
            breakout.description,
            breakout.objective,
            breakout.status.to_string(),
            now,
            now,
        ],
    )?;
    breakout.id = conn.last_insert_rowid();
    breakout.created_at = now.clone();
    breakout.updated_at = now;
    Ok(())
}

pub fn update(conn: &Connection, breakout: &mut BreakOut) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE breakouts SET sequence_id = ?1, title = ?2, description = ?3, objective = ?4,
                status = ?5, updated_at = ?6
         WHERE id = ?7",
        rusqlite::params![
            breakout.sequence_id,
            breakout.title,
            breakout.description,
            breakout.objective,
            breakout.status.to_string(),
            now,
            breakout.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("breakout {}", breakout.id)));
    }
    breakout.updated_at = now;
    Ok(())
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<BreakOut>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM breakouts WHERE id = ?1");
    query_opt(conn, &sql, [id], row_to_breakout)
}

pub fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<BreakOut>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM breakouts WHERE uuid = ?1");
    query_opt(conn, &sql, [uuid.to_string()], row_to_breakout)
}

pub fn list_for_sequence(
    conn: &Connection,
    sequence_id: i64,
    status: Option<Status>,
) -> Result<Vec<BreakOut>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM breakouts
         WHERE sequence_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY id"
    );
    query_all(
        conn,
        &sql,
        rusqlite::params![sequence_id, row_helpers::status_param(status)],
        row_to_breakout,
    )
}

fn check_sequence(conn: &Connection, sequence_id: i64) -> Result<(), StoreError> {
    match sequences::find(conn, sequence_id)? {
        Some(_) => Ok(()),
        None => Err(StoreError::Validation(format!("unknown sequence {sequence_id}"))),
    }
}

pub struct BreakOutRepo {
    db: Database,
}

impl BreakOutRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, breakout), fields(sequence_id = breakout.sequence_id))]
    pub fn create(&self, mut breakout: BreakOut) -> Result<BreakOut, StoreError> {
        if breakout.title.trim().is_empty() {
            return Err(StoreError::Validation("breakout requires a non-empty title".into()));
        }
        self.db.with_conn(|conn| {
            check_sequence(conn, breakout.sequence_id)?;
            insert(conn, &mut breakout)?;
            Ok(breakout)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<BreakOut, StoreError> {
        self.db
            .with_conn(|conn| find(conn, id))?
            .ok_or_else(|| StoreError::NotFound(format!("breakout {id}")))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<BreakOut, StoreError> {
        self.db
            .with_conn(|conn| find_by_uuid(conn, uuid))?
            .ok_or_else(|| StoreError::NotFound(format!("breakout {uuid}")))
    }

    #[instrument(skip(self, breakout), fields(breakout_id = breakout.id))]
    pub fn update(&self, mut breakout: BreakOut) -> Result<BreakOut, StoreError> {
        self.db.with_conn(|conn| {
            check_sequence(conn, breakout.sequence_id)?;
            update(conn, &mut breakout)?;
            Ok(breakout)
        })
    }

    #[instrument(skip(self), fields(status = %status))]
    pub fn set_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| crate::entities::set_status_in(conn, TABLE, id, status))
    }

    #[instrument(skip(self))]
    pub fn list_for_sequence(
        &self,
        sequence_id: i64,
        status: Option<Status>,
    ) -> Result<Vec<BreakOut>, StoreError> {
        self.db
            .with_conn(|conn| list_for_sequence(conn, sequence_id, status))
    }
}
