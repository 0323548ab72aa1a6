//! Sequences are the ordered steps of a session.
//!
//! `order` is dense (`1..=n`) among the session's normal sequences after
//! every repository operation. Deleted and archived sequences keep their last
//! order value and are ignored by the shifting rules.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use flowai_core::{Sequence, Status};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};
use crate::sessions;

const TABLE: &str = "sequences";
pub(crate) const COLUMNS: &str = "id, uuid, session_id, title, objective, input_text, output_text, \
     input_drive_url, output_drive_url, \"order\", status, created_at, updated_at";

pub(crate) fn row_to_sequence(row: &rusqlite::Row<'_>) -> Result<Sequence, StoreError> {
    Ok(Sequence {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        session_id: row_helpers::get(row, 2, TABLE, "session_id")?,
        title: row_helpers::get(row, 3, TABLE, "title")?,
        objective: row_helpers::get(row, 4, TABLE, "objective")?,
        input_text: row_helpers::get(row, 5, TABLE, "input_text")?,
        output_text: row_helpers::get(row, 6, TABLE, "output_text")?,
        input_drive_url: row_helpers::get(row, 7, TABLE, "input_drive_url")?,
        output_drive_url: row_helpers::get(row, 8, TABLE, "output_drive_url")?,
        order: row_helpers::get(row, 9, TABLE, "order")?,
        status: row_helpers::get_status(row, 10, TABLE)?,
        created_at: row_helpers::get(row, 11, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 12, TABLE, "updated_at")?,
    })
}

pub fn insert(conn: &Connection, sequence: &mut Sequence) -> Result<(), StoreError> {
    if sequence.uuid.is_nil() {
        sequence.uuid = Uuid::now_v7();
    }
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sequences (uuid, session_id, title, objective, input_text, output_text,
                                input_drive_url, output_drive_url, \"order\", status,
                                created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            sequence.uuid.to_string(),
            sequence.session_id,
            sequence.title,
            sequence.objective,
            sequence.input_text,
            sequence.output_text,
            sequence.input_drive_url,
            sequence.output_drive_url,
            sequence.order,
            sequence.status.to_string(),
            now,
            now,
        ],
    )?;
    sequence.id = conn.last_insert_rowid();
    sequence.created_at = now.clone();
    sequence.updated_at = now;
    Ok(())
}

pub fn update(conn: &Connection, sequence: &mut Sequence) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE sequences SET session_id = ?1, title = ?2, objective = ?3, input_text = ?4,
                output_text = ?5, input_drive_url = ?6, output_drive_url = ?7, \"order\" = ?8,
                status = ?9, updated_at = ?10
         WHERE id = ?11",
        rusqlite::params![
            sequence.session_id,
            sequence.title,
            sequence.objective,
            sequence.input_text,
            sequence.output_text,
            sequence.input_drive_url,
            sequence.output_drive_url,
            sequence.order,
            sequence.status.to_string(),
            now,
            sequence.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("sequence {}", sequence.id)));
    }
    sequence.updated_at = now;
    Ok(())
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<Sequence>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM sequences WHERE id = ?1");
    query_opt(conn, &sql, [id], row_to_sequence)
}

pub fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Sequence>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM sequences WHERE uuid = ?1");
    query_opt(conn, &sql, [uuid.to_string()], row_to_sequence)
}

/// Sequences of a session by `order`, ties broken by id.
pub fn list_for_session(
    conn: &Connection,
    session_id: i64,
    status: Option<Status>,
) -> Result<Vec<Sequence>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sequences
         WHERE session_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY \"order\", id"
    );
    query_all(
        conn,
        &sql,
        rusqlite::params![session_id, row_helpers::status_param(status)],
        row_to_sequence,
    )
}

/// Highest order among the session's normal sequences, 0 when empty.
pub fn max_order(conn: &Connection, session_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(\"order\"), 0) FROM sequences
         WHERE session_id = ?1 AND status = 'normal'",
        [session_id],
        |row| row.get(0),
    )?)
}

fn count_normal(conn: &Connection, session_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM sequences WHERE session_id = ?1 AND status = 'normal'",
        [session_id],
        |row| row.get(0),
    )?)
}

/// Renumber the session's normal sequences to `1..=n`, keeping their
/// relative order. Returns `n`.
pub fn compact(conn: &Connection, session_id: i64) -> Result<usize, StoreError> {
    let current = list_for_session(conn, session_id, Some(Status::Normal))?;
    let ordered: Vec<i64> = current.iter().map(|s| s.id).collect();
    renumber(conn, &ordered)?;
    Ok(ordered.len())
}

/// Assign `1..=n` to the given sequence ids in slice order, touching only
/// rows whose order actually changes.
pub fn renumber(conn: &Connection, ordered_ids: &[i64]) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "UPDATE sequences SET \"order\" = ?1, updated_at = ?2 WHERE id = ?3 AND \"order\" != ?1",
    )?;
    for (idx, id) in ordered_ids.iter().enumerate() {
        stmt.execute(rusqlite::params![idx as i64 + 1, now, id])?;
    }
    Ok(())
}

/// Insert a sequence. Without an order (`order <= 0`) it is appended;
/// otherwise it takes that position and later sequences move back by one.
pub fn create_in(conn: &Connection, sequence: &mut Sequence) -> Result<(), StoreError> {
    if sequence.title.trim().is_empty() {
        return Err(StoreError::Validation("sequence requires a non-empty title".into()));
    }
    if sessions::find(conn, sequence.session_id)?.is_none() {
        return Err(StoreError::Validation(format!(
            "unknown session {}",
            sequence.session_id
        )));
    }
    compact(conn, sequence.session_id)?;
    let n = count_normal(conn, sequence.session_id)?;

    if sequence.order <= 0 || sequence.order > n {
        sequence.order = n + 1;
    } else {
        conn.execute(
            "UPDATE sequences SET \"order\" = \"order\" + 1
             WHERE session_id = ?1 AND status = 'normal' AND \"order\" >= ?2",
            rusqlite::params![sequence.session_id, sequence.order],
        )?;
    }
    sequence.status = Status::Normal;
    insert(conn, sequence)
}

/// Move a normal sequence to `new_order`, shifting the sequences in between.
pub fn reorder_in(
    conn: &Connection,
    uuid: &Uuid,
    new_order: i64,
) -> Result<Sequence, StoreError> {
    let Some(sequence) = find_by_uuid(conn, uuid)? else {
        return Err(StoreError::NotFound(format!("sequence {uuid}")));
    };
    if sequence.status != Status::Normal {
        return Err(StoreError::Validation(format!(
            "sequence {uuid} is {}",
            sequence.status
        )));
    }
    compact(conn, sequence.session_id)?;
    let n = count_normal(conn, sequence.session_id)?;
    if !(1..=n).contains(&new_order) {
        return Err(StoreError::Validation(format!(
            "order {new_order} out of range 1..={n}"
        )));
    }

    // Re-read: compaction may have changed the stored order.
    let mut sequence = find(conn, sequence.id)?
        .ok_or_else(|| StoreError::NotFound(format!("sequence {uuid}")))?;
    let old_order = sequence.order;
    if new_order == old_order {
        return Ok(sequence);
    }

    let (shift, lo, hi) = if new_order < old_order {
        (1, new_order, old_order - 1)
    } else {
        (-1, old_order + 1, new_order)
    };
    conn.execute(
        "UPDATE sequences SET \"order\" = \"order\" + ?1
         WHERE session_id = ?2 AND status = 'normal' AND \"order\" BETWEEN ?3 AND ?4",
        rusqlite::params![shift, sequence.session_id, lo, hi],
    )?;
    sequence.order = new_order;
    update(conn, &mut sequence)?;
    debug!(from = old_order, to = new_order, "sequence reordered");
    Ok(sequence)
}

pub struct SequenceRepo {
    db: Database,
}

impl SequenceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, sequence), fields(session_id = sequence.session_id, order = sequence.order))]
    pub fn create(&self, mut sequence: Sequence) -> Result<Sequence, StoreError> {
        self.db.with_tx(|conn| {
            create_in(conn, &mut sequence)?;
            Ok(sequence)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Sequence, StoreError> {
        self.db
            .with_conn(|conn| find(conn, id))?
            .ok_or_else(|| StoreError::NotFound(format!("sequence {id}")))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Sequence, StoreError> {
        self.db
            .with_conn(|conn| find_by_uuid(conn, uuid))?
            .ok_or_else(|| StoreError::NotFound(format!("sequence {uuid}")))
    }

    /// Update fields other than `order`; use [`SequenceRepo::reorder`] to move.
    #[instrument(skip(self, sequence), fields(sequence_id = sequence.id))]
    pub fn update(&self, mut sequence: Sequence) -> Result<Sequence, StoreError> {
        self.db.with_conn(|conn| {
            let existing = find(conn, sequence.id)?
                .ok_or_else(|| StoreError::NotFound(format!("sequence {}", sequence.id)))?;
            if existing.session_id != sequence.session_id
                && sessions::find(conn, sequence.session_id)?.is_none()
            {
                return Err(StoreError::Validation(format!(
                    "unknown session {}",
                    sequence.session_id
                )));
            }
            sequence.order = existing.order;
            update(conn, &mut sequence)?;
            Ok(sequence)
        })
    }

    /// Changing status closes or reopens a gap, so the session is compacted.
    #[instrument(skip(self), fields(status = %status))]
    pub fn set_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        self.db.with_tx(|conn| {
            let sequence = find(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("sequence {id}")))?;
            if status == Status::Normal && sequence.status != Status::Normal {
                let last = max_order(conn, sequence.session_id)?;
                conn.execute(
                    "UPDATE sequences SET \"order\" = ?1 WHERE id = ?2",
                    rusqlite::params![last + 1, id],
                )?;
            }
            crate::entities::set_status_in(conn, TABLE, id, status)?;
            compact(conn, sequence.session_id)?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn list_for_session(
        &self,
        session_id: i64,
        status: Option<Status>,
    ) -> Result<Vec<Sequence>, StoreError> {
        self.db
            .with_conn(|conn| list_for_session(conn, session_id, status))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn reorder(&self, uuid: &Uuid, new_order: i64) -> Result<Sequence, StoreError> {
        self.db.with_tx(|conn| reorder_in(conn, uuid, new_order))
    }

    #[instrument(skip(self))]
    pub fn compact(&self, session_id: i64) -> Result<usize, StoreError> {
        self.db.with_tx(|conn| compact(conn, session_id))
    }
}
