use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use flowai_core::{Session, Status};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};
use crate::{breakouts, clients, programmes, sequences, sponsors};

const TABLE: &str = "sessions";
pub(crate) const COLUMNS: &str = "id, uuid, client_id, programme_id, title, context, objectives, \
     inputs, outputs, participants, design_principles, deliverables, status, created_at, updated_at";

pub(crate) fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    Ok(Session {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        client_id: row_helpers::get(row, 2, TABLE, "client_id")?,
        programme_id: row_helpers::get_opt(row, 3, TABLE, "programme_id")?,
        title: row_helpers::get(row, 4, TABLE, "title")?,
        context: row_helpers::get(row, 5, TABLE, "context")?,
        objectives: row_helpers::get(row, 6, TABLE, "objectives")?,
        inputs: row_helpers::get(row, 7, TABLE, "inputs")?,
        outputs: row_helpers::get(row, 8, TABLE, "outputs")?,
        participants: row_helpers::get(row, 9, TABLE, "participants")?,
        design_principles: row_helpers::get(row, 10, TABLE, "design_principles")?,
        deliverables: row_helpers::get(row, 11, TABLE, "deliverables")?,
        status: row_helpers::get_status(row, 12, TABLE)?,
        created_at: row_helpers::get(row, 13, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 14, TABLE, "updated_at")?,
    })
}

pub fn insert(conn: &Connection, session: &mut Session) -> Result<(), StoreError> {
    if session.uuid.is_nil() {
        session.uuid = Uuid::now_v7();
    }
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sessions (uuid, client_id, programme_id, title, context, objectives, inputs,
                               outputs, participants, design_principles, deliverables, status,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            session.uuid.to_string(),
            session.client_id,
            session.programme_id,
            session.title,
            session.context,
            session.objectives,
            session.inputs,
            session.outputs,
            session.participants,
            session.design_principles,
            session.deliverables,
            session.status.to_string(),
            now,
            now,
        ],
    )?;
    session.id = conn.last_insert_rowid();
    session.created_at = now.clone();
    session.updated_at = now;
    Ok(())
}

pub fn update(conn: &Connection, session: &mut Session) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE sessions SET client_id = ?1, programme_id = ?2, title = ?3, context = ?4,
                objectives = ?5, inputs = ?6, outputs = ?7, participants = ?8,
                design_principles = ?9, deliverables = ?10, status = ?11, updated_at = ?12
         WHERE id = ?13",
        rusqlite::params![
            session.client_id,
            session.programme_id,
            session.title,
            session.context,
            session.objectives,
            session.inputs,
            session.outputs,
            session.participants,
            session.design_principles,
            session.deliverables,
            session.status.to_string(),
            now,
            session.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("session {}", session.id)));
    }
    sponsors::prune_foreign_links(conn)?;
    session.updated_at = now;
    Ok(())
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<Session>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1");
    query_opt(conn, &sql, [id], row_to_session)
}

pub fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Session>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM sessions WHERE uuid = ?1");
    query_opt(conn, &sql, [uuid.to_string()], row_to_session)
}

/// Every session of a client, with or without a programme.
pub fn list_for_client(
    conn: &Connection,
    client_id: i64,
    status: Option<Status>,
) -> Result<Vec<Session>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sessions
         WHERE client_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY id"
    );
    query_all(
        conn,
        &sql,
        rusqlite::params![client_id, row_helpers::status_param(status)],
        row_to_session,
    )
}

/// Sessions attached directly to a client, outside any programme.
pub fn list_unassigned(
    conn: &Connection,
    client_id: i64,
    status: Option<Status>,
) -> Result<Vec<Session>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sessions
         WHERE client_id = ?1 AND programme_id IS NULL AND (?2 IS NULL OR status = ?2)
         ORDER BY id"
    );
    query_all(
        conn,
        &sql,
        rusqlite::params![client_id, row_helpers::status_param(status)],
        row_to_session,
    )
}

pub fn list_for_programme(
    conn: &Connection,
    programme_id: i64,
    status: Option<Status>,
) -> Result<Vec<Session>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sessions
         WHERE programme_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY id"
    );
    query_all(
        conn,
        &sql,
        rusqlite::params![programme_id, row_helpers::status_param(status)],
        row_to_session,
    )
}

/// The client must exist, and a programme, when set, must belong to it.
fn check_parents(conn: &Connection, session: &Session) -> Result<(), StoreError> {
    if clients::find(conn, session.client_id)?.is_none() {
        return Err(StoreError::Validation(format!(
            "unknown client {}",
            session.client_id
        )));
    }
    if let Some(programme_id) = session.programme_id {
        match programmes::find(conn, programme_id)? {
            Some(p) if p.client_id == session.client_id => {}
            Some(_) => {
                return Err(StoreError::Validation(format!(
                    "programme {programme_id} belongs to another client"
                )))
            }
            None => {
                return Err(StoreError::Validation(format!(
                    "unknown programme {programme_id}"
                )))
            }
        }
    }
    Ok(())
}

/// Read-only digest of a session and its live plan.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub title: String,
    pub context: String,
    pub objectives: String,
    pub participants: String,
    pub design_principles: String,
    pub sequences: Vec<SequenceSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SequenceSummary {
    pub title: String,
    pub objective: String,
    pub order: i64,
    pub breakouts: Vec<BreakOutSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BreakOutSummary {
    pub title: String,
    pub objective: String,
}

/// Normal sequences by order, each with its normal breakouts.
pub fn summary(conn: &Connection, session: &Session) -> Result<SessionSummary, StoreError> {
    let mut summaries = Vec::new();
    for sequence in sequences::list_for_session(conn, session.id, Some(Status::Normal))? {
        let breakouts = breakouts::list_for_sequence(conn, sequence.id, Some(Status::Normal))?
            .into_iter()
            .map(|b| BreakOutSummary {
                title: b.title,
                objective: b.objective,
            })
            .collect();
        summaries.push(SequenceSummary {
            title: sequence.title,
            objective: sequence.objective,
            order: sequence.order,
            breakouts,
        });
    }
    Ok(SessionSummary {
        title: session.title.clone(),
        context: session.context.clone(),
        objectives: session.objectives.clone(),
        participants: session.participants.clone(),
        design_principles: session.design_principles.clone(),
        sequences: summaries,
    })
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, session), fields(client_id = session.client_id, title = %session.title))]
    pub fn create(&self, mut session: Session) -> Result<Session, StoreError> {
        if session.title.trim().is_empty() {
            return Err(StoreError::Validation("session requires a non-empty title".into()));
        }
        self.db.with_conn(|conn| {
            check_parents(conn, &session)?;
            insert(conn, &mut session)?;
            Ok(session)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Session, StoreError> {
        self.db
            .with_conn(|conn| find(conn, id))?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Session, StoreError> {
        self.db
            .with_conn(|conn| find_by_uuid(conn, uuid))?
            .ok_or_else(|| StoreError::NotFound(format!("session {uuid}")))
    }

    #[instrument(skip(self, session), fields(session_id = session.id))]
    pub fn update(&self, mut session: Session) -> Result<Session, StoreError> {
        self.db.with_tx(|conn| {
            check_parents(conn, &session)?;
            update(conn, &mut session)?;
            Ok(session)
        })
    }

    #[instrument(skip(self), fields(status = %status))]
    pub fn set_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| crate::entities::set_status_in(conn, TABLE, id, status))
    }

    #[instrument(skip(self))]
    pub fn summary(&self, id: i64) -> Result<SessionSummary, StoreError> {
        self.db.with_conn(|conn| {
            let session =
                find(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
            summary(conn, &session)
        })
    }

    #[instrument(skip(self))]
    pub fn list_for_client(
        &self,
        client_id: i64,
        status: Option<Status>,
    ) -> Result<Vec<Session>, StoreError> {
        self.db
            .with_conn(|conn| list_for_client(conn, client_id, status))
    }

    #[instrument(skip(self))]
    pub fn list_for_programme(
        &self,
        programme_id: i64,
        status: Option<Status>,
    ) -> Result<Vec<Session>, StoreError> {
        self.db
            .with_conn(|conn| list_for_programme(conn, programme_id, status))
    }
}
