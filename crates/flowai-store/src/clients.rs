use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use flowai_core::{Client, Programme, Session, Status};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};
use crate::{programmes, sessions};

const TABLE: &str = "clients";
pub(crate) const COLUMNS: &str =
    "id, uuid, name, context, objectives, email, status, created_at, updated_at";

pub(crate) fn row_to_client(row: &rusqlite::Row<'_>) -> Result<Client, StoreError> {
    Ok(Client {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        name: row_helpers::get(row, 2, TABLE, "name")?,
        context: row_helpers::get(row, 3, TABLE, "context")?,
        objectives: row_helpers::get(row, 4, TABLE, "objectives")?,
        email: row_helpers::get(row, 5, TABLE, "email")?,
        status: row_helpers::get_status(row, 6, TABLE)?,
        created_at: row_helpers::get(row, 7, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 8, TABLE, "updated_at")?,
    })
}

pub fn insert(conn: &Connection, client: &mut Client) -> Result<(), StoreError> {
    if client.uuid.is_nil() {
        client.uuid = Uuid::now_v7();
    }
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO clients (uuid, name, context, objectives, email, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            client.uuid.to_string(),
            client.name,
            client.context,
            client.objectives,
            client.email,
            client.status.to_string(),
            now,
            now,
        ],
    )?;
    client.id = conn.last_insert_rowid();
    client.created_at = now.clone();
    client.updated_at = now;
    Ok(())
}

pub fn update(conn: &Connection, client: &mut Client) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE clients SET name = ?1, context = ?2, objectives = ?3, email = ?4,
                status = ?5, updated_at = ?6
         WHERE id = ?7",
        rusqlite::params![
            client.name,
            client.context,
            client.objectives,
            client.email,
            client.status.to_string(),
            now,
            client.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("client {}", client.id)));
    }
    client.updated_at = now;
    Ok(())
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<Client>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM clients WHERE id = ?1");
    query_opt(conn, &sql, [id], row_to_client)
}

pub fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Client>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM clients WHERE uuid = ?1");
    query_opt(conn, &sql, [uuid.to_string()], row_to_client)
}

/// Headline numbers for one client. Only `normal` rows are counted.
#[derive(Clone, Debug, Serialize)]
pub struct ClientDashboard {
    pub total_programmes: i64,
    pub total_sessions: i64,
    pub total_sponsors: i64,
    pub recent_sessions: Vec<Session>,
    pub active_programmes: Vec<Programme>,
}

pub struct ClientRepo {
    db: Database,
}

impl ClientRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a client. A nil uuid is replaced with a fresh one.
    #[instrument(skip(self, client), fields(name = %client.name))]
    pub fn create(&self, mut client: Client) -> Result<Client, StoreError> {
        if client.name.trim().is_empty() {
            return Err(StoreError::Validation("client requires a non-empty name".into()));
        }
        self.db.with_conn(|conn| {
            insert(conn, &mut client)?;
            Ok(client)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Client, StoreError> {
        self.db
            .with_conn(|conn| find(conn, id))?
            .ok_or_else(|| StoreError::NotFound(format!("client {id}")))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Client, StoreError> {
        self.db
            .with_conn(|conn| find_by_uuid(conn, uuid))?
            .ok_or_else(|| StoreError::NotFound(format!("client {uuid}")))
    }

    #[instrument(skip(self, client), fields(client_id = client.id))]
    pub fn update(&self, mut client: Client) -> Result<Client, StoreError> {
        self.db.with_conn(|conn| {
            update(conn, &mut client)?;
            Ok(client)
        })
    }

    #[instrument(skip(self), fields(status = %status))]
    pub fn set_status(&self, id: i64, status: Status) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| crate::entities::set_status_in(conn, TABLE, id, status))
    }

    /// All clients, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self, status: Option<Status>) -> Result<Vec<Client>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM clients WHERE (?1 IS NULL OR status = ?1) ORDER BY id"
            );
            query_all(conn, &sql, [row_helpers::status_param(status)], row_to_client)
        })
    }

    #[instrument(skip(self))]
    pub fn dashboard(&self, id: i64) -> Result<ClientDashboard, StoreError> {
        self.db.with_conn(|conn| {
            if find(conn, id)?.is_none() {
                return Err(StoreError::NotFound(format!("client {id}")));
            }
            let count = |table: &str| -> Result<i64, StoreError> {
                let sql = format!(
                    "SELECT COUNT(*) FROM {table} WHERE client_id = ?1 AND status = 'normal'"
                );
                Ok(conn.query_row(&sql, [id], |row| row.get(0))?)
            };
            let recent_sql = format!(
                "SELECT {} FROM sessions WHERE client_id = ?1 AND status = 'normal'
                 ORDER BY created_at DESC, id DESC LIMIT 5",
                sessions::COLUMNS
            );
            let active_sql = format!(
                "SELECT {} FROM programmes p WHERE p.client_id = ?1 AND p.status = 'normal'
                 AND EXISTS (SELECT 1 FROM sessions s
                             WHERE s.programme_id = p.id AND s.status = 'normal')
                 ORDER BY p.id",
                programmes::COLUMNS
            );
            Ok(ClientDashboard {
                total_programmes: count("programmes")?,
                total_sessions: count("sessions")?,
                total_sponsors: count("sponsors")?,
                recent_sessions: query_all(conn, &recent_sql, [id], sessions::row_to_session)?,
                active_programmes: query_all(
                    conn,
                    &active_sql,
                    [id],
                    programmes::row_to_programme,
                )?,
            })
        })
    }
}
