use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use flowai_core::{BatchOutcome, Programme, Status};

use crate::{clients, sponsors};
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};

const TABLE: &str = "programmes";
pub(crate) const COLUMNS: &str =
    "id, uuid, client_id, name, description, status, created_at, updated_at";

pub(crate) fn row_to_programme(row: &rusqlite::Row<'_>) -> Result<Programme, StoreError> {
    Ok(Programme {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        client_id: row_helpers::get(row, 2, TABLE, "client_id")?,
        name: row_helpers::get(row, 3, TABLE, "name")?,
        description: row_helpers::get(row, 4, TABLE, "description")?,
        status: row_helpers::get_status(row, 5, TABLE)?,
        created_at: row_helpers::get(row, 6, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 7, TABLE, "updated_at")?,
    })
}

pub fn insert(conn: &Connection, programme: &mut Programme) -> Result<(), StoreError> {
    if programme.uuid.is_nil() {
        programme.uuid = Uuid::now_v7();
    }
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO programmes (uuid, client_id, name, description, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            programme.uuid.to_string(),
            programme.client_id,
            programme.name,
            programme.description,
            programme.status.to_string(),
            now,
            now,
        ],
    )?;
    programme.id = conn.last_insert_rowid();
    programme.created_at = now.clone();
    programme.updated_at = now;
    Ok(())
}

pub fn update(conn: &Connection, programme: &mut Programme) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE programmes SET client_id = ?1, name = ?2, description = ?3, status = ?4,
                updated_at = ?5
         WHERE id = ?6",
        rusqlite::params![
            programme.client_id,
            programme.name,
            programme.description,
            programme.status.to_string(),
            now,
            programme.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("programme {}", programme.id)));
    }

    // Sessions always share their programme's client.
    let moved = conn.execute(
        "UPDATE sessions SET client_id = ?1, updated_at = ?2
         WHERE programme_id = ?3 AND client_id != ?1",
        rusqlite::params![programme.client_id, now, programme.id],
    )?;
    if moved > 0 {
        let unlinked = sponsors::prune_foreign_links(conn)?;
        info!(
            programme_id = programme.id,
            client_id = programme.client_id,
            sessions = moved,
            unlinked,
            "programme sessions moved to new client"
        );
    }
    programme.updated_at = now;
    Ok(())
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<Programme>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM programmes WHERE id = ?1");
    query_opt(conn, &sql, [id], row_to_programme)
}

pub fn find_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Programme>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM programmes WHERE uuid = ?1");
    query_opt(conn, &sql, [uuid.to_string()], row_to_programme)
}

/// Programmes of a client in persistence order.
pub fn list_for_client(
    conn: &Connection,
    client_id: i64,
    status: Option<Status>,
) -> Result<Vec<Programme>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM programmes
         WHERE client_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY id"
    );
    query_all(
        conn,
        &sql,
        rusqlite::params![client_id, row_helpers::status_param(status)],
        row_to_programme,
    )
}

fn check_client(conn: &Connection, client_id: i64) -> Result<(), StoreError> {
    match clients::find(conn, client_id)? {
        Some(_) => Ok(()),
        None => Err(StoreError::Validation(format!("unknown client {client_id}"))),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProgrammeStatistics {
    pub total_sessions: i64,
    pub total_sequences: i64,
    /// Sessions of every status, keyed by status.
    pub sessions_by_status: BTreeMap<String, i64>,
    /// Comma-separated `participants` entries summed over normal sessions.
    pub participants_count: usize,
}

pub struct ProgrammeRepo {
    db: Database,
}

impl ProgrammeRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, programme), fields(client_id = programme.client_id, name = %programme.name))]
    pub fn create(&self, mut programme: Programme) -> Result<Programme, StoreError> {
        self.db.with_conn(|conn| {
            create_in(conn, &mut programme)?;
            Ok(programme)
        })
    }

    /// Create each programme independently; failures are recorded by index.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub fn bulk_create(&self, items: Vec<Programme>) -> BatchOutcome<Programme> {
        let outcome = BatchOutcome::collect(items, |programme| self.create(programme));
        info!(
            created = outcome.success.len(),
            failed = outcome.errors.len(),
            "bulk programme create"
        );
        outcome
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Programme, StoreError> {
        self.db
            .with_conn(|conn| find(conn, id))?
            .ok_or_else(|| StoreError::NotFound(format!("programme {id}")))
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<Programme, StoreError> {
        self.db
            .with_conn(|conn| find_by_uuid(conn, uuid))?
            .ok_or_else(|| StoreError::NotFound(format!("programme {uuid}")))
    }

    #[instrument(skip(self, programme), fields(programme_id = programme.id))]
    pub fn update(&self, mut programme: Programme) -> Result<Programme, StoreError> {
        self.db.with_tx(|conn| {
            check_client(conn, programme.client_id)?;
            update(conn, &mut programme)?;
            Ok(programme)
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
    ) -> Result<Vec<Programme>, StoreError> {
        self.db
            .with_conn(|conn| list_for_client(conn, client_id, status))
    }

    #[instrument(skip(self))]
    pub fn statistics(&self, id: i64) -> Result<ProgrammeStatistics, StoreError> {
        self.db.with_conn(|conn| {
            if find(conn, id)?.is_none() {
                return Err(StoreError::NotFound(format!("programme {id}")));
            }
            let mut stats = ProgrammeStatistics::default();

            let mut stmt = conn.prepare(
                "SELECT status, participants FROM sessions WHERE programme_id = ?1",
            )?;
            let mut rows = stmt.query([id])?;
            while let Some(row) = rows.next()? {
                let status: String = row_helpers::get(row, 0, "sessions", "status")?;
                let participants: String = row_helpers::get(row, 1, "sessions", "participants")?;
                if status == "normal" {
                    stats.total_sessions += 1;
                    stats.participants_count += count_participants(&participants);
                }
                *stats.sessions_by_status.entry(status).or_insert(0) += 1;
            }

            stats.total_sequences = conn.query_row(
                "SELECT COUNT(*) FROM sequences q JOIN sessions s ON q.session_id = s.id
                 WHERE s.programme_id = ?1 AND s.status = 'normal' AND q.status = 'normal'",
                [id],
                |row| row.get(0),
            )?;
            Ok(stats)
        })
    }
}

fn create_in(conn: &Connection, programme: &mut Programme) -> Result<(), StoreError> {
    if programme.name.trim().is_empty() {
        return Err(StoreError::Validation("programme requires a non-empty name".into()));
    }
    check_client(conn, programme.client_id)?;
    insert(conn, programme)
}

fn count_participants(raw: &str) -> usize {
    raw.split(',').filter(|p| !p.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use flowai_core::{BatchStatus, Client, Sequence, Session, Sponsor};

    use super::*;
    use crate::clients::ClientRepo;
    use crate::sequences::SequenceRepo;
    use crate::sessions::SessionRepo;
    use crate::sponsors::SponsorRepo;

    fn setup() -> (Database, Client) {
        let db = Database::in_memory().unwrap();
        let client = ClientRepo::new(db.clone())
            .create(Client { name: "Acme".into(), ..Default::default() })
            .unwrap();
        (db, client)
    }

    fn programme(client_id: i64, name: &str) -> Programme {
        Programme { client_id, name: name.into(), ..Default::default() }
    }

    #[test]
    fn create_and_get() {
        let (db, client) = setup();
        let repo = ProgrammeRepo::new(db);
        let created = repo.create(programme(client.id, "Leadership")).unwrap();
        let fetched = repo.get_by_uuid(&created.uuid).unwrap();
        assert_eq!(fetched.name, "Leadership");
        assert_eq!(fetched.client_id, client.id);
    }

    #[test]
    fn create_with_unknown_client_fails() {
        let (db, _) = setup();
        let repo = ProgrammeRepo::new(db);
        assert!(matches!(
            repo.create(programme(999, "Orphan")).unwrap_err(),
            StoreError::Validation(_)
        ));
    }

    #[test]
    fn bulk_create_reports_failures_by_index() {
        let (db, client) = setup();
        let repo = ProgrammeRepo::new(db);
        let outcome = repo.bulk_create(vec![
            programme(client.id, "One"),
            programme(client.id, ""),
            programme(client.id, "Three"),
        ]);
        assert_eq!(outcome.success.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);
        assert_eq!(outcome.status(), BatchStatus::MultiStatus);
        assert_eq!(repo.list_for_client(client.id, None).unwrap().len(), 2);
    }

    #[test]
    fn list_in_persistence_order() {
        let (db, client) = setup();
        let repo = ProgrammeRepo::new(db);
        for name in ["B", "A", "C"] {
            repo.create(programme(client.id, name)).unwrap();
        }
        let names: Vec<_> = repo
            .list_for_client(client.id, Some(Status::Normal))
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn statistics_counts_normal_sessions() {
        let (db, client) = setup();
        let programmes = ProgrammeRepo::new(db.clone());
        let sessions = SessionRepo::new(db.clone());
        let sequences = SequenceRepo::new(db);

        let prog = programmes.create(programme(client.id, "P")).unwrap();
        let s1 = sessions
            .create(Session {
                client_id: client.id,
                programme_id: Some(prog.id),
                title: "Kickoff".into(),
                participants: "Ann, Bob,  ,Cy".into(),
                ..Default::default()
            })
            .unwrap();
        let s2 = sessions
            .create(Session {
                client_id: client.id,
                programme_id: Some(prog.id),
                title: "Dropped".into(),
                participants: "Dee".into(),
                ..Default::default()
            })
            .unwrap();
        sessions.set_status(s2.id, Status::Deleted).unwrap();
        for title in ["Intro", "Wrap"] {
            sequences
                .create(Sequence { session_id: s1.id, title: title.into(), ..Default::default() })
                .unwrap();
        }

        let stats = programmes.statistics(prog.id).unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_sequences, 2);
        assert_eq!(stats.participants_count, 3);
        assert_eq!(stats.sessions_by_status["normal"], 1);
        assert_eq!(stats.sessions_by_status["deleted"], 1);
    }

    #[test]
    fn moving_a_programme_moves_its_sessions() {
        let (db, client) = setup();
        let other = ClientRepo::new(db.clone())
            .create(Client { name: "Globex".into(), ..Default::default() })
            .unwrap();
        let programmes = ProgrammeRepo::new(db.clone());
        let sessions = SessionRepo::new(db.clone());
        let sponsors = SponsorRepo::new(db.clone());

        let mut prog = programmes.create(programme(client.id, "P")).unwrap();
        let inside = sessions
            .create(Session {
                client_id: client.id,
                programme_id: Some(prog.id),
                title: "Kickoff".into(),
                ..Default::default()
            })
            .unwrap();
        let outside = sessions
            .create(Session { client_id: client.id, title: "Loose".into(), ..Default::default() })
            .unwrap();
        let sponsor = sponsors
            .create(Sponsor { client_id: client.id, name: "Dana".into(), ..Default::default() })
            .unwrap();
        sponsors.add_to_session(inside.id, sponsor.id).unwrap();
        sponsors.add_to_session(outside.id, sponsor.id).unwrap();

        prog.client_id = other.id;
        programmes.update(prog.clone()).unwrap();

        assert_eq!(sessions.get(inside.id).unwrap().client_id, other.id);
        assert_eq!(sessions.get(outside.id).unwrap().client_id, client.id);
        assert!(sponsors.list_for_session(inside.id).unwrap().is_empty());
        assert_eq!(sponsors.list_for_session(outside.id).unwrap().len(), 1);
    }

    #[test]
    fn failed_move_leaves_sessions_alone() {
        let (db, client) = setup();
        let programmes = ProgrammeRepo::new(db.clone());
        let sessions = SessionRepo::new(db.clone());
        let mut prog = programmes.create(programme(client.id, "P")).unwrap();
        let inside = sessions
            .create(Session {
                client_id: client.id,
                programme_id: Some(prog.id),
                title: "Kickoff".into(),
                ..Default::default()
            })
            .unwrap();

        prog.client_id = 999;
        assert!(matches!(
            programmes.update(prog).unwrap_err(),
            StoreError::Validation(_)
        ));
        assert_eq!(sessions.get(inside.id).unwrap().client_id, client.id);
    }

    #[test]
    fn participants_ignore_blanks() {
        assert_eq!(count_participants(""), 0);
        assert_eq!(count_participants("a,,b"), 2);
    }
}
