//! Kind-dispatched access to the five codec entities.
//!
//! Every function takes a borrowed connection so callers can compose them
//! inside one [`Database::with_tx`](crate::Database::with_tx) closure.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use flowai_core::{Entity, EntityKind, Status};

use crate::error::StoreError;
use crate::{breakouts, clients, programmes, sequences, sessions};

/// Flip the status of a row in `table`. Unknown ids are `NotFound`.
pub(crate) fn set_status_in(
    conn: &Connection,
    table: &'static str,
    id: i64,
    status: Status,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let sql = format!("UPDATE {table} SET status = ?1, updated_at = ?2 WHERE id = ?3");
    let changed = conn.execute(&sql, rusqlite::params![status.to_string(), now, id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("{table} {id}")));
    }
    Ok(())
}

pub fn find_by_uuid(
    conn: &Connection,
    kind: EntityKind,
    uuid: &Uuid,
) -> Result<Option<Entity>, StoreError> {
    Ok(match kind {
        EntityKind::Client => clients::find_by_uuid(conn, uuid)?.map(Entity::Client),
        EntityKind::Programme => programmes::find_by_uuid(conn, uuid)?.map(Entity::Programme),
        EntityKind::Session => sessions::find_by_uuid(conn, uuid)?.map(Entity::Session),
        EntityKind::Sequence => sequences::find_by_uuid(conn, uuid)?.map(Entity::Sequence),
        EntityKind::BreakOut => breakouts::find_by_uuid(conn, uuid)?.map(Entity::BreakOut),
    })
}

pub fn find_by_id(
    conn: &Connection,
    kind: EntityKind,
    id: i64,
) -> Result<Option<Entity>, StoreError> {
    Ok(match kind {
        EntityKind::Client => clients::find(conn, id)?.map(Entity::Client),
        EntityKind::Programme => programmes::find(conn, id)?.map(Entity::Programme),
        EntityKind::Session => sessions::find(conn, id)?.map(Entity::Session),
        EntityKind::Sequence => sequences::find(conn, id)?.map(Entity::Sequence),
        EntityKind::BreakOut => breakouts::find(conn, id)?.map(Entity::BreakOut),
    })
}

/// Locate an entity of any kind. Kinds are tried parent first.
pub fn find_any_by_uuid(conn: &Connection, uuid: &Uuid) -> Result<Option<Entity>, StoreError> {
    for kind in EntityKind::ALL {
        if let Some(entity) = find_by_uuid(conn, kind, uuid)? {
            return Ok(Some(entity));
        }
    }
    Ok(None)
}

/// Insert when `id == 0`, otherwise overwrite every stored column.
pub fn save(conn: &Connection, entity: &mut Entity) -> Result<(), StoreError> {
    let is_new = entity.id() == 0;
    match entity {
        Entity::Client(e) if is_new => clients::insert(conn, e),
        Entity::Client(e) => clients::update(conn, e),
        Entity::Programme(e) if is_new => programmes::insert(conn, e),
        Entity::Programme(e) => programmes::update(conn, e),
        Entity::Session(e) if is_new => sessions::insert(conn, e),
        Entity::Session(e) => sessions::update(conn, e),
        Entity::Sequence(e) if is_new => sequences::insert(conn, e),
        Entity::Sequence(e) => sequences::update(conn, e),
        Entity::BreakOut(e) if is_new => breakouts::insert(conn, e),
        Entity::BreakOut(e) => breakouts::update(conn, e),
    }
}

pub fn set_status(
    conn: &Connection,
    kind: EntityKind,
    id: i64,
    status: Status,
) -> Result<(), StoreError> {
    set_status_in(conn, kind.table(), id, status)
}

/// Direct children of `parent` of the given kind, in export order.
///
/// A client's sessions are only those outside any programme; sessions
/// inside a programme are children of the programme.
pub fn children(
    conn: &Connection,
    parent: &Entity,
    kind: EntityKind,
    status: Option<Status>,
) -> Result<Vec<Entity>, StoreError> {
    let id = parent.id();
    Ok(match (parent.kind(), kind) {
        (EntityKind::Client, EntityKind::Programme) => {
            programmes::list_for_client(conn, id, status)?
                .into_iter()
                .map(Entity::Programme)
                .collect()
        }
        (EntityKind::Client, EntityKind::Session) => sessions::list_unassigned(conn, id, status)?
            .into_iter()
            .map(Entity::Session)
            .collect(),
        (EntityKind::Programme, EntityKind::Session) => {
            sessions::list_for_programme(conn, id, status)?
                .into_iter()
                .map(Entity::Session)
                .collect()
        }
        (EntityKind::Session, EntityKind::Sequence) => {
            sequences::list_for_session(conn, id, status)?
                .into_iter()
                .map(Entity::Sequence)
                .collect()
        }
        (EntityKind::Sequence, EntityKind::BreakOut) => {
            breakouts::list_for_sequence(conn, id, status)?
                .into_iter()
                .map(Entity::BreakOut)
                .collect()
        }
        (parent_kind, kind) => {
            return Err(StoreError::Validation(format!(
                "{kind} cannot be a child of {parent_kind}"
            )))
        }
    })
}
