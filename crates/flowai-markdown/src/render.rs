use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use flowai_core::{Entity, EntityKind, Relation, Status};
use flowai_store::{entities, StoreError};

use crate::dialect::{self, ANCHOR};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Include the normal descendants of the root.
    pub export_related: bool,
    /// Emit the root's ancestor chain as anchor lines first.
    pub include_ancestors: bool,
    /// Heading depth of the first line.
    pub start_level: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            export_related: true,
            include_ancestors: false,
            start_level: 1,
        }
    }
}

/// Render `root` (and optionally its ancestors and descendants) as a document.
/// Only normal descendants are included.
pub(crate) fn render(
    conn: &Connection,
    root: &Entity,
    options: &ExportOptions,
) -> Result<String, StoreError> {
    let mut out = String::new();
    let mut depth = options.start_level.max(1);

    if options.include_ancestors {
        for ancestor in ancestors(conn, root)? {
            out.push_str(&anchor_line(depth, &ancestor));
            out.push('\n');
            depth += 1;
        }
    }

    write_subtree(conn, root, depth, options.export_related, &mut out)?;
    Ok(out)
}

fn write_subtree(
    conn: &Connection,
    entity: &Entity,
    depth: usize,
    related: bool,
    out: &mut String,
) -> Result<(), StoreError> {
    out.push_str(&entity_line(depth, entity));
    out.push('\n');
    if !related {
        return Ok(());
    }
    for kind in entity.kind().child_kinds() {
        for child in entities::children(conn, entity, *kind, Some(Status::Normal))? {
            write_subtree(conn, &child, depth + 1, true, out)?;
        }
    }
    Ok(())
}

/// Header followed by every non-empty scalar field.
pub(crate) fn entity_line(depth: usize, entity: &Entity) -> String {
    let mut line = dialect::header(depth, entity.kind(), &entity.uuid());
    for (name, value) in entity.scalars() {
        let value = dialect::collapse_whitespace(&value);
        if value.is_empty() {
            continue;
        }
        line.push_str(&format!(" **{name}**: {}", dialect::escape_value(&value)));
    }
    line
}

fn anchor_line(depth: usize, entity: &Entity) -> String {
    format!(
        "{} **{ANCHOR}**: true",
        dialect::header(depth, entity.kind(), &entity.uuid())
    )
}

/// Ancestors of `entity`, outermost first. A session's programme is
/// included only when it has one.
fn ancestors(conn: &Connection, entity: &Entity) -> Result<Vec<Entity>, StoreError> {
    let mut chain = Vec::new();
    let mut current = entity.clone();
    loop {
        let next = match current.kind() {
            EntityKind::Client => None,
            EntityKind::Programme => parent_of(conn, &current, Relation::Client)?,
            EntityKind::Session => match parent_of(conn, &current, Relation::Programme)? {
                Some(programme) => Some(programme),
                None => parent_of(conn, &current, Relation::Client)?,
            },
            EntityKind::Sequence => parent_of(conn, &current, Relation::Session)?,
            EntityKind::BreakOut => parent_of(conn, &current, Relation::Sequence)?,
        };
        match next {
            Some(parent) => {
                chain.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }
    chain.reverse();
    debug!(count = chain.len(), "resolved ancestor chain");
    Ok(chain)
}

fn parent_of(
    conn: &Connection,
    entity: &Entity,
    relation: Relation,
) -> Result<Option<Entity>, StoreError> {
    match entity.parent(relation) {
        Some(id) => entities::find_by_id(conn, relation.target(), id),
        None => Ok(None),
    }
}
