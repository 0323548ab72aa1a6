//! Markdown codec for the session-design hierarchy.
//!
//! Every entity is one line: a `[@Kind::uuid]` header at a heading depth
//! matching its place in the tree, followed by `**field**: value` markers.
//! [`MarkdownCodec::export`] renders a subtree; [`MarkdownCodec::import`]
//! applies an edited document back, creating, updating and soft-deleting in
//! a single transaction.

pub mod dialect;
pub mod error;
pub mod import;
pub mod render;

use tracing::{info, instrument};
use uuid::Uuid;

use flowai_core::{Entity, EntityKind, Status};
use flowai_store::{entities, Database};

pub use error::CodecError;
pub use import::{EntityRef, ImportAction, ImportOptions, ImportReport, ProcessedEntity, SkippedSection};
pub use render::ExportOptions;

/// Parse a type tag (`Client`, `breakout`, ...).
pub fn parse_kind(tag: &str) -> Result<EntityKind, CodecError> {
    EntityKind::from_tag(tag)
        .ok_or_else(|| CodecError::Validation(format!("invalid model type {tag:?}")))
}

/// Parse a uuid given on an export request.
pub fn parse_uuid(raw: &str) -> Result<Uuid, CodecError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| CodecError::Validation(format!("malformed uuid {raw:?}")))
}

#[derive(Clone)]
pub struct MarkdownCodec {
    db: Database,
}

impl MarkdownCodec {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Export by uuid alone; the kind is looked up.
    #[instrument(skip(self, options), fields(uuid = %uuid))]
    pub fn export_uuid(&self, uuid: &Uuid, options: &ExportOptions) -> Result<String, CodecError> {
        let root = self
            .db
            .with_conn(|conn| entities::find_any_by_uuid(conn, uuid))?
            .ok_or_else(|| CodecError::NotFound(uuid.to_string()))?;
        self.render(&root, options)
    }

    #[instrument(skip(self, options), fields(kind = %kind, uuid = %uuid))]
    pub fn export(
        &self,
        kind: EntityKind,
        uuid: &Uuid,
        options: &ExportOptions,
    ) -> Result<String, CodecError> {
        let root = self
            .db
            .with_conn(|conn| entities::find_by_uuid(conn, kind, uuid))?
            .ok_or_else(|| CodecError::NotFound(format!("{kind} {uuid}")))?;
        self.render(&root, options)
    }

    #[instrument(skip(self, options), fields(kind = %kind, id))]
    pub fn export_by_id(
        &self,
        kind: EntityKind,
        id: i64,
        options: &ExportOptions,
    ) -> Result<String, CodecError> {
        let root = self
            .db
            .with_conn(|conn| entities::find_by_id(conn, kind, id))?
            .ok_or_else(|| CodecError::NotFound(format!("{kind} #{id}")))?;
        self.render(&root, options)
    }

    /// A root that is not `normal` is reported as not found.
    fn render(&self, root: &Entity, options: &ExportOptions) -> Result<String, CodecError> {
        if root.status() != Status::Normal {
            return Err(CodecError::NotFound(format!("{} {}", root.kind(), root.uuid())));
        }
        let text = self
            .db
            .with_conn(|conn| render::render(conn, root, options))?;
        info!(
            kind = %root.kind(),
            lines = text.lines().count(),
            "markdown export finished"
        );
        Ok(text)
    }

    /// Apply a document. Malformed sections are reported, not fatal; a
    /// storage failure rolls the whole import back.
    #[instrument(skip(self, text, options), fields(bytes = text.len(), reconcile = options.reconcile))]
    pub fn import(&self, text: &str, options: &ImportOptions) -> Result<ImportReport, CodecError> {
        self.db.with_tx(|conn| import::import(conn, text, options))
    }
}
