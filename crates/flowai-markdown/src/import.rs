//! Two-pass import of a document into the store.
//!
//! Pass 1 parses every section, settles its identity and applies its scalar
//! fields to an in-memory entity. Pass 2 visits sections parent kinds first,
//! resolves relations against the document or the store, and persists.
//! Sections that fail are reported, never fatal; storage errors abort the
//! whole import.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowai_core::{Entity, EntityKind, Relation, Status};
use flowai_store::{entities, sequences};

use crate::dialect::{self, Ident, RawSection, ANCHOR};
use crate::error::CodecError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Soft-delete normal children omitted under the document's sections.
    pub reconcile: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { reconcile: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Created,
    Updated,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessedEntity {
    /// Section position in the document.
    pub index: usize,
    pub kind: EntityKind,
    pub uuid: Uuid,
    pub action: ImportAction,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub uuid: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedSection {
    pub index: usize,
    pub header: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub processed: Vec<ProcessedEntity>,
    pub anchors: Vec<EntityRef>,
    pub skipped: Vec<SkippedSection>,
    pub deleted: Vec<EntityRef>,
}

impl ImportReport {
    /// Uuid stored for the section at `index`, if it was processed.
    pub fn uuid_at(&self, index: usize) -> Option<Uuid> {
        self.processed
            .iter()
            .find(|p| p.index == index)
            .map(|p| p.uuid)
    }

    pub fn count(&self, action: ImportAction) -> usize {
        self.processed.iter().filter(|p| p.action == action).count()
    }
}

#[derive(Clone, Copy, Debug)]
enum RelationRef {
    Uuid(Uuid),
    Id(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Pending,
    Done,
    Failed,
}

struct Section {
    index: usize,
    header: String,
    kind: EntityKind,
    anchor: bool,
    created: bool,
    entity: Entity,
    explicit: Vec<(Relation, RelationRef)>,
    /// Relation implied by nesting, and the slot of the enclosing section.
    inferred: Option<(Relation, usize)>,
    order_given: bool,
    /// Stored position of an existing sequence before this import.
    prior: Option<Prior>,
    state: State,
}

#[derive(Clone, Copy, Debug)]
struct Prior {
    session_id: i64,
    order: i64,
    status: Status,
}

/// Tie rank among sequences that end up with the same order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Placement {
    Ahead,
    Stay,
    Behind,
}

impl Section {
    fn placement(&self) -> Placement {
        let Entity::Sequence(sequence) = &self.entity else {
            return Placement::Stay;
        };
        if !self.order_given {
            return Placement::Stay;
        }
        match self.prior {
            Some(prior) if !self.arrives() => match sequence.order.cmp(&prior.order) {
                Ordering::Less => Placement::Ahead,
                Ordering::Equal => Placement::Stay,
                Ordering::Greater => Placement::Behind,
            },
            _ => Placement::Ahead,
        }
    }

    /// New to its session: created, moved in from another session, or revived.
    fn arrives(&self) -> bool {
        let Entity::Sequence(sequence) = &self.entity else {
            return false;
        };
        self.prior.map_or(true, |prior| {
            prior.status != Status::Normal || prior.session_id != sequence.session_id
        })
    }
}

struct Skip {
    kind: Option<EntityKind>,
    uuid: Option<Uuid>,
    reason: String,
}

type Parsed = Result<Section, Skip>;

fn skip(kind: Option<EntityKind>, uuid: Option<Uuid>, reason: impl Into<String>) -> Parsed {
    Err(Skip {
        kind,
        uuid,
        reason: reason.into(),
    })
}

#[derive(Clone, Copy)]
struct Frame {
    depth: usize,
    kind: Option<EntityKind>,
    slot: Option<usize>,
}

pub(crate) fn import(
    conn: &Connection,
    text: &str,
    options: &ImportOptions,
) -> Result<ImportReport, CodecError> {
    let raw = dialect::split_sections(text);
    if raw.is_empty() {
        return Err(CodecError::Validation("document contains no sections".into()));
    }

    let mut importer = Importer::new(conn);
    importer.parse(&raw)?;
    importer.persist()?;
    if options.reconcile {
        importer.reconcile()?;
    }
    importer.renumber_sequences()?;

    let mut report = importer.report;
    report.processed.sort_by_key(|p| p.index);
    info!(
        sections = raw.len(),
        created = report.count(ImportAction::Created),
        updated = report.count(ImportAction::Updated),
        skipped = report.skipped.len(),
        deleted = report.deleted.len(),
        "markdown import finished"
    );
    Ok(report)
}

struct Importer<'c> {
    conn: &'c Connection,
    sections: Vec<Section>,
    by_uuid: HashMap<Uuid, usize>,
    skipped_uuids: HashSet<Uuid>,
    /// Uuids that protect an entity from reconciliation.
    present: HashSet<Uuid>,
    touched_sessions: BTreeSet<i64>,
    report: ImportReport,
}

impl<'c> Importer<'c> {
    fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            sections: Vec::new(),
            by_uuid: HashMap::new(),
            skipped_uuids: HashSet::new(),
            present: HashSet::new(),
            touched_sessions: BTreeSet::new(),
            report: ImportReport::default(),
        }
    }

    fn record_skip(&mut self, index: usize, header: &str, reason: String) {
        warn!(section = index, header, reason = %reason, "skipping section");
        self.report.skipped.push(SkippedSection {
            index,
            header: header.to_string(),
            reason,
        });
    }

    // ── pass 1 ──────────────────────────────────────────────────────────

    fn parse(&mut self, raw: &[RawSection<'_>]) -> Result<(), CodecError> {
        let mut stack: Vec<Frame> = Vec::new();
        for section in raw {
            while stack.last().is_some_and(|f| f.depth >= section.depth) {
                stack.pop();
            }
            let parent = stack.last().copied();

            let frame = match self.parse_section(section, parent)? {
                Ok(parsed) => {
                    let slot = self.sections.len();
                    let kind = parsed.kind;
                    let uuid = parsed.entity.uuid();
                    self.present.insert(uuid);
                    self.by_uuid.insert(uuid, slot);
                    if parsed.anchor {
                        self.report.anchors.push(EntityRef { kind, uuid });
                    }
                    self.sections.push(parsed);
                    Frame {
                        depth: section.depth,
                        kind: Some(kind),
                        slot: Some(slot),
                    }
                }
                Err(skipped) => {
                    if let Some(uuid) = skipped.uuid {
                        self.present.insert(uuid);
                        if !self.by_uuid.contains_key(&uuid) {
                            self.skipped_uuids.insert(uuid);
                        }
                    }
                    self.record_skip(section.index, section.header_line(), skipped.reason);
                    Frame {
                        depth: section.depth,
                        kind: skipped.kind,
                        slot: None,
                    }
                }
            };
            stack.push(frame);
        }
        Ok(())
    }

    fn parse_section(
        &self,
        raw: &RawSection<'_>,
        parent: Option<Frame>,
    ) -> Result<Parsed, CodecError> {
        let header_line = raw.header_line();
        let Some(header) = dialect::parse_header(header_line) else {
            return Ok(skip(None, None, "malformed section header"));
        };
        let Some(kind) = EntityKind::from_tag(header.tag) else {
            return Ok(skip(None, None, format!("unknown type {:?}", header.tag)));
        };
        let Some(ident) = dialect::parse_ident(header.ident) else {
            return Ok(skip(Some(kind), None, format!("invalid uuid {:?}", header.ident)));
        };
        let known_uuid = match ident {
            Ident::Existing(uuid) => Some(uuid),
            Ident::New => None,
        };
        let fail = |reason: String| -> Result<Parsed, CodecError> {
            Ok(skip(Some(kind), known_uuid, reason))
        };

        if let Some(uuid) = known_uuid {
            if self.by_uuid.contains_key(&uuid) {
                return fail(format!("duplicate uuid {uuid}"));
            }
        }

        let mut fields = dialect::parse_fields(&header_line[header.end..]);
        for line in raw.lines.iter().skip(1) {
            fields.extend(dialect::parse_fields(line));
        }

        let mut anchor = false;
        let mut explicit = Vec::new();
        let mut scalars = Vec::new();
        for (name, value) in fields {
            if name == ANCHOR {
                anchor = value.eq_ignore_ascii_case("true");
                continue;
            }
            let relation = Relation::from_marker(&name)
                .filter(|(relation, _)| kind.relations().contains(relation));
            if let Some((relation, is_id)) = relation {
                match parse_relation_value(&value, is_id) {
                    Some(target) => explicit.push((relation, target)),
                    None => return fail(format!("invalid {name} value {value:?}")),
                }
                continue;
            }
            scalars.push((name, dialect::unescape_value(&value)));
        }

        if anchor {
            let Some(uuid) = known_uuid else {
                return fail("anchor requires an existing uuid".into());
            };
            let Some(entity) = entities::find_by_uuid(self.conn, kind, &uuid)? else {
                return fail(format!("anchor for unknown {kind} {uuid}"));
            };
            debug!(section = raw.index, %kind, %uuid, "anchor");
            return Ok(Ok(Section {
                index: raw.index,
                header: header_line.to_string(),
                kind,
                anchor: true,
                created: false,
                entity,
                explicit: Vec::new(),
                inferred: None,
                order_given: false,
                prior: None,
                state: State::Done,
            }));
        }

        let inferred = match parent {
            None => None,
            Some(frame) => {
                let overridden =
                    |relation: Relation| explicit.iter().any(|(r, _)| *r == relation);
                match (frame.kind.and_then(|pk| kind.relation_to(pk)), frame.slot) {
                    (Some(relation), Some(slot)) => Some((relation, slot)),
                    (Some(relation), None) if overridden(relation) => None,
                    (Some(_), None) => return fail("parent section was skipped".into()),
                    (None, None)
                        if frame.kind.is_none()
                            && explicit.is_empty()
                            && !kind.relations().is_empty() =>
                    {
                        return fail("parent section was skipped".into())
                    }
                    (None, _) => None,
                }
            }
        };

        let (mut entity, created) = match known_uuid {
            None => (Entity::blank(kind, Uuid::now_v7()), true),
            Some(uuid) => match entities::find_by_uuid(self.conn, kind, &uuid)? {
                Some(existing) => (existing, false),
                None => {
                    if let Some(other) = entities::find_any_by_uuid(self.conn, &uuid)? {
                        return fail(format!("uuid {uuid} belongs to a {}", other.kind()));
                    }
                    (Entity::blank(kind, uuid), true)
                }
            },
        };

        let prior = match &entity {
            Entity::Sequence(sequence) if !created => Some(Prior {
                session_id: sequence.session_id,
                order: sequence.order,
                status: sequence.status,
            }),
            _ => None,
        };

        let mut order_given = false;
        for (name, value) in &scalars {
            match entity.set_scalar(name, value) {
                Ok(true) => order_given |= name == "order",
                Ok(false) => {
                    warn!(section = raw.index, %kind, field = %name, "unknown field ignored")
                }
                Err(reason) => return fail(reason),
            }
        }
        entity.set_status(Status::Normal);

        debug!(section = raw.index, %kind, uuid = %entity.uuid(), created, "parsed section");
        Ok(Ok(Section {
            index: raw.index,
            header: header_line.to_string(),
            kind,
            anchor: false,
            created,
            entity,
            explicit,
            inferred,
            order_given,
            prior,
            state: State::Pending,
        }))
    }

    // ── pass 2 ──────────────────────────────────────────────────────────

    fn persist(&mut self) -> Result<(), CodecError> {
        let mut slots: Vec<usize> = (0..self.sections.len()).collect();
        slots.sort_by_key(|&slot| (self.sections[slot].kind, self.sections[slot].index));

        for slot in slots {
            if self.sections[slot].state != State::Pending {
                continue;
            }
            if let Err(reason) = self.prepare(slot)? {
                self.sections[slot].state = State::Failed;
                let (index, header) = {
                    let s = &self.sections[slot];
                    (s.index, s.header.clone())
                };
                self.record_skip(index, &header, reason);
                continue;
            }

            let conn = self.conn;
            let section = &mut self.sections[slot];
            entities::save(conn, &mut section.entity)?;
            section.state = State::Done;

            let uuid = section.entity.uuid();
            self.present.insert(uuid);
            if let Some(session_id) = section.entity.parent(Relation::Session) {
                self.touched_sessions.insert(session_id);
            }
            let action = if section.created {
                ImportAction::Created
            } else {
                ImportAction::Updated
            };
            debug!(section = section.index, kind = %section.kind, %uuid, ?action, "persisted");
            self.report.processed.push(ProcessedEntity {
                index: section.index,
                kind: section.kind,
                uuid,
                action,
            });
        }
        Ok(())
    }

    /// Resolve relations, validate, and assign a sequence position.
    fn prepare(&mut self, slot: usize) -> Result<Result<(), String>, CodecError> {
        let kind = self.sections[slot].kind;
        let explicit = self.sections[slot].explicit.clone();
        let inferred = self.sections[slot].inferred;

        let mut resolved: Vec<(Relation, i64)> = Vec::new();
        for relation in kind.relations().iter().copied() {
            let explicit_ref = explicit.iter().find(|(r, _)| *r == relation).map(|(_, t)| *t);
            if let Some(target) = explicit_ref {
                match self.lookup(relation, target)? {
                    Ok(id) => resolved.push((relation, id)),
                    Err(reason) => return Ok(Err(reason)),
                }
            } else if let Some((_, parent_slot)) = inferred.filter(|(r, _)| *r == relation) {
                let parent = &self.sections[parent_slot];
                if parent.state != State::Done {
                    return Ok(Err("parent section was skipped".into()));
                }
                resolved.push((relation, parent.entity.id()));
            }
        }

        if let Some(old_session) = self.sections[slot].entity.parent(Relation::Session) {
            self.touched_sessions.insert(old_session);
        }

        let conn = self.conn;
        let section = &mut self.sections[slot];
        for (relation, id) in &resolved {
            section.entity.set_parent(*relation, Some(*id));
        }

        if kind == EntityKind::Session {
            let explicit_client = resolved
                .iter()
                .find(|(r, _)| *r == Relation::Client)
                .map(|(_, id)| *id)
                .filter(|_| explicit.iter().any(|(r, _)| *r == Relation::Client));
            let placed_under_client = matches!(inferred, Some((Relation::Client, _)));
            let explicit_programme = explicit.iter().any(|(r, _)| *r == Relation::Programme);
            if placed_under_client && !explicit_programme {
                section.entity.set_parent(Relation::Programme, None);
            }
            if let Some(programme_id) = section.entity.parent(Relation::Programme) {
                let owner = entities::find_by_id(conn, EntityKind::Programme, programme_id)?
                    .and_then(|p| p.parent(Relation::Client));
                let Some(owner) = owner else {
                    return Ok(Err(format!("unknown programme {programme_id}")));
                };
                if explicit_client.is_some_and(|client| client != owner) {
                    return Ok(Err("client does not match the programme's client".into()));
                }
                section.entity.set_parent(Relation::Client, Some(owner));
            }
        }

        if let Err(reason) = section.entity.validate() {
            return Ok(Err(reason));
        }
        if let Some(missing) = kind
            .relations()
            .iter()
            .find(|r| r.is_required() && section.entity.parent(**r).is_none())
        {
            return Ok(Err(format!("missing {} relation", missing.stem())));
        }

        let append = !section.order_given && section.arrives();
        if let Entity::Sequence(sequence) = &mut section.entity {
            if append {
                sequence.order = sequences::max_order(conn, sequence.session_id)? + 1;
            }
        }
        Ok(Ok(()))
    }

    fn lookup(
        &self,
        relation: Relation,
        target: RelationRef,
    ) -> Result<Result<i64, String>, CodecError> {
        let wanted = relation.target();
        let found = match target {
            RelationRef::Uuid(uuid) => {
                if let Some(&slot) = self.by_uuid.get(&uuid) {
                    let section = &self.sections[slot];
                    if section.kind != wanted {
                        return Ok(Err(format!("{uuid} is a {}, not a {wanted}", section.kind)));
                    }
                    if section.state != State::Done {
                        return Ok(Err(format!("{} section {uuid} was skipped", relation.stem())));
                    }
                    return Ok(Ok(section.entity.id()));
                }
                if self.skipped_uuids.contains(&uuid) {
                    return Ok(Err(format!("{} section {uuid} was skipped", relation.stem())));
                }
                entities::find_by_uuid(self.conn, wanted, &uuid)?
            }
            RelationRef::Id(id) => entities::find_by_id(self.conn, wanted, id)?,
        };
        Ok(match found {
            Some(entity) => Ok(entity.id()),
            None => Err(format!("unresolved {} {}", relation.stem(), describe(target))),
        })
    }

    // ── reconciliation ──────────────────────────────────────────────────

    fn reconcile(&mut self) -> Result<(), CodecError> {
        for section in &self.sections {
            if section.anchor || section.state != State::Done {
                continue;
            }
            for child_kind in section.kind.child_kinds() {
                let children =
                    entities::children(self.conn, &section.entity, *child_kind, Some(Status::Normal))?;
                for child in children {
                    if self.present.contains(&child.uuid()) {
                        continue;
                    }
                    entities::set_status(self.conn, child.kind(), child.id(), Status::Deleted)?;
                    if child.kind() == EntityKind::Sequence {
                        self.touched_sessions.insert(section.entity.id());
                    }
                    debug!(kind = %child.kind(), uuid = %child.uuid(), "deleted by omission");
                    self.report.deleted.push(EntityRef {
                        kind: child.kind(),
                        uuid: child.uuid(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Renumber touched sessions to `1..=n` by (order, placement, document
    /// position, id).
    fn renumber_sequences(&self) -> Result<(), CodecError> {
        let placed: HashMap<Uuid, (Placement, usize)> = self
            .sections
            .iter()
            .filter(|s| s.kind == EntityKind::Sequence && s.state == State::Done && !s.anchor)
            .map(|s| (s.entity.uuid(), (s.placement(), s.index)))
            .collect();

        for &session_id in &self.touched_sessions {
            let mut current = sequences::list_for_session(self.conn, session_id, Some(Status::Normal))?;
            current.sort_by_key(|s| {
                let (placement, position) = placed
                    .get(&s.uuid)
                    .copied()
                    .unwrap_or((Placement::Stay, usize::MAX));
                (s.order, placement, position, s.id)
            });
            let ids: Vec<i64> = current.iter().map(|s| s.id).collect();
            sequences::renumber(self.conn, &ids)?;
        }
        Ok(())
    }
}

fn parse_relation_value(value: &str, allow_id: bool) -> Option<RelationRef> {
    let value = value.trim();
    if let Ok(uuid) = Uuid::parse_str(value) {
        return Some(RelationRef::Uuid(uuid));
    }
    if allow_id {
        return value.parse().ok().map(RelationRef::Id);
    }
    None
}

fn describe(target: RelationRef) -> String {
    match target {
        RelationRef::Uuid(uuid) => uuid.to_string(),
        RelationRef::Id(id) => format!("#{id}"),
    }
}

#[cfg(test)]
mod tests {
    use flowai_core::{Client, Programme, Sequence, Session};
    use flowai_store::{clients, programmes, sessions, Database};

    use super::*;

    fn run(db: &Database, text: &str) -> ImportReport {
        db.with_tx(|conn| import(conn, text, &ImportOptions::default()))
            .unwrap()
    }

    fn seed_client(db: &Database) -> Client {
        db.with_conn(|conn| {
            let mut client = Client { name: "Acme".into(), ..Default::default() };
            clients::insert(conn, &mut client)?;
            Ok(client)
        })
        .unwrap()
    }

    #[test]
    fn empty_document_is_rejected() {
        let db = Database::in_memory().unwrap();
        let result = db.with_conn(|conn| {
            Ok(import(conn, "just prose\n", &ImportOptions::default()))
        });
        assert!(matches!(result.unwrap(), Err(CodecError::Validation(_))));
    }

    #[test]
    fn new_tree_is_created_with_inferred_parents() {
        let db = Database::in_memory().unwrap();
        let report = run(
            &db,
            "# [@Client::new] **name**: Acme\n\
             ## [@Programme::new] **name**: Leaders\n\
             ### [@Session::new] **title**: Kickoff\n\
             #### [@Sequence::new] **title**: Intro\n\
             ##### [@BreakOut::new] **title**: Pairs\n\
             ## [@Session::new] **title**: Standalone\n",
        );
        assert!(report.skipped.is_empty(), "{:?}", report.skipped);
        assert_eq!(report.count(ImportAction::Created), 6);

        let kickoff = report.uuid_at(2).unwrap();
        let standalone = report.uuid_at(5).unwrap();
        db.with_conn(|conn| {
            let client = clients::find_by_uuid(conn, &report.uuid_at(0).unwrap())?.unwrap();
            let programme = programmes::find_by_uuid(conn, &report.uuid_at(1).unwrap())?.unwrap();
            let kickoff = sessions::find_by_uuid(conn, &kickoff)?.unwrap();
            let standalone = sessions::find_by_uuid(conn, &standalone)?.unwrap();
            assert_eq!(programme.client_id, client.id);
            assert_eq!(kickoff.programme_id, Some(programme.id));
            assert_eq!(kickoff.client_id, client.id);
            assert_eq!(standalone.programme_id, None);
            assert_eq!(standalone.client_id, client.id);

            let seqs = sequences::list_for_session(conn, kickoff.id, None)?;
            assert_eq!(seqs.len(), 1);
            assert_eq!(seqs[0].order, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn forward_reference_by_uuid() {
        let db = Database::in_memory().unwrap();
        let client_uuid = Uuid::now_v7();
        let report = run(
            &db,
            &format!(
                "# [@Session::new] **title**: Early **client_uuid**: {client_uuid}\n\
                 # [@Client::{client_uuid}] **name**: Late\n"
            ),
        );
        assert!(report.skipped.is_empty(), "{:?}", report.skipped);
        db.with_conn(|conn| {
            let session = sessions::find_by_uuid(conn, &report.uuid_at(0).unwrap())?.unwrap();
            let client = clients::find_by_uuid(conn, &client_uuid)?.unwrap();
            assert_eq!(session.client_id, client.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn numeric_id_relation() {
        let db = Database::in_memory().unwrap();
        let client = seed_client(&db);
        let report = run(
            &db,
            &format!("# [@Programme::new] **name**: P **client_id**: {}\n", client.id),
        );
        assert_eq!(report.count(ImportAction::Created), 1);
    }

    #[test]
    fn skipped_parent_skips_children() {
        let db = Database::in_memory().unwrap();
        let report = run(
            &db,
            "# [@Client::new] **email**: no-name@acme.test\n\
             ## [@Programme::new] **name**: Orphaned\n\
             # [@Client::new] **name**: Fine\n",
        );
        assert_eq!(report.count(ImportAction::Created), 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].index, 0);
        assert!(report.skipped[1].reason.contains("skipped"));
    }

    #[test]
    fn malformed_header_parent_skips_children() {
        let db = Database::in_memory().unwrap();
        let report = run(
            &db,
            "# [@Client:broken] **name**: A\n## [@Programme::new] **name**: P\n",
        );
        assert!(report.processed.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn bad_sections_are_reported() {
        let db = Database::in_memory().unwrap();
        let dup = Uuid::now_v7();
        let report = run(
            &db,
            &format!(
                "# [@Widget::new] **name**: ?\n\
                 # [@Client::12345] **name**: ?\n\
                 # [@Client::{dup}] **name**: First\n\
                 # [@Client::{dup}] **name**: Second\n\
                 # [@Client::new] **anchor**: true\n\
                 # [@Client::{}] **anchor**: true\n",
                Uuid::now_v7()
            ),
        );
        assert_eq!(report.count(ImportAction::Created), 1);
        let reasons: Vec<_> = report.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert_eq!(reasons.len(), 5);
        assert!(reasons[0].starts_with("unknown type"));
        assert!(reasons[1].starts_with("invalid uuid"));
        assert!(reasons[2].starts_with("duplicate uuid"));
        assert!(reasons[3].contains("existing uuid"));
        assert!(reasons[4].starts_with("anchor for unknown"));
    }

    #[test]
    fn invalid_order_skips_sequence() {
        let db = Database::in_memory().unwrap();
        let report = run(
            &db,
            "# [@Client::new] **name**: A\n\
             ## [@Session::new] **title**: S\n\
             ### [@Sequence::new] **title**: Q **order**: first\n",
        );
        assert_eq!(report.count(ImportAction::Created), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("integer"));
    }

    #[test]
    fn uuid_of_another_kind_is_rejected() {
        let db = Database::in_memory().unwrap();
        let client = seed_client(&db);
        let report = run(&db, &format!("# [@Programme::{}] **name**: P\n", client.uuid));
        assert!(report.processed.is_empty());
        assert!(report.skipped[0].reason.contains("belongs to a Client"));
    }

    #[test]
    fn session_client_follows_programme() {
        let db = Database::in_memory().unwrap();
        let client = seed_client(&db);
        let (other, programme) = db
            .with_conn(|conn| {
                let mut other = Client { name: "Other".into(), ..Default::default() };
                clients::insert(conn, &mut other)?;
                let mut programme = Programme {
                    client_id: client.id,
                    name: "P".into(),
                    ..Default::default()
                };
                programmes::insert(conn, &mut programme)?;
                Ok((other, programme))
            })
            .unwrap();

        let report = run(
            &db,
            &format!(
                "# [@Session::new] **title**: Derived **programme_uuid**: {}\n\
                 # [@Session::new] **title**: Clash **programme_uuid**: {} **client_uuid**: {}\n",
                programme.uuid, programme.uuid, other.uuid
            ),
        );
        assert_eq!(report.count(ImportAction::Created), 1);
        assert!(report.skipped[0].reason.contains("does not match"));
        db.with_conn(|conn| {
            let session = sessions::find_by_uuid(conn, &report.uuid_at(0).unwrap())?.unwrap();
            assert_eq!(session.client_id, client.id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn new_sequence_without_order_goes_last() {
        let db = Database::in_memory().unwrap();
        let client = seed_client(&db);
        let session = db
            .with_conn(|conn| {
                let mut session = Session {
                    client_id: client.id,
                    title: "S".into(),
                    ..Default::default()
                };
                sessions::insert(conn, &mut session)?;
                for (title, order) in [("A", 1), ("B", 2)] {
                    let mut seq = Sequence {
                        session_id: session.id,
                        title: title.into(),
                        order,
                        ..Default::default()
                    };
                    sequences::insert(conn, &mut seq)?;
                }
                Ok(session)
            })
            .unwrap();

        let report = db
            .with_tx(|conn| {
                import(
                    conn,
                    &format!("# [@Sequence::new] **title**: C **session_uuid**: {}\n", session.uuid),
                    &ImportOptions::default(),
                )
            })
            .unwrap();
        assert!(report.deleted.is_empty());
        let titles: Vec<_> = db
            .with_conn(|conn| sequences::list_for_session(conn, session.id, Some(Status::Normal)))
            .unwrap()
            .into_iter()
            .map(|s| (s.title, s.order))
            .collect();
        assert_eq!(
            titles,
            vec![("A".to_string(), 1), ("B".to_string(), 2), ("C".to_string(), 3)]
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let db = Database::in_memory().unwrap();
        let report = run(&db, "# [@Client::new] **name**: A **colour**: teal\n");
        assert_eq!(report.count(ImportAction::Created), 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn relation_value_parsing() {
        let uuid = Uuid::now_v7();
        assert!(matches!(
            parse_relation_value(&uuid.to_string(), false),
            Some(RelationRef::Uuid(u)) if u == uuid
        ));
        assert!(matches!(parse_relation_value(" 12 ", true), Some(RelationRef::Id(12))));
        assert!(parse_relation_value("12", false).is_none());
        assert!(parse_relation_value("abc", true).is_none());
    }
}
