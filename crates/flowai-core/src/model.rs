use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state shared by every entity. `Deleted` is a tombstone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Normal,
    Deleted,
    Archived,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Deleted => write!(f, "deleted"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "deleted" => Ok(Self::Deleted),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// The closed set of entity types the markdown codec understands,
/// in parent → child order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Client,
    Programme,
    Session,
    Sequence,
    BreakOut,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::Client,
        Self::Programme,
        Self::Session,
        Self::Sequence,
        Self::BreakOut,
    ];

    /// Tag used inside `[@Tag::uuid]` headers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Programme => "Programme",
            Self::Session => "Session",
            Self::Sequence => "Sequence",
            Self::BreakOut => "BreakOut",
        }
    }

    /// Case-insensitive lookup of a header or CLI tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.tag().eq_ignore_ascii_case(tag))
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Client => "clients",
            Self::Programme => "programmes",
            Self::Session => "sessions",
            Self::Sequence => "sequences",
            Self::BreakOut => "breakouts",
        }
    }

    /// Scalar field names in render order.
    pub fn scalar_fields(self) -> &'static [&'static str] {
        match self {
            Self::Client => Client::TEXT_FIELDS,
            Self::Programme => Programme::TEXT_FIELDS,
            Self::Session => Session::TEXT_FIELDS,
            Self::Sequence => &[
                "title",
                "objective",
                "input_text",
                "output_text",
                "input_drive_url",
                "output_drive_url",
                "order",
            ],
            Self::BreakOut => BreakOut::TEXT_FIELDS,
        }
    }

    /// Field that must be non-empty for the entity to be stored.
    pub fn required_field(self) -> &'static str {
        match self {
            Self::Client | Self::Programme => "name",
            Self::Session | Self::Sequence | Self::BreakOut => "title",
        }
    }

    /// Foreign-key relations an entity of this kind may declare.
    pub fn relations(self) -> &'static [Relation] {
        match self {
            Self::Client => &[],
            Self::Programme => &[Relation::Client],
            Self::Session => &[Relation::Client, Relation::Programme],
            Self::Sequence => &[Relation::Session],
            Self::BreakOut => &[Relation::Sequence],
        }
    }

    /// Kinds that own direct children of this kind in the codec tree.
    pub fn child_kinds(self) -> &'static [EntityKind] {
        match self {
            Self::Client => &[Self::Programme, Self::Session],
            Self::Programme => &[Self::Session],
            Self::Session => &[Self::Sequence],
            Self::Sequence => &[Self::BreakOut],
            Self::BreakOut => &[],
        }
    }

    /// The relation that attaches a child of this kind to a parent of `parent` kind.
    pub fn relation_to(self, parent: EntityKind) -> Option<Relation> {
        self.relations()
            .iter()
            .copied()
            .find(|r| r.target() == parent)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A foreign-key relation, named by the stem used in `**<stem>_uuid**` markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    Client,
    Programme,
    Session,
    Sequence,
}

impl Relation {
    pub fn stem(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Programme => "programme",
            Self::Session => "session",
            Self::Sequence => "sequence",
        }
    }

    pub fn target(self) -> EntityKind {
        match self {
            Self::Client => EntityKind::Client,
            Self::Programme => EntityKind::Programme,
            Self::Session => EntityKind::Session,
            Self::Sequence => EntityKind::Sequence,
        }
    }

    /// Whether an entity cannot be stored without this relation set.
    pub fn is_required(self) -> bool {
        !matches!(self, Self::Programme)
    }

    /// Split a marker name like `session_uuid` into its relation and whether
    /// the `_id` spelling was used.
    pub fn from_marker(name: &str) -> Option<(Self, bool)> {
        let (stem, is_id) = if let Some(stem) = name.strip_suffix("_uuid") {
            (stem, false)
        } else if let Some(stem) = name.strip_suffix("_id") {
            (stem, true)
        } else {
            return None;
        };
        let relation = match stem {
            "client" => Self::Client,
            "programme" => Self::Programme,
            "session" => Self::Session,
            "sequence" => Self::Sequence,
            _ => return None,
        };
        Some((relation, is_id))
    }
}

macro_rules! text_fields {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $ty {
            pub const TEXT_FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];

            pub fn text_field(&self, name: &str) -> Option<&str> {
                match name {
                    $(stringify!($field) => Some(self.$field.as_str()),)*
                    _ => None,
                }
            }

            pub fn text_field_mut(&mut self, name: &str) -> Option<&mut String> {
                match name {
                    $(stringify!($field) => Some(&mut self.$field),)*
                    _ => None,
                }
            }
        }
    };
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub context: String,
    pub objectives: String,
    pub email: String,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}
text_fields!(Client { name, context, objectives, email });

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Programme {
    pub id: i64,
    pub uuid: Uuid,
    pub client_id: i64,
    pub name: String,
    pub description: String,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}
text_fields!(Programme { name, description });

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub uuid: Uuid,
    pub client_id: i64,
    pub programme_id: Option<i64>,
    pub title: String,
    pub context: String,
    pub objectives: String,
    pub inputs: String,
    pub outputs: String,
    pub participants: String,
    pub design_principles: String,
    pub deliverables: String,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}
text_fields!(Session {
    title,
    context,
    objectives,
    inputs,
    outputs,
    participants,
    design_principles,
    deliverables,
});

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: i64,
    pub uuid: Uuid,
    pub session_id: i64,
    pub title: String,
    pub objective: String,
    pub input_text: String,
    pub output_text: String,
    pub input_drive_url: String,
    pub output_drive_url: String,
    pub order: i64,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}
text_fields!(Sequence {
    title,
    objective,
    input_text,
    output_text,
    input_drive_url,
    output_drive_url,
});

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakOut {
    pub id: i64,
    pub uuid: Uuid,
    pub sequence_id: i64,
    pub title: String,
    pub description: String,
    pub objective: String,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}
text_fields!(BreakOut { title, description, objective });

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sponsor {
    pub id: i64,
    pub uuid: Uuid,
    pub client_id: i64,
    pub name: String,
    pub job_title: String,
    pub objectives: String,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}

/// One entity of any codec kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Client(Client),
    Programme(Programme),
    Session(Session),
    Sequence(Sequence),
    BreakOut(BreakOut),
}

impl Entity {
    /// A fresh, unsaved entity (`id == 0`, no parents set).
    pub fn blank(kind: EntityKind, uuid: Uuid) -> Self {
        match kind {
            EntityKind::Client => Self::Client(Client { uuid, ..Default::default() }),
            EntityKind::Programme => Self::Programme(Programme { uuid, ..Default::default() }),
            EntityKind::Session => Self::Session(Session { uuid, ..Default::default() }),
            EntityKind::Sequence => Self::Sequence(Sequence { uuid, ..Default::default() }),
            EntityKind::BreakOut => Self::BreakOut(BreakOut { uuid, ..Default::default() }),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Client(_) => EntityKind::Client,
            Self::Programme(_) => EntityKind::Programme,
            Self::Session(_) => EntityKind::Session,
            Self::Sequence(_) => EntityKind::Sequence,
            Self::BreakOut(_) => EntityKind::BreakOut,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Client(e) => e.id,
            Self::Programme(e) => e.id,
            Self::Session(e) => e.id,
            Self::Sequence(e) => e.id,
            Self::BreakOut(e) => e.id,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Client(e) => e.uuid,
            Self::Programme(e) => e.uuid,
            Self::Session(e) => e.uuid,
            Self::Sequence(e) => e.uuid,
            Self::BreakOut(e) => e.uuid,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Client(e) => e.status,
            Self::Programme(e) => e.status,
            Self::Session(e) => e.status,
            Self::Sequence(e) => e.status,
            Self::BreakOut(e) => e.status,
        }
    }

    pub fn set_status(&mut self, status: Status) {
        match self {
            Self::Client(e) => e.status = status,
            Self::Programme(e) => e.status = status,
            Self::Session(e) => e.status = status,
            Self::Sequence(e) => e.status = status,
            Self::BreakOut(e) => e.status = status,
        }
    }

    /// Current value of a scalar field, rendered as text.
    pub fn scalar(&self, name: &str) -> Option<String> {
        match self {
            Self::Client(e) => e.text_field(name).map(str::to_owned),
            Self::Programme(e) => e.text_field(name).map(str::to_owned),
            Self::Session(e) => e.text_field(name).map(str::to_owned),
            Self::Sequence(e) if name == "order" => Some(e.order.to_string()),
            Self::Sequence(e) => e.text_field(name).map(str::to_owned),
            Self::BreakOut(e) => e.text_field(name).map(str::to_owned),
        }
    }

    /// Scalar fields in render order.
    pub fn scalars(&self) -> Vec<(&'static str, String)> {
        self.kind()
            .scalar_fields()
            .iter()
            .filter_map(|name| self.scalar(name).map(|v| (*name, v)))
            .collect()
    }

    /// Overwrite a scalar field. Returns `Ok(false)` for names this kind
    /// does not have, `Err` for values that do not parse.
    pub fn set_scalar(&mut self, name: &str, value: &str) -> Result<bool, String> {
        let slot = match self {
            Self::Client(e) => e.text_field_mut(name),
            Self::Programme(e) => e.text_field_mut(name),
            Self::Session(e) => e.text_field_mut(name),
            Self::Sequence(e) if name == "order" => {
                e.order = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("order must be an integer, got {value:?}"))?;
                return Ok(true);
            }
            Self::Sequence(e) => e.text_field_mut(name),
            Self::BreakOut(e) => e.text_field_mut(name),
        };
        match slot {
            Some(slot) => {
                *slot = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Check the required field is non-empty.
    pub fn validate(&self) -> Result<(), String> {
        let field = self.kind().required_field();
        match self.scalar(field) {
            Some(v) if !v.trim().is_empty() => Ok(()),
            _ => Err(format!("{} requires a non-empty {field}", self.kind())),
        }
    }

    /// Stored id of the parent reached through `relation`, if set.
    pub fn parent(&self, relation: Relation) -> Option<i64> {
        let id = match (self, relation) {
            (Self::Programme(e), Relation::Client) => e.client_id,
            (Self::Session(e), Relation::Client) => e.client_id,
            (Self::Session(e), Relation::Programme) => return e.programme_id,
            (Self::Sequence(e), Relation::Session) => e.session_id,
            (Self::BreakOut(e), Relation::Sequence) => e.sequence_id,
            _ => return None,
        };
        (id > 0).then_some(id)
    }

    /// Set (or with `None`, clear) a parent. Returns false when this kind
    /// has no such relation.
    pub fn set_parent(&mut self, relation: Relation, id: Option<i64>) -> bool {
        match (self, relation) {
            (Self::Programme(e), Relation::Client) => e.client_id = id.unwrap_or(0),
            (Self::Session(e), Relation::Client) => e.client_id = id.unwrap_or(0),
            (Self::Session(e), Relation::Programme) => e.programme_id = id,
            (Self::Sequence(e), Relation::Session) => e.session_id = id.unwrap_or(0),
            (Self::BreakOut(e), Relation::Sequence) => e.sequence_id = id.unwrap_or(0),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_and_parse() {
        for status in [Status::Normal, Status::Deleted, Status::Archived] {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("gone".parse::<Status>().is_err());
    }

    #[test]
    fn kind_tags_are_case_insensitive() {
        assert_eq!(EntityKind::from_tag("BreakOut"), Some(EntityKind::BreakOut));
        assert_eq!(EntityKind::from_tag("breakout"), Some(EntityKind::BreakOut));
        assert_eq!(EntityKind::from_tag("PROGRAMME"), Some(EntityKind::Programme));
        assert_eq!(EntityKind::from_tag("Sponsor"), None);
    }

    #[test]
    fn kinds_are_ordered_parent_first() {
        let mut kinds = vec![EntityKind::BreakOut, EntityKind::Client, EntityKind::Sequence];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![EntityKind::Client, EntityKind::Sequence, EntityKind::BreakOut]
        );
    }

    #[test]
    fn relation_markers() {
        assert_eq!(Relation::from_marker("client_uuid"), Some((Relation::Client, false)));
        assert_eq!(Relation::from_marker("session_id"), Some((Relation::Session, true)));
        assert_eq!(Relation::from_marker("order"), None);
        assert_eq!(Relation::from_marker("sponsor_id"), None);
    }

    #[test]
    fn session_relations() {
        assert_eq!(
            EntityKind::Session.relation_to(EntityKind::Programme),
            Some(Relation::Programme)
        );
        assert_eq!(EntityKind::Session.relation_to(EntityKind::Sequence), None);
        assert!(!Relation::Programme.is_required());
    }

    #[test]
    fn sequence_order_is_a_scalar() {
        let mut seq = Entity::blank(EntityKind::Sequence, Uuid::now_v7());
        assert!(seq.set_scalar("order", "3").unwrap());
        assert_eq!(seq.scalar("order").as_deref(), Some("3"));
        assert!(seq.set_scalar("order", "third").is_err());
        assert!(!seq.set_scalar("name", "x").unwrap());
    }

    #[test]
    fn scalars_follow_render_order() {
        let mut client = Entity::blank(EntityKind::Client, Uuid::now_v7());
        client.set_scalar("objectives", "grow").unwrap();
        client.set_scalar("name", "Acme").unwrap();
        let names: Vec<_> = client.scalars().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["name", "context", "objectives", "email"]);
    }

    #[test]
    fn validate_requires_title() {
        let mut breakout = Entity::blank(EntityKind::BreakOut, Uuid::now_v7());
        assert!(breakout.validate().is_err());
        breakout.set_scalar("title", "  ").unwrap();
        assert!(breakout.validate().is_err());
        breakout.set_scalar("title", "Group A").unwrap();
        assert!(breakout.validate().is_ok());
    }

    #[test]
    fn parents_round_trip() {
        let mut session = Entity::blank(EntityKind::Session, Uuid::now_v7());
        assert_eq!(session.parent(Relation::Client), None);
        assert!(session.set_parent(Relation::Client, Some(4)));
        assert!(session.set_parent(Relation::Programme, Some(9)));
        assert_eq!(session.parent(Relation::Client), Some(4));
        assert_eq!(session.parent(Relation::Programme), Some(9));
        assert!(!session.set_parent(Relation::Sequence, Some(1)));
    }
}
