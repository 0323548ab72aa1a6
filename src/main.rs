//! # flowai
//!
//! Command-line front end: exports hierarchy subtrees as markdown, applies
//! edited documents back, and exposes the few direct repository actions the
//! codec does not cover.

#![deny(unsafe_code)]

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use uuid::Uuid;

use flowai_core::{Entity, Status};
use flowai_markdown::{parse_kind, parse_uuid, ExportOptions, ImportOptions, MarkdownCodec};
use flowai_settings::FlowSettings;
use flowai_store::{entities, ConversationRepo, Database, SequenceRepo, SessionRepo};
use flowai_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Session-design hierarchy tooling.
#[derive(Parser, Debug)]
#[command(name = "flowai", about = "Session-design hierarchy tooling")]
struct Cli {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Settings file to load instead of `~/.flowai/settings.json`.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Default)]
struct ExportFlags {
    /// Only the root entity, without descendants.
    #[arg(long)]
    no_related: bool,

    /// Prefix the document with anchor lines for the root's ancestors.
    #[arg(long)]
    ancestors: bool,

    /// Heading depth of the outermost line.
    #[arg(long)]
    level: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export the subtree rooted at an entity, by uuid.
    Export {
        uuid: String,
        /// Entity type, when known (`Client`, `Session`, ...).
        #[arg(long)]
        kind: Option<String>,
        #[command(flatten)]
        flags: ExportFlags,
    },
    /// Export the subtree rooted at an entity, by type and numeric id.
    ExportId {
        kind: String,
        id: i64,
        #[command(flatten)]
        flags: ExportFlags,
    },
    /// Apply a document read from FILE, or stdin when FILE is `-` or omitted.
    Import {
        file: Option<PathBuf>,
        /// Upsert only; never soft-delete omitted children.
        #[arg(long)]
        no_reconcile: bool,
    },
    /// Move a sequence to a new position within its session.
    Reorder { uuid: String, order: i64 },
    /// Archive any entity by uuid.
    Archive { uuid: String },
    /// Print a session with its live sequences and breakouts as JSON.
    Summary { uuid: String },
    /// List persisted conversations, newest first.
    Conversations {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

fn load_settings(cli: &Cli) -> Result<FlowSettings> {
    let mut settings = match &cli.settings {
        Some(path) => flowai_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => flowai_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(db) = &cli.db {
        settings.database.path = db.clone();
    }
    Ok(settings)
}

fn telemetry_config(settings: &FlowSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    TelemetryConfig {
        log_level: parse_level(&logging.level).unwrap_or(Level::INFO),
        module_levels: logging
            .modules
            .iter()
            .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
            .collect(),
        json: logging.json,
    }
}

fn export_options(settings: &FlowSettings, flags: &ExportFlags) -> ExportOptions {
    let markdown = &settings.markdown;
    ExportOptions {
        export_related: markdown.export_related && !flags.no_related,
        include_ancestors: markdown.include_ancestors || flags.ancestors,
        start_level: flags.level.unwrap_or(markdown.start_level).max(1),
    }
}

fn read_document(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read document from stdin")?;
            Ok(text)
        }
    }
}

fn archive(db: &Database, uuid: &Uuid) -> Result<Entity> {
    let entity = db
        .with_conn(|conn| entities::find_any_by_uuid(conn, uuid))?
        .with_context(|| format!("No entity with uuid {uuid}"))?;
    match &entity {
        // Keeps the remaining sequences of the session dense.
        Entity::Sequence(sequence) => {
            SequenceRepo::new(db.clone()).set_status(sequence.id, Status::Archived)?;
        }
        other => {
            db.with_conn(|conn| entities::set_status(conn, other.kind(), other.id(), Status::Archived))?;
        }
    }
    info!(kind = %entity.kind(), uuid = %uuid, "entity archived");
    Ok(entity)
}

fn run(cli: &Cli, settings: &FlowSettings, db: &Database, out: &mut impl Write) -> Result<()> {
    let codec = MarkdownCodec::new(db.clone());
    match &cli.command {
        Command::Export { uuid, kind, flags } => {
            let uuid = parse_uuid(uuid)?;
            let options = export_options(settings, flags);
            let text = match kind {
                Some(kind) => codec.export(parse_kind(kind)?, &uuid, &options)?,
                None => codec.export_uuid(&uuid, &options)?,
            };
            writeln!(out, "{text}")?;
        }
        Command::ExportId { kind, id, flags } => {
            let options = export_options(settings, flags);
            let text = codec.export_by_id(parse_kind(kind)?, *id, &options)?;
            writeln!(out, "{text}")?;
        }
        Command::Import { file, no_reconcile } => {
            let text = read_document(file.as_ref())?;
            let options = ImportOptions {
                reconcile: settings.markdown.reconcile && !no_reconcile,
            };
            let report = codec.import(&text, &options)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        Command::Reorder { uuid, order } => {
            let uuid = parse_uuid(uuid)?;
            let sequence = SequenceRepo::new(db.clone()).reorder(&uuid, *order)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&sequence)?)?;
        }
        Command::Archive { uuid } => {
            let entity = archive(db, &parse_uuid(uuid)?)?;
            writeln!(out, "archived {} {}", entity.kind(), entity.uuid())?;
        }
        Command::Summary { uuid } => {
            let sessions = SessionRepo::new(db.clone());
            let session = sessions.get_by_uuid(&parse_uuid(uuid)?)?;
            let summary = sessions.summary(session.id)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        }
        Command::Conversations { limit } => {
            let rows = ConversationRepo::new(db.clone()).list(*limit)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_telemetry(&telemetry_config(&settings))?;

    let db_path = &settings.database.path;
    let db = Database::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(&cli, &settings, &db, &mut out)
}

#[cfg(test)]
mod tests {
    use flowai_core::{Client, Sequence, Session};
    use flowai_store::ClientRepo;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("flowai").chain(args.iter().copied())).unwrap()
    }

    fn exec(db: &Database, args: &[&str]) -> Result<String> {
        let mut out = Vec::new();
        run(&cli(args), &FlowSettings::default(), db, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    fn seeded() -> (Database, Session, Vec<Sequence>) {
        let db = Database::in_memory().unwrap();
        let client = ClientRepo::new(db.clone())
            .create(Client { name: "Acme".into(), ..Default::default() })
            .unwrap();
        let session = SessionRepo::new(db.clone())
            .create(Session {
                client_id: client.id,
                title: "Kickoff".into(),
                ..Default::default()
            })
            .unwrap();
        let repo = SequenceRepo::new(db.clone());
        let sequences = ["Intro", "Pairs", "Wrap"]
            .iter()
            .map(|title| {
                repo.create(Sequence {
                    session_id: session.id,
                    title: (*title).into(),
                    ..Default::default()
                })
                .unwrap()
            })
            .collect();
        (db, session, sequences)
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let parsed = cli(&["export", "abc", "--db", "/tmp/x.db", "--no-related", "--level", "2"]);
        assert_eq!(parsed.db, Some(PathBuf::from("/tmp/x.db")));
        match parsed.command {
            Command::Export { flags, kind, .. } => {
                assert!(flags.no_related);
                assert_eq!(flags.level, Some(2));
                assert_eq!(kind, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_settings() {
        let mut settings = FlowSettings::default();
        settings.markdown.start_level = 3;
        let options = export_options(&settings, &ExportFlags::default());
        assert_eq!(options.start_level, 3);
        assert!(options.export_related);

        let flags = ExportFlags { no_related: true, ancestors: true, level: Some(0) };
        let options = export_options(&settings, &flags);
        assert!(!options.export_related);
        assert!(options.include_ancestors);
        assert_eq!(options.start_level, 1);
    }

    #[test]
    fn telemetry_config_ignores_bad_levels() {
        let mut settings = FlowSettings::default();
        settings.logging.level = "loud".into();
        let _ = settings.logging.modules.insert("flowai_store".into(), "debug".into());
        let _ = settings.logging.modules.insert("flowai_markdown".into(), "chatty".into());
        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.module_levels, vec![("flowai_store".to_string(), Level::DEBUG)]);
    }

    #[test]
    fn export_then_import_file() {
        let (db, session, _) = seeded();
        let text = exec(&db, &["export", &session.uuid.to_string(), "--kind", "Session"]).unwrap();
        assert!(text.contains("Kickoff"));
        assert!(text.contains("Wrap"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kickoff.md");
        std::fs::write(&path, &text).unwrap();
        let report = exec(&db, &["import", path.to_str().unwrap()]).unwrap();
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["processed"].as_array().unwrap().len(), 4);
        assert!(report["deleted"].as_array().unwrap().is_empty());
    }

    #[test]
    fn export_id_matches_export_by_uuid() {
        let (db, session, _) = seeded();
        let by_id = exec(&db, &["export-id", "session", &session.id.to_string()]).unwrap();
        let by_uuid = exec(&db, &["export", &session.uuid.to_string()]).unwrap();
        assert_eq!(by_id, by_uuid);
    }

    #[test]
    fn export_rejects_bad_input() {
        let (db, session, _) = seeded();
        assert!(exec(&db, &["export", "not-a-uuid"]).is_err());
        assert!(exec(&db, &["export", &session.uuid.to_string(), "--kind", "Workshop"]).is_err());
    }

    #[test]
    fn reorder_moves_sequence() {
        let (db, session, sequences) = seeded();
        let _ = exec(&db, &["reorder", &sequences[2].uuid.to_string(), "1"]).unwrap();
        let titles: Vec<String> = SequenceRepo::new(db)
            .list_for_session(session.id, Some(Status::Normal))
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Wrap", "Intro", "Pairs"]);
    }

    #[test]
    fn archive_sequence_keeps_order_dense() {
        let (db, session, sequences) = seeded();
        let out = exec(&db, &["archive", &sequences[0].uuid.to_string()]).unwrap();
        assert!(out.starts_with("archived"));

        let repo = SequenceRepo::new(db);
        assert_eq!(repo.get(sequences[0].id).unwrap().status, Status::Archived);
        let orders: Vec<i64> = repo
            .list_for_session(session.id, Some(Status::Normal))
            .unwrap()
            .into_iter()
            .map(|s| s.order)
            .collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn archive_session_hides_it_from_export() {
        let (db, session, _) = seeded();
        let _ = exec(&db, &["archive", &session.uuid.to_string()]).unwrap();
        assert_eq!(
            SessionRepo::new(db.clone()).get(session.id).unwrap().status,
            Status::Archived
        );
        assert!(exec(&db, &["export", &session.uuid.to_string()]).is_err());
    }

    #[test]
    fn archive_unknown_uuid_fails() {
        let (db, _, _) = seeded();
        assert!(exec(&db, &["archive", &Uuid::now_v7().to_string()]).is_err());
    }

    #[test]
    fn summary_is_json_in_order() {
        let (db, session, sequences) = seeded();
        SequenceRepo::new(db.clone())
            .set_status(sequences[1].id, Status::Deleted)
            .unwrap();
        let out = exec(&db, &["summary", &session.uuid.to_string()]).unwrap();
        let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(summary["title"], "Kickoff");
        assert_eq!(
            summary["sequences"],
            serde_json::json!([
                {"title": "Intro", "objective": "", "order": 1, "breakouts": []},
                {"title": "Wrap", "objective": "", "order": 2, "breakouts": []},
            ])
        );
        assert!(exec(&db, &["summary", &Uuid::now_v7().to_string()]).is_err());
    }

    #[test]
    fn conversations_list_is_json() {
        let (db, _, _) = seeded();
        let out = exec(&db, &["conversations", "--limit", "5"]).unwrap();
        let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(rows, serde_json::json!([]));
    }
}
