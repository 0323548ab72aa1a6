use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use flowai_core::{ProviderKind, TokenUsage};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, query_all, query_opt};

const TABLE: &str = "conversations";
const COLUMNS: &str = "id, uuid, provider, user_input, ai_response, prompt_tokens, \
     completion_tokens, total_tokens, created_at, updated_at";

/// One prompt/response exchange with a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: i64,
    pub uuid: Uuid,
    pub provider: ProviderKind,
    pub user_input: String,
    pub ai_response: String,
    pub tokens: TokenUsage,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let provider: String = row_helpers::get(row, 2, TABLE, "provider")?;
    Ok(ConversationRow {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        uuid: row_helpers::get_uuid(row, 1, TABLE)?,
        provider: row_helpers::parse_enum(&provider, TABLE, "provider")?,
        user_input: row_helpers::get(row, 3, TABLE, "user_input")?,
        ai_response: row_helpers::get(row, 4, TABLE, "ai_response")?,
        tokens: TokenUsage {
            prompt_tokens: row_helpers::get(row, 5, TABLE, "prompt_tokens")?,
            completion_tokens: row_helpers::get(row, 6, TABLE, "completion_tokens")?,
            total_tokens: row_helpers::get(row, 7, TABLE, "total_tokens")?,
        },
        created_at: row_helpers::get(row, 8, TABLE, "created_at")?,
        updated_at: row_helpers::get(row, 9, TABLE, "updated_at")?,
    })
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, user_input, ai_response), fields(provider = %provider))]
    pub fn create(
        &self,
        provider: ProviderKind,
        user_input: &str,
        ai_response: &str,
        tokens: TokenUsage,
    ) -> Result<ConversationRow, StoreError> {
        let uuid = Uuid::now_v7();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (uuid, provider, user_input, ai_response, prompt_tokens,
                                            completion_tokens, total_tokens, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    uuid.to_string(),
                    provider.to_string(),
                    user_input,
                    ai_response,
                    tokens.prompt_tokens,
                    tokens.completion_tokens,
                    tokens.total_tokens,
                    now,
                    now,
                ],
            )?;
            Ok(ConversationRow {
                id: conn.last_insert_rowid(),
                uuid,
                provider,
                user_input: user_input.to_string(),
                ai_response: ai_response.to_string(),
                tokens,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Result<ConversationRow, StoreError> {
        self.db
            .with_conn(|conn| {
                let sql = format!("SELECT {COLUMNS} FROM conversations WHERE uuid = ?1");
                query_opt(conn, &sql, [uuid.to_string()], row_to_conversation)
            })?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {uuid}")))
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: u32) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM conversations ORDER BY created_at DESC, id DESC LIMIT ?1"
            );
            query_all(conn, &sql, [limit], row_to_conversation)
        })
    }
}
