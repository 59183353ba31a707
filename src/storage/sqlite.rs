use crate::error::RelayGateError;
use crate::storage::{decode_messages, encode_messages, parse_row_id};
use crate::types::{ConversationRecord, Message};
use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    provider    TEXT NOT NULL,
    messages    TEXT NOT NULL,
    created_at  TEXT NOT NULL
)"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_conversations_user_created ON conversations (user_id, created_at)";

/// SQLite 会话存储
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // 内存库只在单个连接内可见，连接不能被回收
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn save_conversation(
        &self,
        user_id: &str,
        provider: &str,
        messages: &[Message],
    ) -> Result<String> {
        let result = sqlx::query(
            r#"INSERT INTO conversations (user_id, provider, messages, created_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(encode_messages(messages)?)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid().to_string())
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let row_id = parse_row_id(id)?;
        let row = sqlx::query(
            "SELECT id, user_id, provider, messages, created_at FROM conversations WHERE id = ?",
        )
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            r#"SELECT id, user_id, provider, messages, created_at
               FROM conversations
               WHERE user_id = ?
               ORDER BY created_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

// 固定宽度，保证按字符串排序即按时间排序
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RelayGateError::internal(format!("invalid stored datetime: {}", e)))
}

fn record_from_row(row: &SqliteRow) -> Result<ConversationRecord> {
    let id: i64 = row.try_get("id")?;
    let messages: String = row.try_get("messages")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ConversationRecord {
        id: id.to_string(),
        user_id: row.try_get("user_id")?,
        provider: row.try_get("provider")?,
        messages: decode_messages(&messages)?,
        created_at: parse_datetime(&created_at)?,
    })
}
