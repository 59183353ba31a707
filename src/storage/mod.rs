//! 会话持久化与向量检索后端。
//!
//! 关系型（PostgreSQL、SQLite）和文档型（sled）存储共享同一套会话操作，
//! 通过 [`ConversationStore`] 的变体分发。

pub mod document;
pub mod postgres;
pub mod sqlite;
pub mod vector;

use crate::config::DatabaseBackendConfig;
use crate::error::RelayGateError;
use crate::types::{ConversationRecord, Message};
use crate::Result;

pub use document::DocumentStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use vector::MilvusStore;

/// 列表查询的默认条数
pub const DEFAULT_LIST_LIMIT: u32 = 10;

/// 已配置的会话存储（封闭集合）
#[derive(Debug, Clone)]
pub enum ConversationStore {
    Postgres(PostgresStore),
    Sqlite(SqliteStore),
    Document(DocumentStore),
}

impl ConversationStore {
    /// 按配置建立连接并确保表结构存在
    pub async fn connect(config: &DatabaseBackendConfig) -> Result<Self> {
        let store = match config {
            DatabaseBackendConfig::Postgres {
                url,
                max_connections,
            } => ConversationStore::Postgres(PostgresStore::connect(url, *max_connections).await?),
            DatabaseBackendConfig::Sqlite { url } => {
                ConversationStore::Sqlite(SqliteStore::connect(url).await?)
            }
            DatabaseBackendConfig::Document { path } => {
                ConversationStore::Document(DocumentStore::open(path)?)
            }
        };
        Ok(store)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConversationStore::Postgres(_) => "postgres",
            ConversationStore::Sqlite(_) => "sqlite",
            ConversationStore::Document(_) => "document",
        }
    }

    /// 保存会话，返回新记录的 id
    pub async fn save_conversation(
        &self,
        user_id: &str,
        provider: &str,
        messages: &[Message],
    ) -> Result<String> {
        match self {
            ConversationStore::Postgres(s) => s.save_conversation(user_id, provider, messages).await,
            ConversationStore::Sqlite(s) => s.save_conversation(user_id, provider, messages).await,
            ConversationStore::Document(s) => s.save_conversation(user_id, provider, messages).await,
        }
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        match self {
            ConversationStore::Postgres(s) => s.get_conversation(id).await,
            ConversationStore::Sqlite(s) => s.get_conversation(id).await,
            ConversationStore::Document(s) => s.get_conversation(id).await,
        }
    }

    /// 最多返回 limit 条，按创建时间倒序
    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>> {
        match self {
            ConversationStore::Postgres(s) => s.list_conversations(user_id, limit).await,
            ConversationStore::Sqlite(s) => s.list_conversations(user_id, limit).await,
            ConversationStore::Document(s) => s.list_conversations(user_id, limit).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn encode_messages(messages: &[Message]) -> Result<String> {
    serde_json::to_string(messages)
        .map_err(|e| RelayGateError::internal(format!("serialize messages: {}", e)))
}

pub(crate) fn decode_messages(raw: &str) -> Result<Vec<Message>> {
    serde_json::from_str(raw)
        .map_err(|e| RelayGateError::internal(format!("invalid stored messages JSON: {}", e)))
}

/// 关系型存储的 id 是整数，非数字直接视为错误输入
pub(crate) fn parse_row_id(id: &str) -> Result<i64> {
    id.parse::<i64>()
        .map_err(|_| RelayGateError::bad_request(format!("Invalid conversation id: {}", id)))
}
