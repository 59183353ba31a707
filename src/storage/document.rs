use crate::error::RelayGateError;
use crate::types::{ConversationRecord, Message};
use crate::Result;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use uuid::Uuid;

const DOCS_TREE: &str = "conversations";
const USER_INDEX_TREE: &str = "conversations_by_user";
const SEQ_LEN: usize = std::mem::size_of::<u64>();

/// 基于 sled 的文档型会话存储
///
/// 文档以 UUID 为键存在 `conversations` 树中；`conversations_by_user`
/// 以 `user_id \0 seq(big-endian)` 为键，值为文档 id，逆序扫描即得最新会话。
#[derive(Debug, Clone)]
pub struct DocumentStore {
    db: Db,
    docs: Tree,
    by_user: Tree,
}

impl DocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// 进程退出即删除的临时库
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        let docs = db.open_tree(DOCS_TREE)?;
        let by_user = db.open_tree(USER_INDEX_TREE)?;
        Ok(Self { db, docs, by_user })
    }

    pub async fn save_conversation(
        &self,
        user_id: &str,
        provider: &str,
        messages: &[Message],
    ) -> Result<String> {
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            messages: messages.to_vec(),
            created_at: Utc::now(),
        };

        let payload = serde_json::to_vec(&record)
            .map_err(|e| RelayGateError::internal(format!("serialize document: {}", e)))?;
        let seq = self.db.generate_id()?;

        let key = index_key(user_id, seq);

        // 文档和索引在同一事务中写入
        (&self.docs, &self.by_user)
            .transaction(|(docs, by_user)| {
                docs.insert(record.id.as_bytes(), payload.as_slice())?;
                by_user.insert(key.as_slice(), record.id.as_bytes())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => RelayGateError::from(e),
                TransactionError::Abort(()) => RelayGateError::internal("document write aborted"),
            })?;
        self.db.flush_async().await?;

        Ok(record.id)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        self.docs
            .get(id.as_bytes())?
            .map(|raw| decode_document(&raw))
            .transpose()
    }

    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>> {
        let prefix = user_prefix(user_id);
        let mut records = Vec::new();

        for entry in self.by_user.scan_prefix(&prefix).rev() {
            if records.len() >= limit as usize {
                break;
            }
            let (key, doc_id) = entry?;
            // 以 `user_id\0` 开头但更长的 user_id 也会落在前缀里
            if key.len() != prefix.len() + SEQ_LEN {
                continue;
            }
            if let Some(raw) = self.docs.get(&doc_id)? {
                let record = decode_document(&raw)?;
                if record.user_id == user_id {
                    records.push(record);
                }
            }
        }

        Ok(records)
    }
}

fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(0);
    prefix
}

fn index_key(user_id: &str, seq: u64) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn decode_document(raw: &[u8]) -> Result<ConversationRecord> {
    serde_json::from_slice(raw)
        .map_err(|e| RelayGateError::internal(format!("invalid stored document: {}", e)))
}
