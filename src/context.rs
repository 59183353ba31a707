use crate::config::Config;
use crate::cv::CvClient;
use crate::metrics::Metrics;
use crate::providers::{build_http_client, LlmBackend};
use crate::registry::{Capability, Registry};
use crate::storage::{ConversationStore, MilvusStore};
use crate::types::ProviderListResponse;
use crate::Result;
use std::time::Duration;
use tracing::{info, warn};

/// LLM 与 Milvus 出站请求的超时
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

/// 进程级共享状态：启动时构建一次，之后只读，通过 `Arc` 交给每个请求
#[derive(Debug)]
pub struct AppContext {
    pub llm: Registry<LlmBackend>,
    pub databases: Registry<ConversationStore>,
    pub vectors: Registry<MilvusStore>,
    pub cv: CvClient,
    pub metrics: Metrics,
    /// ChatRequest 未指定 db_type 时使用
    pub default_database: String,
    pub max_upload_bytes: u64,
}

impl AppContext {
    /// 空注册表，供测试按需填充
    pub fn new(cv: CvClient) -> Self {
        Self {
            llm: Registry::new(Capability::Llm),
            databases: Registry::new(Capability::Database),
            vectors: Registry::new(Capability::VectorStore),
            cv,
            metrics: Metrics::new(),
            default_database: "document".to_string(),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }

    /// 按配置创建全部后端。连不上的存储后端记录警告后跳过，不阻止启动
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut ctx = Self::new(CvClient::new(&config.cv_service)?);
        ctx.default_database = config.default_database.clone();
        ctx.max_upload_bytes = config.max_upload_bytes;

        let client = build_http_client(BACKEND_TIMEOUT)?;

        for provider in &config.llm_providers {
            let backend = LlmBackend::from_config(provider, client.clone());
            info!(
                "注册 LLM 后端: {} ({}, 默认模型 {})",
                provider.name,
                backend.vendor(),
                backend.default_model()
            );
            ctx.llm.register(&provider.name, backend)?;
        }

        for database in &config.databases {
            match ConversationStore::connect(&database.backend).await {
                Ok(store) => {
                    info!("注册数据库: {} ({})", database.name, store.kind());
                    ctx.databases.register(&database.name, store)?;
                }
                Err(e) => warn!("数据库 {} 初始化失败，已跳过: {}", database.name, e),
            }
        }

        for (alias, target) in &config.database_aliases {
            // 目标未注册，或别名本身就是已配置的数据库
            if !ctx.databases.contains(target) || ctx.databases.contains(alias) {
                continue;
            }
            match ctx.databases.alias(alias, target) {
                Ok(()) => info!("数据库别名: {} -> {}", alias, target),
                Err(e) => warn!("数据库别名 {} 已忽略: {}", alias, e),
            }
        }

        for vector in &config.vector_stores {
            let store = MilvusStore::new(client.clone(), vector);
            match store.ensure_collection().await {
                Ok(()) => {
                    info!("注册向量库: {} (集合 {})", vector.name, store.collection());
                    ctx.vectors.register(&vector.name, store)?;
                }
                Err(e) => warn!("向量库 {} 初始化失败，已跳过: {}", vector.name, e),
            }
        }

        if ctx.llm.is_empty() {
            warn!("没有可用的 LLM 后端");
        }
        if !ctx.databases.contains(&ctx.default_database) {
            warn!("默认数据库 {} 不可用", ctx.default_database);
        }

        Ok(ctx)
    }

    pub fn provider_list(&self) -> ProviderListResponse {
        ProviderListResponse {
            llm_providers: self.llm.keys(),
            database_providers: self.databases.keys(),
            vector_stores: self.vectors.keys(),
        }
    }
}
