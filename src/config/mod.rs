use crate::error::RelayGateError;
use crate::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::warn;

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern"));

/// 列表型配置段：引用了未设置环境变量的条目会被跳过
const OPTIONAL_SECTIONS: [&str; 3] = ["llm_providers", "databases", "vector_stores"];

/// 主配置结构
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm_providers: Vec<LlmProviderConfig>,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub vector_stores: Vec<VectorStoreConfig>,
    #[serde(default)]
    pub cv_service: CvServiceConfig,
    /// ChatRequest 未指定 db_type 时使用
    #[serde(default = "default_database_name")]
    pub default_database: String,
    /// 数据库别名 -> 实际名称；默认把旧客户端使用的 `mongodb` 指向 `document`
    #[serde(default = "default_database_aliases")]
    pub database_aliases: BTreeMap<String, String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_providers: Vec::new(),
            databases: Vec::new(),
            vector_stores: Vec::new(),
            cv_service: CvServiceConfig::default(),
            default_database: default_database_name(),
            database_aliases: default_database_aliases(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmKind {
    Openai,
    Azure,
    Gemini,
}

/// LLM 提供商配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmProviderConfig {
    pub name: String,
    pub kind: LlmKind,
    pub api_key: String,
    /// 为空时使用各厂商官方地址；Azure 必填（资源 endpoint）
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub default_model: Option<String>,
    /// 仅 Azure 使用
    #[serde(default)]
    pub api_version: Option<String>,
}

/// 会话存储配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(flatten)]
    pub backend: DatabaseBackendConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatabaseBackendConfig {
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
    Sqlite {
        url: String,
    },
    Document {
        path: String,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Milvus,
}

/// 向量库配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    pub name: String,
    pub kind: VectorKind,
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub token: Option<String>,
}

/// CV 服务配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CvServiceConfig {
    #[serde(default = "default_cv_url")]
    pub base_url: String,
    #[serde(default = "default_cv_timeout")]
    pub timeout_secs: u64,
    /// 允许调用方引用的服务端路径前缀；为空时只拒绝 `..`
    #[serde(default)]
    pub allowed_path_roots: Vec<String>,
}

impl Default for CvServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_cv_url(),
            timeout_secs: default_cv_timeout(),
            allowed_path_roots: Vec::new(),
        }
    }
}

fn default_database_name() -> String {
    "document".to_string()
}

fn default_database_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([("mongodb".to_string(), "document".to_string())])
}

fn default_max_upload_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_max_connections() -> u32 {
    5
}

fn default_collection() -> String {
    "embeddings".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_cv_url() -> String {
    "http://cv-service:8001".to_string()
}

fn default_cv_timeout() -> u64 {
    300
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_with(&content, |name| std::env::var(name).ok())
    }

    /// 解析 YAML 并用给定的查找函数展开 ${VAR}
    pub fn from_yaml_with<F>(content: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut root: Value = serde_yaml::from_str(content)?;
        if root.is_null() {
            root = Value::Mapping(Default::default());
        }

        let mapping = root
            .as_mapping_mut()
            .ok_or_else(|| RelayGateError::config("configuration root must be a mapping"))?;

        for (key, value) in mapping.iter_mut() {
            let section = key.as_str().unwrap_or_default();
            if OPTIONAL_SECTIONS.contains(&section) {
                if let Value::Sequence(entries) = value {
                    entries.retain_mut(|entry| match expand_value(entry, &lookup) {
                        Ok(()) => true,
                        Err(var) => {
                            let name = entry
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("<unnamed>");
                            warn!("{} 条目 '{}' 已跳过: 环境变量 {} 未设置", section, name, var);
                            false
                        }
                    });
                }
            } else {
                expand_value(value, &lookup).map_err(|var| {
                    RelayGateError::config(format!("Environment variable not found: {}", var))
                })?;
            }
        }

        let config: Config = serde_yaml::from_value(root)?;
        config.validate()?;
        Ok(config)
    }

    /// 未提供配置文件时，从传统的环境变量组装配置
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(api_key) = get("OPENAI_API_KEY") {
            config.llm_providers.push(LlmProviderConfig {
                name: "openai".to_string(),
                kind: LlmKind::Openai,
                api_key,
                api_base: get("OPENAI_API_BASE").unwrap_or_default(),
                default_model: None,
                api_version: None,
            });
        }

        if let Some(api_key) = get("GEMINI_API_KEY") {
            config.llm_providers.push(LlmProviderConfig {
                name: "gemini".to_string(),
                kind: LlmKind::Gemini,
                api_key,
                api_base: String::new(),
                default_model: None,
                api_version: None,
            });
        }

        if let (Some(endpoint), Some(api_key)) =
            (get("AZURE_OPENAI_ENDPOINT"), get("AZURE_OPENAI_API_KEY"))
        {
            config.llm_providers.push(LlmProviderConfig {
                name: "azure".to_string(),
                kind: LlmKind::Azure,
                api_key,
                api_base: endpoint,
                default_model: None,
                api_version: get("AZURE_OPENAI_API_VERSION"),
            });
        }

        if let (Some(host), Some(user), Some(password), Some(db)) = (
            get("POSTGRES_HOST"),
            get("POSTGRES_USER"),
            get("POSTGRES_PASSWORD"),
            get("POSTGRES_DB"),
        ) {
            let port = get("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string());
            config.databases.push(DatabaseConfig {
                name: "postgres".to_string(),
                backend: DatabaseBackendConfig::Postgres {
                    url: format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, db),
                    max_connections: default_max_connections(),
                },
            });
        }

        if let Some(url) = get("SQLITE_URL") {
            config.databases.push(DatabaseConfig {
                name: "sqlite".to_string(),
                backend: DatabaseBackendConfig::Sqlite { url },
            });
        }

        if let Some(path) = get("DOCUMENT_STORE_PATH") {
            config.databases.push(DatabaseConfig {
                name: "document".to_string(),
                backend: DatabaseBackendConfig::Document { path },
            });
        } else if get("MONGODB_URL").is_some() {
            warn!("MONGODB_URL 不再使用，请通过 DOCUMENT_STORE_PATH 配置 document 存储（mongodb 作为其别名）");
        }

        if let Some(url) = get("MILVUS_URL") {
            config.vector_stores.push(VectorStoreConfig {
                name: "milvus".to_string(),
                kind: VectorKind::Milvus,
                url,
                collection: get("MILVUS_COLLECTION").unwrap_or_else(default_collection),
                dimension: default_dimension(),
                token: get("MILVUS_TOKEN"),
            });
        }

        if let Some(url) = get("CV_SERVICE_URL") {
            config.cv_service.base_url = url;
        }
        if let Some(name) = get("DEFAULT_DATABASE") {
            config.default_database = name;
        }

        config.validate()?;
        Ok(config)
    }

    /// 验证配置
    fn validate(&self) -> Result<()> {
        check_unique_names("llm_providers", self.llm_providers.iter().map(|p| p.name.as_str()))?;
        check_unique_names("databases", self.databases.iter().map(|d| d.name.as_str()))?;
        check_unique_names("vector_stores", self.vector_stores.iter().map(|v| v.name.as_str()))?;

        for provider in &self.llm_providers {
            if provider.api_key.is_empty() {
                return Err(RelayGateError::config(format!(
                    "api_key must not be empty for provider '{}'",
                    provider.name
                )));
            }
            if provider.kind == LlmKind::Azure && provider.api_base.is_empty() {
                return Err(RelayGateError::config(format!(
                    "azure provider '{}' requires api_base (resource endpoint)",
                    provider.name
                )));
            }
        }

        for store in &self.vector_stores {
            if store.dimension == 0 {
                return Err(RelayGateError::config(format!(
                    "vector store '{}' dimension must be greater than 0",
                    store.name
                )));
            }
        }

        if self.cv_service.base_url.is_empty() {
            return Err(RelayGateError::config("cv_service.base_url must not be empty"));
        }

        Ok(())
    }
}

fn check_unique_names<'a>(section: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(RelayGateError::config(format!("{}: name must not be empty", section)));
        }
        if !seen.insert(name) {
            return Err(RelayGateError::config(format!(
                "{}: duplicate name '{}'",
                section, name
            )));
        }
    }
    Ok(())
}

/// 递归展开字符串中的 ${VAR}；返回第一个缺失的变量名
fn expand_value<F>(value: &mut Value, lookup: &F) -> std::result::Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            *s = replace_env_vars(s, lookup)?;
            Ok(())
        }
        Value::Sequence(items) => items.iter_mut().try_for_each(|item| expand_value(item, lookup)),
        Value::Mapping(map) => map
            .iter_mut()
            .try_for_each(|(_, item)| expand_value(item, lookup)),
        _ => Ok(()),
    }
}

/// 替换字符串中的环境变量 ${VAR}
fn replace_env_vars<F>(content: &str, lookup: &F) -> std::result::Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let replaced = ENV_VAR.replace_all(content, |caps: &Captures| match lookup(&caps[1]) {
        Some(value) => value,
        None => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });

    match missing {
        Some(var) => Err(var),
        None => Ok(replaced.into_owned()),
    }
}
