use crate::error::RelayGateError;
use crate::Result;
use std::fmt;

/// 注册表所承载的能力类别，决定错误信息里的称呼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Llm,
    Database,
    VectorStore,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Capability::Llm => "Provider",
            Capability::Database => "Database",
            Capability::VectorStore => "Vector store",
        };
        f.write_str(label)
    }
}

/// 按字符串 key 选择后端的注册表
///
/// 启动时填充，之后只读；保留注册顺序供 `keys()` 使用。
/// 别名只参与查找，不出现在 `keys()` 中。
#[derive(Debug)]
pub struct Registry<T> {
    capability: Capability,
    entries: Vec<(String, T)>,
    aliases: Vec<(String, String)>,
}

impl<T> Registry<T> {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            entries: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// 注册后端；同一个 key 重复注册视为配置错误
    pub fn register(&mut self, key: impl Into<String>, backend: T) -> Result<()> {
        let key = key.into();
        if self.contains(&key) {
            return Err(RelayGateError::config(format!(
                "{} '{}' registered twice",
                self.capability, key
            )));
        }
        self.entries.push((key, backend));
        Ok(())
    }

    /// 为已注册的 key 增加别名
    pub fn alias(&mut self, alias: impl Into<String>, target: &str) -> Result<()> {
        let alias = alias.into();
        if self.contains(&alias) {
            return Err(RelayGateError::config(format!(
                "{} alias '{}' conflicts with an existing key",
                self.capability, alias
            )));
        }
        if self.find(target).is_none() {
            return Err(RelayGateError::config(format!(
                "{} alias '{}' points to unknown key '{}'",
                self.capability, alias, target
            )));
        }
        self.aliases.push((alias, target.to_string()));
        Ok(())
    }

    /// 根据 key 或别名查找后端，不存在时返回 ProviderNotConfigured
    pub fn resolve(&self, key: &str) -> Result<&T> {
        let target = self
            .aliases
            .iter()
            .find(|(alias, _)| alias == key)
            .map_or(key, |(_, target)| target.as_str());

        self.find(target)
            .ok_or_else(|| RelayGateError::ProviderNotConfigured {
                capability: self.capability,
                key: key.to_string(),
            })
    }

    fn find(&self, key: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, backend)| backend)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
            || self.aliases.iter().any(|(alias, _)| alias == key)
    }

    /// 已配置的 key，按注册顺序
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered() {
        let mut registry = Registry::new(Capability::Llm);
        registry.register("openai", 1).unwrap();
        registry.register("gemini", 2).unwrap();

        assert_eq!(*registry.resolve("openai").unwrap(), 1);
        assert_eq!(*registry.resolve("gemini").unwrap(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_missing() {
        let registry: Registry<u8> = Registry::new(Capability::Database);
        let err = registry.resolve("mongodb").unwrap_err();
        assert!(matches!(
            err,
            RelayGateError::ProviderNotConfigured {
                capability: Capability::Database,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Database mongodb not available");
    }

    #[test]
    fn test_keys_keep_registration_order() {
        let mut registry = Registry::new(Capability::Llm);
        registry.register("openai", ()).unwrap();
        registry.register("gemini", ()).unwrap();
        registry.register("azure", ()).unwrap();

        assert_eq!(registry.keys(), vec!["openai", "gemini", "azure"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new(Capability::VectorStore);
        registry.register("milvus", 1).unwrap();
        let err = registry.register("milvus", 2).unwrap_err();
        assert!(matches!(err, RelayGateError::ConfigError(_)));
        assert_eq!(*registry.resolve("milvus").unwrap(), 1);
    }

    #[test]
    fn test_empty_registry() {
        let registry: Registry<()> = Registry::new(Capability::Llm);
        assert!(registry.is_empty());
        assert!(registry.keys().is_empty());
        assert!(!registry.contains("openai"));
    }

    #[test]
    fn test_alias_resolves_to_target() {
        let mut registry = Registry::new(Capability::Database);
        registry.register("document", 7).unwrap();
        registry.alias("mongodb", "document").unwrap();

        assert_eq!(*registry.resolve("mongodb").unwrap(), 7);
        assert!(registry.contains("mongodb"));
        assert_eq!(registry.keys(), vec!["document"]);

        assert!(registry.alias("archive", "missing").is_err());
        assert!(registry.alias("document", "document").is_err());
        assert!(registry.register("mongodb", 8).is_err());
    }
}
