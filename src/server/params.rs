use crate::error::RelayGateError;
use crate::Result;
use std::collections::HashMap;
use std::str::FromStr;

/// 查询串或表单中的标量参数，同名参数取第一个
#[derive(Debug, Default, Clone)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                params.insert(key.into_owned(), value.into_owned());
            }
        }
        params
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.values.entry(key).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| RelayGateError::bad_request(format!("Missing required parameter: {}", key)))
    }

    /// 解析为指定类型；缺失时返回 None，格式错误时返回 BadRequest
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                RelayGateError::bad_request(format!("Invalid value for {}: {:?}", key, raw))
            }),
        }
    }
}
