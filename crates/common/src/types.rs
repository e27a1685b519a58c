//! 通用类型定义
//!
//! 身份（用户登录名）及其派生缓存键、访问令牌集合、保留键命名空间。

use std::collections::BTreeSet;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 时间戳键前缀，`timestamp-<value key>` 记录值的采集时间
pub const TIMESTAMP_KEY_PREFIX: &str = "timestamp-";

/// 上游健康状态键
pub const PING_CACHE_KEY: &str = "ping";
/// 旧版本使用的健康状态键，保留以免与用户名冲突
pub const LEGACY_PING_CACHE_KEY: &str = "ispyb-ping";

/// 计数器
pub const PING_COUNTER_KEY: &str = "ping-counter";
pub const ISPYB_PING_COUNTER_KEY: &str = "ispyb-ping-counter";
pub const QUERY_COUNTER_KEY: &str = "query-counter";
pub const ISPYB_QUERY_COUNTER_KEY: &str = "ispyb-query-counter";

/// 不能作为用户名使用的键
pub const RESERVED_KEYS: [&str; 6] = [
    PING_CACHE_KEY,
    LEGACY_PING_CACHE_KEY,
    PING_COUNTER_KEY,
    ISPYB_PING_COUNTER_KEY,
    QUERY_COUNTER_KEY,
    ISPYB_QUERY_COUNTER_KEY,
];

/// 用户名编码后的最大长度（字节），在请求边界校验
pub const MAX_KEY_LENGTH: usize = 250;

/// 存储键的最大长度（字节），不含存储自身的命名空间前缀
///
/// 最长的键是合法用户名对应的时间戳键。
pub const MAX_STORE_KEY_LENGTH: usize = MAX_KEY_LENGTH + TIMESTAMP_KEY_PREFIX.len();

/// 健康状态字符串
pub const PING_OK: &str = "OK";
pub const PING_NOT_OK: &str = "NOT OK";

/// 返回某个键对应的时间戳键
pub fn timestamp_key(key: &str) -> String {
    format!("{}{}", TIMESTAMP_KEY_PREFIX, key)
}

/// 已编码的键是否可以作为用户值键
pub fn is_identity_key(encoded: &str) -> bool {
    !RESERVED_KEYS.contains(&encoded) && !encoded.starts_with(TIMESTAMP_KEY_PREFIX)
}

/// 身份校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Username must not be empty")]
    Empty,

    #[error("'{0}' is a reserved key")]
    Reserved(String),

    #[error("Username must not begin with 'timestamp-'")]
    TimestampPrefix,

    #[error("Encoded username is {len} characters, the limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("Key '{0}' is not valid URL encoding")]
    InvalidEncoding(String),
}

/// 用户身份
///
/// 只在请求期间存在，持久化的是其派生的缓存条目。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{username}")]
pub struct Identity {
    username: String,
    encoded: String,
}

impl Identity {
    /// 从原始（已解码的）用户名创建，并进行边界校验
    pub fn parse(username: &str) -> Result<Self, IdentityError> {
        if username.is_empty() {
            return Err(IdentityError::Empty);
        }
        let encoded = urlencoding::encode(username).into_owned();
        Self::validate_encoded(&encoded)?;

        Ok(Self {
            username: username.to_string(),
            encoded,
        })
    }

    /// 从存储中的值键还原
    pub fn from_encoded(encoded: &str) -> Result<Self, IdentityError> {
        let username = urlencoding::decode(encoded)
            .map_err(|_| IdentityError::InvalidEncoding(encoded.to_string()))?
            .into_owned();
        Self::parse(&username)
    }

    fn validate_encoded(encoded: &str) -> Result<(), IdentityError> {
        if RESERVED_KEYS.contains(&encoded) {
            return Err(IdentityError::Reserved(encoded.to_string()));
        }
        if encoded.starts_with(TIMESTAMP_KEY_PREFIX) {
            return Err(IdentityError::TimestampPrefix);
        }
        if encoded.len() > MAX_KEY_LENGTH {
            return Err(IdentityError::TooLong {
                len: encoded.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// 值键（URL 编码后的用户名）
    pub fn value_key(&self) -> &str {
        &self.encoded
    }

    /// 时间戳键
    pub fn timestamp_key(&self) -> String {
        timestamp_key(&self.encoded)
    }
}

/// 访问令牌集合
///
/// 元素形如 `lb12345`（提案）或 `lb12345-2`（访问），只关心成员，不关心顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessTokenSet(BTreeSet<String>);

impl AccessTokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入令牌，返回是否为新元素
    pub fn insert(&mut self, token: impl Into<String>) -> bool {
        self.0.insert(token.into())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// 排序后的令牌列表
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for AccessTokenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for AccessTokenSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}
