//! 带类型标签的缓存值
//!
//! 每个值与一个类型标签一起存储，读取方只依据标签选择解码器，
//! 不需要外部 schema，也不会执行存储的数据。

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::types::AccessTokenSet;

/// 单个值的最大字节数
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// 类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    Text = 1,
    Integer = 2,
    Instant = 3,
    TokenSet = 4,
}

impl ValueTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ValueTag {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Text),
            2 => Ok(Self::Integer),
            3 => Ok(Self::Instant),
            4 => Ok(Self::TokenSet),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

/// 解码错误
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unknown value tag {0}")]
    UnknownTag(u8),

    #[error("Invalid integer payload: {0}")]
    Integer(#[from] std::num::ParseIntError),

    #[error("Invalid instant payload: {0}")]
    Instant(#[from] chrono::ParseError),

    #[error("Invalid token set payload: {0}")]
    TokenSet(#[from] serde_json::Error),
}

/// 缓存值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Text(String),
    Integer(i64),
    Instant(DateTime<Utc>),
    TokenSet(AccessTokenSet),
}

impl CacheValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Text(_) => ValueTag::Text,
            Self::Integer(_) => ValueTag::Integer,
            Self::Instant(_) => ValueTag::Instant,
            Self::TokenSet(_) => ValueTag::TokenSet,
        }
    }

    /// 编码为 (标签, 负载)
    pub fn encode(&self) -> (ValueTag, String) {
        let payload = match self {
            Self::Text(text) => text.clone(),
            Self::Integer(n) => n.to_string(),
            Self::Instant(at) => at.to_rfc3339_opts(SecondsFormat::Micros, true),
            // BTreeSet 序列化为有序数组，不会失败
            Self::TokenSet(set) => {
                serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
            }
        };
        (self.tag(), payload)
    }

    /// 按标签解码
    pub fn decode(tag: ValueTag, payload: &str) -> Result<Self, CodecError> {
        Ok(match tag {
            ValueTag::Text => Self::Text(payload.to_string()),
            ValueTag::Integer => Self::Integer(payload.trim().parse()?),
            ValueTag::Instant => {
                Self::Instant(DateTime::parse_from_rfc3339(payload)?.with_timezone(&Utc))
            }
            ValueTag::TokenSet => Self::TokenSet(serde_json::from_str(payload)?),
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Instant(at) => Some(*at),
            _ => None,
        }
    }

    pub fn into_token_set(self) -> Option<AccessTokenSet> {
        match self {
            Self::TokenSet(set) => Some(set),
            _ => None,
        }
    }
}

impl From<AccessTokenSet> for CacheValue {
    fn from(set: AccessTokenSet) -> Self {
        Self::TokenSet(set)
    }
}

impl From<DateTime<Utc>> for CacheValue {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Instant(at)
    }
}
