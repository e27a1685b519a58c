//! Cache trait 定义

use async_trait::async_trait;
use taa_common::{CacheValue, MAX_STORE_KEY_LENGTH, MAX_VALUE_SIZE};
use thiserror::Error;

/// 被拒绝的写入
///
/// 后端暂时不可用不是错误：实现内部重试后记录日志并当作软失败处理。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Value for '{key}' is {size} bytes, the limit is {max}")]
    ValueTooLarge { key: String, size: usize, max: usize },

    #[error("Key is {len} bytes, the limit is {max}")]
    KeyTooLong { len: usize, max: usize },
}

/// 写入前检查键和负载大小，超限直接拒绝而不是截断
///
/// `key` 是调用方给出的键，实现自己添加的命名空间前缀不计入长度。
pub fn check_limits(key: &str, payload_len: usize) -> Result<(), StoreError> {
    if key.len() > MAX_STORE_KEY_LENGTH {
        return Err(StoreError::KeyTooLong {
            len: key.len(),
            max: MAX_STORE_KEY_LENGTH,
        });
    }
    if payload_len > MAX_VALUE_SIZE {
        return Err(StoreError::ValueTooLarge {
            key: key.to_string(),
            size: payload_len,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// 带类型标签的共享缓存
///
/// 实现必须可以并发使用。读操作在后端故障时返回 `None`（软未命中），
/// 调用方把它当作普通的未命中处理。
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> Option<CacheValue>;

    /// 写入缓存值
    async fn set(&self, key: &str, value: &CacheValue) -> Result<(), StoreError>;

    /// 原子递增计数器，不存在时从 0 开始
    async fn increment(&self, key: &str, delta: i64) -> Option<i64>;

    /// 删除键，返回键是否存在
    async fn delete(&self, key: &str) -> bool;

    /// 列出命名空间内的所有键（管理工具使用）
    async fn keys(&self) -> Vec<String>;
}
