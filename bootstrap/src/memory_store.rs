//! 进程内缓存存储
//!
//! 用于开发环境和测试，与 Redis 实现遵守相同的键和值大小限制。

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use taa_common::CacheValue;
use taa_ports::{CacheStore, StoreError, check_limits};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        self.entries.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: &CacheValue) -> Result<(), StoreError> {
        let (_, payload) = value.encode();
        check_limits(key, payload.len())?;
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Option<i64> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert(CacheValue::Integer(0));
        // 非整数值不能递增，与 Redis 的 HINCRBY 行为一致
        let CacheValue::Integer(current) = entry else {
            return None;
        };
        *current += delta;
        Some(*current)
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}
