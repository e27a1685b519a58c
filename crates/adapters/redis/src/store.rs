//! Redis 共享缓存实现

use std::future::Future;

use async_trait::async_trait;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use taa_common::{CacheValue, ValueTag, with_conditional_retry};
use taa_ports::{CacheStore, StoreError, check_limits};
use taa_telemetry::record_store_error;
use tracing::{debug, warn};

use crate::config::RedisConfig;
use crate::connection::{create_connection_manager, is_transient};
use crate::encoding::{TAG_FIELD, VALUE_FIELD, decode_fields};

/// 每次 SCAN 返回的建议数量
const SCAN_COUNT: usize = 500;

/// Redis 共享缓存
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    config: RedisConfig,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, config: RedisConfig) -> Self {
        Self { conn, config }
    }

    /// 建立连接并创建存储
    pub async fn connect(config: RedisConfig) -> RedisResult<Self> {
        let conn = create_connection_manager(&config).await?;
        debug!(url = %config.url, "Connected to Redis");
        Ok(Self::new(conn, config))
    }

    /// 执行一次命令，暂时性故障重试，最终失败时返回 None
    async fn run<T, F, Fut>(&self, operation: &'static str, mut command: F) -> Option<T>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let result = with_conditional_retry(
            &self.config.retry,
            operation,
            || command(self.conn.clone()),
            is_transient,
        )
        .await;

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(operation, error = %e, "Redis operation failed, treating as a miss");
                record_store_error(operation);
                None
            }
        }
    }

    /// 后端统计信息（INFO）
    pub async fn server_info(&self) -> Option<String> {
        self.run("info", |mut conn| async move {
            redis::cmd("INFO").query_async::<String>(&mut conn).await
        })
        .await
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        let key = self.config.prefixed_key(key);
        let (tag, payload) = self
            .run("get", |mut conn| {
                let key = key.clone();
                async move {
                    redis::cmd("HMGET")
                        .arg(&key)
                        .arg(TAG_FIELD)
                        .arg(VALUE_FIELD)
                        .query_async::<(Option<String>, Option<String>)>(&mut conn)
                        .await
                }
            })
            .await?;

        match decode_fields(tag, payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cache entry, treating as a miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &CacheValue) -> Result<(), StoreError> {
        let (tag, payload) = value.encode();
        check_limits(key, payload.len())?;
        let key = self.config.prefixed_key(key);

        let tag = tag.as_u8();
        let stored = self
            .run("set", |mut conn| {
                let key = key.clone();
                let payload = payload.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("DEL")
                        .arg(&key)
                        .ignore()
                        .cmd("HSET")
                        .arg(&key)
                        .arg(TAG_FIELD)
                        .arg(tag)
                        .arg(VALUE_FIELD)
                        .arg(payload)
                        .ignore()
                        .query_async::<()>(&mut conn)
                        .await
                }
            })
            .await;

        if stored.is_none() {
            debug!(key = %key, "Cache write skipped, store unavailable");
        }
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Option<i64> {
        let key = self.config.prefixed_key(key);
        let (value,) = self
            .run("increment", |mut conn| {
                let key = key.clone();
                async move {
                    redis::pipe()
                        .atomic()
                        .cmd("HSETNX")
                        .arg(&key)
                        .arg(TAG_FIELD)
                        .arg(ValueTag::Integer.as_u8())
                        .ignore()
                        .cmd("HINCRBY")
                        .arg(&key)
                        .arg(VALUE_FIELD)
                        .arg(delta)
                        .query_async::<(i64,)>(&mut conn)
                        .await
                }
            })
            .await?;
        Some(value)
    }

    async fn delete(&self, key: &str) -> bool {
        let key = self.config.prefixed_key(key);
        self.run("delete", |mut conn| {
            let key = key.clone();
            async move { redis::cmd("DEL").arg(&key).query_async::<i64>(&mut conn).await }
        })
        .await
        .is_some_and(|deleted| deleted > 0)
    }

    async fn keys(&self) -> Vec<String> {
        let pattern = self.config.scan_pattern();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let page = self
                .run("scan", |mut conn| {
                    let pattern = pattern.clone();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_COUNT)
                            .query_async::<(u64, Vec<String>)>(&mut conn)
                            .await
                    }
                })
                .await;

            let Some((next, batch)) = page else {
                break;
            };
            keys.extend(
                batch
                    .iter()
                    .filter_map(|key| self.config.strip_prefix(key))
                    .map(str::to_string),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        keys
    }
}
