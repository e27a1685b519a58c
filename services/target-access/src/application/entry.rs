//! 带时间戳的缓存条目
//!
//! 值键保存内容，`timestamp-<值键>` 保存采集时间。

use std::time::Duration;

use chrono::{DateTime, Utc};
use taa_common::{CacheValue, timestamp_key};
use taa_ports::CacheStore;
use tracing::warn;

/// 条目是否在有效期内
pub(crate) fn is_fresh(refreshed_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match (now - refreshed_at).to_std() {
        Ok(age) => age <= ttl,
        // 时间戳在未来（时钟偏差），视为新鲜
        Err(_) => true,
    }
}

/// 读取值和时间戳
pub(crate) async fn read(
    store: &dyn CacheStore,
    key: &str,
) -> (Option<CacheValue>, Option<DateTime<Utc>>) {
    let value = store.get(key).await;
    let refreshed_at = store
        .get(&timestamp_key(key))
        .await
        .and_then(|value| value.as_instant());
    (value, refreshed_at)
}

/// 写入值和时间戳，写入失败只记录日志
pub(crate) async fn write(store: &dyn CacheStore, key: &str, value: CacheValue, now: DateTime<Utc>) {
    if let Err(e) = store.set(key, &value).await {
        warn!(key, error = %e, "Cache value rejected");
    }
    if let Err(e) = store.set(&timestamp_key(key), &CacheValue::Instant(now)).await {
        warn!(key, error = %e, "Cache timestamp rejected");
    }
}

/// 递增计数器，存储不可用时忽略
pub(crate) async fn bump(store: &dyn CacheStore, counter: &str) {
    if store.increment(counter, 1).await.is_none() {
        warn!(counter, "Counter increment failed");
    }
}
