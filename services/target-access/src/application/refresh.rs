//! 刷新编排
//!
//! 先查缓存，过期或缺失时向上游刷新并写回。上游失败时保留旧值（没有旧值
//! 则为空集合），时间戳照常前移，因此故障的上游每个有效期内只被访问一次。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taa_common::{
    AccessTokenSet, CacheValue, ISPYB_QUERY_COUNTER_KEY, Identity, QUERY_COUNTER_KEY,
};
use taa_ports::{AccessSource, CacheStore};
use taa_telemetry::record_cache_lookup;
use tracing::{debug, info, warn};

use super::entry;
use super::locks::KeyedLocks;

/// 缓存中某个身份的当前状态
struct CachedAccess {
    tokens: Option<AccessTokenSet>,
    fresh: bool,
}

pub struct RefreshOrchestrator {
    store: Arc<dyn CacheStore>,
    source: Option<Arc<dyn AccessSource>>,
    ttl: Duration,
    locks: KeyedLocks,
}

impl RefreshOrchestrator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        source: Option<Arc<dyn AccessSource>>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            source,
            ttl,
            locks: KeyedLocks::new(),
        }
    }

    /// 查询某个身份的访问令牌
    ///
    /// 永远不会失败，最坏情况下返回空集合。刷新在独立任务中执行，
    /// 调用方放弃等待不会中断刷新，结果仍会写入缓存。
    pub async fn lookup(self: &Arc<Self>, identity: &Identity) -> AccessTokenSet {
        entry::bump(&*self.store, QUERY_COUNTER_KEY).await;

        let cached = self.read(identity).await;
        if cached.fresh {
            if let Some(tokens) = cached.tokens {
                record_cache_lookup("hit");
                debug!(identity = %identity, "Cache hit");
                return tokens;
            }
        }

        record_cache_lookup("refresh");
        let this = Arc::clone(self);
        let task_identity = identity.clone();
        let refresh = tokio::spawn(async move { this.refresh(&task_identity).await });

        match refresh.await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Refresh task failed");
                cached.tokens.unwrap_or_default()
            }
        }
    }

    async fn refresh(&self, identity: &Identity) -> AccessTokenSet {
        let _guard = self.locks.lock(identity.value_key()).await;

        // 等锁期间可能已被其他调用方刷新
        let cached = self.read(identity).await;
        if cached.fresh {
            if let Some(tokens) = cached.tokens {
                debug!(identity = %identity, "Refreshed by a concurrent caller");
                return tokens;
            }
        }

        let fetched = match &self.source {
            Some(source) => {
                entry::bump(&*self.store, ISPYB_QUERY_COUNTER_KEY).await;
                source.fetch(identity).await
            }
            None => None,
        };

        let tokens = match fetched {
            Some(tokens) => {
                info!(identity = %identity, count = tokens.len(), "Access tokens refreshed");
                tokens
            }
            None => {
                warn!(
                    identity = %identity,
                    has_cached = cached.tokens.is_some(),
                    "Upstream unavailable, keeping last known access tokens"
                );
                cached.tokens.unwrap_or_default()
            }
        };

        entry::write(
            &*self.store,
            identity.value_key(),
            CacheValue::TokenSet(tokens.clone()),
            Utc::now(),
        )
        .await;
        tokens
    }

    async fn read(&self, identity: &Identity) -> CachedAccess {
        let (value, refreshed_at) = entry::read(&*self.store, identity.value_key()).await;
        let tokens = value.and_then(CacheValue::into_token_set);
        let fresh = tokens.is_some()
            && refreshed_at.is_some_and(|at| entry::is_fresh(at, self.ttl, Utc::now()));
        CachedAccess { tokens, fresh }
    }
}
