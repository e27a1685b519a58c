//! 上游健康检查
//!
//! 与刷新编排相同的缓存形式，固定键 `ping`，有效期以秒计。过期时尝试
//! 打开并立即关闭一个上游连接。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taa_common::{
    CacheValue, ISPYB_PING_COUNTER_KEY, PING_CACHE_KEY, PING_COUNTER_KEY, PING_NOT_OK, PING_OK,
};
use taa_ports::{CacheStore, UpstreamProbe};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::entry;

pub struct AvailabilityProbe {
    store: Arc<dyn CacheStore>,
    probe: Option<Arc<dyn UpstreamProbe>>,
    ttl: Duration,
    gate: Mutex<()>,
}

impl AvailabilityProbe {
    /// 没有上游时健康状态始终为 `NOT OK`
    pub fn new(
        store: Arc<dyn CacheStore>,
        probe: Option<Arc<dyn UpstreamProbe>>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            probe,
            ttl,
            gate: Mutex::new(()),
        }
    }

    /// 当前健康状态：`OK` 或 `NOT OK`
    pub async fn status(self: &Arc<Self>) -> String {
        entry::bump(&*self.store, PING_COUNTER_KEY).await;

        if let Some(status) = self.cached().await {
            return status;
        }

        let this = Arc::clone(self);
        match tokio::spawn(async move { this.check().await }).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Health check task failed");
                PING_NOT_OK.to_string()
            }
        }
    }

    async fn check(&self) -> String {
        let _gate = self.gate.lock().await;
        if let Some(status) = self.cached().await {
            return status;
        }

        let healthy = match &self.probe {
            Some(probe) => {
                entry::bump(&*self.store, ISPYB_PING_COUNTER_KEY).await;
                probe.probe().await
            }
            None => false,
        };
        let status = if healthy { PING_OK } else { PING_NOT_OK };
        info!(status, "Upstream health checked");

        entry::write(
            &*self.store,
            PING_CACHE_KEY,
            CacheValue::Text(status.to_string()),
            Utc::now(),
        )
        .await;
        status.to_string()
    }

    async fn cached(&self) -> Option<String> {
        let (value, refreshed_at) = entry::read(&*self.store, PING_CACHE_KEY).await;
        let status = value?.as_text()?.to_string();
        let refreshed_at = refreshed_at?;
        entry::is_fresh(refreshed_at, self.ttl, Utc::now()).then_some(status)
    }
}
