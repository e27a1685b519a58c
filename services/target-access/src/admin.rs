//! 管理工具的缓存统计

use std::fmt;

use chrono::{DateTime, Utc};
use taa_common::{
    ISPYB_PING_COUNTER_KEY, ISPYB_QUERY_COUNTER_KEY, Identity, PING_CACHE_KEY, PING_COUNTER_KEY,
    QUERY_COUNTER_KEY, is_identity_key, timestamp_key,
};
use taa_ports::CacheStore;

/// 缓存命中减少的上游访问比例，四舍五入到整数百分比
pub fn reduction_percent(requests: i64, upstream: i64) -> i64 {
    if requests <= 0 {
        return 0;
    }
    (100.0 * (requests - upstream) as f64 / requests as f64).round() as i64
}

/// 一个身份的缓存摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUser {
    pub username: String,
    pub tas: usize,
    pub collected: Option<DateTime<Utc>>,
}

impl fmt::Display for CachedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collected = self
            .collected
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        write!(
            f,
            "username='{}' #tas={} collected={}",
            self.username, self.tas, collected
        )
    }
}

/// 缓存统计
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub ping_status: Option<String>,
    pub ping_count: i64,
    pub ispyb_ping_count: i64,
    pub query_count: i64,
    pub ispyb_query_count: i64,
    pub users: Vec<CachedUser>,
}

impl CacheStats {
    /// 从存储收集统计
    pub async fn collect(store: &dyn CacheStore) -> Self {
        let counter = |key: &'static str| async move {
            store
                .get(key)
                .await
                .and_then(|value| value.as_integer())
                .unwrap_or(0)
        };

        let mut users = Vec::new();
        for key in store.keys().await {
            if !is_identity_key(&key) {
                continue;
            }
            let Ok(identity) = Identity::from_encoded(&key) else {
                continue;
            };
            let tas = store
                .get(&key)
                .await
                .and_then(|value| value.into_token_set())
                .map(|set| set.len())
                .unwrap_or(0);
            let collected = store
                .get(&timestamp_key(&key))
                .await
                .and_then(|value| value.as_instant());
            users.push(CachedUser {
                username: identity.username().to_string(),
                tas,
                collected,
            });
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));

        Self {
            ping_status: store
                .get(PING_CACHE_KEY)
                .await
                .and_then(|value| value.as_text().map(str::to_string)),
            ping_count: counter(PING_COUNTER_KEY).await,
            ispyb_ping_count: counter(ISPYB_PING_COUNTER_KEY).await,
            query_count: counter(QUERY_COUNTER_KEY).await,
            ispyb_query_count: counter(ISPYB_QUERY_COUNTER_KEY).await,
            users,
        }
    }

    pub fn total_tas(&self) -> usize {
        self.users.iter().map(|user| user.tas).sum()
    }

    pub fn max_tas(&self) -> usize {
        self.users.iter().map(|user| user.tas).max().unwrap_or(0)
    }

    pub fn avg_tas(&self) -> f64 {
        if self.users.is_empty() {
            0.0
        } else {
            self.total_tas() as f64 / self.users.len() as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ping_status='{}'",
            self.ping_status.as_deref().unwrap_or("Unknown")
        )?;
        writeln!(
            f,
            "ping_count={}/{} (reduction={}%)",
            self.ispyb_ping_count,
            self.ping_count,
            reduction_percent(self.ping_count, self.ispyb_ping_count)
        )?;
        writeln!(
            f,
            "query_count={}/{} (reduction={}%)",
            self.ispyb_query_count,
            self.query_count,
            reduction_percent(self.query_count, self.ispyb_query_count)
        )?;
        writeln!(f, "---")?;
        for user in &self.users {
            writeln!(f, "{}", user)?;
        }
        if !self.users.is_empty() {
            writeln!(f, "---")?;
        }
        writeln!(f, "total usernames={}", self.users.len())?;
        writeln!(f, "total tas={}", self.total_tas())?;
        writeln!(f, "max tas={}", self.max_tas())?;
        write!(f, "avg tas={}", self.avg_tas())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taa_bootstrap::MemoryStore;
    use taa_common::{AccessTokenSet, CacheValue};

    #[test]
    fn test_reduction_percent() {
        assert_eq!(reduction_percent(0, 0), 0);
        assert_eq!(reduction_percent(10, 10), 0);
        assert_eq!(reduction_percent(10, 1), 90);
        assert_eq!(reduction_percent(3, 1), 67);
        assert_eq!(reduction_percent(8, 1), 88);
    }

    #[tokio::test]
    async fn test_collect_skips_reserved_keys() {
        let store = MemoryStore::new();
        let set: AccessTokenSet = ["lb1", "lb1-1"].into_iter().collect();
        store.set("dave%20lister", &set.into()).await.unwrap();
        store
            .set(&timestamp_key("dave%20lister"), &CacheValue::Instant(Utc::now()))
            .await
            .unwrap();
        store.set("alice", &AccessTokenSet::new().into()).await.unwrap();
        store.set(PING_CACHE_KEY, &CacheValue::Text("OK".into())).await.unwrap();
        store.increment(QUERY_COUNTER_KEY, 4).await;
        store.increment(ISPYB_QUERY_COUNTER_KEY, 1).await;

        let stats = CacheStats::collect(&store).await;

        assert_eq!(stats.users.len(), 2);
        assert_eq!(stats.users[0].username, "alice");
        assert_eq!(stats.users[1].username, "dave lister");
        assert_eq!(stats.users[1].tas, 2);
        assert!(stats.users[1].collected.is_some());
        assert_eq!(stats.total_tas(), 2);
        assert_eq!(stats.max_tas(), 2);
        assert_eq!(stats.avg_tas(), 1.0);

        let report = stats.to_string();
        assert!(report.contains("ping_status='OK'"));
        assert!(report.contains("query_count=1/4 (reduction=75%)"));
        assert!(report.contains("username='dave lister' #tas=2"));
    }
}
