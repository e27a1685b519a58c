//! 基础设施资源管理
//!
//! 按配置创建共享缓存和上游适配器

use std::sync::Arc;

use taa_adapter_ispyb::{IspybSettings, RemoteFetcher, TunnelProbe};
use taa_adapter_redis::{RedisConfig, RedisStore};
use taa_config::{AppConfig, StoreConfig, StoreLocation};
use taa_ports::{AccessSource, CacheStore, UpstreamProbe};
use thiserror::Error;
use tracing::{info, warn};

use crate::memory_store::MemoryStore;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to connect to Redis at {url}: {source}")]
    Redis {
        url: String,
        #[source]
        source: redis::RedisError,
    },
}

/// 创建共享缓存
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn CacheStore>, BootstrapError> {
    match config.location() {
        StoreLocation::Memory => {
            warn!("Using in-process cache store, entries are not shared between instances");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreLocation::Redis(url) => Ok(Arc::new(connect_redis(config, &url).await?)),
    }
}

/// 创建 Redis 缓存（管理工具需要 INFO 等 Redis 专有操作）
pub async fn connect_redis(config: &StoreConfig, url: &str) -> Result<RedisStore, BootstrapError> {
    let mut redis_config = RedisConfig::new(url)
        .with_connection_timeout(config.connect_timeout())
        .with_response_timeout(config.response_timeout())
        .with_retry(config.retry_attempts, config.retry_delay());
    if let Some(prefix) = &config.key_prefix {
        redis_config = redis_config.with_key_prefix(prefix);
    }

    let store = RedisStore::connect(redis_config)
        .await
        .map_err(|source| BootstrapError::Redis {
            url: url.to_string(),
            source,
        })?;
    info!(url = %url, "Redis cache store connected");
    Ok(store)
}

/// 基础设施资源容器
pub struct Infrastructure {
    config: AppConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Option<Arc<RemoteFetcher>>,
    probe: Option<Arc<dyn UpstreamProbe>>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源
    ///
    /// 没有上游配置时不创建数据源和健康检查，查询只返回缓存内容。
    pub async fn from_config(config: AppConfig) -> Result<Self, BootstrapError> {
        let store = connect_store(&config.store).await?;

        let (fetcher, probe) = match (&config.ispyb, &config.ssh) {
            (Some(ispyb), Some(ssh)) => {
                let settings = IspybSettings::from_config(ispyb, ssh);
                let fetcher = Arc::new(RemoteFetcher::from_settings(&settings));
                let probe: Arc<dyn UpstreamProbe> =
                    Arc::new(TunnelProbe::new(fetcher.connector().clone()));
                info!(
                    host = %ispyb.host,
                    via = %ssh.host,
                    policy = ?settings.policy,
                    "ISPyB upstream configured"
                );
                (Some(fetcher), Some(probe))
            }
            _ => {
                warn!("ISPyB upstream not configured, serving cached entries only");
                (None, None)
            }
        };

        Ok(Self {
            config,
            store,
            fetcher,
            probe,
        })
    }

    /// 获取应用配置
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取共享缓存
    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }

    /// 获取访问令牌数据源（如果配置了上游）
    pub fn access_source(&self) -> Option<Arc<dyn AccessSource>> {
        self.fetcher
            .clone()
            .map(|fetcher| fetcher as Arc<dyn AccessSource>)
    }

    /// 获取上游健康检查（如果配置了上游）
    pub fn upstream_probe(&self) -> Option<Arc<dyn UpstreamProbe>> {
        self.probe.clone()
    }

    /// 释放上游连接
    pub async fn shutdown(&self) {
        if let Some(fetcher) = &self.fetcher {
            fetcher.shutdown().await;
        }
    }
}
