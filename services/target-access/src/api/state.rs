//! 路由共享状态

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::{ExposeSecret, Secret};

use crate::application::{AvailabilityProbe, RefreshOrchestrator};

/// 查询密钥请求头
pub const QUERY_KEY_HEADER: &str = "X-TAAQueryKey";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub availability: Arc<AvailabilityProbe>,
    query_key: Option<Arc<Secret<String>>>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>, availability: Arc<AvailabilityProbe>) -> Self {
        Self {
            orchestrator,
            availability,
            query_key: None,
            metrics: None,
        }
    }

    /// 要求请求携带匹配的查询密钥
    pub fn with_query_key(mut self, key: Secret<String>) -> Self {
        self.query_key = Some(Arc::new(key));
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// 未配置密钥时放行所有请求
    pub fn query_key_matches(&self, provided: Option<&str>) -> bool {
        match &self.query_key {
            None => true,
            Some(expected) => provided == Some(expected.expose_secret().as_str()),
        }
    }

    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}
