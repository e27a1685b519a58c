//! telemetry - 可观测性库
//!
//! tracing 初始化和 Prometheus 指标。指标名集中定义在这里，
//! 各适配器通过下面的记录函数上报。

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const TUNNELS_STARTED: &str = "taa_tunnels_started_total";
pub const CONNECTION_ATTEMPTS_FAILED: &str = "taa_ispyb_connection_attempts_failed_total";
pub const CONNECTIONS: &str = "taa_ispyb_connections_total";
pub const CONNECTION_FAILURES: &str = "taa_ispyb_connection_failures_total";
pub const CACHE_LOOKUPS: &str = "taa_cache_lookups_total";
pub const STORE_ERRORS: &str = "taa_store_errors_total";
pub const UPSTREAM_FETCHES: &str = "taa_upstream_fetches_total";

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// 新建 SSH 隧道
pub fn record_tunnel_started() {
    counter!(TUNNELS_STARTED).increment(1);
}

/// 数据库握手失败一次
pub fn record_connection_attempt_failed() {
    counter!(CONNECTION_ATTEMPTS_FAILED).increment(1);
}

/// 数据库会话建立成功
pub fn record_connection() {
    counter!(CONNECTIONS).increment(1);
}

/// 重试预算耗尽
pub fn record_connection_failure() {
    counter!(CONNECTION_FAILURES).increment(1);
}

/// 编排层的缓存判定：`hit` 或 `refresh`
pub fn record_cache_lookup(result: &'static str) {
    counter!(CACHE_LOOKUPS, "result" => result).increment(1);
}

/// 存储操作在重试后仍然失败
pub fn record_store_error(operation: &'static str) {
    counter!(STORE_ERRORS, "operation" => operation).increment(1);
}

/// 上游查询结果：`ok`、`empty` 或 `failed`
pub fn record_upstream_fetch(outcome: &'static str) {
    counter!(UPSTREAM_FETCHES, "outcome" => outcome).increment(1);
}
