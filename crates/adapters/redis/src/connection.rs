//! Redis 连接管理

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, RedisError};
use taa_common::with_conditional_retry;

use crate::config::RedisConfig;

/// 创建 Redis 连接管理器
///
/// 连接和每条命令都有独立的超时，暂时性故障按配置重试。
pub async fn create_connection_manager(config: &RedisConfig) -> Result<ConnectionManager, RedisError> {
    let client = Client::open(config.url.as_str())?;
    let manager_config = ConnectionManagerConfig::new()
        .set_connection_timeout(config.connection_timeout)
        .set_response_timeout(config.response_timeout);

    with_conditional_retry(
        &config.retry,
        "redis_connect",
        || ConnectionManager::new_with_config(client.clone(), manager_config.clone()),
        is_transient,
    )
    .await
}

/// 是否为值得重试的暂时性错误
pub fn is_transient(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
}
