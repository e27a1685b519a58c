//! Redis 配置模块

use std::time::Duration;

use taa_common::RetryConfig;

/// Redis 存储配置
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 单条命令的响应超时
    pub response_timeout: Duration,
    /// 暂时性故障的重试策略
    pub retry: RetryConfig,
    /// 键前缀
    pub key_prefix: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(4),
            response_timeout: Duration::from_millis(500),
            retry: RetryConfig::fixed(3, Duration::from_millis(10)),
            key_prefix: None,
        }
    }
}

impl RedisConfig {
    /// 创建新的配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置连接超时
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置响应超时
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// 设置固定延迟的重试
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.retry = RetryConfig::fixed(max_attempts, delay);
        self
    }

    /// 设置键前缀
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// 获取带前缀的键
    pub fn prefixed_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    /// 去掉前缀，不属于本命名空间的键返回 None
    pub fn strip_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.key_prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(':')),
            None => Some(key),
        }
    }

    /// SCAN 使用的匹配模式
    pub fn scan_pattern(&self) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:*", prefix),
            None => "*".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(4));
        assert_eq!(config.response_timeout, Duration::from_millis(500));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay_for_attempt(2), Duration::from_millis(10));
    }

    #[test]
    fn test_config_builder() {
        let config = RedisConfig::new("redis://localhost:6379")
            .with_connection_timeout(Duration::from_secs(1))
            .with_retry(5, Duration::from_millis(500))
            .with_key_prefix("taa");

        assert_eq!(config.connection_timeout, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.key_prefix, Some("taa".to_string()));
    }

    #[test]
    fn test_prefixed_key() {
        let config = RedisConfig::new("redis://localhost:6379").with_key_prefix("taa");

        assert_eq!(config.prefixed_key("alice"), "taa:alice");
        assert_eq!(config.strip_prefix("taa:alice"), Some("alice"));
        assert_eq!(config.strip_prefix("other:alice"), None);
        assert_eq!(config.scan_pattern(), "taa:*");

        let config_no_prefix = RedisConfig::new("redis://localhost:6379");
        assert_eq!(config_no_prefix.prefixed_key("alice"), "alice");
        assert_eq!(config_no_prefix.strip_prefix("alice"), Some("alice"));
        assert_eq!(config_no_prefix.scan_pattern(), "*");
    }
}
