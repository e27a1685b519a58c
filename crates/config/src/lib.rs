//! taa-config - 配置加载库
//!
//! 加载顺序：`{dir}/default.toml` → `{dir}/{APP_ENV}.toml` → `TAA_` 前缀的环境变量
//! （`__` 分隔层级，例如 `TAA_ISPYB__HOST`）。

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// 缓存新鲜度配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 用户访问令牌的有效期（分钟）
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u64,
    /// 健康检查结果的有效期（秒）
    #[serde(default = "default_ping_expiry_seconds")]
    pub ping_expiry_seconds: u64,
}

fn default_expiry_minutes() -> u64 {
    2
}

fn default_ping_expiry_seconds() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: default_expiry_minutes(),
            ping_expiry_seconds: default_ping_expiry_seconds(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.expiry_minutes * 60)
    }

    pub fn ping_ttl(&self) -> Duration {
        Duration::from_secs(self.ping_expiry_seconds)
    }
}

/// 存储位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// 进程内存储（开发和测试）
    Memory,
    /// Redis URL
    Redis(String),
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `host`、`host:port`、`redis://...` 或 `memory`
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 键前缀，多个实例共享同一个 Redis 时使用
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_location() -> String {
    "localhost".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    4000
}

fn default_response_timeout_ms() -> u64 {
    500
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            key_prefix: None,
        }
    }
}

impl StoreConfig {
    /// 解析存储位置，未指定端口时使用 6379
    pub fn location(&self) -> StoreLocation {
        let location = self.location.trim();
        if location.eq_ignore_ascii_case("memory") {
            StoreLocation::Memory
        } else if location.contains("://") {
            StoreLocation::Redis(location.to_string())
        } else if location.contains(':') {
            StoreLocation::Redis(format!("redis://{}", location))
        } else {
            StoreLocation::Redis(format!("redis://{}:6379", location))
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// ISPyB 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct IspybConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    #[serde(default = "default_database")]
    pub database: String,
    /// 连接空闲超过该秒数后在下一次使用前重建
    #[serde(default = "default_conn_inactivity_secs")]
    pub conn_inactivity_secs: u64,
    /// 允许转换为访问令牌的提案代码
    #[serde(default = "default_proposal_codes")]
    pub proposal_codes: Vec<String>,
    #[serde(default = "default_procedure")]
    pub procedure: String,
    /// 多次查询共享同一个隧道连接
    #[serde(default)]
    pub reuse_connection: bool,
}

fn default_database() -> String {
    "db".to_string()
}

fn default_conn_inactivity_secs() -> u64 {
    360
}

fn default_proposal_codes() -> Vec<String> {
    vec!["lb".to_string(), "sw".to_string()]
}

fn default_procedure() -> String {
    "retrieve_sessions_for_person_login".to_string()
}

impl IspybConfig {
    pub fn conn_inactivity(&self) -> Duration {
        Duration::from_secs(self.conn_inactivity_secs)
    }
}

/// SSH 隧道配置
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub password: Option<Secret<String>>,
    pub private_key_filename: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// 请求头 `X-TAAQueryKey` 必须匹配的值
    #[serde(default)]
    pub query_key: Option<Secret<String>>,
    #[serde(default)]
    pub ispyb: Option<IspybConfig>,
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("TAA_").split("__"));

        Self::from_figment(figment)
    }

    /// 从任意 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// 启动时校验，上游凭据不完整时拒绝启动
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(ispyb) = &self.ispyb else {
            return Ok(());
        };

        let ssh = self
            .ssh
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("ispyb requires an ssh section".to_string()))?;
        if ssh.host.is_empty() || ssh.user.is_empty() {
            return Err(ConfigError::Invalid(
                "ssh.host and ssh.user must not be empty".to_string(),
            ));
        }
        if ssh.password.is_none() && ssh.private_key_filename.is_none() {
            return Err(ConfigError::Invalid(
                "ssh requires a password or a private_key_filename".to_string(),
            ));
        }
        if ispyb.host.is_empty() || ispyb.user.is_empty() {
            return Err(ConfigError::Invalid(
                "ispyb.host and ispyb.user must not be empty".to_string(),
            ));
        }
        if ispyb.procedure.is_empty()
            || !ispyb
                .procedure
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "ispyb.procedure '{}' is not a valid identifier",
                ispyb.procedure
            )));
        }
        Ok(())
    }

    /// 是否配置了上游
    pub fn has_upstream(&self) -> bool {
        self.ispyb.is_some()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

#[cfg(test)]
mod tests;
