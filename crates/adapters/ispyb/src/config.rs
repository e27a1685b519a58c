//! ISPyB 连接设置
//!
//! 从应用配置派生隧道、数据库会话和连接生命周期的设置。

use std::time::Duration;

use secrecy::Secret;
use taa_common::RetryConfig;
use taa_config::{IspybConfig, SshConfig};

/// SSH 认证方式，优先使用私钥
#[derive(Debug, Clone)]
pub enum SshAuth {
    PrivateKey(String),
    Password(Secret<String>),
}

/// SSH 隧道设置
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub auth: SshAuth,
    /// 隧道远端转发目标
    pub remote_host: String,
    pub remote_port: u16,
    /// SSH 连接和认证的超时
    pub timeout: Duration,
}

/// 数据库会话设置
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub user: String,
    pub password: Secret<String>,
    pub database: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl DatabaseSettings {
    /// 单次存储过程调用的时限
    pub fn call_timeout(&self) -> Duration {
        self.read_timeout + self.write_timeout
    }
}

/// 连接生命周期设置
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// 数据库握手的重试策略
    pub handshake_retry: RetryConfig,
    /// 空闲超过该时长的会话在下次使用前重建
    pub inactivity: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_retry: RetryConfig::fixed(5, Duration::from_secs(1)),
            inactivity: Duration::from_secs(360),
        }
    }
}

/// 多次查询之间如何使用连接
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// 每次查询新建连接，结束后关闭
    #[default]
    PerFetch,
    /// 复用一个延迟打开的连接
    Shared,
}

/// ISPyB 适配器的全部设置
#[derive(Debug, Clone)]
pub struct IspybSettings {
    pub tunnel: TunnelSettings,
    pub database: DatabaseSettings,
    pub connection: ConnectionSettings,
    pub procedure: String,
    pub proposal_codes: Vec<String>,
    pub policy: ConnectionPolicy,
}

impl IspybSettings {
    pub fn from_config(ispyb: &IspybConfig, ssh: &SshConfig) -> Self {
        // 配置校验保证至少有一种认证方式
        let auth = match (&ssh.private_key_filename, &ssh.password) {
            (Some(path), _) => SshAuth::PrivateKey(path.clone()),
            (None, Some(password)) => SshAuth::Password(password.clone()),
            (None, None) => SshAuth::Password(Secret::new(String::new())),
        };

        Self {
            tunnel: TunnelSettings {
                ssh_host: ssh.host.clone(),
                ssh_port: ssh.port,
                ssh_user: ssh.user.clone(),
                auth,
                remote_host: ispyb.host.clone(),
                remote_port: ispyb.port,
                timeout: Duration::from_secs(5),
            },
            database: DatabaseSettings {
                user: ispyb.user.clone(),
                password: ispyb.password.clone(),
                database: ispyb.database.clone(),
                connect_timeout: Duration::from_secs(3),
                read_timeout: Duration::from_secs(3),
                write_timeout: Duration::from_secs(10),
            },
            connection: ConnectionSettings {
                inactivity: ispyb.conn_inactivity(),
                ..Default::default()
            },
            procedure: ispyb.procedure.clone(),
            proposal_codes: ispyb.proposal_codes.clone(),
            policy: if ispyb.reuse_connection {
                ConnectionPolicy::Shared
            } else {
                ConnectionPolicy::PerFetch
            },
        }
    }
}
