//! SSH 隧道
//!
//! 在 `127.0.0.1` 上监听一个临时端口，把每个接入的本地连接通过
//! `direct-tcpip` 通道转发到数据库主机。

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::Disconnect;
use russh_keys::key::PublicKey;
use secrecy::ExposeSecret;
use taa_telemetry::record_tunnel_started;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SshAuth, TunnelSettings};
use crate::error::{IspybError, IspybResult};

/// 本地 accept 失败后的等待时间
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// 一个正在运行的隧道
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// 本地转发端点
    fn local_addr(&self) -> SocketAddr;

    /// 关闭隧道
    async fn close(self: Box<Self>);
}

/// 隧道工厂
#[async_trait]
pub trait TunnelFactory: Send + Sync {
    async fn start(&self) -> IspybResult<Box<dyn Tunnel>>;
}

struct SshClient;

#[async_trait]
impl client::Handler for SshClient {
    type Error = russh::Error;

    // 堡垒机的主机密钥由部署环境固定，这里不做校验
    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// 基于 russh 的隧道工厂
pub struct SshTunnelFactory {
    settings: TunnelSettings,
}

impl SshTunnelFactory {
    pub fn new(settings: TunnelSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self) -> IspybResult<Handle<SshClient>> {
        let settings = &self.settings;
        let config = Arc::new(client::Config::default());

        let mut handle = client::connect(
            config,
            (settings.ssh_host.as_str(), settings.ssh_port),
            SshClient,
        )
        .await
        .map_err(|e| IspybError::tunnel(format!("SSH connect failed: {}", e)))?;

        let authenticated = match &settings.auth {
            SshAuth::PrivateKey(path) => {
                let key = russh_keys::load_secret_key(path, None).map_err(|e| {
                    IspybError::tunnel(format!("Failed to load private key {}: {}", path, e))
                })?;
                handle
                    .authenticate_publickey(settings.ssh_user.as_str(), Arc::new(key))
                    .await
            }
            SshAuth::Password(password) => {
                handle
                    .authenticate_password(
                        settings.ssh_user.as_str(),
                        password.expose_secret().as_str(),
                    )
                    .await
            }
        }
        .map_err(|e| IspybError::tunnel(format!("SSH authentication failed: {}", e)))?;

        if !authenticated {
            return Err(IspybError::tunnel(format!(
                "SSH authentication rejected for {}@{}",
                settings.ssh_user, settings.ssh_host
            )));
        }
        Ok(handle)
    }
}

#[async_trait]
impl TunnelFactory for SshTunnelFactory {
    async fn start(&self) -> IspybResult<Box<dyn Tunnel>> {
        let settings = &self.settings;
        let handle = tokio::time::timeout(settings.timeout, self.connect())
            .await
            .map_err(|_| {
                IspybError::tunnel(format!(
                    "SSH connect to {}:{} timed out",
                    settings.ssh_host, settings.ssh_port
                ))
            })??;
        let handle = Arc::new(handle);

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| IspybError::tunnel(format!("Failed to bind local port: {}", e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| IspybError::tunnel(e.to_string()))?;

        let forwarder = tokio::spawn(forward(
            listener,
            handle.clone(),
            settings.remote_host.clone(),
            settings.remote_port,
        ));

        record_tunnel_started();
        info!(
            local = %local_addr,
            via = %settings.ssh_host,
            remote = %format!("{}:{}", settings.remote_host, settings.remote_port),
            "SSH tunnel started"
        );

        Ok(Box::new(SshTunnel {
            local_addr,
            handle,
            forwarder,
        }))
    }
}

/// 接受本地连接并逐个转发
async fn forward(
    listener: TcpListener,
    handle: Arc<Handle<SshClient>>,
    remote_host: String,
    remote_port: u16,
) {
    loop {
        let (socket, peer) = accept_with_backoff(|| listener.accept()).await;

        let handle = handle.clone();
        let remote_host = remote_host.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_one(socket, peer, &handle, &remote_host, remote_port).await {
                warn!(error = %e, "Tunnel forwarding ended with error");
            }
        });
    }
}

/// 反复 accept 直到成功，每次失败后等待 `ACCEPT_RETRY_DELAY`
///
/// 文件描述符耗尽之类的错误会持续出现，不等待会变成忙循环。
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(error = %e, "Tunnel accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn forward_one(
    mut socket: TcpStream,
    peer: SocketAddr,
    handle: &Handle<SshClient>,
    remote_host: &str,
    remote_port: u16,
) -> IspybResult<()> {
    let channel = handle
        .channel_open_direct_tcpip(
            remote_host,
            remote_port as u32,
            peer.ip().to_string(),
            peer.port() as u32,
        )
        .await
        .map_err(|e| IspybError::tunnel(format!("direct-tcpip open failed: {}", e)))?;

    let mut stream = channel.into_stream();
    let (sent, received) = tokio::io::copy_bidirectional(&mut socket, &mut stream)
        .await
        .map_err(|e| IspybError::tunnel(e.to_string()))?;
    debug!(sent, received, "Tunnel channel closed");
    Ok(())
}

struct SshTunnel {
    local_addr: SocketAddr,
    handle: Arc<Handle<SshClient>>,
    forwarder: JoinHandle<()>,
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(self: Box<Self>) {
        self.forwarder.abort();
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "SSH disconnect failed");
        }
        info!(local = %self.local_addr, "SSH tunnel closed");
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
