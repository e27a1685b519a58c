//! 隧道连接
//!
//! 一个 SSH 隧道加一个数据库会话。握手有重试预算，空闲过久的会话在
//! 下一次调用前重建，同一时刻只允许一个存储过程调用。

use std::sync::Arc;
use std::time::Instant;

use taa_common::with_retry;
use taa_telemetry::{record_connection, record_connection_attempt_failed, record_connection_failure};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;
use crate::error::{IspybError, IspybResult};
use crate::session::{RemoteRecord, Session, SessionFactory};
use crate::tunnel::{Tunnel, TunnelFactory};

struct ConnectionState {
    tunnel: Option<Box<dyn Tunnel>>,
    session: Option<Box<dyn Session>>,
    last_activity: Instant,
}

/// 隧道连接
pub struct TunnelConnection {
    tunnels: Arc<dyn TunnelFactory>,
    sessions: Arc<dyn SessionFactory>,
    settings: ConnectionSettings,
    state: Mutex<ConnectionState>,
}

impl TunnelConnection {
    /// 启动隧道并完成数据库握手
    ///
    /// 握手用尽重试次数时关闭隧道并返回 `IspybError::Connection`。
    pub async fn open(
        tunnels: Arc<dyn TunnelFactory>,
        sessions: Arc<dyn SessionFactory>,
        settings: ConnectionSettings,
    ) -> IspybResult<Self> {
        let mut state = ConnectionState {
            tunnel: None,
            session: None,
            last_activity: Instant::now(),
        };
        establish(&*tunnels, &*sessions, &settings, &mut state).await?;

        Ok(Self {
            tunnels,
            sessions,
            settings,
            state: Mutex::new(state),
        })
    }

    /// 调用存储过程
    ///
    /// 空结果返回 `NoResult`，数据层故障返回 `Retrieve` 并丢弃会话。
    pub async fn invoke(&self, procedure: &str, args: &[&str]) -> IspybResult<Vec<RemoteRecord>> {
        let mut state = self.state.lock().await;

        let idle = state.last_activity.elapsed();
        if state.session.is_some() && idle > self.settings.inactivity {
            info!(idle_secs = idle.as_secs(), "Session idle too long, reconnecting");
            if let Some(session) = state.session.take() {
                session.close().await;
            }
        }
        if state.session.is_none() {
            establish(&*self.tunnels, &*self.sessions, &self.settings, &mut state).await?;
        }

        let Some(session) = state.session.as_mut() else {
            return Err(IspybError::connection("No database session"));
        };
        let result = session.call(procedure, args).await;
        state.last_activity = Instant::now();

        match result {
            Ok(rows) if rows.is_empty() => Err(IspybError::NoResult),
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(procedure, error = %e, "Procedure call failed, dropping session");
                if let Some(session) = state.session.take() {
                    session.close().await;
                }
                Err(match e {
                    IspybError::Retrieve(_) => e,
                    other => IspybError::retrieve(other.to_string()),
                })
            }
        }
    }

    /// 关闭会话和隧道，可重复调用
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.session.take() {
            session.close().await;
        }
        if let Some(tunnel) = state.tunnel.take() {
            tunnel.close().await;
        }
    }
}

/// 缺什么补什么：先隧道，再带重试的数据库握手
async fn establish(
    tunnels: &dyn TunnelFactory,
    sessions: &dyn SessionFactory,
    settings: &ConnectionSettings,
    state: &mut ConnectionState,
) -> IspybResult<()> {
    if state.tunnel.is_none() {
        let tunnel = tunnels
            .start()
            .await
            .map_err(|e| IspybError::connection(e.to_string()))?;
        state.tunnel = Some(tunnel);
    }
    let Some(addr) = state.tunnel.as_ref().map(|tunnel| tunnel.local_addr()) else {
        return Err(IspybError::connection("No tunnel"));
    };

    let handshake = with_retry(&settings.handshake_retry, "ispyb_connect", || async move {
        let result = sessions.connect(addr).await;
        if result.is_err() {
            record_connection_attempt_failed();
        }
        result
    })
    .await;

    match handshake {
        Ok(session) => {
            record_connection();
            debug!(addr = %addr, "Database handshake completed");
            state.session = Some(session);
            state.last_activity = Instant::now();
            Ok(())
        }
        Err(e) => {
            record_connection_failure();
            if let Some(tunnel) = state.tunnel.take() {
                tunnel.close().await;
            }
            Err(IspybError::connection(format!(
                "Database handshake failed after {} attempts: {}",
                settings.handshake_retry.max_attempts.max(1),
                e
            )))
        }
    }
}

/// 按固定设置打开连接
#[derive(Clone)]
pub struct TunnelConnector {
    tunnels: Arc<dyn TunnelFactory>,
    sessions: Arc<dyn SessionFactory>,
    settings: ConnectionSettings,
}

impl TunnelConnector {
    pub fn new(
        tunnels: Arc<dyn TunnelFactory>,
        sessions: Arc<dyn SessionFactory>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            tunnels,
            sessions,
            settings,
        }
    }

    pub async fn open(&self) -> IspybResult<TunnelConnection> {
        TunnelConnection::open(
            self.tunnels.clone(),
            self.sessions.clone(),
            self.settings.clone(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSessions, FakeTunnels, settings};
    use std::time::Duration;

    #[tokio::test]
    async fn test_open_retries_handshake_then_succeeds() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new().failing_connects(3);

        let conn = TunnelConnection::open(tunnels.clone(), sessions.clone(), settings())
            .await
            .unwrap();

        assert_eq!(sessions.connects(), 4);
        assert_eq!(tunnels.started(), 1);
        conn.close().await;
        assert_eq!(tunnels.closed(), 1);
    }

    #[tokio::test]
    async fn test_open_exhausts_budget_and_tears_down_tunnel() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new().failing_connects(u32::MAX);

        let result = TunnelConnection::open(tunnels.clone(), sessions.clone(), settings()).await;

        assert!(matches!(result, Err(IspybError::Connection(_))));
        assert_eq!(sessions.connects(), 5);
        assert_eq!(tunnels.started(), 1);
        assert_eq!(tunnels.closed(), 1);
    }

    #[tokio::test]
    async fn test_tunnel_failure_is_connection_error() {
        let tunnels = FakeTunnels::failing();
        let sessions = FakeSessions::new();

        let result = TunnelConnection::open(tunnels, sessions.clone(), settings()).await;

        assert!(matches!(result, Err(IspybError::Connection(_))));
        assert_eq!(sessions.connects(), 0);
    }

    #[tokio::test]
    async fn test_empty_result_is_no_result() {
        let conn = TunnelConnection::open(FakeTunnels::new(), FakeSessions::new(), settings())
            .await
            .unwrap();

        let result = conn.invoke("proc", &["alice"]).await;
        assert!(matches!(result, Err(IspybError::NoResult)));
    }

    #[tokio::test]
    async fn test_call_fault_drops_session() {
        let sessions = FakeSessions::new().failing_calls(1).with_rows(vec![RemoteRecord::new(
            "lb", "12345", "2",
        )]);
        let conn = TunnelConnection::open(FakeTunnels::new(), sessions.clone(), settings())
            .await
            .unwrap();

        let result = conn.invoke("proc", &["alice"]).await;
        assert!(matches!(result, Err(IspybError::Retrieve(_))));
        assert_eq!(sessions.closed(), 1);

        // 下一次调用重新握手
        let rows = conn.invoke("proc", &["alice"]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(sessions.connects(), 2);
    }

    #[tokio::test]
    async fn test_idle_session_recycled() {
        let sessions = FakeSessions::new().with_rows(vec![RemoteRecord::new("lb", "1", "1")]);
        let mut short = settings();
        short.inactivity = Duration::from_millis(20);
        let conn = TunnelConnection::open(FakeTunnels::new(), sessions.clone(), short)
            .await
            .unwrap();

        conn.invoke("proc", &["alice"]).await.unwrap();
        assert_eq!(sessions.connects(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.invoke("proc", &["alice"]).await.unwrap();
        assert_eq!(sessions.connects(), 2);
        assert_eq!(sessions.closed(), 1);
    }

    #[tokio::test]
    async fn test_recent_session_reused() {
        let sessions = FakeSessions::new().with_rows(vec![RemoteRecord::new("lb", "1", "1")]);
        let conn = TunnelConnection::open(FakeTunnels::new(), sessions.clone(), settings())
            .await
            .unwrap();

        conn.invoke("proc", &["alice"]).await.unwrap();
        conn.invoke("proc", &["bob"]).await.unwrap();
        assert_eq!(sessions.connects(), 1);
        assert_eq!(sessions.calls(), 2);
    }

    #[tokio::test]
    async fn test_calls_are_serialized() {
        let sessions = FakeSessions::new()
            .with_rows(vec![RemoteRecord::new("lb", "1", "1")])
            .with_call_delay(Duration::from_millis(20));
        let conn = Arc::new(
            TunnelConnection::open(FakeTunnels::new(), sessions.clone(), settings())
                .await
                .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.invoke("proc", &["alice"]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(sessions.calls(), 4);
        assert_eq!(sessions.max_concurrent_calls(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new();
        let conn = TunnelConnection::open(tunnels.clone(), sessions.clone(), settings())
            .await
            .unwrap();

        conn.close().await;
        conn.close().await;
        assert_eq!(tunnels.closed(), 1);
        assert_eq!(sessions.closed(), 1);
    }
}
