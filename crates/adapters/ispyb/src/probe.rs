//! 上游可达性检查

use async_trait::async_trait;
use taa_ports::UpstreamProbe;
use tracing::warn;

use crate::connection::TunnelConnector;

/// 打开一个连接后立即关闭
pub struct TunnelProbe {
    connector: TunnelConnector,
}

impl TunnelProbe {
    pub fn new(connector: TunnelConnector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl UpstreamProbe for TunnelProbe {
    async fn probe(&self) -> bool {
        match self.connector.open().await {
            Ok(conn) => {
                conn.close().await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Upstream probe failed");
                false
            }
        }
    }
}
