//! 访问令牌查询

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use taa_common::{AccessTokenSet, Identity};
use taa_ports::AccessSource;
use taa_telemetry::record_upstream_fetch;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{ConnectionPolicy, IspybSettings};
use crate::connection::{TunnelConnection, TunnelConnector};
use crate::error::{IspybError, IspybResult};
use crate::session::{MySqlSessionFactory, RemoteRecord};
use crate::tunnel::SshTunnelFactory;

/// 把存储过程返回的行转换为访问令牌
///
/// 只处理提案代码在允许列表中的行，每行产生 `<code><number>` 和
/// `<code><number>-<session>` 两个令牌。
pub fn derive_tokens(records: &[RemoteRecord], proposal_codes: &HashSet<String>) -> AccessTokenSet {
    let mut tokens = AccessTokenSet::new();
    for record in records
        .iter()
        .filter(|record| proposal_codes.contains(&record.proposal_code))
    {
        let proposal = format!("{}{}", record.proposal_code, record.proposal_number);
        tokens.insert(format!("{}-{}", proposal, record.session_number));
        tokens.insert(proposal);
    }
    tokens
}

/// ISPyB 访问令牌数据源
pub struct RemoteFetcher {
    connector: TunnelConnector,
    procedure: String,
    proposal_codes: HashSet<String>,
    policy: ConnectionPolicy,
    shared: Mutex<Option<Arc<TunnelConnection>>>,
}

impl RemoteFetcher {
    pub fn new(
        connector: TunnelConnector,
        procedure: impl Into<String>,
        proposal_codes: impl IntoIterator<Item = String>,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            connector,
            procedure: procedure.into(),
            proposal_codes: proposal_codes.into_iter().collect(),
            policy,
            shared: Mutex::new(None),
        }
    }

    /// 使用 SSH 隧道和 MySQL 会话
    pub fn from_settings(settings: &IspybSettings) -> Self {
        let connector = TunnelConnector::new(
            Arc::new(SshTunnelFactory::new(settings.tunnel.clone())),
            Arc::new(MySqlSessionFactory::new(settings.database.clone())),
            settings.connection.clone(),
        );
        Self::new(
            connector,
            settings.procedure.clone(),
            settings.proposal_codes.clone(),
            settings.policy,
        )
    }

    pub fn connector(&self) -> &TunnelConnector {
        &self.connector
    }

    async fn lookup(&self, identity: &Identity) -> IspybResult<Vec<RemoteRecord>> {
        let args = [identity.username()];
        match self.policy {
            ConnectionPolicy::PerFetch => {
                let conn = self.connector.open().await?;
                let result = conn.invoke(&self.procedure, &args).await;
                conn.close().await;
                result
            }
            ConnectionPolicy::Shared => {
                let conn = self.shared_connection().await?;
                conn.invoke(&self.procedure, &args).await
            }
        }
    }

    async fn shared_connection(&self) -> IspybResult<Arc<TunnelConnection>> {
        let mut shared = self.shared.lock().await;
        if let Some(conn) = shared.as_ref() {
            return Ok(conn.clone());
        }
        let conn = Arc::new(self.connector.open().await?);
        *shared = Some(conn.clone());
        Ok(conn)
    }

    /// 关闭共享连接
    pub async fn shutdown(&self) {
        if let Some(conn) = self.shared.lock().await.take() {
            conn.close().await;
        }
    }
}

#[async_trait]
impl AccessSource for RemoteFetcher {
    async fn fetch(&self, identity: &Identity) -> Option<AccessTokenSet> {
        match self.lookup(identity).await {
            Ok(records) => {
                let tokens = derive_tokens(&records, &self.proposal_codes);
                debug!(
                    identity = %identity,
                    rows = records.len(),
                    tokens = tokens.len(),
                    "Fetched access tokens"
                );
                record_upstream_fetch("ok");
                Some(tokens)
            }
            Err(IspybError::NoResult) => {
                debug!(identity = %identity, "No sessions for identity");
                record_upstream_fetch("empty");
                Some(AccessTokenSet::new())
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Access token fetch failed");
                record_upstream_fetch("failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSessions, FakeTunnels, settings};

    fn codes() -> Vec<String> {
        vec!["lb".to_string(), "sw".to_string()]
    }

    fn fetcher(
        tunnels: Arc<FakeTunnels>,
        sessions: Arc<FakeSessions>,
        policy: ConnectionPolicy,
    ) -> RemoteFetcher {
        let connector = TunnelConnector::new(tunnels, sessions, settings());
        RemoteFetcher::new(connector, "retrieve_sessions_for_person_login", codes(), policy)
    }

    #[test]
    fn test_derive_tokens() {
        let records = vec![
            RemoteRecord::new("lb", "12345", "2"),
            RemoteRecord::new("lb", "12345", "2"),
            RemoteRecord::new("sw", "7", "1"),
            RemoteRecord::new("mx", "999", "1"),
        ];
        let tokens = derive_tokens(&records, &codes().into_iter().collect());

        assert_eq!(
            tokens.to_vec(),
            vec!["lb12345", "lb12345-2", "sw7", "sw7-1"]
        );
    }

    #[tokio::test]
    async fn test_fetch_returns_tokens_and_closes() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new().with_rows(vec![RemoteRecord::new("lb", "12345", "2")]);
        let fetcher = fetcher(tunnels.clone(), sessions.clone(), ConnectionPolicy::PerFetch);
        let alice = Identity::parse("alice").unwrap();

        let tokens = fetcher.fetch(&alice).await.unwrap();
        assert_eq!(tokens.to_vec(), vec!["lb12345", "lb12345-2"]);
        assert_eq!(tunnels.closed(), 1);
        assert_eq!(sessions.closed(), 1);
    }

    #[tokio::test]
    async fn test_no_result_is_empty_set() {
        let fetcher = fetcher(FakeTunnels::new(), FakeSessions::new(), ConnectionPolicy::PerFetch);
        let alice = Identity::parse("alice").unwrap();

        assert_eq!(fetcher.fetch(&alice).await, Some(AccessTokenSet::new()));
    }

    #[tokio::test]
    async fn test_only_foreign_codes_is_empty_set() {
        let sessions = FakeSessions::new().with_rows(vec![RemoteRecord::new("mx", "1", "1")]);
        let fetcher = fetcher(FakeTunnels::new(), sessions, ConnectionPolicy::PerFetch);
        let alice = Identity::parse("alice").unwrap();

        assert_eq!(fetcher.fetch(&alice).await, Some(AccessTokenSet::new()));
    }

    #[tokio::test]
    async fn test_connection_failure_is_absent() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new().failing_connects(u32::MAX);
        let fetcher = fetcher(tunnels.clone(), sessions, ConnectionPolicy::PerFetch);
        let alice = Identity::parse("alice").unwrap();

        assert_eq!(fetcher.fetch(&alice).await, None);
        assert_eq!(tunnels.closed(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_failure_is_absent_and_closes() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new().failing_calls(1);
        let fetcher = fetcher(tunnels.clone(), sessions, ConnectionPolicy::PerFetch);
        let alice = Identity::parse("alice").unwrap();

        assert_eq!(fetcher.fetch(&alice).await, None);
        assert_eq!(tunnels.closed(), 1);
    }

    #[tokio::test]
    async fn test_shared_policy_reuses_connection() {
        let tunnels = FakeTunnels::new();
        let sessions = FakeSessions::new().with_rows(vec![RemoteRecord::new("lb", "1", "1")]);
        let fetcher = fetcher(tunnels.clone(), sessions.clone(), ConnectionPolicy::Shared);
        let alice = Identity::parse("alice").unwrap();
        let bob = Identity::parse("bob").unwrap();

        assert!(fetcher.fetch(&alice).await.is_some());
        assert!(fetcher.fetch(&bob).await.is_some());
        assert_eq!(tunnels.started(), 1);
        assert_eq!(sessions.connects(), 1);
        assert_eq!(tunnels.closed(), 0);

        fetcher.shutdown().await;
        assert_eq!(tunnels.closed(), 1);
    }
}
