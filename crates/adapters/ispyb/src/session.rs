//! ISPyB 数据库会话
//!
//! 一个会话只暴露存储过程调用，不提供通用查询能力。

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Row};
use tracing::debug;

use crate::config::DatabaseSettings;
use crate::error::{IspybError, IspybResult};

/// 存储过程返回的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub proposal_code: String,
    pub proposal_number: String,
    pub session_number: String,
}

impl RemoteRecord {
    pub fn new(
        proposal_code: impl Into<String>,
        proposal_number: impl Into<String>,
        session_number: impl Into<String>,
    ) -> Self {
        Self {
            proposal_code: proposal_code.into(),
            proposal_number: proposal_number.into(),
            session_number: session_number.into(),
        }
    }
}

/// 数据库会话，不支持并发调用
#[async_trait]
pub trait Session: Send {
    /// 调用存储过程
    async fn call(&mut self, procedure: &str, args: &[&str]) -> IspybResult<Vec<RemoteRecord>>;

    /// 关闭会话
    async fn close(self: Box<Self>);
}

/// 会话工厂，经隧道的本地端点建立会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> IspybResult<Box<dyn Session>>;
}

/// MySQL 会话工厂
pub struct MySqlSessionFactory {
    settings: DatabaseSettings,
}

impl MySqlSessionFactory {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionFactory for MySqlSessionFactory {
    async fn connect(&self, addr: SocketAddr) -> IspybResult<Box<dyn Session>> {
        let settings = &self.settings;
        let options = MySqlConnectOptions::new()
            .host(&addr.ip().to_string())
            .port(addr.port())
            .username(&settings.user)
            .password(settings.password.expose_secret())
            .database(&settings.database);

        let conn = tokio::time::timeout(
            settings.connect_timeout,
            MySqlConnection::connect_with(&options),
        )
        .await
        .map_err(|_| IspybError::connection("Database connect timed out"))?
        .map_err(|e| IspybError::connection(format!("Database connect failed: {}", e)))?;

        debug!(addr = %addr, database = %settings.database, "Database session opened");
        Ok(Box::new(MySqlSession {
            conn,
            call_timeout: settings.call_timeout(),
        }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
    call_timeout: Duration,
}

#[async_trait]
impl Session for MySqlSession {
    async fn call(&mut self, procedure: &str, args: &[&str]) -> IspybResult<Vec<RemoteRecord>> {
        let placeholders = vec!["?"; args.len()].join(", ");
        let statement = format!("CALL {}({})", procedure, placeholders);

        let mut query = sqlx::query(&statement);
        for arg in args {
            query = query.bind(*arg);
        }

        let rows =
            bounded_call(self.call_timeout, procedure, query.fetch_all(&mut self.conn)).await?;

        rows.iter().map(decode_record).collect()
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Database session close failed");
        }
    }
}

/// 限制一次存储过程调用的总时长
///
/// sqlx 不能分别设置套接字的读写超时，调用整体以 read + write 为上限。
async fn bounded_call<T, E, Fut>(limit: Duration, procedure: &str, call: Fut) -> IspybResult<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| IspybError::retrieve(format!("{} timed out after {:?}", procedure, limit)))?
        .map_err(|e| IspybError::retrieve(e.to_string()))
}

fn decode_record(row: &MySqlRow) -> IspybResult<RemoteRecord> {
    Ok(RemoteRecord {
        proposal_code: column_text(row, "proposalCode")?,
        proposal_number: column_text(row, "proposalNumber")?,
        session_number: column_text(row, "sessionNumber")?,
    })
}

/// 读取文本列，整数列转换为十进制字符串
fn column_text(row: &MySqlRow, column: &str) -> IspybResult<String> {
    if let Ok(text) = row.try_get::<String, _>(column) {
        return Ok(text);
    }
    if let Ok(number) = row.try_get::<i64, _>(column) {
        return Ok(number.to_string());
    }
    row.try_get::<u64, _>(column)
        .map(|number| number.to_string())
        .map_err(|e| IspybError::retrieve(format!("Column {}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let limit = Duration::from_secs(13);
        let started = Instant::now();

        let result: IspybResult<()> = bounded_call(
            limit,
            "retrieve_sessions_for_person_login",
            std::future::pending::<Result<(), sqlx::Error>>(),
        )
        .await;

        assert!(matches!(result, Err(IspybError::Retrieve(_))));
        assert!(started.elapsed() >= limit);
    }

    #[tokio::test]
    async fn test_call_error_is_retrieve() {
        let result: IspybResult<()> = bounded_call(
            Duration::from_secs(1),
            "retrieve_sessions_for_person_login",
            async { Err::<(), _>(sqlx::Error::RowNotFound) },
        )
        .await;

        assert!(matches!(result, Err(IspybError::Retrieve(_))));
    }

    #[tokio::test]
    async fn test_call_result_passed_through() {
        let result = bounded_call(Duration::from_secs(1), "p", async {
            Ok::<_, sqlx::Error>(vec![RemoteRecord::new("lb", "12345", "2")])
        })
        .await
        .unwrap();

        assert_eq!(result, vec![RemoteRecord::new("lb", "12345", "2")]);
    }
}
