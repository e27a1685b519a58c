//! ISPyB 错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IspybError {
    /// 隧道无法建立
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// 数据库握手用尽重试次数
    #[error("Connection error: {0}")]
    Connection(String),

    /// 存储过程没有返回任何行
    #[error("No result")]
    NoResult,

    /// 已连接状态下的数据层故障
    #[error("Retrieve error: {0}")]
    Retrieve(String),
}

impl IspybError {
    pub fn tunnel(msg: impl Into<String>) -> Self {
        Self::Tunnel(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn retrieve(msg: impl Into<String>) -> Self {
        Self::Retrieve(msg.into())
    }
}

pub type IspybResult<T> = Result<T, IspybError>;
