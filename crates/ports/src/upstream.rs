//! 上游数据源 trait 定义

use async_trait::async_trait;
use taa_common::{AccessTokenSet, Identity};

/// 访问令牌数据源
#[async_trait]
pub trait AccessSource: Send + Sync {
    /// 查询某个身份的访问令牌
    ///
    /// `Some(空集合)` 表示上游确认没有可报告的内容；
    /// `None` 表示无法确定（连接失败或查询失败）。
    async fn fetch(&self, identity: &Identity) -> Option<AccessTokenSet>;
}

/// 上游可达性检查
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    /// 上游当前能否建立连接
    async fn probe(&self) -> bool;
}
