//! ports - 抽象 trait 层
//!
//! 编排层依赖的基础设施接口：共享缓存存储和上游数据源

mod cache;
mod upstream;

pub use cache::*;
pub use upstream::*;
