//! taa-bootstrap - 服务启动骨架
//!
//! 运行时初始化、存储和上游的装配

mod infrastructure;
mod memory_store;
mod runtime;

pub use infrastructure::*;
pub use memory_store::*;
pub use runtime::*;
