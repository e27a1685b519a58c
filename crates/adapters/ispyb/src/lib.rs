//! taa-adapter-ispyb - ISPyB 上游适配器
//!
//! 经 SSH 隧道访问 ISPyB MySQL 数据库，调用存储过程查询用户的提案和访问。

mod config;
mod connection;
mod error;
mod fetcher;
mod probe;
mod session;
mod tunnel;

#[cfg(test)]
mod testing;

pub use config::*;
pub use connection::*;
pub use error::*;
pub use fetcher::*;
pub use probe::*;
pub use session::*;
pub use tunnel::*;
