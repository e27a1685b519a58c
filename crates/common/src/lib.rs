//! taa-common - 通用类型和工具库

pub mod cache_value;
pub mod retry;
pub mod types;

pub use cache_value::*;
pub use retry::*;
pub use types::*;
