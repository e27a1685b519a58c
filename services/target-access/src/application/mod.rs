//! 应用层：缓存旁路的刷新编排和上游健康检查

mod entry;
mod locks;
mod probe;
mod refresh;

pub use locks::*;
pub use probe::*;
pub use refresh::*;
