//! taa-adapter-redis - Redis 共享缓存适配器

mod config;
mod connection;
mod encoding;
mod store;

pub use config::*;
pub use connection::*;
pub use store::*;
