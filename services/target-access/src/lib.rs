//! target-access - 访问令牌缓存网关
//!
//! 回答“某个用户可以访问哪些提案和访问”。答案优先来自共享缓存，
//! 过期后经 SSH 隧道向 ISPyB 刷新。

pub mod admin;
pub mod api;
pub mod application;
