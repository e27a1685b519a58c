//! HTTP 接口

mod handlers;
mod state;

pub use handlers::*;
pub use state::*;

use axum::Router;
use axum::routing::get;

/// 构建路由
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/target-access/{username}", get(target_access))
        .route("/target-access/{username}/", get(target_access))
        .route("/ping/", get(ping))
        .route("/ping", get(ping))
        .route("/version/", get(version))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .with_state(state)
}
