//! 健康检查处理器

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use once_cell::sync::OnceCell;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::{db, middleware::AppState};

static START_TIME: OnceCell<Instant> = OnceCell::new();

/// 记录应用启动时间（main 启动时调用一次）
pub fn set_start_time() {
    let _ = START_TIME.set(Instant::now());
}

fn uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// 存活检查
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime_secs(),
    }))
}

/// 就绪检查（含数据库探活）
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = db::health_check(&state.db).await;

    if db_status.is_healthy() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "healthy",
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": "unhealthy",
            })),
        )
    }
}
