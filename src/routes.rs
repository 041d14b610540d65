//! 路由注册
//! 组合请求管道：上下文捕获 → 审计包裹 → 限流 → 认证 → 订阅门控 → handler

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, middleware, middleware::AppState};

/// 创建应用路由
///
/// 订单/商品/客户等领域 CRUD 不在本服务内，由嵌入方以 `domain_routes`
/// 传入；这里为其套上认证与订阅门控，并在最外层包上审计、限流与
/// 上下文中间件。
pub fn create_router(state: Arc<AppState>, domain_routes: Router<Arc<AppState>>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 管理端点（审计查询、手动到期扫描）
    let admin_routes = Router::new()
        .route("/api/v1/audit/events", get(handlers::audit::list_audit_events))
        .route(
            "/api/v1/subscriptions/expire-scan",
            post(handlers::subscription::trigger_expiry_scan),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin_auth,
        ));

    // 业务角色端点。订阅端点自身在门控豁免表里，
    // 否则过期商户永远无法查询/恢复自己的订阅。
    let business_routes = Router::new()
        .route(
            "/api/v1/subscriptions/status",
            get(handlers::subscription::subscription_status),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_business_auth,
        ));

    // 领域路由：认证在外，订阅门控在内（门控需要已注入的身份）
    let domain_routes = domain_routes
        .layer(from_fn_with_state(
            state.clone(),
            middleware::subscription::subscription_gate_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_business_auth,
        ));

    // 组合所有路由。layer 的添加顺序决定包裹方向：
    // 后添加的在外层，最终执行顺序为 上下文 → 审计 → 限流 → 路由组。
    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .merge(business_routes)
        .merge(domain_routes)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::api_rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::audit::audit_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::request_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
