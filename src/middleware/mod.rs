//! HTTP 中间件
//! 请求管道：上下文捕获 → 审计包裹 → 限流 → 认证 → 租户/订阅门控

pub mod audit;
pub mod auth;
pub mod rate_limit;
pub mod subscription;
pub mod tenant;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::context::RequestContextStore;

/// 应用状态
///
/// AppState 内部使用 Arc 包装服务,这样:
/// 1. 多个请求可以共享服务实例
/// 2. 服务可以包含内部的可变状态(如果需要)
/// 3. Clone 成本低廉(Arc 是指针拷贝)
///
#[derive(Clone)]
pub struct AppState {
    pub config: crate::config::AppConfig,
    pub db: sqlx::PgPool,
    /// 请求上下文表
    pub context_store: Arc<RequestContextStore>,
    /// 限流器（两个命名策略）
    pub rate_limiters: Arc<rate_limit::RateLimiters>,
    /// 令牌校验器（签发在身份服务，这里只消费）
    pub token_verifier: Arc<dyn crate::auth::TokenVerifier>,
    /// 商户/订阅存储
    pub merchant_store: Arc<dyn crate::repository::MerchantStore>,
    // 服务使用 Arc 包装,因为服务内部可能包含 Arc 或其他共享状态
    pub subscription_service: Arc<crate::services::SubscriptionService>,
    pub audit_service: Arc<crate::services::AuditService>,
    pub expiry_scanner: Arc<crate::services::ExpiryScanner>,
    /// 审计策略（方法/路径过滤、体捕获）
    pub audit_policy: Arc<audit::AuditPolicy>,
}

/// 请求上下文中间件（管道最外层）
///
/// 为每个请求捕获上下文条目，把 request_id 绑定到本请求的任务作用域，
/// 记录请求级日志与指标，并在响应头回写 x-request-id。
pub async fn request_context_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let context = state
        .context_store
        .capture(&parts, state.config.security.trust_proxy);
    let request_id = context.request_id.clone();

    let method = parts.method.to_string();
    let uri = parts.uri.to_string();

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(context);

    // 尽力而为的身份富化：带了可解的令牌就先填上身份字段，
    // 解不开留给认证门决定拒绝与否
    if let Some(token) = auth::extract_token(req.headers()) {
        if let Ok(Some(user)) = state.token_verifier.verify(&token) {
            state.context_store.update_identity(&request_id, &user);
        }
    }

    // 创建 span
    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let request_id_for_scope = request_id.clone();
    RequestContextStore::scope(request_id_for_scope, async move {
        let start = Instant::now();

        let response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        metrics::counter!(
            "http_requests_total",
            "method" => method.clone(),
            "status" => status.to_string()
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        let mut response = response;
        if let Ok(value) = request_id.parse() {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    })
    .instrument(span)
    .await
}
