//! 订阅门控中间件
//!
//! 两张显式前缀表决定是否校验订阅：业务数据路由要求有效订阅，
//! 豁免表无条件放行，两表都命中时豁免优先。门控在认证之后执行，
//! 先解析租户范围再做订阅校验。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::auth::AuthContext;
use super::tenant;
use super::AppState;
use crate::error::AppError;

/// 要求有效订阅的路径前缀（租户业务数据）
pub const REQUIRED_SUBSCRIPTION_PREFIXES: &[&str] = &[
    "/api/v1/orders",
    "/api/v1/products",
    "/api/v1/customers",
    "/api/v1/payments",
    "/api/v1/notifications",
    "/api/v1/settings",
];

/// 无条件豁免的路径前缀。订阅管理端点自身必须豁免，
/// 否则过期商户永远无法续订。
pub const EXEMPT_PREFIXES: &[&str] = &[
    "/api/v1/auth",
    "/health",
    "/ready",
    "/api/v1/system",
    "/api/v1/plans",
    "/api/v1/subscriptions",
    "/api/v1/users",
];

/// 路径是否需要订阅校验。豁免优先于要求。
pub fn requires_subscription(path: &str) -> bool {
    if EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return false;
    }
    REQUIRED_SUBSCRIPTION_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// 订阅门控中间件
pub async fn subscription_gate_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !requires_subscription(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    // 门控路由都在认证之后；没有身份说明挂载顺序错了
    let auth = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or(AppError::TokenMissing)?;

    let (parts, body) = req.into_parts();
    let requested = tenant::requested_merchant_id(&parts)?;
    let merchant_id = tenant::resolve_merchant_id(&auth, requested)?;
    let req = Request::from_parts(parts, body);

    state
        .subscription_service
        .validate_access(merchant_id, &Default::default())
        .await?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_prefixes_require_subscription() {
        assert!(requires_subscription("/api/v1/orders"));
        assert!(requires_subscription("/api/v1/orders/42"));
        assert!(requires_subscription("/api/v1/products"));
        assert!(requires_subscription("/api/v1/customers/7/notes"));
        assert!(requires_subscription("/api/v1/payments"));
        assert!(requires_subscription("/api/v1/notifications"));
        assert!(requires_subscription("/api/v1/settings/tax"));
    }

    #[test]
    fn test_exempt_paths_skip_gating() {
        assert!(!requires_subscription("/api/v1/auth/login"));
        assert!(!requires_subscription("/health"));
        assert!(!requires_subscription("/api/v1/plans"));
        assert!(!requires_subscription("/api/v1/subscriptions/status"));
        assert!(!requires_subscription("/api/v1/users/me"));
    }

    #[test]
    fn test_unlisted_paths_not_gated() {
        assert!(!requires_subscription("/api/v1/reports"));
        assert!(!requires_subscription("/"));
    }

    #[test]
    fn test_exemption_wins_over_requirement() {
        // 两表同时命中时豁免必须获胜
        for path in EXEMPT_PREFIXES {
            assert!(!requires_subscription(path));
        }
        // 构造一个同时匹配两表的路径来验证判定顺序
        assert!(!requires_subscription("/api/v1/subscriptions"));
    }
}
