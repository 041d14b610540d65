//! 租户范围解析
//!
//! 每个触碰租户数据的 handler 都必须先经过这一道：平台管理员可以
//! 显式指定代操作的商户；其他角色被钉死在自己身份里的商户上。
//! 角色检查不能防住跨租户访问，这里是防数据泄漏的唯一关口。

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use uuid::Uuid;

use super::auth::AuthContext;
use crate::error::AppError;

/// 解析本次请求可以作用的商户
///
/// - 管理员 + 显式 `requested` → 用 requested（代任意商户操作）
/// - 非管理员 + 显式 `requested` ≠ 自己的商户 → 跨租户拒绝（403）
/// - 无显式目标 → 用身份里的商户
/// - 两者都没有 → 商户缺失（400）
pub fn resolve_merchant_id(
    auth: &AuthContext,
    requested: Option<Uuid>,
) -> Result<Uuid, AppError> {
    if auth.role.is_admin() {
        return requested
            .or(auth.merchant_id)
            .ok_or(AppError::MerchantIdRequired);
    }

    match (requested, auth.merchant_id) {
        (Some(requested), Some(own)) if requested != own => {
            tracing::warn!(
                user_id = %auth.user_id,
                own_merchant = %own,
                requested_merchant = %requested,
                "Cross-tenant access attempt"
            );
            Err(AppError::CrossTenantAccess)
        }
        (Some(requested), Some(_)) => Ok(requested),
        // 身份没有商户却指定了目标：同样越界
        (Some(_), None) => Err(AppError::CrossTenantAccess),
        (None, Some(own)) => Ok(own),
        (None, None) => Err(AppError::MerchantIdRequired),
    }
}

/// 从请求中读取显式指定的商户：`merchant_id` 查询参数优先，
/// 其次 `x-merchant-id` 头。
pub fn requested_merchant_id(parts: &Parts) -> Result<Option<Uuid>, AppError> {
    if let Some(query) = parts.uri.query() {
        for pair in query.split('&') {
            let mut kv = pair.splitn(2, '=');
            if kv.next() == Some("merchant_id") {
                let value = kv.next().unwrap_or("");
                return Uuid::parse_str(value)
                    .map(Some)
                    .map_err(|_| AppError::bad_request("Invalid merchant_id"));
            }
        }
    }

    if let Some(value) = parts.headers.get("x-merchant-id").and_then(|v| v.to_str().ok()) {
        return Uuid::parse_str(value)
            .map(Some)
            .map_err(|_| AppError::bad_request("Invalid x-merchant-id header"));
    }

    Ok(None)
}

/// Axum 提取器：已解析的租户范围
/// 在 handler 中直接使用，保证解析逻辑不被绕过
pub struct TenantScope(pub Uuid);

impl<S> FromRequestParts<S> for TenantScope
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::TokenMissing)?;

        let requested = requested_merchant_id(parts)?;
        let merchant_id = resolve_merchant_id(&auth, requested)?;

        Ok(TenantScope(merchant_id))
    }
}
