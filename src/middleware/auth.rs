//! 认证中间件
//!
//! 从 authorization 头提取 Bearer 令牌，交给外部校验器验证，执行
//! 角色集合检查与路由级自定义检查，成功后把身份注入请求扩展与
//! 下游身份头。"缺少令牌"与"令牌无效"使用不同错误码，调用方可区分。

use axum::{
    extract::{FromRequestParts, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::context;
use crate::error::AppError;
use crate::models::auth::{role_sets, TokenUser, UserRole};

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub merchant_id: Option<Uuid>,
    pub outlet_id: Option<Uuid>,
}

impl From<TokenUser> for AuthContext {
    fn from(user: TokenUser) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            role: user.role,
            merchant_id: user.merchant_id,
            outlet_id: user.outlet_id,
        }
    }
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::TokenMissing)
    }
}

/// 路由对认证的要求
#[derive(Clone, Copy)]
pub struct AuthRequirement {
    /// 允许的角色集合；为空表示任何已认证角色都可以
    pub required_roles: &'static [UserRole],
    /// 是否允许匿名通过（公开读端点）
    pub allow_unauthenticated: bool,
    /// 路由级细粒度检查；返回 false 映射为 403
    pub custom_check: Option<fn(&AuthContext, &Request) -> bool>,
}

impl AuthRequirement {
    /// 仅平台管理员
    pub const fn admin_only() -> Self {
        Self {
            required_roles: role_sets::ADMIN_ONLY,
            allow_unauthenticated: false,
            custom_check: None,
        }
    }

    /// 管理员或商户所有者
    pub const fn merchant_admin() -> Self {
        Self {
            required_roles: role_sets::MERCHANT_ADMIN,
            allow_unauthenticated: false,
            custom_check: None,
        }
    }

    /// 全部业务角色（管理员/商户所有者/门店员工）
    pub const fn business() -> Self {
        Self {
            required_roles: role_sets::BUSINESS_ROLES,
            allow_unauthenticated: false,
            custom_check: None,
        }
    }

    /// 允许匿名（公开读端点；带了有效令牌也照常注入身份）
    pub const fn public() -> Self {
        Self {
            required_roles: &[],
            allow_unauthenticated: true,
            custom_check: None,
        }
    }

    pub const fn with_custom_check(mut self, check: fn(&AuthContext, &Request) -> bool) -> Self {
        self.custom_check = Some(check);
        self
    }
}

/// 从 Authorization 头提取令牌
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// 认证主体：校验令牌与角色，注入身份。
/// 返回 Ok(None) 表示按 allow_unauthenticated 匿名放行。
pub async fn authenticate(
    state: &AppState,
    req: &mut Request,
    requirement: &AuthRequirement,
) -> Result<Option<AuthContext>, AppError> {
    let Some(token) = extract_token(req.headers()) else {
        if requirement.allow_unauthenticated {
            return Ok(None);
        }
        return Err(AppError::TokenMissing);
    };

    // 校验器自身的异常收敛为 500，不向客户端泄露细节
    let user = state.token_verifier.verify(&token).map_err(|e| match e {
        AppError::AuthenticationFailed(_) => e,
        other => AppError::AuthenticationFailed(other.to_string()),
    })?;

    let Some(user) = user else {
        return Err(AppError::TokenInvalid);
    };

    if !requirement.required_roles.is_empty() && !requirement.required_roles.contains(&user.role) {
        tracing::warn!(
            user_id = %user.id,
            role = %user.role,
            "Role not permitted for this route"
        );
        return Err(AppError::InsufficientRole);
    }

    let auth_context = AuthContext::from(user.clone());

    if let Some(check) = requirement.custom_check {
        if !check(&auth_context, req) {
            tracing::warn!(user_id = %auth_context.user_id, "Custom auth check failed");
            return Err(AppError::access_denied("Access denied"));
        }
    }

    // 身份头注入：下游 handler 无需重新校验令牌即可读取身份
    inject_identity_headers(req.headers_mut(), &auth_context);

    // 回填请求上下文条目
    if let Some(request_id) = context::current_request_id() {
        state.context_store.update_identity(&request_id, &user);
    }

    tracing::debug!(user_id = %auth_context.user_id, role = %auth_context.role, "Authenticated");
    req.extensions_mut().insert(auth_context.clone());

    Ok(Some(auth_context))
}

fn inject_identity_headers(headers: &mut HeaderMap, auth: &AuthContext) {
    if let Ok(value) = auth.user_id.to_string().parse() {
        headers.insert("x-user-id", value);
    }
    if let Ok(value) = auth.email.parse() {
        headers.insert("x-user-email", value);
    }
    if let Ok(value) = auth.role.as_str().parse() {
        headers.insert("x-user-role", value);
    }
    if let Some(merchant_id) = auth.merchant_id {
        if let Ok(value) = merchant_id.to_string().parse() {
            headers.insert("x-user-merchant-id", value);
        }
    }
    if let Some(outlet_id) = auth.outlet_id {
        if let Ok(value) = outlet_id.to_string().parse() {
            headers.insert("x-user-outlet-id", value);
        }
    }
}

/// 认证中间件 - 仅管理员
pub async fn require_admin_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(&state, &mut req, &AuthRequirement::admin_only()).await?;
    Ok(next.run(req).await)
}

/// 认证中间件 - 管理员或商户所有者
pub async fn require_merchant_admin_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(&state, &mut req, &AuthRequirement::merchant_admin()).await?;
    Ok(next.run(req).await)
}

/// 认证中间件 - 全部业务角色
pub async fn require_business_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(&state, &mut req, &AuthRequirement::business()).await?;
    Ok(next.run(req).await)
}

/// 可选认证 - 公开读端点，不强制要求令牌
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(&state, &mut req, &AuthRequirement::public()).await?;
    Ok(next.run(req).await)
}
