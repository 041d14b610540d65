//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
///
/// 预期内的拒绝（限流/认证/授权/订阅/未找到）都是带类型的结果，
/// 只有 Internal 系列代表真正的异常，对外统一收敛为 500。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // ===== 准入控制 =====
    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        retry_after_secs: u64,
        limit: u32,
        reset_epoch_secs: i64,
    },

    // ===== 认证 =====
    #[error("Authentication token missing")]
    TokenMissing,

    #[error("Authentication token invalid or expired")]
    TokenInvalid,

    /// 令牌校验器本身异常（非拒绝），对外 500
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // ===== 授权 =====
    #[error("Insufficient role for this operation")]
    InsufficientRole,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Cross-tenant access denied")]
    CrossTenantAccess,

    #[error("Merchant id is required")]
    MerchantIdRequired,

    // ===== 订阅 =====
    #[error("Merchant not found")]
    MerchantNotFound,

    #[error("Merchant account is {status}")]
    MerchantStatusDenied { status: String },

    #[error("No active subscription")]
    SubscriptionRequired,

    #[error("Subscription expired")]
    SubscriptionExpired,

    #[error("Subscription is {status}")]
    SubscriptionInactive { status: String },

    /// 订阅校验过程出错（非拒绝），对外 500
    #[error("Failed to validate subscription: {0}")]
    SubscriptionCheckFailed(String),

    // ===== 通用 =====
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::TokenMissing | AppError::TokenInvalid => StatusCode::UNAUTHORIZED,
            AppError::InsufficientRole
            | AppError::AccessDenied(_)
            | AppError::CrossTenantAccess
            | AppError::MerchantStatusDenied { .. }
            | AppError::SubscriptionInactive { .. } => StatusCode::FORBIDDEN,
            // 402 专用于"付费可恢复"的订阅拒绝，区别于普通 403
            AppError::SubscriptionRequired | AppError::SubscriptionExpired => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::MerchantIdRequired | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MerchantNotFound | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::AuthenticationFailed(_)
            | AppError::SubscriptionCheckFailed(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取机器可读错误码（响应体中的 `error` 字段）
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::TokenMissing => "TOKEN_MISSING",
            AppError::TokenInvalid => "TOKEN_INVALID",
            AppError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            AppError::InsufficientRole => "INSUFFICIENT_ROLE",
            AppError::AccessDenied(_) => "ACCESS_DENIED",
            AppError::CrossTenantAccess => "CROSS_TENANT_ACCESS",
            AppError::MerchantIdRequired => "MERCHANT_ID_REQUIRED",
            AppError::MerchantNotFound => "MERCHANT_NOT_FOUND",
            AppError::MerchantStatusDenied { .. } => "MERCHANT_STATUS_DENIED",
            AppError::SubscriptionRequired => "SUBSCRIPTION_REQUIRED",
            AppError::SubscriptionExpired => "SUBSCRIPTION_EXPIRED",
            AppError::SubscriptionInactive { .. } => "SUBSCRIPTION_INACTIVE",
            AppError::SubscriptionCheckFailed(_) => "SUBSCRIPTION_CHECK_FAILED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::RateLimitExceeded {
                retry_after_secs, ..
            } => {
                format!("Too many requests, please retry after {retry_after_secs} seconds")
            }
            AppError::TokenMissing => "Authentication token is required".to_string(),
            AppError::TokenInvalid => "Invalid or expired authentication token".to_string(),
            AppError::AuthenticationFailed(_) => "Authentication failed".to_string(),
            AppError::InsufficientRole => "Insufficient permissions".to_string(),
            AppError::AccessDenied(msg) => msg.clone(),
            AppError::CrossTenantAccess => {
                "Access denied: cannot access another merchant's data".to_string()
            }
            AppError::MerchantIdRequired => "Merchant id is required".to_string(),
            AppError::MerchantNotFound => "Merchant not found".to_string(),
            AppError::MerchantStatusDenied { status } => {
                format!("Merchant account is {status}, access denied")
            }
            AppError::SubscriptionRequired => {
                "No active subscription found, please subscribe to continue".to_string()
            }
            AppError::SubscriptionExpired => {
                "Your subscription has expired, please renew to continue".to_string()
            }
            AppError::SubscriptionInactive { status } => {
                format!("Subscription is {status}, access denied")
            }
            AppError::SubscriptionCheckFailed(_) => {
                "Failed to validate subscription".to_string()
            }
            AppError::NotFound(msg) => format!("Resource not found: {msg}"),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    // 便捷方法
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        AppError::AccessDenied(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 统一响应体: {success:false, message, error} + 各状态特有字段
        let mut body = json!({
            "success": false,
            "message": self.user_message(),
            "error": self.error_code(),
        });

        match &self {
            AppError::RateLimitExceeded {
                retry_after_secs,
                limit,
                reset_epoch_secs,
            } => {
                body["retryAfter"] = json!(retry_after_secs);
                body["limit"] = json!(limit);
                body["reset"] = json!(reset_epoch_secs);
            }
            AppError::SubscriptionExpired => {
                body["isExpired"] = json!(true);
                body["needsStatusUpdate"] = json!(true);
            }
            AppError::SubscriptionInactive { status }
            | AppError::MerchantStatusDenied { status } => {
                body["status"] = json!(status);
            }
            _ => {}
        }

        if status.is_server_error() {
            // 内部错误只进日志，不泄露给客户端
            tracing::error!(code = self.code(), detail = %self, "Internal error");
        } else {
            tracing::debug!(code = self.code(), error = self.error_code(), "Request denied");
        }

        (status, Json(body)).into_response()
    }
}

/// 从 String 转换为 AppError::Config
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Config(s)
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}
