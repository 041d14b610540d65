//! 订阅状态与到期扫描的 HTTP 处理器

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::AppError,
    middleware::{auth::AuthContext, tenant::TenantScope, AppState},
    models::merchant::{Operation, SubscriptionStatus},
    services::ScanOutcome,
};

/// 查询当前租户的订阅状态与允许的操作集合
pub async fn subscription_status(
    State(state): State<Arc<AppState>>,
    _auth_context: AuthContext,
    TenantScope(merchant_id): TenantScope,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .merchant_store
        .find_merchant(merchant_id)
        .await?
        .ok_or(AppError::MerchantNotFound)?;

    let subscription = record.subscription;
    let permitted: Vec<&'static str> = subscription
        .as_ref()
        .and_then(|s| s.status())
        .map(|status| {
            status
                .permitted_operations()
                .iter()
                .map(|op| match op {
                    Operation::Create => "create",
                    Operation::Read => "read",
                    Operation::Update => "update",
                    Operation::Delete => "delete",
                    Operation::Admin => "admin",
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Json(json!({
        "success": true,
        "merchant_id": record.merchant.id,
        "merchant_status": record.merchant.subscription_status,
        "subscription": subscription.as_ref().map(|s| json!({
            "id": s.id,
            "status": s.status,
            "plan_id": s.plan_id,
            "current_period_end": s.current_period_end,
            "is_expired": s.status().is_some_and(|st| st == SubscriptionStatus::Expired),
        })),
        "permitted_operations": permitted,
    })))
}

/// 手动触发一次到期扫描（管理员）。返回结构化扫描结果；
/// 若被 single-flight 防线跳过则如实报告，不排队。
pub async fn trigger_expiry_scan(
    State(state): State<Arc<AppState>>,
    _auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    match state.expiry_scanner.trigger().await {
        ScanOutcome::Completed(report) => Ok(Json(json!({
            "success": true,
            "skipped": false,
            "report": report,
        }))),
        ScanOutcome::SkippedInFlight => Ok(Json(json!({
            "success": true,
            "skipped": true,
            "reason": "scan already in flight",
        }))),
        ScanOutcome::SkippedInterval => Ok(Json(json!({
            "success": true,
            "skipped": true,
            "reason": "minimum scan interval not elapsed",
        }))),
    }
}
