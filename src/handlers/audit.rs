//! 审计日志的 HTTP 处理器

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::AppError,
    middleware::{auth::AuthContext, AppState},
    models::audit::AuditEventFilters,
};

#[derive(Debug, Deserialize, Validate)]
pub struct AuditEventQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 500))]
    pub limit: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 查询审计记录（管理员路由组，见 routes.rs）
pub async fn list_audit_events(
    State(state): State<Arc<AppState>>,
    _auth_context: AuthContext,
    Query(query): Query<AuditEventQuery>,
) -> Result<impl IntoResponse, AppError> {
    query
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    let filters = AuditEventFilters {
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        action: query.action,
        severity: query.severity,
        category: query.category,
        start_time: query.start_time,
        end_time: query.end_time,
    };

    let events = state
        .audit_service
        .query_events(&filters, query.limit, query.offset)
        .await?;
    let total = state.audit_service.count_events(&filters).await?;

    Ok(Json(json!({
        "success": true,
        "events": events,
        "count": events.len(),
        "total": total
    })))
}
