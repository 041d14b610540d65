//! 审计管道中间件
//!
//! 包裹整条请求/响应链：按方法与路径决定是否审计，非破坏性地缓冲
//! 请求/响应体，从 URL 推断实体，按状态码分级，最后持久化一条
//! 审计记录。被包裹的调用以 5xx 收场时照样产出记录（severity=ERROR），
//! 且写入失败绝不影响对客户端的响应。

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::config::AuditConfig;
use crate::models::audit::{
    AuditAction, AuditCategory, AuditEvent, AuditSeverity, ExtractableFields,
};

/// 审计策略：哪些请求要审计、捕获多少
#[derive(Debug, Clone)]
pub struct AuditPolicy {
    /// 要审计的方法（默认写方法；GET 不默认审计以控制量）
    pub methods: Vec<Method>,
    /// 包含路径前缀（默认整个 API 命名空间）
    pub include_prefixes: Vec<String>,
    /// 排除路径前缀。排除在包含之后判定，始终获胜。
    pub exclude_prefixes: Vec<String>,
    /// 是否捕获请求/响应体
    pub capture_bodies: bool,
    /// 捕获体落盘的字节上限
    pub max_body_bytes: usize,
}

impl AuditPolicy {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            methods: vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            include_prefixes: vec!["/api".to_string()],
            exclude_prefixes: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/api/v1/system".to_string(),
                "/docs".to_string(),
            ],
            capture_bodies: config.capture_bodies,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// 是否审计该请求
    pub fn should_audit(&self, method: &Method, path: &str) -> bool {
        if !self.methods.contains(method) {
            return false;
        }
        if !self
            .include_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return false;
        }
        !self
            .exclude_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// 从路径推断实体类型与 id：API 根后的第一段是实体类型（首字母
/// 大写），第二段（若有）是实体 id。
pub fn infer_entity(path: &str) -> (String, Option<String>) {
    let mut segments = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .peekable();

    // 跳过 API 根与版本段
    if segments.peek() == Some(&"api") {
        segments.next();
    }
    if segments
        .peek()
        .is_some_and(|s| s.len() >= 2 && s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit()))
    {
        segments.next();
    }

    let entity_type = match segments.next() {
        Some(seg) => capitalize(seg),
        None => "Unknown".to_string(),
    };
    let entity_id = segments.next().map(|s| s.to_string());

    (entity_type, entity_id)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// 审计中间件
pub async fn audit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let policy = state.audit_policy.clone();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if !policy.should_audit(&method, &path) {
        return next.run(req).await;
    }

    // 非破坏性缓冲请求体：整体读入后原样重建，真正的 handler 照常消费
    let (parts, body) = req.into_parts();
    let request_bytes = collect_bytes(body).await;
    let request_json = parse_json(&request_bytes);
    let req = Request::from_parts(parts, Body::from(request_bytes.clone()));

    let response = next.run(req).await;

    // 同样缓冲响应体
    let (response_parts, response_body) = response.into_parts();
    let response_bytes = collect_bytes(response_body).await;
    let response_json = parse_json(&response_bytes);
    let status = response_parts.status.as_u16();

    let event = build_event(
        &state,
        &policy,
        &method,
        &path,
        status,
        request_json.as_ref(),
        response_json.as_ref(),
        request_bytes.len(),
    );

    state.audit_service.record(event).await;

    Response::from_parts(response_parts, Body::from(response_bytes))
}

async fn collect_bytes(body: Body) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer body for audit");
            Bytes::new()
        }
    }
}

fn parse_json(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    state: &AppState,
    policy: &AuditPolicy,
    method: &Method,
    path: &str,
    status: u16,
    request_json: Option<&Value>,
    response_json: Option<&Value>,
    request_body_len: usize,
) -> AuditEvent {
    let action = AuditAction::from_method(method);
    let severity = AuditSeverity::from_status(status);
    let failed = status >= 500;

    // 处理链以 5xx 收场视为"抛出"：强制 SYSTEM 类别并带上错误消息
    let category = if failed {
        AuditCategory::System
    } else {
        AuditCategory::from_path(path)
    };

    let (entity_type, path_entity_id) = infer_entity(path);
    let entity_id = path_entity_id.or_else(|| request_json.and_then(|v| v.entity_id()));

    // 实体名推断：请求体字段 → 响应体 data 字段 → 通用回退
    let entity_name = request_json
        .and_then(|v| v.display_name())
        .or_else(|| {
            response_json
                .and_then(|v| v.get("data"))
                .and_then(|data| data.display_name())
        })
        .unwrap_or_else(|| match &entity_id {
            Some(id) => format!("{entity_type} {id}"),
            None => format!("{entity_type} {}", action.as_str().to_lowercase()),
        });

    let mut description = format!("{} {} -> {}", method, path, status);
    if failed {
        let message = response_json
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unhandled error");
        description = format!("{description} ({message})");
    }

    // 体捕获按配置开启并受大小上限约束
    let new_values = if policy.capture_bodies && !failed {
        match request_json {
            Some(v) if request_body_len <= policy.max_body_bytes => Some(v.clone()),
            Some(_) => Some(json!({"truncated": true, "original_bytes": request_body_len})),
            None => None,
        }
    } else {
        None
    };

    // 上下文快照：当前请求作用域内的条目
    let context = state
        .context_store
        .current()
        .and_then(|ctx| serde_json::to_value(ctx).ok())
        .unwrap_or_else(|| json!({}));

    AuditEvent {
        id: Uuid::new_v4(),
        action: action.as_str().to_string(),
        entity_type,
        entity_id,
        entity_name: Some(entity_name),
        old_values: None,
        new_values,
        severity: severity.as_str().to_string(),
        category: category.as_str().to_string(),
        context,
        description,
        created_at: Utc::now(),
    }
}
