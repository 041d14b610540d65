//! 全管道端到端测试
//!
//! 通过完整路由验证：上下文/审计/限流/认证/租户/订阅各层的协作、
//! 身份头注入、豁免优先、以及各拒绝路径的状态码与错误码。

mod common;

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use common::*;
use merchant_system::error::AppError;
use merchant_system::middleware::auth::{authenticate, AuthRequirement};
use merchant_system::middleware::AppState;
use merchant_system::models::auth::UserRole;
use merchant_system::routes;

/// 领域 handler 占位：回显注入的身份头，证明下游无需重新验证令牌
async fn create_order(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let merchant_id = headers
        .get("x-user-merchant-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": body,
            "acting_user": user_id,
            "acting_merchant": merchant_id,
        })),
    )
}

fn domain_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/orders", post(create_order))
}

fn app(env: &TestEnv) -> Router {
    routes::create_router(env.state.clone(), domain_routes())
}

fn post_order(token: Option<&str>, query: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/orders{query}"))
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.50")
        .header("user-agent", "pos-terminal/2.1");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(json!({"name": "Flat White"}).to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn happy_path_injects_identity_and_audits() {
    let env = test_env();
    let record = merchant_with_subscription("active", "active", next_month());
    let merchant_id = record.merchant.id;
    env.merchants.add(record);

    let owner = token_user(UserRole::MerchantOwner, Some(merchant_id));
    let owner_id = owner.id;
    env.verifier.register("owner-token", owner);

    let response = app(&env)
        .oneshot(post_order(Some("owner-token"), ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("x-request-id").is_some());

    let body = body_json(response).await;
    // 身份头对下游可见
    assert_eq!(body["acting_user"], owner_id.to_string());
    assert_eq!(body["acting_merchant"], merchant_id.to_string());

    // 整条链被审计：一条 CREATE / Orders 记录，上下文快照带身份
    let events = env.audits.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "CREATE");
    assert_eq!(events[0].entity_type, "Orders");
    assert_eq!(events[0].context["user_id"], owner_id.to_string());
    assert_eq!(events[0].context["ip_address"], "203.0.113.50");
}

#[tokio::test]
async fn missing_and_invalid_tokens_are_distinct() {
    let env = test_env();

    let response = app(&env).oneshot(post_order(None, "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "TOKEN_MISSING");

    let response = app(&env)
        .oneshot(post_order(Some("garbage"), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "TOKEN_INVALID");
}

#[tokio::test]
async fn verifier_failure_is_500_not_401() {
    let env = test_env();

    let response = app(&env)
        .oneshot(post_order(Some("boom"), ""))
        .await
        .unwrap();
    // 校验器自身异常收敛为 500，不伪装成令牌拒绝
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "AUTHENTICATION_FAILED");
    assert_eq!(body["message"], "Authentication failed");
}

#[tokio::test]
async fn cross_tenant_request_is_denied() {
    let env = test_env();
    let record = merchant_with_subscription("active", "active", next_month());
    let own_merchant = record.merchant.id;
    env.merchants.add(record);

    let owner = token_user(UserRole::MerchantOwner, Some(own_merchant));
    env.verifier.register("owner-token", owner);

    let other = Uuid::new_v4();
    let response = app(&env)
        .oneshot(post_order(Some("owner-token"), &format!("?merchant_id={other}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "CROSS_TENANT_ACCESS");
}

#[tokio::test]
async fn staff_without_merchant_needs_merchant_id() {
    // 场景：角色检查通过，但身份没有商户也没有显式目标
    let env = test_env();
    let staff = token_user(UserRole::OutletStaff, None);
    env.verifier.register("staff-token", staff);

    let response = app(&env)
        .oneshot(post_order(Some("staff-token"), ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "MERCHANT_ID_REQUIRED");
}

#[tokio::test]
async fn admin_acts_on_behalf_of_merchant() {
    let env = test_env();
    let record = merchant_with_subscription("active", "active", next_month());
    let merchant_id = record.merchant.id;
    env.merchants.add(record);

    // 管理员身份没有商户，显式指定目标商户
    let admin = token_user(UserRole::Admin, None);
    env.verifier.register("admin-token", admin);

    let response = app(&env)
        .oneshot(post_order(
            Some("admin-token"),
            &format!("?merchant_id={merchant_id}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn expired_subscription_blocks_business_routes() {
    let env = test_env();
    let record = merchant_with_subscription("active", "active", yesterday());
    let merchant_id = record.merchant.id;
    let sub_id = record.subscription.as_ref().unwrap().id;
    env.merchants.add(record);

    let owner = token_user(UserRole::MerchantOwner, Some(merchant_id));
    env.verifier.register("owner-token", owner);

    let response = app(&env)
        .oneshot(post_order(Some("owner-token"), ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "SUBSCRIPTION_EXPIRED");
    assert_eq!(body["isExpired"], true);
    assert_eq!(body["needsStatusUpdate"], true);

    // 门控顺带完成了懒式修正
    assert_eq!(
        env.merchants.subscription_status_of(sub_id).as_deref(),
        Some("expired")
    );
}

#[tokio::test]
async fn exempt_route_works_even_when_expired() {
    let env = test_env();
    let record = merchant_with_subscription("active", "expired", yesterday());
    let merchant_id = record.merchant.id;
    env.merchants.add(record);

    let owner = token_user(UserRole::MerchantOwner, Some(merchant_id));
    env.verifier.register("owner-token", owner);

    // 订阅端点在豁免表里：过期商户必须还能查询自己的订阅
    let response = app(&env)
        .oneshot(
            Request::builder()
                .uri("/api/v1/subscriptions/status")
                .header("authorization", "Bearer owner-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["subscription"]["status"], "expired");
    assert_eq!(body["subscription"]["is_expired"], true);
    assert_eq!(body["permitted_operations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn audit_endpoint_is_admin_only() {
    let env = test_env();
    let owner = token_user(UserRole::MerchantOwner, Some(Uuid::new_v4()));
    env.verifier.register("owner-token", owner);
    let admin = token_user(UserRole::Admin, None);
    env.verifier.register("admin-token", admin);

    let request = |token: &str| {
        Request::builder()
            .uri("/api/v1/audit/events")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = app(&env).oneshot(request("owner-token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "INSUFFICIENT_ROLE");

    let response = app(&env).oneshot(request("admin-token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn manual_expiry_scan_returns_report() {
    let env = test_env();
    env.merchants
        .add(merchant_with_subscription("active", "active", yesterday()));
    let admin = token_user(UserRole::Admin, None);
    env.verifier.register("admin-token", admin);

    let response = app(&env)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/subscriptions/expire-scan")
                .header("authorization", "Bearer admin-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["skipped"], false);
    assert_eq!(body["report"]["total_checked"], 1);
    assert_eq!(body["report"]["marked_as_expired"], 1);
    assert_eq!(body["report"]["errors"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn custom_check_failure_is_403() {
    let env = test_env();
    let owner = token_user(UserRole::MerchantOwner, Some(Uuid::new_v4()));
    env.verifier.register("owner-token", owner);

    // 路由级细粒度检查：要求带 POS 终端头
    let requirement = AuthRequirement::business()
        .with_custom_check(|_auth, req| req.headers().contains_key("x-pos-terminal"));

    let mut req = Request::builder()
        .uri("/api/v1/orders")
        .header("authorization", "Bearer owner-token")
        .body(Body::empty())
        .unwrap();
    let result = authenticate(&env.state, &mut req, &requirement).await;
    match result {
        Err(e @ AppError::AccessDenied(_)) => assert_eq!(e.code(), 403),
        other => panic!("expected custom-check denial, got {other:?}"),
    }

    // 带上终端头后放行
    let mut req = Request::builder()
        .uri("/api/v1/orders")
        .header("authorization", "Bearer owner-token")
        .header("x-pos-terminal", "t-9")
        .body(Body::empty())
        .unwrap();
    let auth = authenticate(&env.state, &mut req, &requirement)
        .await
        .unwrap()
        .expect("authenticated");
    assert_eq!(auth.role, UserRole::MerchantOwner);
    // 身份头已注入到下游请求
    assert!(req.headers().get("x-user-id").is_some());
    assert!(req.headers().get("x-user-merchant-id").is_some());
}

#[tokio::test]
async fn denied_requests_are_audited_as_warnings() {
    let env = test_env();

    // 无令牌的写请求：401 也要进入审计（WARNING）
    let response = app(&env).oneshot(post_order(None, "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let events = env.audits.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, "WARNING");
    assert_eq!(events[0].category, "BUSINESS");
}
