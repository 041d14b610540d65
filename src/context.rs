//! 请求上下文存储
//! 为每个请求维护短生命周期的元数据：网络信息、身份信息、方法/路径等。
//! 条目按 request_id 存入共享表，供无法按参数传递上下文的下游代码查询；
//! "当前上下文"通过 task-local 绑定到本请求的逻辑任务，
//! 并发请求之间互不可见。

use axum::http::{request::Parts, HeaderMap};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::auth::TokenUser;

/// 上下文条目的存活时间，超过后由后台清理任务删除
pub const CONTEXT_TTL: Duration = Duration::from_secs(5 * 60);

tokio::task_local! {
    /// 当前请求的 request_id，由上下文中间件在请求任务上作用域内设置
    static CURRENT_REQUEST_ID: String;
}

/// 单个请求的元数据快照
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub request_id: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub user_role: Option<String>,
    pub merchant_id: Option<Uuid>,
    pub outlet_id: Option<Uuid>,
    /// 开放映射，至少包含 method/url/timestamp
    pub metadata: Map<String, Value>,
}

impl RequestContext {
    /// 用已验证的身份字段补全上下文
    pub fn apply_identity(&mut self, user: &TokenUser) {
        self.user_id = Some(user.id);
        self.user_email = Some(user.email.clone());
        self.user_role = Some(user.role.as_str().to_string());
        self.merchant_id = user.merchant_id;
        self.outlet_id = user.outlet_id;
    }
}

/// 按 request_id 索引的上下文表
#[derive(Default)]
pub struct RequestContextStore {
    entries: DashMap<String, RequestContext>,
}

impl RequestContextStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 生成 request_id。创建时刻的毫秒时间戳编码在 id 前缀里，
    /// 清理任务据此判断条目年龄，无需额外存储时间字段。
    pub fn generate_request_id() -> String {
        format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
    }

    /// 从 request_id 还原创建时刻（毫秒）
    fn created_at_millis(request_id: &str) -> Option<i64> {
        request_id.split('-').next()?.parse().ok()
    }

    /// 从请求头捕获一个新的上下文条目并存入表中
    pub fn capture(&self, parts: &Parts, trust_proxy: bool) -> RequestContext {
        let request_id = Self::generate_request_id();

        let mut metadata = Map::new();
        metadata.insert("method".to_string(), json!(parts.method.as_str()));
        metadata.insert("url".to_string(), json!(parts.uri.to_string()));
        metadata.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));

        let context = RequestContext {
            request_id: request_id.clone(),
            ip_address: client_ip(&parts.headers, trust_proxy),
            user_agent: header_str(&parts.headers, "user-agent"),
            session_id: header_str(&parts.headers, "x-session-id"),
            user_id: None,
            user_email: None,
            user_role: None,
            merchant_id: None,
            outlet_id: None,
            metadata,
        };

        self.entries.insert(request_id, context.clone());
        context
    }

    /// 按 id 查询（克隆快照；其他请求的写入不影响已取出的副本）
    pub fn get(&self, request_id: &str) -> Option<RequestContext> {
        self.entries.get(request_id).map(|e| e.clone())
    }

    /// 令牌验证成功后回填身份字段
    pub fn update_identity(&self, request_id: &str, user: &TokenUser) {
        if let Some(mut entry) = self.entries.get_mut(request_id) {
            entry.apply_identity(user);
        }
    }

    /// 显式删除一个条目
    pub fn clear(&self, request_id: &str) {
        self.entries.remove(request_id);
    }

    /// 删除超过 TTL 的条目，返回删除数量
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now().timestamp_millis() - CONTEXT_TTL.as_millis() as i64;
        let before = self.entries.len();
        self.entries.retain(|id, _| {
            // 无法解析年龄的条目视为过期
            Self::created_at_millis(id).is_some_and(|created| created >= cutoff)
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 启动周期清理任务
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired request contexts");
                }
            }
        })
    }

    /// 在当前请求作用域内运行 `fut`，期间 [`current_request_id`] 可用
    pub async fn scope<F>(request_id: String, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT_REQUEST_ID.scope(request_id, fut).await
    }

    /// 当前任务对应的上下文快照
    pub fn current(&self) -> Option<RequestContext> {
        current_request_id().and_then(|id| self.get(&id))
    }
}

/// 当前任务绑定的 request_id（仅在请求作用域内存在）
pub fn current_request_id() -> Option<String> {
    CURRENT_REQUEST_ID.try_with(|id| id.clone()).ok()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// 获取客户端 IP。信任代理时依次尝试 X-Forwarded-For（取第一个）、
/// X-Real-IP，否则返回 "unknown"（连接级地址由上层 ConnectInfo 提供）。
pub fn client_ip(headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                let ip = first.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if !real_ip.is_empty() {
                return real_ip.to_string();
            }
        }
    }

    "unknown".to_string()
}
