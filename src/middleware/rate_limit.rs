//! 限流中间件
//!
//! 固定窗口计数：首次命中建桶 count=1，窗口内递增，窗口过后整桶替换
//! 而不是滑动剔除。刚好等过窗口边界的客户端会拿到全新额度，这是
//! 有意保留的边界行为。两个命名策略：通用 API（仅按 IP），
//! 搜索/联想（短窗口低上限，指纹混入 user-agent 以减少共享 IP 误伤）。

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::AppState;
use crate::config::RateLimitConfig;
use crate::context::client_ip;
use crate::error::AppError;

/// 指纹构成策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// 仅客户端 IP
    Ip,
    /// IP + user-agent（截断到 64 字节）
    IpAndUserAgent,
}

/// 单个命名策略的配置
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: u32,
    pub key: KeyStrategy,
}

/// 限流桶：窗口结束前的计数
#[derive(Debug)]
struct RateLimitBucket {
    count: u32,
    reset_at_ms: i64,
}

/// 限流判定结果。拒绝不是错误：结构化返回给调用方翻译成协议响应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_epoch_secs: i64,
    },
    Denied {
        limit: u32,
        retry_after_secs: u64,
        reset_epoch_secs: i64,
    },
}

/// 固定窗口限流器
pub struct FixedWindowRateLimiter {
    policy: RateLimitPolicy,
    buckets: DashMap<String, RateLimitBucket>,
}

impl FixedWindowRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            buckets: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// 按策略组装指纹。策略名编入键里，两个策略的桶互不串扰。
    pub fn fingerprint(&self, ip: &str, user_agent: Option<&str>) -> String {
        match self.policy.key {
            KeyStrategy::Ip => format!("{}:{}", self.policy.name, ip),
            KeyStrategy::IpAndUserAgent => {
                // 截断防止超长 UA 撑爆键空间
                let ua: String = user_agent.unwrap_or("unknown").chars().take(64).collect();
                format!("{}:{}:{}", self.policy.name, ip, ua)
            }
        }
    }

    /// 检查一次命中
    pub fn check(&self, ip: &str, user_agent: Option<&str>) -> RateLimitDecision {
        self.check_at(self.fingerprint(ip, user_agent), Utc::now().timestamp_millis())
    }

    /// 检查逻辑本体。DashMap entry 持有分片锁，
    /// 单个键上的读-改-写是原子的。
    fn check_at(&self, key: String, now_ms: i64) -> RateLimitDecision {
        let window_ms = self.policy.window.as_millis() as i64;
        let limit = self.policy.max_requests;

        let mut bucket = self.buckets.entry(key).or_insert_with(|| RateLimitBucket {
            count: 0,
            reset_at_ms: now_ms + window_ms,
        });

        // 窗口已过：整桶替换，重新从 1 计数
        if now_ms > bucket.reset_at_ms {
            bucket.count = 1;
            bucket.reset_at_ms = now_ms + window_ms;
            return RateLimitDecision::Allowed {
                limit,
                remaining: limit.saturating_sub(1),
                reset_epoch_secs: bucket.reset_at_ms / 1000,
            };
        }

        bucket.count += 1;

        if bucket.count > limit {
            let retry_after_ms = (bucket.reset_at_ms - now_ms).max(0) as u64;
            RateLimitDecision::Denied {
                limit,
                // 向上取整到秒
                retry_after_secs: retry_after_ms.div_ceil(1000),
                reset_epoch_secs: bucket.reset_at_ms / 1000,
            }
        } else {
            RateLimitDecision::Allowed {
                limit,
                remaining: limit - bucket.count,
                reset_epoch_secs: bucket.reset_at_ms / 1000,
            }
        }
    }

    /// 删除窗口已过的桶，限制内存占用
    pub fn sweep_expired(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.reset_at_ms >= now_ms);
        before - self.buckets.len()
    }

    /// 当前追踪的指纹数量
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

/// 两个命名策略的限流器集合
pub struct RateLimiters {
    /// 通用 API 流量：长窗口、高上限、仅按 IP
    pub api: FixedWindowRateLimiter,
    /// 搜索/联想端点：短窗口、低上限、IP + user-agent
    pub search: FixedWindowRateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            api: FixedWindowRateLimiter::new(RateLimitPolicy {
                name: "api",
                window: Duration::from_secs(config.api_window_secs),
                max_requests: config.api_max_requests,
                key: KeyStrategy::Ip,
            }),
            search: FixedWindowRateLimiter::new(RateLimitPolicy {
                name: "search",
                window: Duration::from_secs(config.search_window_secs),
                max_requests: config.search_max_requests,
                key: KeyStrategy::IpAndUserAgent,
            }),
        }
    }

    /// 启动周期清理任务
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = self.api.sweep_expired() + self.search.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired rate limit buckets");
                }
            }
        })
    }
}

/// 通用 API 限流中间件
pub async fn api_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    enforce(&state.rate_limiters.api, &state, req, next).await
}

/// 搜索端点限流中间件（由嵌入方挂在搜索/联想路由上）
pub async fn search_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    enforce(&state.rate_limiters.search, &state, req, next).await
}

async fn enforce(
    limiter: &FixedWindowRateLimiter,
    state: &AppState,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), state.config.security.trust_proxy);
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let decision = limiter.check(&ip, user_agent.as_deref());

    match decision {
        RateLimitDecision::Allowed {
            limit,
            remaining,
            reset_epoch_secs,
        } => {
            let mut response = next.run(req).await;
            set_rate_limit_headers(response.headers_mut(), limit, remaining, reset_epoch_secs);
            response
        }
        RateLimitDecision::Denied {
            limit,
            retry_after_secs,
            reset_epoch_secs,
        } => {
            metrics::counter!("rate_limit_denials_total", "policy" => limiter.policy().name)
                .increment(1);
            tracing::warn!(
                client_ip = %ip,
                policy = limiter.policy().name,
                retry_after_secs,
                uri = %req.uri().path(),
                "Rate limit exceeded"
            );

            let mut response = AppError::RateLimitExceeded {
                retry_after_secs,
                limit,
                reset_epoch_secs,
            }
            .into_response();
            set_rate_limit_headers(response.headers_mut(), limit, 0, reset_epoch_secs);
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
    }
}

fn set_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: i64) {
    if let Ok(value) = limit.to_string().parse() {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = reset.to_string().parse() {
        headers.insert("x-ratelimit-reset", value);
    }
}
