//! 测试公共设施
//!
//! 内存版存储实现（带调用计数与故障注入）、静态令牌校验器、
//! 以及完整 AppState 的构造辅助。

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::Secret;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use merchant_system::auth::TokenVerifier;
use merchant_system::config::{
    AppConfig, AuditConfig, DatabaseConfig, LoggingConfig, RateLimitConfig, SecurityConfig,
    ServerConfig, SubscriptionConfig,
};
use merchant_system::context::RequestContextStore;
use merchant_system::error::AppError;
use merchant_system::middleware::{audit::AuditPolicy, rate_limit::RateLimiters, AppState};
use merchant_system::models::audit::{AuditEvent, AuditEventFilters};
use merchant_system::models::auth::{TokenUser, UserRole};
use merchant_system::models::merchant::{
    Merchant, MerchantWithSubscription, Subscription, SubscriptionStatus,
};
use merchant_system::repository::{AuditStore, MerchantStore};
use merchant_system::services::{AuditService, ExpiryScanner, SubscriptionService};

// ==================== 内存商户存储 ====================

#[derive(Default)]
pub struct InMemoryMerchantStore {
    records: Mutex<HashMap<Uuid, MerchantWithSubscription>>,
    pub find_merchant_calls: AtomicUsize,
    pub find_overdue_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    /// 注入查询故障
    pub fail_find: AtomicBool,
    /// 注入指定订阅行的更新故障
    fail_update_for: Mutex<HashSet<Uuid>>,
    /// 查询前的人工延迟（用于并发 single-flight 测试）
    find_delay: Mutex<Option<Duration>>,
}

impl InMemoryMerchantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, record: MerchantWithSubscription) {
        self.records
            .lock()
            .unwrap()
            .insert(record.merchant.id, record);
    }

    pub fn fail_updates_for(&self, subscription_id: Uuid) {
        self.fail_update_for.lock().unwrap().insert(subscription_id);
    }

    pub fn set_find_delay(&self, delay: Duration) {
        *self.find_delay.lock().unwrap() = Some(delay);
    }

    /// 读取某条订阅当前的持久化状态
    pub fn subscription_status_of(&self, subscription_id: Uuid) -> Option<String> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter_map(|r| r.subscription.as_ref())
            .find(|s| s.id == subscription_id)
            .map(|s| s.status.clone())
    }
}

#[async_trait]
impl MerchantStore for InMemoryMerchantStore {
    async fn find_merchant(&self, id: Uuid) -> Result<Option<MerchantWithSubscription>, AppError> {
        self.find_merchant_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(AppError::internal("injected store failure"));
        }
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_update_for
            .lock()
            .unwrap()
            .contains(&subscription_id)
        {
            return Err(AppError::internal("injected update failure"));
        }

        let mut records = self.records.lock().unwrap();
        for record in records.values_mut() {
            if let Some(sub) = record.subscription.as_mut() {
                if sub.id == subscription_id {
                    sub.status = status.as_str().to_string();
                    sub.updated_at = Utc::now();
                }
            }
        }
        Ok(())
    }

    async fn find_overdue_subscriptions(
        &self,
        statuses: &[SubscriptionStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        self.find_overdue_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(AppError::internal("injected store failure"));
        }

        let delay = *self.find_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let records = self.records.lock().unwrap();
        let allowed: HashSet<&str> = statuses.iter().map(|s| s.as_str()).collect();
        Ok(records
            .values()
            .filter_map(|r| r.subscription.as_ref())
            .filter(|s| allowed.contains(s.status.as_str()) && s.current_period_end < before)
            .cloned()
            .collect())
    }
}

// ==================== 内存审计存储 ====================

#[derive(Default)]
pub struct InMemoryAuditStore {
    events: Mutex<Vec<AuditEvent>>,
    pub fail_insert: AtomicBool,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert_event(&self, event: &AuditEvent) -> Result<(), AppError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::internal("injected audit failure"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn query_events(
        &self,
        filters: &AuditEventFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, AppError> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| {
                filters
                    .entity_type
                    .as_ref()
                    .map_or(true, |t| &e.entity_type == t)
                    && filters.severity.as_ref().map_or(true, |s| &e.severity == s)
            })
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_events(&self, _filters: &AuditEventFilters) -> Result<i64, AppError> {
        Ok(self.events.lock().unwrap().len() as i64)
    }
}

// ==================== 静态令牌校验器 ====================

/// 按固定映射返回身份；"boom" 令牌模拟校验器内部异常
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: Mutex<HashMap<String, TokenUser>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &str, user: TokenUser) {
        self.tokens.lock().unwrap().insert(token.to_string(), user);
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Option<TokenUser>, AppError> {
        if token == "boom" {
            return Err(AppError::AuthenticationFailed("verifier exploded".to_string()));
        }
        Ok(self.tokens.lock().unwrap().get(token).cloned())
    }
}

// ==================== 数据构造辅助 ====================

pub fn merchant(status: &str) -> Merchant {
    Merchant {
        id: Uuid::new_v4(),
        name: "Test Merchant".to_string(),
        subscription_status: status.to_string(),
        created_at: Utc::now(),
    }
}

pub fn subscription(merchant_id: Uuid, status: &str, period_end: DateTime<Utc>) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: Uuid::new_v4(),
        merchant_id,
        plan_id: Uuid::new_v4(),
        status: status.to_string(),
        current_period_end: period_end,
        created_at: now,
        updated_at: now,
    }
}

/// 商户 + 订阅一步到位
pub fn merchant_with_subscription(
    merchant_status: &str,
    subscription_status: &str,
    period_end: DateTime<Utc>,
) -> MerchantWithSubscription {
    let m = merchant(merchant_status);
    let s = subscription(m.id, subscription_status, period_end);
    MerchantWithSubscription {
        merchant: m,
        subscription: Some(s),
    }
}

pub fn yesterday() -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(1)
}

pub fn next_month() -> DateTime<Utc> {
    Utc::now() + ChronoDuration::days(30)
}

pub fn token_user(role: UserRole, merchant_id: Option<Uuid>) -> TokenUser {
    TokenUser {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", role.as_str().to_lowercase()),
        role,
        merchant_id,
        outlet_id: None,
    }
}

// ==================== AppState 构造 ====================

pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:3000".to_string(),
            graceful_shutdown_timeout_secs: 5,
        },
        database: DatabaseConfig {
            url: Secret::new("postgresql://localhost/merchant_test".to_string()),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_lifetime_secs: 300,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            jwt_secret: Secret::new("test_secret_key_32_characters_long!".to_string()),
            trust_proxy: true,
        },
        rate_limit: RateLimitConfig {
            api_max_requests: 1000,
            api_window_secs: 60,
            search_max_requests: 30,
            search_window_secs: 60,
            sweep_interval_secs: 300,
        },
        subscription: SubscriptionConfig {
            scan_interval_secs: 3600,
            min_scan_interval_secs: 3600,
        },
        audit: AuditConfig {
            capture_bodies: true,
            max_body_bytes: 1024,
        },
    }
}

pub struct TestEnv {
    pub state: Arc<AppState>,
    pub merchants: Arc<InMemoryMerchantStore>,
    pub audits: Arc<InMemoryAuditStore>,
    pub verifier: Arc<StaticTokenVerifier>,
}

pub fn test_env() -> TestEnv {
    test_env_with(|_| {})
}

pub fn test_env_with(configure: impl FnOnce(&mut AppConfig)) -> TestEnv {
    let mut config = test_config();
    configure(&mut config);

    let merchants = Arc::new(InMemoryMerchantStore::new());
    let audits = Arc::new(InMemoryAuditStore::new());
    let verifier = Arc::new(StaticTokenVerifier::new());

    // connect_lazy 不会真正建立连接；状态里需要一个池但测试不触库
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/merchant_test")
        .expect("lazy pool");

    let merchant_store: Arc<dyn MerchantStore> = merchants.clone();
    let audit_store: Arc<dyn AuditStore> = audits.clone();

    let state = Arc::new(AppState {
        context_store: Arc::new(RequestContextStore::new()),
        rate_limiters: Arc::new(RateLimiters::from_config(&config.rate_limit)),
        token_verifier: verifier.clone(),
        merchant_store: merchant_store.clone(),
        subscription_service: Arc::new(SubscriptionService::new(merchant_store.clone())),
        audit_service: Arc::new(AuditService::new(audit_store)),
        expiry_scanner: Arc::new(ExpiryScanner::new(
            merchant_store,
            Duration::from_secs(config.subscription.min_scan_interval_secs),
        )),
        audit_policy: Arc::new(AuditPolicy::from_config(&config.audit)),
        db,
        config,
    });

    TestEnv {
        state,
        merchants,
        audits,
        verifier,
    }
}
