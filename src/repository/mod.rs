//! 数据访问层
//!
//! 管道通过 [`MerchantStore`] / [`AuditStore`] 两个 trait 消费持久化存储，
//! Postgres 实现在本模块下；测试可替换为内存实现。

pub mod audit_repo;
pub mod merchant_repo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit::{AuditEvent, AuditEventFilters};
use crate::models::merchant::{MerchantWithSubscription, Subscription, SubscriptionStatus};

/// 商户与订阅的存储操作
#[async_trait]
pub trait MerchantStore: Send + Sync {
    /// 查询商户及其当前订阅（零或一条）
    async fn find_merchant(&self, id: Uuid) -> Result<Option<MerchantWithSubscription>, AppError>;

    /// 更新订阅状态（同时推进 updated_at）
    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError>;

    /// 查询所有状态在 `statuses` 内且 current_period_end 早于 `before` 的订阅
    async fn find_overdue_subscriptions(
        &self,
        statuses: &[SubscriptionStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError>;
}

/// 审计记录的存储操作
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_event(&self, event: &AuditEvent) -> Result<(), AppError>;

    async fn query_events(
        &self,
        filters: &AuditEventFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, AppError>;

    async fn count_events(&self, filters: &AuditEventFilters) -> Result<i64, AppError>;
}

pub use audit_repo::PgAuditRepository;
pub use merchant_repo::PgMerchantRepository;
