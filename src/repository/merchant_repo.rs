//! Merchant repository (商户数据访问)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::MerchantStore;
use crate::error::AppError;
use crate::models::merchant::{Merchant, MerchantWithSubscription, Subscription, SubscriptionStatus};

pub struct PgMerchantRepository {
    db: PgPool,
}

impl PgMerchantRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MerchantStore for PgMerchantRepository {
    async fn find_merchant(&self, id: Uuid) -> Result<Option<MerchantWithSubscription>, AppError> {
        let merchant = sqlx::query_as::<_, Merchant>(
            "SELECT id, name, subscription_status, created_at FROM merchants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let Some(merchant) = merchant else {
            return Ok(None);
        };

        // 每个商户最多一条当前订阅，取最近创建的一条
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, merchant_id, plan_id, status, current_period_end, created_at, updated_at
            FROM subscriptions
            WHERE merchant_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(Some(MerchantWithSubscription {
            merchant,
            subscription,
        }))
    }

    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE subscriptions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(subscription_id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn find_overdue_subscriptions(
        &self,
        statuses: &[SubscriptionStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let status_names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, merchant_id, plan_id, status, current_period_end, created_at, updated_at
            FROM subscriptions
            WHERE status = ANY($1) AND current_period_end < $2
            ORDER BY current_period_end ASC
            "#,
        )
        .bind(&status_names)
        .bind(before)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}
