//! 订阅校验服务
//!
//! 订阅生命周期状态机与访问决策。读取到已过期但状态仍为
//! active/paused 的订阅时，在决策前先把状态懒式修正为 expired
//! （发现式过期，补充后台扫描）。

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::merchant::{Merchant, Subscription, SubscriptionStatus};
use crate::repository::MerchantStore;

/// validate_access 的选项
#[derive(Debug, Clone)]
pub struct ValidateAccessOptions {
    /// 是否要求存在有效订阅
    pub require_active_subscription: bool,
    /// 允许通过的订阅状态集合（默认只有 active）
    pub allowed_statuses: Vec<SubscriptionStatus>,
    /// 是否同时校验商户自身的顶层 subscription_status 字段
    pub check_merchant_status: bool,
    /// 是否执行懒式过期写入
    pub auto_update_expired: bool,
}

impl Default for ValidateAccessOptions {
    fn default() -> Self {
        Self {
            require_active_subscription: true,
            allowed_statuses: vec![SubscriptionStatus::Active],
            check_merchant_status: true,
            auto_update_expired: true,
        }
    }
}

/// 校验通过时返回的商户与订阅快照
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub merchant: Merchant,
    pub subscription: Option<Subscription>,
}

pub struct SubscriptionService {
    store: Arc<dyn MerchantStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn MerchantStore>) -> Self {
        Self { store }
    }

    /// 校验商户的订阅状态是否允许访问。
    ///
    /// 决策顺序：商户存在 → 商户顶层状态 → 订阅存在 → 懒式过期修正 →
    /// 订阅状态在允许集合内。存储层故障返回
    /// [`AppError::SubscriptionCheckFailed`]（500），与业务拒绝严格区分。
    pub async fn validate_access(
        &self,
        merchant_id: Uuid,
        options: &ValidateAccessOptions,
    ) -> Result<AccessGrant, AppError> {
        let found = self
            .store
            .find_merchant(merchant_id)
            .await
            .map_err(|e| AppError::SubscriptionCheckFailed(e.to_string()))?;

        // (1) 商户必须存在
        let Some(record) = found else {
            return Err(AppError::MerchantNotFound);
        };
        let merchant = record.merchant;
        let mut subscription = record.subscription;

        // (2) 商户顶层状态校验（独立于订阅行自身的状态）
        if options.check_merchant_status && !self.status_allowed(&merchant.subscription_status, options)
        {
            tracing::warn!(
                merchant_id = %merchant.id,
                status = %merchant.subscription_status,
                "Merchant account status denied"
            );
            return Err(AppError::MerchantStatusDenied {
                status: merchant.subscription_status.clone(),
            });
        }

        if !options.require_active_subscription {
            return Ok(AccessGrant {
                merchant,
                subscription,
            });
        }

        // (3) 必须存在订阅行
        let Some(sub) = subscription.as_mut() else {
            tracing::warn!(merchant_id = %merchant.id, "No subscription on record");
            return Err(AppError::SubscriptionRequired);
        };

        // (4) 懒式过期：周期已结束但状态仍为 active/paused 的行
        //     在作出决策前先落盘修正为 expired
        let now = Utc::now();
        if sub.is_stale(now) {
            if options.auto_update_expired {
                if let Err(e) = self
                    .store
                    .update_subscription_status(sub.id, SubscriptionStatus::Expired)
                    .await
                {
                    // 修正失败不阻断拒绝：行依然过期，不可信任
                    tracing::error!(
                        subscription_id = %sub.id,
                        error = %e,
                        "Failed to persist lazy expiry"
                    );
                } else {
                    metrics::counter!("subscriptions_expired_total", "source" => "lazy").increment(1);
                    sub.status = SubscriptionStatus::Expired.as_str().to_string();
                    sub.updated_at = now;
                }
            }

            tracing::warn!(
                merchant_id = %merchant.id,
                subscription_id = %sub.id,
                period_end = %sub.current_period_end,
                "Subscription expired at point of use"
            );
            return Err(AppError::SubscriptionExpired);
        }

        // (5) 订阅状态必须在允许集合内
        if !self.status_allowed(&sub.status, options) {
            tracing::warn!(
                merchant_id = %merchant.id,
                status = %sub.status,
                "Subscription status not allowed"
            );
            return Err(AppError::SubscriptionInactive {
                status: sub.status.clone(),
            });
        }

        Ok(AccessGrant {
            merchant,
            subscription,
        })
    }

    /// 状态字符串是否落在允许集合内（大小写不敏感；无法解析的状态一律拒绝）
    fn status_allowed(&self, status: &str, options: &ValidateAccessOptions) -> bool {
        SubscriptionStatus::parse(status)
            .is_some_and(|s| options.allowed_statuses.contains(&s))
    }
}
