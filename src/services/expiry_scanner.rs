//! 订阅到期后台扫描
//!
//! 周期性地把 current_period_end 已过、状态仍为 active/paused 的订阅
//! 批量置为 expired。进程内 single-flight：进行中标志 + 最小间隔，
//! 重复触发是 no-op 而不是排队。标记已过期的行再标记一次无害，
//! 所以这里不需要分布式锁。

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::merchant::SubscriptionStatus;
use crate::repository::MerchantStore;

/// 单次扫描的结构化结果（手动触发时返回给调用方）
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpiryScanReport {
    pub total_checked: usize,
    pub expired_found: usize,
    pub marked_as_expired: usize,
    pub errors: Vec<String>,
}

/// 触发结果
#[derive(Debug)]
pub enum ScanOutcome {
    /// 执行了一次扫描
    Completed(ExpiryScanReport),
    /// 已有扫描在进行中，本次触发被忽略
    SkippedInFlight,
    /// 距上次扫描未满最小间隔，本次触发被忽略
    SkippedInterval,
}

impl ScanOutcome {
    pub fn was_skipped(&self) -> bool {
        !matches!(self, ScanOutcome::Completed(_))
    }
}

pub struct ExpiryScanner {
    store: Arc<dyn MerchantStore>,
    /// 进行中标志：同一进程内至多一次扫描在飞
    in_flight: AtomicBool,
    /// 上次扫描完成时刻
    last_run: Mutex<Option<Instant>>,
    /// 两次扫描的最小间隔
    min_interval: Duration,
}

impl ExpiryScanner {
    pub fn new(store: Arc<dyn MerchantStore>, min_interval: Duration) -> Self {
        Self {
            store,
            in_flight: AtomicBool::new(false),
            last_run: Mutex::new(None),
            min_interval,
        }
    }

    /// 触发一次扫描。两道进程内防线依次放行：
    /// 最小间隔未到或已有扫描在飞都直接返回 no-op。
    pub async fn trigger(&self) -> ScanOutcome {
        {
            let last = self.last_run.lock().unwrap();
            if let Some(at) = *last {
                if at.elapsed() < self.min_interval {
                    tracing::debug!("Expiry scan skipped: minimum interval not elapsed");
                    return ScanOutcome::SkippedInterval;
                }
            }
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Expiry scan skipped: already in flight");
            return ScanOutcome::SkippedInFlight;
        }

        let report = self.scan().await;

        *self.last_run.lock().unwrap() = Some(Instant::now());
        self.in_flight.store(false, Ordering::SeqCst);

        ScanOutcome::Completed(report)
    }

    /// 扫描主体。每一行独立更新：单行失败记入 errors 并继续，
    /// 不会中断整批。
    async fn scan(&self) -> ExpiryScanReport {
        let mut report = ExpiryScanReport::default();

        let overdue = match self
            .store
            .find_overdue_subscriptions(
                &[SubscriptionStatus::Active, SubscriptionStatus::Paused],
                Utc::now(),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Expiry scan query failed");
                report.errors.push(format!("query failed: {e}"));
                return report;
            }
        };

        report.total_checked = overdue.len();
        report.expired_found = overdue.len();

        for sub in overdue {
            match self
                .store
                .update_subscription_status(sub.id, SubscriptionStatus::Expired)
                .await
            {
                Ok(()) => {
                    report.marked_as_expired += 1;
                    tracing::info!(
                        subscription_id = %sub.id,
                        merchant_id = %sub.merchant_id,
                        period_end = %sub.current_period_end,
                        "Subscription marked expired"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = %sub.id,
                        error = %e,
                        "Failed to mark subscription expired"
                    );
                    report.errors.push(format!("subscription {}: {e}", sub.id));
                }
            }
        }

        metrics::counter!("subscriptions_expired_total", "source" => "scan")
            .increment(report.marked_as_expired as u64);

        report
    }

    /// 启动定时扫描任务。定时触发只记日志；任何一轮的失败都不会
    /// 让定时循环退出。
    pub fn spawn_timer(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.trigger().await {
                    ScanOutcome::Completed(report) => {
                        tracing::info!(
                            total_checked = report.total_checked,
                            marked_as_expired = report.marked_as_expired,
                            errors = report.errors.len(),
                            "Expiry scan completed"
                        );
                    }
                    ScanOutcome::SkippedInFlight | ScanOutcome::SkippedInterval => {}
                }
            }
        })
    }
}
