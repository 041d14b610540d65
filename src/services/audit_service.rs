//! 审计日志服务

use std::sync::Arc;

use crate::error::AppError;
use crate::models::audit::{AuditEvent, AuditEventFilters};
use crate::repository::AuditStore;

/// 审计事件的持久化门面
///
/// 写入失败只记日志不上抛：审计故障不能改变被包裹调用的对外结果。
pub struct AuditService {
    store: Arc<dyn AuditStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// 持久化一条审计记录。错误被吞掉（记入日志与指标）。
    pub async fn record(&self, event: AuditEvent) {
        let entity_type = event.entity_type.clone();
        let severity = event.severity.clone();

        match self.store.insert_event(&event).await {
            Ok(()) => {
                metrics::counter!("audit_events_total", "severity" => severity).increment(1);
            }
            Err(e) => {
                metrics::counter!("audit_write_failures_total").increment(1);
                tracing::error!(
                    entity_type = %entity_type,
                    action = %event.action,
                    error = %e,
                    "Failed to persist audit event"
                );
            }
        }
    }

    /// 查询审计记录
    pub async fn query_events(
        &self,
        filters: &AuditEventFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, AppError> {
        self.store.query_events(filters, limit, offset).await
    }

    /// 查询审计记录数量
    pub async fn count_events(&self, filters: &AuditEventFilters) -> Result<i64, AppError> {
        self.store.count_events(filters).await
    }
}
