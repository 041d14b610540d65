//! Audit repository (审计数据访问)

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::AuditStore;
use crate::error::AppError;
use crate::models::audit::{AuditEvent, AuditEventFilters};

pub struct PgAuditRepository {
    db: PgPool,
}

impl PgAuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 按过滤条件拼接 WHERE 子句，返回 (SQL 片段, 已占用的绑定序号)
    fn build_where(filters: &AuditEventFilters) -> (String, usize) {
        let mut clause = String::from(" WHERE 1=1");
        let mut index = 0;

        if filters.entity_type.is_some() {
            index += 1;
            clause.push_str(&format!(" AND entity_type = ${index}"));
        }
        if filters.entity_id.is_some() {
            index += 1;
            clause.push_str(&format!(" AND entity_id = ${index}"));
        }
        if filters.action.is_some() {
            index += 1;
            clause.push_str(&format!(" AND action = ${index}"));
        }
        if filters.severity.is_some() {
            index += 1;
            clause.push_str(&format!(" AND severity = ${index}"));
        }
        if filters.category.is_some() {
            index += 1;
            clause.push_str(&format!(" AND category = ${index}"));
        }
        if filters.start_time.is_some() {
            index += 1;
            clause.push_str(&format!(" AND created_at >= ${index}"));
        }
        if filters.end_time.is_some() {
            index += 1;
            clause.push_str(&format!(" AND created_at <= ${index}"));
        }

        (clause, index)
    }
}

macro_rules! bind_filters {
    ($query:expr, $filters:expr) => {{
        let mut q = $query;
        if let Some(entity_type) = &$filters.entity_type {
            q = q.bind(entity_type);
        }
        if let Some(entity_id) = &$filters.entity_id {
            q = q.bind(entity_id);
        }
        if let Some(action) = &$filters.action {
            q = q.bind(action);
        }
        if let Some(severity) = &$filters.severity {
            q = q.bind(severity);
        }
        if let Some(category) = &$filters.category {
            q = q.bind(category);
        }
        if let Some(start_time) = $filters.start_time {
            q = q.bind(start_time);
        }
        if let Some(end_time) = $filters.end_time {
            q = q.bind(end_time);
        }
        q
    }};
}

#[async_trait]
impl AuditStore for PgAuditRepository {
    async fn insert_event(&self, event: &AuditEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, action, entity_type, entity_id, entity_name, old_values, new_values,
                severity, category, context, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(&event.action)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.entity_name)
        .bind(&event.old_values)
        .bind(&event.new_values)
        .bind(&event.severity)
        .bind(&event.category)
        .bind(&event.context)
        .bind(&event.description)
        .bind(event.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn query_events(
        &self,
        filters: &AuditEventFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, AppError> {
        let (clause, index) = Self::build_where(filters);
        let query = format!(
            "SELECT * FROM audit_events{clause} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            index + 1,
            index + 2
        );

        let query_builder = bind_filters!(sqlx::query_as::<_, AuditEvent>(&query), filters);

        let events = query_builder
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        Ok(events)
    }

    async fn count_events(&self, filters: &AuditEventFilters) -> Result<i64, AppError> {
        let (clause, _) = Self::build_where(filters);
        let query = format!("SELECT COUNT(*) FROM audit_events{clause}");

        let query_builder = bind_filters!(sqlx::query(&query), filters);

        let count: i64 = query_builder.fetch_one(&self.db).await?.get(0);
        Ok(count)
    }
}
