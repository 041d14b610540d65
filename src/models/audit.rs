//! Audit domain models and classification tables

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Audited action, derived from the HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    View,
    Login,
    Logout,
    Custom,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::View => "VIEW",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::Custom => "CUSTOM",
        }
    }

    /// Fixed method → action table.
    pub fn from_method(method: &Method) -> Self {
        match method.as_str() {
            "GET" => AuditAction::View,
            "POST" => AuditAction::Create,
            "PUT" | "PATCH" => AuditAction::Update,
            "DELETE" => AuditAction::Delete,
            _ => AuditAction::Custom,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warning => "WARNING",
            AuditSeverity::Error => "ERROR",
            AuditSeverity::Critical => "CRITICAL",
        }
    }

    /// Status code → severity table. Anything not listed is INFO; 404 is
    /// deliberately INFO (lookup misses are routine).
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 | 404 => AuditSeverity::Info,
            401 | 403 | 429 => AuditSeverity::Warning,
            500..=599 => AuditSeverity::Error,
            _ => AuditSeverity::Info,
        }
    }
}

/// Event category, classified from the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    General,
    Security,
    Business,
    System,
    Compliance,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::General => "GENERAL",
            AuditCategory::Security => "SECURITY",
            AuditCategory::Business => "BUSINESS",
            AuditCategory::System => "SYSTEM",
            AuditCategory::Compliance => "COMPLIANCE",
        }
    }

    /// Path-based category table.
    pub fn from_path(path: &str) -> Self {
        if path.contains("/auth") || path.contains("/login") || path.contains("/logout") {
            AuditCategory::Security
        } else if path.contains("/settings") || path.contains("/admin") {
            AuditCategory::System
        } else if path.contains("/orders")
            || path.contains("/products")
            || path.contains("/customers")
        {
            AuditCategory::Business
        } else {
            AuditCategory::General
        }
    }
}

/// A single immutable audit record, created exactly once per audited
/// request or error.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub severity: String,
    pub category: String,
    /// Snapshot of the request context at record time.
    pub context: serde_json::Value,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Audit query filters.
#[derive(Debug, Default, Deserialize)]
pub struct AuditEventFilters {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Structural access to the few optional payload fields the audit pipeline
/// cares about, without depending on any entity's full schema.
pub trait ExtractableFields {
    fn display_name(&self) -> Option<String>;
    fn entity_id(&self) -> Option<String>;
}

impl ExtractableFields for serde_json::Value {
    /// Prefer `name`, then `email`, then `title`.
    fn display_name(&self) -> Option<String> {
        for key in ["name", "email", "title"] {
            if let Some(v) = self.get(key).and_then(|v| v.as_str()) {
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    fn entity_id(&self) -> Option<String> {
        match self.get("id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}
