//! Merchant and subscription domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Subscription lifecycle status.
///
/// `TRIAL → ACTIVE ⇄ PAST_DUE → {CANCELLED, EXPIRED}`, with `PAUSED`
/// reachable from `ACTIVE` and returning to it. `CANCELLED` and `EXPIRED`
/// are terminal: recovery requires a new subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
    Paused,
    Expired,
}

/// Operations a subscription status permits on tenant business data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Admin,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Parse a status string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trial" => Some(SubscriptionStatus::Trial),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "paused" => Some(SubscriptionStatus::Paused),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }

    /// Terminal states require a new subscription to recover from.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled | SubscriptionStatus::Expired)
    }

    /// Whether the lifecycle state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match (self, next) {
            (Trial, Active) | (Trial, Expired) | (Trial, Cancelled) => true,
            (Active, PastDue) | (Active, Paused) | (Active, Cancelled) | (Active, Expired) => true,
            (PastDue, Active) | (PastDue, Cancelled) | (PastDue, Expired) => true,
            (Paused, Active) | (Paused, Cancelled) | (Paused, Expired) => true,
            _ => false,
        }
    }

    /// Statuses that the lazy-expiry rule and the background scanner correct:
    /// an overdue row in one of these states must become `Expired`.
    pub fn is_expirable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Paused)
    }

    /// Capability table: which operations this status permits on tenant
    /// business data. Expired/cancelled/past-due permit nothing, reads
    /// included.
    pub fn permitted_operations(&self) -> &'static [Operation] {
        match self {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => &[
                Operation::Create,
                Operation::Read,
                Operation::Update,
                Operation::Delete,
                Operation::Admin,
            ],
            SubscriptionStatus::Paused => &[Operation::Read],
            SubscriptionStatus::PastDue
            | SubscriptionStatus::Cancelled
            | SubscriptionStatus::Expired => &[],
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub current_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> Option<SubscriptionStatus> {
        SubscriptionStatus::parse(&self.status)
    }

    /// A row is stale when its period has ended but its status still claims
    /// an expirable state. Stale rows must not be trusted for access
    /// decisions before correction.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end < now
            && self.status().is_some_and(|s| s.is_expirable())
    }
}

/// Merchant row.
///
/// `subscription_status` is an independent top-level flag on the merchant
/// account, distinct from the subscription row's own status; gating checks
/// both.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Merchant {
    pub id: Uuid,
    pub name: String,
    pub subscription_status: String,
    pub created_at: DateTime<Utc>,
}

/// Merchant joined with its single active subscription (zero or one).
#[derive(Debug, Clone, Serialize)]
pub struct MerchantWithSubscription {
    pub merchant: Merchant,
    pub subscription: Option<Subscription>,
}
