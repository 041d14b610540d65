//! 业务服务

pub mod audit_service;
pub mod expiry_scanner;
pub mod subscription_service;

pub use audit_service::AuditService;
pub use expiry_scanner::{ExpiryScanner, ExpiryScanReport, ScanOutcome};
pub use subscription_service::{AccessGrant, SubscriptionService, ValidateAccessOptions};
