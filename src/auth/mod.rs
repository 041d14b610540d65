//! 认证模块

pub mod jwt;

pub use jwt::{JwtVerifier, TokenVerifier};
