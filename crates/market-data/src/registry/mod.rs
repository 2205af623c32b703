//! Request plumbing shared by every engine operation.
//!
//! This module provides:
//! - Per-provider rate gating (`RateGate`)
//! - Provider health tracking with circuit states (`ProviderHealth`)
//! - TTL caching with single-flight fetches (`CacheLayer`)
//! - Retry, fallback and degraded-result handling (`RetryController`)
//! - Record sanity checks and cross-source validation

mod cache;
mod controller;
mod health;
mod rate_limiter;
mod validator;

pub use cache::{CacheKey, CacheKind, CacheLayer, StaleValue};
pub use controller::{ProviderCall, RetryController, RetryPolicy};
pub use health::{CircuitState, HealthConfig, HealthSnapshot, ProviderHealth};
pub use rate_limiter::{GatePermit, RateGate};
pub use validator::{
    relative_diff_pct, CrossSourceValidator, RecordSanity, SanityChecked, SanityConfig,
    ValidationIssue, ValidationSeverity,
};
