use std::borrow::Cow;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Epoch milliseconds, UTC
pub type EpochMillis = i64;
