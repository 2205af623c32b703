/// Classification for retry policy.
///
/// Used by the retry controller to decide what to do after a provider call fails.
///
/// # Behavior Summary
///
/// | Class | Retried? | Falls back to secondary / stale cache? | Health penalty? |
/// |-------|----------|----------------------------------------|-----------------|
/// | `Transient` | Yes, with backoff | Yes | Yes |
/// | `Busy` | Yes, with backoff | Yes | Yes |
/// | `Permanent` | No | No | No |
/// | `AuthFailure` | No | No | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Timeouts, 5xx responses, upstream rate limiting (429), network errors
    /// and malformed bodies. Worth another attempt after a backoff delay.
    Transient,

    /// Bad symbol, unsupported timeframe, or an operation the provider does not offer.
    /// Surfaced to the caller immediately.
    Permanent,

    /// Credentials were rejected. Surfaced immediately and never routed to
    /// another provider.
    AuthFailure,

    /// Our own rate gate could not hand out a slot before its timeout.
    /// Treated like `Transient`.
    Busy,
}

impl RetryClass {
    /// Whether another attempt (or another provider) may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Busy)
    }
}
