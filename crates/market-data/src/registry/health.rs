//! Per-provider health tracking.
//!
//! Each provider has a circuit with three states:
//!
//! - **Closed**: healthy, eligible for fallback.
//! - **Open**: extended failure; skipped as a fallback target.
//! - **HalfOpen**: recovery window elapsed; the next request is a probe.
//!
//! Counters reset only on success. State is owned by the engine instance,
//! so two engines never share health.

use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info};
use tokio::time::Instant;

use crate::models::ProviderId;

/// Default number of consecutive failures before the circuit opens.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time before an open circuit admits a probe.
const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Point-in-time view of one provider's health.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_success: Option<Instant>,
}

/// Health of every provider the engine has called.
///
/// Updates lock only the entry of the provider being updated.
pub struct ProviderHealth {
    circuits: DashMap<ProviderId, Circuit>,
    config: HealthConfig,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    /// Whether `provider` may be used as a fallback target.
    ///
    /// Moves an open circuit to HalfOpen once the recovery timeout elapsed.
    pub fn is_allowed(&self, provider: &ProviderId) -> bool {
        let mut circuit = self
            .circuits
            .entry(provider.clone())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = circuit
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    info!("Provider health: '{}' Open -> HalfOpen", provider);
                    circuit.state = CircuitState::HalfOpen;
                }
                recovered
            }
        }
    }

    /// Record a success: closes the circuit and resets the failure counter.
    pub fn record_success(&self, provider: &ProviderId) {
        let mut circuit = self
            .circuits
            .entry(provider.clone())
            .or_insert_with(Circuit::new);

        if circuit.state != CircuitState::Closed {
            info!(
                "Provider health: '{}' {} -> Closed after success",
                provider, circuit.state
            );
        }
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
        circuit.last_success = Some(Instant::now());
    }

    /// Record a retryable failure. A failed probe reopens the circuit.
    pub fn record_failure(&self, provider: &ProviderId) {
        let mut circuit = self
            .circuits
            .entry(provider.clone())
            .or_insert_with(Circuit::new);

        circuit.consecutive_failures += 1;
        circuit.last_failure = Some(Instant::now());

        match circuit.state {
            CircuitState::Closed if circuit.consecutive_failures >= self.config.failure_threshold => {
                info!(
                    "Provider health: opening circuit for '{}' after {} failures",
                    provider, circuit.consecutive_failures
                );
                circuit.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                info!("Provider health: probe failed for '{}', reopening", provider);
                circuit.state = CircuitState::Open;
            }
            _ => {
                debug!(
                    "Provider health: failure for '{}' ({}/{})",
                    provider, circuit.consecutive_failures, self.config.failure_threshold
                );
            }
        }
    }

    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        self.circuits
            .get(provider)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, provider: &ProviderId) -> u32 {
        self.circuits
            .get(provider)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn last_success(&self, provider: &ProviderId) -> Option<Instant> {
        self.circuits.get(provider).and_then(|c| c.last_success)
    }

    /// Every tracked provider, ordered by id.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut snapshot: Vec<HealthSnapshot> = self
            .circuits
            .iter()
            .map(|entry| HealthSnapshot {
                provider: entry.key().clone(),
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                last_success: entry.last_success,
            })
            .collect();
        snapshot.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshot
    }
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn health(threshold: u32, recovery: Duration) -> ProviderHealth {
        ProviderHealth::with_config(HealthConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
        })
    }

    #[test]
    fn test_starts_closed() {
        let health = ProviderHealth::new();
        let provider: ProviderId = Cow::Borrowed("TEST_PROVIDER");

        assert!(health.is_allowed(&provider));
        assert_eq!(health.state(&provider), CircuitState::Closed);
        assert_eq!(health.failure_count(&provider), 0);
    }

    #[test]
    fn test_opens_after_threshold() {
        let health = health(3, Duration::from_secs(60));
        let provider: ProviderId = Cow::Borrowed("FAILING_PROVIDER");

        health.record_failure(&provider);
        health.record_failure(&provider);
        assert!(health.is_allowed(&provider));

        health.record_failure(&provider);
        assert!(!health.is_allowed(&provider));
        assert_eq!(health.state(&provider), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_counter() {
        let health = health(3, Duration::from_secs(60));
        let provider: ProviderId = Cow::Borrowed("INTERMITTENT_PROVIDER");

        health.record_failure(&provider);
        health.record_failure(&provider);
        assert_eq!(health.failure_count(&provider), 2);

        health.record_success(&provider);
        assert_eq!(health.failure_count(&provider), 0);
        assert!(health.last_success(&provider).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_probe_cycle() {
        let health = health(1, Duration::from_secs(30));
        let provider: ProviderId = Cow::Borrowed("RECOVERING_PROVIDER");

        health.record_failure(&provider);
        assert!(!health.is_allowed(&provider));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(health.is_allowed(&provider));
        assert_eq!(health.state(&provider), CircuitState::HalfOpen);

        // Failed probe reopens immediately
        health.record_failure(&provider);
        assert_eq!(health.state(&provider), CircuitState::Open);
        assert!(!health.is_allowed(&provider));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(health.is_allowed(&provider));
        health.record_success(&provider);
        assert_eq!(health.state(&provider), CircuitState::Closed);
    }

    #[test]
    fn test_provider_isolation() {
        let health = health(1, Duration::from_secs(60));
        let a: ProviderId = Cow::Borrowed("PROVIDER_A");
        let b: ProviderId = Cow::Borrowed("PROVIDER_B");

        health.record_failure(&a);
        assert!(!health.is_allowed(&a));
        assert!(health.is_allowed(&b));

        let snapshot = health.snapshot();
        let a_snapshot = snapshot.iter().find(|s| s.provider == "PROVIDER_A").unwrap();
        assert_eq!(a_snapshot.state, CircuitState::Open);
        assert_eq!(a_snapshot.consecutive_failures, 1);
    }
}
