//! RPC endpoint rotation with per-endpoint health tracking.
//!
//! Endpoints that keep failing are quarantined for a cooldown period and
//! skipped by [`EndpointRotation::pick_next`] until it expires.

use crate::chain::EndpointSelector;
use crate::mint::MintConfig;
use anyhow::{anyhow, Result};
use nonempty::NonEmpty;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State of an RPC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Endpoint is healthy and can be used
    Healthy,
    /// Endpoint failed recently but is still usable
    Degraded,
    /// Endpoint is in cooldown after too many failures
    CoolingDown,
}

#[derive(Debug, Clone)]
struct EndpointHealth {
    state: EndpointState,
    consecutive_failures: u32,
    cooldown_start: Option<Instant>,
}

impl EndpointHealth {
    fn new() -> Self {
        Self {
            state: EndpointState::Healthy,
            consecutive_failures: 0,
            cooldown_start: None,
        }
    }
}

#[derive(Debug)]
struct RotationState {
    current: usize,
    health: Vec<EndpointHealth>,
}

/// Ordered endpoint list with a current position.
#[derive(Debug)]
pub struct EndpointRotation {
    endpoints: NonEmpty<String>,
    state: Mutex<RotationState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl EndpointRotation {
    pub fn new(endpoints: NonEmpty<String>, failure_threshold: u32, cooldown_seconds: u64) -> Self {
        let health = vec![EndpointHealth::new(); endpoints.len()];
        Self {
            endpoints,
            state: Mutex::new(RotationState { current: 0, health }),
            failure_threshold: failure_threshold.max(1),
            cooldown: Duration::from_secs(cooldown_seconds),
        }
    }

    pub fn from_config(config: &MintConfig) -> Result<Self> {
        let endpoints = NonEmpty::from_vec(config.rpc_endpoints.clone())
            .ok_or_else(|| anyhow!("At least one RPC endpoint is required"))?;
        Ok(Self::new(
            endpoints,
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_cooldown_seconds,
        ))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &String> {
        self.endpoints.iter()
    }

    pub fn current_index(&self) -> usize {
        self.lock().current
    }

    pub fn state_of(&self, index: usize) -> Option<EndpointState> {
        self.lock().health.get(index).map(|h| h.state)
    }

    /// Record a successful request on the current endpoint.
    pub fn record_success(&self) {
        let mut state = self.lock();
        let current = state.current;
        let health = &mut state.health[current];
        if health.state != EndpointState::Healthy {
            debug!("Endpoint {} recovered", self.endpoints[current]);
        }
        *health = EndpointHealth::new();
    }

    /// Record a failed request on the current endpoint.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        let current = state.current;
        let health = &mut state.health[current];
        health.consecutive_failures += 1;

        if health.consecutive_failures >= self.failure_threshold {
            if health.state != EndpointState::CoolingDown {
                warn!(
                    "Endpoint {} entering cooldown after {} consecutive failures",
                    self.endpoints[current], health.consecutive_failures
                );
            }
            health.state = EndpointState::CoolingDown;
            health.cooldown_start = Some(Instant::now());
        } else {
            health.state = EndpointState::Degraded;
        }
    }

    fn is_available(&self, health: &mut EndpointHealth) -> bool {
        match health.state {
            EndpointState::Healthy | EndpointState::Degraded => true,
            EndpointState::CoolingDown => {
                let expired = health
                    .cooldown_start
                    .map_or(true, |start| start.elapsed() >= self.cooldown);
                if expired {
                    health.state = EndpointState::Degraded;
                    health.cooldown_start = None;
                    health.consecutive_failures = 0;
                }
                expired
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EndpointSelector for EndpointRotation {
    fn current(&self) -> String {
        let index = self.current_index();
        self.endpoints[index].clone()
    }

    /// Advance to the next available endpoint, wrapping around the list.
    ///
    /// When every other endpoint is cooling down the rotation still advances by one.
    fn pick_next(&self) -> String {
        let mut state = self.lock();
        let len = self.endpoints.len();
        let start = state.current;

        let mut next = (start + 1) % len;
        for step in 1..=len {
            let candidate = (start + step) % len;
            if self.is_available(&mut state.health[candidate]) {
                next = candidate;
                break;
            }
        }

        state.current = next;
        info!("Using RPC endpoint {}", self.endpoints[next]);
        self.endpoints[next].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(n: usize, threshold: u32, cooldown: u64) -> EndpointRotation {
        let endpoints = (0..n).map(|i| format!("https://rpc{}.example", i)).collect();
        EndpointRotation::new(NonEmpty::from_vec(endpoints).unwrap(), threshold, cooldown)
    }

    #[test]
    fn test_pick_next_wraps_around() {
        let rotation = rotation(3, 3, 30);
        assert_eq!(rotation.current(), "https://rpc0.example");
        assert_eq!(rotation.pick_next(), "https://rpc1.example");
        assert_eq!(rotation.pick_next(), "https://rpc2.example");
        assert_eq!(rotation.pick_next(), "https://rpc0.example");
    }

    #[test]
    fn test_single_endpoint_stays_put() {
        let rotation = rotation(1, 3, 30);
        rotation.record_failure();
        assert_eq!(rotation.pick_next(), "https://rpc0.example");
    }

    #[test]
    fn test_cooling_endpoint_is_skipped() {
        let rotation = rotation(3, 2, 3600);
        rotation.pick_next();
        rotation.record_failure();
        assert_eq!(rotation.state_of(1), Some(EndpointState::Degraded));
        rotation.record_failure();
        assert_eq!(rotation.state_of(1), Some(EndpointState::CoolingDown));

        assert_eq!(rotation.pick_next(), "https://rpc2.example");
        assert_eq!(rotation.pick_next(), "https://rpc0.example");
        assert_eq!(rotation.pick_next(), "https://rpc2.example");
    }

    #[test]
    fn test_cooldown_expires() {
        let rotation = rotation(2, 1, 0);
        rotation.record_failure();
        assert_eq!(rotation.state_of(0), Some(EndpointState::CoolingDown));

        rotation.pick_next();
        assert_eq!(rotation.pick_next(), "https://rpc0.example");
        assert_eq!(rotation.state_of(0), Some(EndpointState::Degraded));

        rotation.record_success();
        assert_eq!(rotation.state_of(0), Some(EndpointState::Healthy));
    }

    #[test]
    fn test_empty_config_is_rejected() {
        let mut config = MintConfig::default();
        config.rpc_endpoints.clear();
        assert!(EndpointRotation::from_config(&config).is_err());
    }
}
