//! Agent context: everything an executor or heartbeat needs, built once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::MarketGateway;
use crate::strategy::guardrail::SafetyConfig;
use crate::types::PredictorError;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Tests only need the attempt count.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        let ms = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), PredictorError> {
        if self.max_attempts == 0 {
            return Err(PredictorError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Token-bearing gateway plus the policies every submission runs under.
///
/// Cheap to clone; the gateway is shared.
#[derive(Clone)]
pub struct AgentContext {
    gateway: Arc<dyn MarketGateway>,
    safety: SafetyConfig,
    retry: RetryPolicy,
}

impl AgentContext {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        safety: SafetyConfig,
        retry: RetryPolicy,
    ) -> Result<Self, PredictorError> {
        safety.validate()?;
        retry.validate()?;
        Ok(Self {
            gateway,
            safety,
            retry,
        })
    }

    pub fn gateway(&self) -> &Arc<dyn MarketGateway> {
        &self.gateway
    }

    pub fn safety(&self) -> &SafetyConfig {
        &self.safety
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}
