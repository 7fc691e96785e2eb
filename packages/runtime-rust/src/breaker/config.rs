//! Circuit breaker configuration: global defaults, per-method overrides, and
//! the resolved per-route config.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::fallback::FallbackHandler;

// ---------------------------------------------------------------------------
// CircuitBreakerOptions
// ---------------------------------------------------------------------------

/// Global circuit breaker defaults, loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerOptions {
    /// Deadline for a single attempt.
    #[serde(rename = "timeoutMs", deserialize_with = "deserialize_millis")]
    pub timeout: Duration,
    /// Additional attempts after the first transient failure.
    pub retry: u32,
    /// Consecutive failures that open the circuit.
    pub exceptions_allowed_before_breaking: u32,
    /// How long the circuit stays open before admitting a trial call.
    #[serde(rename = "durationOfBreakMs", deserialize_with = "deserialize_millis")]
    pub duration_of_break: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: 3,
            exceptions_allowed_before_breaking: 3,
            duration_of_break: Duration::from_secs(60),
        }
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

// ---------------------------------------------------------------------------
// Per-method override
// ---------------------------------------------------------------------------

/// Per-method breaker settings. Unset fields fall back to the global defaults.
#[derive(Clone, Default)]
pub struct CircuitBreakerOverride {
    pub timeout: Option<Duration>,
    pub retry: Option<u32>,
    pub exceptions_allowed_before_breaking: Option<u32>,
    pub duration_of_break: Option<Duration>,
    pub fallback: Option<Arc<dyn FallbackHandler>>,
}

impl CircuitBreakerOverride {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn exceptions_allowed_before_breaking(mut self, count: u32) -> Self {
        self.exceptions_allowed_before_breaking = Some(count);
        self
    }

    #[must_use]
    pub fn duration_of_break(mut self, duration: Duration) -> Self {
        self.duration_of_break = Some(duration);
        self
    }

    #[must_use]
    pub fn fallback(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }
}

impl fmt::Debug for CircuitBreakerOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOverride")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field(
                "exceptions_allowed_before_breaking",
                &self.exceptions_allowed_before_breaking,
            )
            .field("duration_of_break", &self.duration_of_break)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// How a method relates to the global breaker defaults.
#[derive(Debug, Clone, Default)]
pub enum BreakerMarker {
    /// Use the global defaults, if any.
    #[default]
    Inherit,
    /// Merge the override over the global defaults, field by field.
    Override(CircuitBreakerOverride),
    /// No breaker for this method, even when globally configured.
    Disabled,
}

// ---------------------------------------------------------------------------
// CircuitBreakerConfig
// ---------------------------------------------------------------------------

/// Resolved breaker settings attached to one route.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub timeout: Duration,
    pub retry: u32,
    /// Always at least 1.
    pub exceptions_allowed_before_breaking: u32,
    pub duration_of_break: Duration,
    pub fallback: Option<Arc<dyn FallbackHandler>>,
}

impl CircuitBreakerConfig {
    /// Resolves the breaker for one method.
    ///
    /// Returns `None` when the method opts out, or when there are neither
    /// global defaults nor a method override.
    #[must_use]
    pub fn resolve(global: Option<&CircuitBreakerOptions>, marker: &BreakerMarker) -> Option<Self> {
        match marker {
            BreakerMarker::Disabled => None,
            BreakerMarker::Inherit => global.map(|g| Self::from_options(g, None)),
            BreakerMarker::Override(over) => {
                let base = global.cloned().unwrap_or_default();
                let merged = CircuitBreakerOptions {
                    timeout: over.timeout.unwrap_or(base.timeout),
                    retry: over.retry.unwrap_or(base.retry),
                    exceptions_allowed_before_breaking: over
                        .exceptions_allowed_before_breaking
                        .unwrap_or(base.exceptions_allowed_before_breaking),
                    duration_of_break: over.duration_of_break.unwrap_or(base.duration_of_break),
                };
                Some(Self::from_options(&merged, over.fallback.clone()))
            }
        }
    }

    fn from_options(
        options: &CircuitBreakerOptions,
        fallback: Option<Arc<dyn FallbackHandler>>,
    ) -> Self {
        Self {
            timeout: options.timeout,
            retry: options.retry,
            exceptions_allowed_before_breaking: options.exceptions_allowed_before_breaking.max(1),
            duration_of_break: options.duration_of_break,
            fallback,
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field(
                "exceptions_allowed_before_breaking",
                &self.exceptions_allowed_before_breaking,
            )
            .field("duration_of_break", &self.duration_of_break)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
