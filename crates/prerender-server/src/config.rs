//! Tunables for the render pipeline.
//!
//! The hardcoded numbers of the original service (retry count, per-attempt
//! fetch timeout, render deadline, GraphQL request timeout) are surfaced here
//! as configuration with the original values as defaults.

use std::time::Duration;

/// Retry and timeout policy for package fetches.
///
/// # Example
///
/// ```
/// use prerender_server::config::FetcherConfig;
/// use std::time::Duration;
///
/// let config = FetcherConfig::new()
///     .with_attempts(5)
///     .with_attempt_timeout(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FetcherConfig {
    /// Total attempts per URL, including the first (default: 3)
    pub attempts: u32,
    /// Fixed delay between attempts (default: 500ms)
    pub retry_delay: Duration,
    /// Timeout applied to each individual attempt (default: 60s)
    pub attempt_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.attempts == 0 {
            return Err("fetch attempts must be greater than zero".to_string());
        }
        if self.attempt_timeout.is_zero() {
            return Err("attempt timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Deadlines applied to sandbox execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderLimits {
    /// Upper bound on the awaited render promise (default: 30s)
    pub render_timeout: Duration,
    /// Default bound on a single GraphQL request; the request body may
    /// override it per render (default: 1000ms)
    pub graphql_timeout: Duration,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(30),
            graphql_timeout: Duration::from_millis(1000),
        }
    }
}

impl RenderLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.render_timeout.is_zero() {
            return Err("render timeout must be greater than zero".to_string());
        }
        if self.render_timeout.as_secs() > 3600 {
            return Err(format!(
                "render timeout must be <= 1 hour (got {} seconds)",
                self.render_timeout.as_secs()
            ));
        }
        Ok(())
    }
}
