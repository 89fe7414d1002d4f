//! Retry strategies and backoff policies for the hosting and CI API clients.
//!
//! This crate provides:
//! - Multiple backoff strategies (immediate, exponential, linear, constant)
//! - Jitter to spread out retries from parallel CI jobs hitting the same API
//! - Classification of HTTP statuses into transient and permanent failures
//! - A retry executor that only retries failures classified as retryable
//!
//! # Example
//!
//! ```
//! use cirp_retry::{RetryPolicy, RetryStrategyConfig, calculate_delay};
//! use std::time::Duration;
//!
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! assert!(delay <= config.max_delay);
//!
//! let custom = RetryStrategyConfig {
//!     max_attempts: 3,
//!     base_delay: Duration::from_millis(50),
//!     ..Default::default()
//! };
//! assert_eq!(custom.max_attempts, 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP statuses worth retrying.
///
/// GitHub answers 403 when its secondary rate limit kicks in, which is common when many
/// jobs of one build talk to the API at once.
pub const TRANSIENT_STATUS_CODES: [u16; 5] = [403, 500, 502, 503, 504];

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Predefined retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Seven retries with a short exponential backoff
    #[default]
    Default,
    /// More attempts, faster recovery
    Aggressive,
    /// Fewer attempts, longer delays
    Conservative,
    /// Fully custom configuration via explicit settings
    Custom,
}

impl RetryPolicy {
    /// Get the retry configuration for this policy.
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig::default(),
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 12,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 4,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            // Custom uses the explicitly configured values
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryStrategyConfig {
    /// A configuration that retries without sleeping. Meant for tests and local fakes.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            strategy: RetryStrategyType::Immediate,
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Error is transient and should be retried
    #[default]
    Retryable,
    /// Error is permanent and should not be retried
    Permanent,
}

/// Classify an HTTP status code.
///
/// Success codes are never passed here; everything outside
/// [`TRANSIENT_STATUS_CODES`] is permanent.
pub fn classify_status(status: u16) -> ErrorClass {
    if TRANSIENT_STATUS_CODES.contains(&status) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Permanent
    }
}

/// Calculate the delay before the next attempt.
///
/// `attempt` is the attempt that just failed (1-indexed).
///
/// ```
/// use cirp_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: RetryStrategyType::Exponential,
///     base_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(60),
///     jitter: 0.0,
///     max_attempts: 10,
/// };
///
/// assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
/// assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let random_value: f64 = rand::rng().random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible operation with the configured retry behavior.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn config(&self) -> &RetryStrategyConfig {
        &self.config
    }

    /// Execute an operation, retrying every failure.
    ///
    /// The operation receives the current attempt number (starting at 1).
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with_classification(|attempt| {
            operation(attempt).map_err(|e| (e, ErrorClass::Retryable))
        })
    }

    /// Execute an operation that classifies its own failures.
    ///
    /// Permanent failures are returned immediately; retryable failures are retried
    /// until `max_attempts` is reached, after which the last error is returned.
    ///
    /// ```
    /// use cirp_retry::{ErrorClass, RetryExecutor, RetryStrategyConfig};
    ///
    /// let executor = RetryExecutor::new(RetryStrategyConfig::immediate(5));
    /// let result = executor.run_with_classification(|attempt| {
    ///     if attempt < 3 {
    ///         Err(("busy", ErrorClass::Retryable))
    ///     } else {
    ///         Ok(attempt)
    ///     }
    /// });
    /// assert_eq!(result, Ok(3));
    /// ```
    pub fn run_with_classification<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, (E, ErrorClass)>,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err((e, ErrorClass::Permanent)) => return Err(e),
                Err((e, ErrorClass::Retryable)) => {
                    if attempt >= self.config.max_attempts {
                        return Err(e);
                    }

                    let delay = calculate_delay(&self.config, attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
