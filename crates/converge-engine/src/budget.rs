//! Retry budgets
//!
//! A budget is a wall-clock deadline plus a backoff policy. Each operation
//! class gets its own submit/poll/converge budgets so a heavyweight
//! provisioning flow is never forced into the deadline of a flag toggle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const READ_BASE_SECS: u64 = 3 * 60;
const WRITE_BASE_SECS: u64 = 5 * 60;

/// Base unit for idempotent reads
pub const READ_BASE: Duration = Duration::from_secs(READ_BASE_SECS);

/// Base unit for a single mutation's submit-retry loop
pub const WRITE_BASE: Duration = Duration::from_secs(WRITE_BASE_SECS);

/// Longest deadline any retry loop honors; longer budgets are clamped to it
pub const MAX_DEADLINE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Floor applied to every computed delay so a retry loop never spins
pub const MIN_DELAY: Duration = Duration::from_millis(10);

const fn read_units(n: u64) -> Duration {
    Duration::from_secs(n * READ_BASE_SECS)
}

const fn write_units(n: u64) -> Duration {
    Duration::from_secs(n * WRITE_BASE_SECS)
}

/// Delay policy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        interval_ms: u64,
    },
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    pub fn fixed(interval: Duration) -> Self {
        Backoff::Fixed {
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Delay before the attempt following `attempt` (0-based), never below [`MIN_DELAY`]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match *self {
            Backoff::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Backoff::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let raw = initial_delay_ms as f64 * multiplier.max(1.0).powi(exponent);
                Duration::from_millis(raw.min(max_delay_ms as f64) as u64)
            }
        };
        delay.max(MIN_DELAY)
    }
}

/// Deadline plus backoff for one bounded retry loop. Immutable once a loop starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBudget {
    pub deadline: Duration,
    pub backoff: Backoff,
}

impl RetryBudget {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Same backoff, deadline multiplied by `factor` and clamped to
    /// `[0, MAX_DEADLINE]`. A NaN or negative factor yields a zero deadline.
    pub fn scaled(self, factor: f64) -> Self {
        let secs = self.deadline.as_secs_f64() * factor;
        let deadline = if secs.is_nan() || secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(secs).map_or(MAX_DEADLINE, |d| d.min(MAX_DEADLINE))
        };
        Self {
            deadline,
            backoff: self.backoff,
        }
    }
}

/// Class of operation; selects which [`BudgetProfile`] the reconciler uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Toggling a flag, renaming, attaching a security group
    Lightweight,
    /// Creating or resizing an ordinary resource
    Provisioning,
    /// Full instance/cluster provisioning
    HeavyProvisioning,
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationClass::Lightweight => write!(f, "lightweight"),
            OperationClass::Provisioning => write!(f, "provisioning"),
            OperationClass::HeavyProvisioning => write!(f, "heavy_provisioning"),
        }
    }
}

/// Budgets for the three blocking stages of one mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetProfile {
    pub submit: RetryBudget,
    pub poll: RetryBudget,
    pub converge: RetryBudget,
}

impl BudgetProfile {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            submit: self.submit.scaled(factor),
            poll: self.poll.scaled(factor),
            converge: self.converge.scaled(factor),
        }
    }
}

/// Named budgets for every operation class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budgets {
    pub read: RetryBudget,
    pub lightweight: BudgetProfile,
    pub provisioning: BudgetProfile,
    pub heavy_provisioning: BudgetProfile,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            read: RetryBudget::new(READ_BASE),
            lightweight: BudgetProfile {
                submit: RetryBudget::new(WRITE_BASE),
                poll: RetryBudget::new(write_units(2)),
                converge: RetryBudget::new(READ_BASE),
            },
            provisioning: BudgetProfile {
                submit: RetryBudget::new(WRITE_BASE),
                poll: RetryBudget::new(read_units(6)),
                converge: RetryBudget::new(read_units(2)),
            },
            heavy_provisioning: BudgetProfile {
                submit: RetryBudget::new(WRITE_BASE),
                poll: RetryBudget::new(read_units(12)),
                converge: RetryBudget::new(read_units(4)),
            },
        }
    }
}

impl Budgets {
    pub fn profile(&self, class: OperationClass) -> &BudgetProfile {
        match class {
            OperationClass::Lightweight => &self.lightweight,
            OperationClass::Provisioning => &self.provisioning,
            OperationClass::HeavyProvisioning => &self.heavy_provisioning,
        }
    }

    pub fn profile_mut(&mut self, class: OperationClass) -> &mut BudgetProfile {
        match class {
            OperationClass::Lightweight => &mut self.lightweight,
            OperationClass::Provisioning => &mut self.provisioning,
            OperationClass::HeavyProvisioning => &mut self.heavy_provisioning,
        }
    }

    /// Multiply every deadline by `factor`
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            read: self.read.scaled(factor),
            lightweight: self.lightweight.scaled(factor),
            provisioning: self.provisioning.scaled(factor),
            heavy_provisioning: self.heavy_provisioning.scaled(factor),
        }
    }

    /// Replace the backoff of every budget
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.read.backoff = backoff;
        for class in [
            OperationClass::Lightweight,
            OperationClass::Provisioning,
            OperationClass::HeavyProvisioning,
        ] {
            let profile = self.profile_mut(class);
            profile.submit.backoff = backoff;
            profile.poll.backoff = backoff;
            profile.converge.backoff = backoff;
        }
        self
    }
}
