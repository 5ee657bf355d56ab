//! Per-action request pacing shared by concurrent reconciliations

use crate::error::{EngineError, Result, Stage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default spacing between two calls of the same action (20 calls/s)
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Rate gate keyed by remote action name.
///
/// Calls of the same action are spaced at least `interval` apart; different
/// actions do not wait on each other. The gate only paces callers, it never
/// rejects them.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
    admitted: AtomicU64,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
            admitted: AtomicU64::new(0),
        }
    }

    /// A gate that admits every call immediately
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total calls admitted so far
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Wait for this action's next slot
    pub async fn acquire(&self, action: &str, stage: Stage, cancel: &CancellationToken) -> Result<()> {
        let slot = self.reserve(action);
        self.admitted.fetch_add(1, Ordering::Relaxed);

        if slot <= Instant::now() {
            return Ok(());
        }
        tracing::trace!("rate gate delaying {} until its slot", action);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled { stage }),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }

    fn reserve(&self, action: &str) -> Instant {
        let now = Instant::now();
        if self.interval.is_zero() {
            return now;
        }
        let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .get(action)
            .copied()
            .map_or(now, |next| next.max(now));
        slots.insert(action.to_string(), slot + self.interval);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_action_is_spaced() {
        let gate = RateGate::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        for _ in 0..3 {
            gate.acquire("DescribeFlow", Stage::Poll, &cancel).await.unwrap();
        }

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(gate.admitted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_actions_do_not_wait() {
        let gate = RateGate::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        gate.acquire("CreateDBInstance", Stage::Submit, &cancel).await.unwrap();
        gate.acquire("DescribeDBInstances", Stage::Read, &cancel).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let gate = RateGate::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();

        gate.acquire("DeleteInstance", Stage::Submit, &cancel).await.unwrap();
        cancel.cancel();
        let err = gate
            .acquire("DeleteInstance", Stage::Submit, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { stage: Stage::Submit }));
    }

    #[tokio::test]
    async fn test_unlimited() {
        let gate = RateGate::unlimited();
        let cancel = CancellationToken::new();
        for _ in 0..10 {
            gate.acquire("Any", Stage::Read, &cancel).await.unwrap();
        }
        assert_eq!(gate.admitted(), 10);
    }
}
