//! Ordered fallback chains
//!
//! Most capabilities have several ways of doing the same thing (three
//! clipboard backends, three keystroke backends, ...). [`run_chain`] walks such
//! a list in order, retries each entry up to the configured number of attempts,
//! and records which entry finally succeeded.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::Clock;

/// Bounded per-strategy retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt per strategy, no backoff
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(150))
    }
}

/// One try of one strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub strategy: String,
    pub attempt: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of walking a strategy list
#[derive(Debug, Clone)]
pub struct ChainOutcome<T> {
    pub value: Option<T>,
    /// Name of the strategy that produced `value`
    pub used: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl<T> ChainOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.value.is_some()
    }

    /// Strategy names in the order they were first tried
    pub fn tried(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for attempt in &self.attempts {
            if names.last() != Some(&attempt.strategy) {
                names.push(attempt.strategy.clone());
            }
        }
        names
    }

    pub fn errors(&self) -> Vec<String> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| format!("{}: {}", a.strategy, e)))
            .collect()
    }
}

/// Run `op` against each strategy in order until one succeeds.
///
/// Each strategy gets up to `policy.max_attempts` tries, separated by
/// `policy.backoff`. Failures never propagate; they are recorded in the
/// returned [`ChainOutcome`].
pub fn run_chain<S, T, N, F>(
    capability: &str,
    strategies: &[S],
    policy: RetryPolicy,
    clock: &dyn Clock,
    name_of: N,
    mut op: F,
) -> ChainOutcome<T>
where
    N: Fn(&S) -> String,
    F: FnMut(&S) -> anyhow::Result<T>,
{
    let mut attempts = Vec::new();

    for strategy in strategies {
        let name = name_of(strategy);

        for attempt in 1..=policy.max_attempts {
            match op(strategy) {
                Ok(value) => {
                    tracing::debug!(capability, strategy = %name, attempt, "strategy succeeded");
                    attempts.push(Attempt {
                        strategy: name.clone(),
                        attempt,
                        success: true,
                        error: None,
                    });
                    return ChainOutcome {
                        value: Some(value),
                        used: Some(name),
                        attempts,
                    };
                }
                Err(e) => {
                    tracing::debug!(capability, strategy = %name, attempt, error = %e, "strategy failed");
                    attempts.push(Attempt {
                        strategy: name.clone(),
                        attempt,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    if attempt < policy.max_attempts {
                        clock.sleep(policy.backoff);
                    }
                }
            }
        }
    }

    tracing::warn!(capability, tried = strategies.len(), "all strategies exhausted");
    ChainOutcome {
        value: None,
        used: None,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use anyhow::anyhow;

    #[test]
    fn test_chain_stops_at_first_success() {
        let clock = ManualClock::new();
        let strategies = vec!["first", "second", "third"];
        let mut calls = Vec::new();

        let outcome = run_chain(
            "test",
            &strategies,
            RetryPolicy::once(),
            &clock,
            |s| s.to_string(),
            |s| {
                calls.push(*s);
                if *s == "second" {
                    Ok(42)
                } else {
                    Err(anyhow!("nope"))
                }
            },
        );

        assert_eq!(outcome.value, Some(42));
        assert_eq!(outcome.used.as_deref(), Some("second"));
        assert_eq!(calls, vec!["first", "second"]);
    }

    #[test]
    fn test_chain_retries_each_strategy_with_backoff() {
        let clock = ManualClock::new();
        let strategies = vec!["a", "b"];

        let outcome: ChainOutcome<()> = run_chain(
            "test",
            &strategies,
            RetryPolicy::new(3, Duration::from_millis(100)),
            &clock,
            |s| s.to_string(),
            |_| Err(anyhow!("down")),
        );

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts.len(), 6);
        assert_eq!(outcome.tried(), vec!["a".to_string(), "b".to_string()]);
        // two backoffs per strategy, none after the last attempt
        assert_eq!(clock.total_slept(), Duration::from_millis(400));
        assert_eq!(outcome.errors().len(), 6);
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
