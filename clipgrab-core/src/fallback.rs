//! Ordered "first success wins" execution shared by resolution strategies,
//! download candidates and processing strategies.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

#[async_trait]
pub trait Strategy<C: Sync>: Send + Sync {
    type Output: Send;
    type Error: fmt::Display + Send;

    fn label(&self) -> String;

    async fn attempt(&self, context: &C) -> Result<Self::Output, Self::Error>;
}

pub type BoxedStrategy<C, O, E> = Box<dyn Strategy<C, Output = O, Error = E>>;

#[derive(Debug, Clone)]
pub struct StrategyFailure<E> {
    pub strategy: String,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for StrategyFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

#[derive(Debug)]
pub struct FallbackSuccess<O, E> {
    pub value: O,
    pub strategy: String,
    pub failures: Vec<StrategyFailure<E>>,
}

#[derive(Debug)]
pub struct FallbackExhausted<E> {
    pub failures: Vec<StrategyFailure<E>>,
    /// Set when `abort_on` stopped the chain before every strategy ran.
    pub aborted: bool,
}

impl<E> FallbackExhausted<E> {
    pub fn last_error(&self) -> Option<&E> {
        self.failures.last().map(|failure| &failure.error)
    }
}

impl<E: fmt::Display> fmt::Display for FallbackExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.last() {
            Some(last) => write!(f, "{} strategies failed, last {}", self.failures.len(), last),
            None => f.write_str("no strategies to try"),
        }
    }
}

/// Tries `strategies` in order, one at a time, returning the first success.
pub async fn first_success<C, O, E, A>(
    stage: &str,
    strategies: &[BoxedStrategy<C, O, E>],
    context: &C,
    abort_on: A,
) -> Result<FallbackSuccess<O, E>, FallbackExhausted<E>>
where
    C: Sync,
    O: Send,
    E: fmt::Display + Send,
    A: Fn(&E) -> bool,
{
    let mut failures = Vec::new();
    for strategy in strategies {
        let label = strategy.label();
        debug!(stage, strategy = %label, "strategy started");
        match strategy.attempt(context).await {
            Ok(value) => {
                debug!(stage, strategy = %label, "strategy succeeded");
                return Ok(FallbackSuccess {
                    value,
                    strategy: label,
                    failures,
                });
            }
            Err(error) => {
                warn!(stage, strategy = %label, error = %error, "strategy failed");
                let abort = abort_on(&error);
                failures.push(StrategyFailure {
                    strategy: label,
                    error,
                });
                if abort {
                    return Err(FallbackExhausted {
                        failures,
                        aborted: true,
                    });
                }
            }
        }
    }
    Err(FallbackExhausted {
        failures,
        aborted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        result: Result<u32, &'static str>,
    }

    #[async_trait]
    impl Strategy<AtomicUsize> for Scripted {
        type Output = u32;
        type Error = String;

        fn label(&self) -> String {
            self.name.to_string()
        }

        async fn attempt(&self, calls: &AtomicUsize) -> Result<u32, String> {
            calls.fetch_add(1, Ordering::SeqCst);
            self.result.map_err(str::to_string)
        }
    }

    fn chain(results: Vec<(&'static str, Result<u32, &'static str>)>) -> Vec<BoxedStrategy<AtomicUsize, u32, String>> {
        results
            .into_iter()
            .map(|(name, result)| {
                Box::new(Scripted { name, result }) as BoxedStrategy<AtomicUsize, u32, String>
            })
            .collect()
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let strategies = chain(vec![("a", Err("nope")), ("b", Ok(7)), ("c", Ok(9))]);
        let calls = AtomicUsize::new(0);
        let success = first_success("test", &strategies, &calls, |_| false)
            .await
            .unwrap();
        assert_eq!(success.value, 7);
        assert_eq!(success.strategy, "b");
        assert_eq!(success.failures.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn collects_every_failure() {
        let strategies = chain(vec![("a", Err("x")), ("b", Err("y"))]);
        let calls = AtomicUsize::new(0);
        let exhausted = first_success("test", &strategies, &calls, |_| false)
            .await
            .unwrap_err();
        assert!(!exhausted.aborted);
        let labels: Vec<_> = exhausted.failures.iter().map(|f| f.to_string()).collect();
        assert_eq!(labels, vec!["a: x", "b: y"]);
    }

    #[tokio::test]
    async fn abort_predicate_short_circuits() {
        let strategies = chain(vec![("a", Err("fatal")), ("b", Ok(1))]);
        let calls = AtomicUsize::new(0);
        let exhausted = first_success("test", &strategies, &calls, |e| e == "fatal")
            .await
            .unwrap_err();
        assert!(exhausted.aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exhausted.last_error().map(String::as_str), Some("fatal"));
    }
}
