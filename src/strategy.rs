//! Ordered first-success-wins fallback shared by the stream, info and search
//! paths.

use std::{fmt, sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AttemptError, UpstreamClass};

#[async_trait]
pub trait Strategy<Req, Out>: Send + Sync
where
    Req: Sync,
{
    fn name(&self) -> &str;

    async fn attempt(&self, request: &Req) -> Result<Out, AttemptError>;
}

pub type StrategyList<Req, Out> = Vec<Arc<dyn Strategy<Req, Out>>>;

#[derive(Debug)]
pub struct Failure {
    pub strategy: String,
    pub error: AttemptError,
}

/// Every strategy failed. Failures are kept in the order they were tried.
#[derive(Debug, Default)]
pub struct Exhausted {
    pub failures: Vec<Failure>,
}

impl Exhausted {
    pub fn first(&self) -> Option<&Failure> {
        self.failures.first()
    }

    /// Class of the first failure; an empty list counts as `Other`.
    pub fn first_class(&self) -> UpstreamClass {
        self.first()
            .map(|failure| failure.error.class())
            .unwrap_or(UpstreamClass::Other)
    }
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no strategies configured");
        }
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.strategy, failure.error))
            .collect();
        write!(f, "all strategies failed ({})", parts.join("; "))
    }
}

impl std::error::Error for Exhausted {}

/// Tries each strategy in turn, strictly sequentially. The first success
/// short-circuits; later strategies are never touched.
pub async fn run_strategies<Req, Out>(
    operation: &str,
    subject: &str,
    strategies: &[Arc<dyn Strategy<Req, Out>>],
    request: &Req,
) -> Result<Out, Exhausted>
where
    Req: Sync,
{
    let request_id = Uuid::new_v4();
    let mut exhausted = Exhausted::default();

    for (index, strategy) in strategies.iter().enumerate() {
        let started = Instant::now();
        match strategy.attempt(request).await {
            Ok(output) => {
                info!(
                    %request_id,
                    operation,
                    subject,
                    strategy = strategy.name(),
                    attempt = index + 1,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "strategy succeeded"
                );
                return Ok(output);
            }
            Err(error) => {
                warn!(
                    %request_id,
                    operation,
                    subject,
                    strategy = strategy.name(),
                    attempt = index + 1,
                    error = %error,
                    "strategy failed"
                );
                exhausted.failures.push(Failure {
                    strategy: strategy.name().to_string(),
                    error,
                });
            }
        }
    }

    warn!(
        %request_id,
        operation,
        subject,
        attempts = exhausted.failures.len(),
        "all strategies exhausted"
    );
    Err(exhausted)
}


#[cfg(test)]
mod tests {
    use super::testing::Counting;
    use super::*;

    fn unplayable(reason: &str) -> AttemptError {
        AttemptError::Unplayable {
            status: "ERROR".into(),
            reason: reason.into(),
        }
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let first = Counting::new("one", || Err::<u32, _>(AttemptError::NoFormat));
        let second = Counting::new("two", || Ok(2_u32));
        let third = Counting::new("three", || Ok(3_u32));
        let fourth = Counting::new("four", || Ok(4_u32));
        let strategies: StrategyList<(), u32> = vec![
            first.clone(),
            second.clone(),
            third.clone(),
            fourth.clone(),
        ];

        let output = run_strategies("test", "x", &strategies, &()).await.unwrap();

        assert_eq!(output, 2);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0);
        assert_eq!(fourth.calls(), 0);
    }

    #[tokio::test]
    async fn collects_failures_in_order() {
        let strategies: StrategyList<(), u32> = vec![
            Counting::new("direct", || Err::<u32, _>(unplayable("Video unavailable"))),
            Counting::new("relay", || {
                Err::<u32, _>(unplayable("Sign in to confirm your age"))
            }),
        ];

        let exhausted = run_strategies("test", "x", &strategies, &())
            .await
            .unwrap_err();

        assert_eq!(exhausted.failures.len(), 2);
        assert_eq!(exhausted.first().unwrap().strategy, "direct");
        assert_eq!(exhausted.first_class(), UpstreamClass::Unavailable);
        assert!(exhausted.to_string().contains("relay: ERROR"));
    }

    #[tokio::test]
    async fn empty_list_is_exhausted() {
        let strategies: StrategyList<(), u32> = Vec::new();
        let exhausted = run_strategies("test", "x", &strategies, &())
            .await
            .unwrap_err();
        assert!(exhausted.first().is_none());
        assert_eq!(exhausted.first_class(), UpstreamClass::Other);
    }
}
