//! Retry-until-visible against an eventually consistent control plane
//!
//! Writes to the provider are not guaranteed to show up in the next read.
//! Every create and delete in the engine goes through [`ConsistencyRetrier`],
//! which polls a visibility check a bounded number of times with a fixed
//! delay between attempts. Worst case blocking per operation is
//! `max_attempts × delay`.

use crate::error::{CloudError, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Retry budget for provider operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay between attempts
    pub delay: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Longest time a single operation may spend sleeping
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay: Duration::from_secs(1),
        }
    }
}

/// Generic "retry until predicate or timeout" combinator
#[derive(Debug, Clone, Default)]
pub struct ConsistencyRetrier {
    config: RetryConfig,
}

impl ConsistencyRetrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    fn timed_out(&self, what: &str) -> CloudError {
        CloudError::OperationTimedOut {
            operation: what.to_string(),
            attempts: self.attempts(),
        }
    }

    /// Run `check` until it yields a value.
    ///
    /// `Ok(None)` and transient provider errors are retried; any other error
    /// stops the loop. Exhausting the budget raises
    /// [`CloudError::OperationTimedOut`].
    pub async fn poll<T>(
        &self,
        what: &str,
        mut check: impl AsyncFnMut() -> Result<Option<T>>,
    ) -> Result<T> {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match check().await {
                Ok(Some(value)) => {
                    debug!(operation = what, attempt, "condition met");
                    return Ok(value);
                }
                Ok(None) => {
                    debug!(operation = what, attempt, "not visible yet");
                }
                Err(e) if e.is_transient() => {
                    debug!(operation = what, attempt, error = %e, "transient error, retrying");
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                sleep(self.config.delay).await;
            }
        }

        warn!(operation = what, attempts, "gave up waiting");
        Err(self.timed_out(what))
    }

    /// Create a resource and wait until it is visible.
    ///
    /// `create` issues the call and returns the new id. It is re-issued
    /// while the provider rejects it with a transient error (throttling,
    /// request limits). `confirm` runs the follow-up step (tagging) and
    /// re-runs discovery; it returns the discovered value once visible. A
    /// not-found error from `confirm` means the write has not propagated yet
    /// and is retried like `Ok(None)`.
    ///
    /// If the resource never becomes visible, or `confirm` fails fatally,
    /// `compensate` deletes it. A failed compensation is attached to the
    /// returned error as a secondary error.
    pub async fn create<T>(
        &self,
        what: &str,
        mut create: impl AsyncFnMut() -> Result<String>,
        mut confirm: impl AsyncFnMut(&str) -> Result<Option<T>>,
        compensate: impl AsyncFnOnce(&str) -> Result<()>,
    ) -> Result<T> {
        let id = self
            .poll(&format!("create {}", what), async || create().await.map(Some))
            .await?;
        info!(resource = what, id = %id, "created");

        let label = format!("{} {} visible", what, id);
        let confirmed = self
            .poll(&label, async || match confirm(&id).await {
                Err(e) if e.is_already_absent() => Ok(None),
                other => other,
            })
            .await;

        match confirmed {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(resource = what, id = %id, error = %err, "rolling back partially created resource");
                match compensate(&id).await {
                    Ok(()) => Err(err),
                    Err(secondary) => {
                        error!(
                            resource = what,
                            id = %id,
                            error = %secondary,
                            "compensating delete failed, resource may be orphaned"
                        );
                        Err(err.with_compensation_failure(secondary))
                    }
                }
            }
        }
    }

    /// Idempotent delete.
    ///
    /// Transient errors (dependency still attached, throttling) are retried;
    /// an already-absent error counts as success; anything else is fatal.
    pub async fn delete(&self, what: &str, mut delete: impl AsyncFnMut() -> Result<()>) -> Result<()> {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match delete().await {
                Ok(()) => {
                    info!(resource = what, "deleted");
                    return Ok(());
                }
                Err(e) if e.is_already_absent() => {
                    debug!(resource = what, "already absent");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    debug!(resource = what, attempt, error = %e, "delete blocked, retrying");
                }
                Err(e) => return Err(e),
            }

            if attempt < attempts {
                sleep(self.config.delay).await;
            }
        }

        warn!(resource = what, attempts, "delete never went through");
        Err(self.timed_out(&format!("delete {}", what)))
    }

    /// Poll until `exists` reports the resource gone.
    pub async fn wait_until_absent(
        &self,
        what: &str,
        mut exists: impl AsyncFnMut() -> Result<bool>,
    ) -> Result<()> {
        let label = format!("{} absent", what);
        self.poll(&label, async || {
            Ok(if exists().await? { None } else { Some(()) })
        })
        .await
    }
}
