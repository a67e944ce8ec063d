//! Generic readiness polling for container components.
//!
//! A [`Wait`] repeatedly runs an async probe until it succeeds or the overall
//! deadline passes. Start hooks use this to delay a component's start until
//! its dependencies answer.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

pub const DEFAULT_AT_MOST: Duration = Duration::from_secs(15);
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Error produced by a single probe attempt.
pub type ProbeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The probe never succeeded within the deadline; carries the last attempt's
/// failure.
#[derive(Debug, thiserror::Error)]
#[error("readiness probe of '{component}' failed after {elapsed:?}: {source}")]
pub struct WaitTimeout {
    pub component: String,
    pub elapsed: Duration,
    #[source]
    pub source: ProbeError,
}

/// Polls a probe with a fixed delay until it succeeds or `at_most` elapsed.
#[derive(Clone, Copy, Debug)]
pub struct Wait {
    at_most: Duration,
    delay: Duration,
}

impl Default for Wait {
    fn default() -> Self {
        Self {
            at_most: DEFAULT_AT_MOST,
            delay: DEFAULT_DELAY,
        }
    }
}

impl Wait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall deadline across all attempts.
    #[must_use]
    pub const fn at_most(mut self, at_most: Duration) -> Self {
        self.at_most = at_most;
        self
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `probe` until it returns `Ok` or the deadline passes. A deadline
    /// that passes without any attempt having failed counts as success.
    pub async fn poll<F, Fut>(&self, component: &str, mut probe: F) -> Result<(), WaitTimeout>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ProbeError>>,
    {
        let started = Instant::now();
        let mut last_error = None;

        while started.elapsed() < self.at_most {
            match probe().await {
                Ok(()) => {
                    info!(component, elapsed = ?started.elapsed(), "component ready");
                    return Ok(());
                }
                Err(error) => {
                    debug!(component, %error, "probe failed, retrying");
                    last_error = Some(error);
                }
            }
            sleep(self.delay).await;
        }

        match last_error {
            Some(source) => Err(WaitTimeout {
                component: component.to_owned(),
                elapsed: started.elapsed(),
                source,
            }),
            None => Ok(()),
        }
    }
}
