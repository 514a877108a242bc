use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Plugin, Reaction, RetryDirective};
use crate::{
    backoff::ExponentialBackoff,
    engine::CallState,
    outcome::{Response, TransportError},
};

/// Retries on selected status codes and, optionally, on transport errors,
/// waiting [`ExponentialBackoff::delay`] of the current attempt between
/// tries. The number of attempts is bounded by the client's `max_attempt`.
#[derive(Clone, Debug)]
pub struct RetryPlugin {
    backoff: ExponentialBackoff,
    statuses: Vec<StatusCode>,
    retry_errors: bool,
}

impl RetryPlugin {
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(initial_delay),
            statuses: vec![StatusCode::TOO_MANY_REQUESTS],
            retry_errors: true,
        }
    }

    /// Replaces the set of status codes that trigger a retry.
    pub fn on_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn retry_errors(mut self, enabled: bool) -> Self {
        self.retry_errors = enabled;
        self
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        self.backoff
    }

    fn directive(&self, state: &CallState) -> RetryDirective {
        RetryDirective::after(self.backoff.delay(state.attempt()))
    }
}

impl Default for RetryPlugin {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl Plugin for RetryPlugin {
    fn name(&self) -> &str {
        "retry"
    }

    async fn on_response(&self, state: &CallState, response: Response) -> Reaction {
        if self.statuses.contains(&response.status) {
            Reaction::retry(response, self.directive(state))
        } else {
            Reaction::proceed(response)
        }
    }

    async fn on_error(&self, state: &CallState, error: TransportError) -> Reaction {
        if self.retry_errors {
            Reaction::retry(error, self.directive(state))
        } else {
            Reaction::proceed(error)
        }
    }
}
