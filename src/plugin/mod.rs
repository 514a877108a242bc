//! Interceptor contract.
//!
//! A [`Plugin`] observes every attempt of a call. `on_request` hooks run in
//! attachment order before the transfer; `on_response` / `on_error` hooks run
//! in reverse order afterwards, so the chain unwinds like an onion.

mod registry;
mod retry;

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    engine::CallState,
    outcome::{Outcome, Response, TransportError},
    request::RequestOptions,
};

pub use registry::{PluginFactory, PluginRef, PluginRegistry, Resolved};
pub use retry::RetryPlugin;

/// Hooks invoked by the attempt loop. All hooks are optional.
///
/// `on_request` runs in attachment order. The reaction hooks run in reverse
/// attachment order, and each plugin gets exactly one of `on_response` or
/// `on_error` per attempt. The choice follows the outcome *as handed on by
/// the previous hook*, not what the transfer produced: when an inner
/// plugin turns a transport error into a [`Response`], every plugin outside
/// it sees `on_response`, and the reverse holds for a response turned into
/// an error.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs and `Debug` output.
    fn name(&self) -> &str {
        "plugin"
    }

    /// Runs before the transfer and may rewrite any part of `request`.
    ///
    /// Returning an error skips the transfer; the error is handed to the
    /// reaction hooks as if the transport had produced it.
    async fn on_request(
        &self,
        _state: &CallState,
        _request: &mut RequestOptions,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// Called when the outcome reaching this plugin is a response, whatever
    /// its status.
    async fn on_response(&self, _state: &CallState, response: Response) -> Reaction {
        Reaction::proceed(response)
    }

    /// Called when the outcome reaching this plugin is a transport error,
    /// including one returned by an `on_request` hook or produced by an
    /// inner reaction hook.
    async fn on_error(&self, _state: &CallState, error: TransportError) -> Reaction {
        Reaction::proceed(error)
    }
}

/// What a reaction hook hands to the next hook in the chain.
#[derive(Debug)]
pub struct Reaction {
    outcome: Outcome,
    retry: Option<RetryDirective>,
}

impl Reaction {
    /// Continues with `outcome`, unchanged or transformed.
    pub fn proceed(outcome: impl Into<Outcome>) -> Self {
        Self {
            outcome: outcome.into(),
            retry: None,
        }
    }

    /// Continues with `outcome` and asks for another attempt.
    pub fn retry(outcome: impl Into<Outcome>, directive: RetryDirective) -> Self {
        Self {
            outcome: outcome.into(),
            retry: Some(directive),
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn directive(&self) -> Option<&RetryDirective> {
        self.retry.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Outcome, Option<RetryDirective>) {
        (self.outcome, self.retry)
    }
}

/// Request for another attempt.
#[derive(Clone, Debug, Default)]
pub struct RetryDirective {
    /// Replaces the in-flight request before the next attempt.
    pub request: Option<RequestOptions>,
    /// Wait before the next attempt.
    pub delay: Option<Duration>,
}

impl RetryDirective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(delay: Duration) -> Self {
        Self {
            request: None,
            delay: Some(delay),
        }
    }

    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = Some(request);
        self
    }
}

/// Per-instance hook counters. Shared by every slot holding the same
/// [`Interceptor`] and never reset.
#[derive(Debug, Default)]
pub struct HookCounters {
    request: AtomicU64,
    response: AtomicU64,
    error: AtomicU64,
}

/// Point-in-time copy of [`HookCounters`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HookCounts {
    pub request: u64,
    pub response: u64,
    pub error: u64,
}

impl HookCounters {
    pub fn snapshot(&self) -> HookCounts {
        HookCounts {
            request: self.request.load(Ordering::SeqCst),
            response: self.response.load(Ordering::SeqCst),
            error: self.error.load(Ordering::SeqCst),
        }
    }
}

/// Shared handle to an attached plugin.
///
/// Cloning the handle keeps the identity of the plugin, so every clone feeds
/// the same [`HookCounters`]. Build a new handle for independent counters.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<Inner>,
}

struct Inner {
    plugin: Arc<dyn Plugin>,
    counters: HookCounters,
}

impl Interceptor {
    pub fn new<P: Plugin + 'static>(plugin: P) -> Self {
        Self::from_arc(Arc::new(plugin))
    }

    /// Wraps a plugin the caller keeps a reference to, e.g. to read state
    /// the plugin accumulates.
    pub fn from_arc(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            inner: Arc::new(Inner {
                plugin,
                counters: HookCounters::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.plugin.name()
    }

    pub fn counters(&self) -> &HookCounters {
        &self.inner.counters
    }

    pub fn counts(&self) -> HookCounts {
        self.inner.counters.snapshot()
    }

    /// Whether both handles point at the same plugin instance.
    pub fn same_instance(&self, other: &Interceptor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) async fn request(
        &self,
        state: &CallState,
        request: &mut RequestOptions,
    ) -> Result<(), TransportError> {
        self.inner.counters.request.fetch_add(1, Ordering::SeqCst);
        self.inner.plugin.on_request(state, request).await
    }

    pub(crate) async fn react(&self, state: &CallState, outcome: Outcome) -> Reaction {
        match outcome {
            Outcome::Response(response) => {
                self.inner.counters.response.fetch_add(1, Ordering::SeqCst);
                self.inner.plugin.on_response(state, response).await
            }
            Outcome::Error(error) => {
                self.inner.counters.error.fetch_add(1, Ordering::SeqCst);
                self.inner.plugin.on_error(state, error).await
            }
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("name", &self.name())
            .field("counts", &self.counts())
            .finish()
    }
}
