//! `docdb-http` is the request-execution core of an async HTTP client for
//! document-database services.
//!
//! A call flows through the attached [`Plugin`]s, the [`Transport`], and back
//! through the plugins in reverse order; a plugin may ask for another
//! attempt, bounded by [`ClientOptions::max_attempt`]. The final outcome is
//! delivered through one of:
//! - [`DocDbClient::request_with_callback`]
//! - [`DocDbClient::request`] returning [`Delivery::Events`]
//! - [`DocDbClient::request`] returning [`Delivery::Promise`] once the
//!   `promises` plugin name is attached

mod backoff;
mod client;
mod delivery;
mod engine;
mod error;
mod options;
mod outcome;
mod plugin;
mod request;
mod transport;

pub use backoff::ExponentialBackoff;
pub use client::{DocDbClient, DocDbClientBuilder};
pub use delivery::{Delivery, DeliveryMode, PendingResponse, ResponseEvent, ResponseEvents};
pub use engine::CallState;
pub use error::DocDbError;
pub use options::ClientOptions;
pub use outcome::{Outcome, Response, TransportError, TransportErrorKind};
pub use plugin::{
    HookCounters, HookCounts, Interceptor, Plugin, PluginFactory, PluginRef, PluginRegistry,
    Reaction, Resolved, RetryDirective, RetryPlugin,
};
pub use request::{Credentials, RequestOptions};
pub use transport::{ReqwestTransport, Transport};

pub use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, DocDbError>;
