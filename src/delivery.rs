//! Delivery of a settled call.
//!
//! Every call completes into a single `oneshot` slot holding the final
//! [`Outcome`]. The adapters here turn that slot into a callback
//! invocation, a sequence of [`ResponseEvent`]s, or a [`PendingResponse`]
//! future.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use reqwest::{header::HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::{
    outcome::{Outcome, Response, TransportError, TransportErrorKind},
    DocDbError, Result,
};

/// How a client hands back results when no callback is supplied.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeliveryMode {
    #[default]
    Events,
    /// Selected by the `promises` plugin name.
    Promise,
}

/// Handle returned by [`crate::DocDbClient::request`].
#[derive(Debug)]
pub enum Delivery {
    Events(ResponseEvents),
    Promise(PendingResponse),
}

impl Delivery {
    pub fn mode(&self) -> DeliveryMode {
        match self {
            Self::Events(_) => DeliveryMode::Events,
            Self::Promise(_) => DeliveryMode::Promise,
        }
    }

    pub fn into_events(self) -> Option<ResponseEvents> {
        match self {
            Self::Events(events) => Some(events),
            Self::Promise(_) => None,
        }
    }

    pub fn into_promise(self) -> Option<PendingResponse> {
        match self {
            Self::Promise(pending) => Some(pending),
            Self::Events(_) => None,
        }
    }
}

/// Notification emitted in event mode.
///
/// A call emits either a single `Error`, or `Response`, `Data` and `End`
/// in that order.
#[derive(Clone, Debug)]
pub enum ResponseEvent {
    Response {
        status: StatusCode,
        headers: HeaderMap,
    },
    Data(Vec<u8>),
    End,
    Error(TransportError),
}

/// Receiving side of event mode.
#[derive(Debug)]
pub struct ResponseEvents {
    rx: mpsc::UnboundedReceiver<ResponseEvent>,
}

impl ResponseEvents {
    /// Next event, or `None` once the call has emitted its last event.
    pub async fn recv(&mut self) -> Option<ResponseEvent> {
        self.rx.recv().await
    }

    /// Waits for the call to settle and returns every event it emitted.
    pub async fn collect(mut self) -> Vec<ResponseEvent> {
        let mut events = Vec::with_capacity(3);
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}

/// Future returned in promise mode.
///
/// Resolves with the body parsed as JSON when the final status is a
/// success; rejects with [`DocDbError::Http`] otherwise, or with
/// [`DocDbError::Transport`] when the call ended in a transport error.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for PendingResponse {
    type Output = Result<serde_json::Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| settle_promise(received.unwrap_or_else(|_| abandoned())))
    }
}

pub(crate) fn completion() -> (oneshot::Sender<Outcome>, oneshot::Receiver<Outcome>) {
    oneshot::channel()
}

pub(crate) fn promise(rx: oneshot::Receiver<Outcome>) -> PendingResponse {
    PendingResponse { rx }
}

pub(crate) fn events(rx: oneshot::Receiver<Outcome>) -> ResponseEvents {
    let (tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let outcome = rx.await.unwrap_or_else(|_| abandoned());
        for event in outcome_events(outcome) {
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    ResponseEvents { rx: events_rx }
}

pub(crate) fn callback<F>(rx: oneshot::Receiver<Outcome>, callback: F)
where
    F: FnOnce(std::result::Result<Response, TransportError>) + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = rx.await.unwrap_or_else(|_| abandoned());
        callback(outcome.into_result());
    });
}

fn outcome_events(outcome: Outcome) -> Vec<ResponseEvent> {
    match outcome {
        Outcome::Error(err) => vec![ResponseEvent::Error(err)],
        Outcome::Response(response) => vec![
            ResponseEvent::Response {
                status: response.status,
                headers: response.headers,
            },
            ResponseEvent::Data(response.body),
            ResponseEvent::End,
        ],
    }
}

/// Reads a string field from a JSON error body. Missing fields, fields of
/// another type, and non-JSON bodies all yield `None`.
fn error_field(body: &serde_json::Value, name: &str) -> Option<String> {
    body.get(name)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}

fn settle_promise(outcome: Outcome) -> Result<serde_json::Value> {
    let response = outcome.into_result().map_err(DocDbError::Transport)?;

    if !response.status.is_success() {
        let fields: serde_json::Value =
            serde_json::from_slice(&response.body).unwrap_or(serde_json::Value::Null);
        return Err(DocDbError::Http {
            status: response.status.as_u16(),
            error: error_field(&fields, "error"),
            reason: error_field(&fields, "reason"),
            body: response.text(),
        });
    }

    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(&response.body).map_err(|err| {
        DocDbError::Decode(format!(
            "invalid response JSON: {err}; body: {}",
            response.text()
        ))
    })
}

/// Outcome reported when the call task ends without settling.
fn abandoned() -> Outcome {
    Outcome::Error(TransportError::new(
        TransportErrorKind::Other,
        "request task ended before settling",
    ))
}
