use std::sync::Arc;

use crate::{
    outcome::{Outcome, TransportError},
    plugin::{Interceptor, RetryDirective},
    request::{RequestDefaults, RequestOptions},
    transport::Transport,
};

/// State of one external call, visible to every hook.
pub struct CallState {
    attempt: usize,
    max_attempt: usize,
    request: RequestOptions,
    transport: Arc<dyn Transport>,
    defaults: Arc<RequestDefaults>,
}

impl CallState {
    fn new(
        mut request: RequestOptions,
        max_attempt: usize,
        transport: Arc<dyn Transport>,
        defaults: Arc<RequestDefaults>,
    ) -> Self {
        defaults.apply(&mut request);
        Self {
            attempt: 1,
            max_attempt,
            request,
            transport,
            defaults,
        }
    }

    /// 1-based index of the running attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_attempt(&self) -> usize {
        self.max_attempt
    }

    /// Whether a retry requested now would be ignored.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempt
    }

    /// Request as it was at the start of the request phase, or as it was
    /// sent once the transfer has happened.
    pub fn request(&self) -> &RequestOptions {
        &self.request
    }

    /// Sends a transfer of the hook's own, e.g. a login or recovery request,
    /// before the chain continues. Relative URLs are joined onto the client
    /// base URL and client credentials fill in missing ones, as for the
    /// call's own attempts. Interceptors are not run for it.
    pub async fn perform(&self, mut request: RequestOptions) -> Outcome {
        self.defaults.apply(&mut request);
        self.transport.perform(&request).await
    }

    /// Raw transport of the call. Requests given to it are sent exactly as
    /// they are; prefer [`CallState::perform`].
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

/// Runs the interceptor chain around the transport with bounded retries.
#[derive(Clone)]
pub(crate) struct Engine {
    transport: Arc<dyn Transport>,
    plugins: Vec<Interceptor>,
    max_attempt: usize,
    defaults: Arc<RequestDefaults>,
}

impl Engine {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        plugins: Vec<Interceptor>,
        max_attempt: usize,
        defaults: Arc<RequestDefaults>,
    ) -> Self {
        Self {
            transport,
            plugins,
            max_attempt: max_attempt.max(1),
            defaults,
        }
    }

    pub(crate) async fn execute(&self, request: RequestOptions) -> Outcome {
        let mut state = CallState::new(
            request,
            self.max_attempt,
            Arc::clone(&self.transport),
            Arc::clone(&self.defaults),
        );

        loop {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt = state.attempt,
                max_attempt = state.max_attempt,
                method = %state.request.method,
                url = %state.request.url,
                "starting attempt"
            );

            let mut request = state.request.clone();
            let sent = self.request_phase(&state, &mut request).await;
            self.defaults.apply(&mut request);
            state.request = request;

            let outcome = match sent {
                Ok(()) => self.transport.perform(&state.request).await,
                Err(err) => Outcome::Error(err),
            };

            let (outcome, directive) = self.reaction_phase(&state, outcome).await;

            let Some(directive) = directive else {
                return outcome;
            };
            if state.is_last_attempt() {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt = state.attempt,
                    "retry requested on last attempt, settling"
                );
                return outcome;
            }

            if let Some(mut replacement) = directive.request {
                self.defaults.apply(&mut replacement);
                state.request = replacement;
            }
            if let Some(delay) = directive.delay.filter(|delay| !delay.is_zero()) {
                #[cfg(feature = "tracing")]
                tracing::debug!("retrying request after {} ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
            state.attempt += 1;
        }
    }

    async fn request_phase(
        &self,
        state: &CallState,
        request: &mut RequestOptions,
    ) -> Result<(), TransportError> {
        for plugin in &self.plugins {
            plugin.request(state, request).await?;
        }
        Ok(())
    }

    async fn reaction_phase(
        &self,
        state: &CallState,
        mut outcome: Outcome,
    ) -> (Outcome, Option<RetryDirective>) {
        let mut directive = None;
        for plugin in self.plugins.iter().rev() {
            let (next, retry) = plugin.react(state, outcome).await.into_parts();
            outcome = next;
            if let Some(retry) = retry {
                if directive.is_none() {
                    directive = Some(retry);
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        plugin = plugin.name(),
                        "dropping retry directive, an earlier hook already issued one"
                    );
                }
            }
        }
        (outcome, directive)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};

    use super::{CallState, Engine};
    use crate::{
        backoff::ExponentialBackoff,
        outcome::{Outcome, Response, TransportError, TransportErrorKind},
        plugin::{HookCounts, Interceptor, Plugin, Reaction, RetryDirective, RetryPlugin},
        request::{Credentials, RequestDefaults, RequestOptions},
        transport::Transport,
    };

    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Outcome>>,
        seen: Mutex<Vec<(Method, String)>>,
        hits: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn perform(&self, request: &RequestOptions) -> Outcome {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .expect("seen mutex must not be poisoned")
                .push((request.method.clone(), request.url.clone()));
            self.outcomes
                .lock()
                .expect("outcome queue mutex must not be poisoned")
                .pop_front()
                .unwrap_or_else(|| ok(StatusCode::OK, "{}"))
        }
    }

    fn ok(status: StatusCode, body: &str) -> Outcome {
        Outcome::Response(Response::new(status, body))
    }

    fn reset() -> Outcome {
        Outcome::Error(TransportError::new(
            TransportErrorKind::Connect,
            "connection reset by peer",
        ))
    }

    struct Noop;

    impl Plugin for Noop {}

    fn engine(transport: &Arc<ScriptedTransport>, plugins: &[Interceptor], max: usize) -> Engine {
        Engine::new(
            transport.clone(),
            plugins.to_vec(),
            max,
            Arc::new(RequestDefaults::default()),
        )
    }

    #[tokio::test]
    async fn noop_plugins_count_one_request_and_response_on_success() {
        for n in [1usize, 3, 10] {
            let plugins: Vec<Interceptor> = (0..n).map(|_| Interceptor::new(Noop)).collect();
            let transport = ScriptedTransport::new(vec![ok(StatusCode::OK, r#"{"ok":true}"#)]);

            let outcome = engine(&transport, &plugins, 1)
                .execute(RequestOptions::get("http://db/animals"))
                .await;

            assert_eq!(outcome.status(), Some(StatusCode::OK));
            for plugin in &plugins {
                assert_eq!(
                    plugin.counts(),
                    HookCounts {
                        request: 1,
                        response: 1,
                        error: 0
                    }
                );
            }
        }
    }

    #[tokio::test]
    async fn noop_plugins_count_one_request_and_error_on_transport_failure() {
        for n in [1usize, 4] {
            let plugins: Vec<Interceptor> = (0..n).map(|_| Interceptor::new(Noop)).collect();
            let transport = ScriptedTransport::new(vec![reset()]);

            let outcome = engine(&transport, &plugins, 1)
                .execute(RequestOptions::get("http://db/animals"))
                .await;

            assert!(!outcome.is_response());
            for plugin in &plugins {
                assert_eq!(
                    plugin.counts(),
                    HookCounts {
                        request: 1,
                        response: 0,
                        error: 1
                    }
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_412_with_doubling_backoff_until_cap() {
        let retry = Interceptor::new(
            RetryPlugin::new(Duration::from_millis(10)).on_statuses([StatusCode::PRECONDITION_FAILED]),
        );
        let transport = ScriptedTransport::new(
            (0..10)
                .map(|_| ok(StatusCode::PRECONDITION_FAILED, r#"{"error":"file_exists"}"#))
                .collect(),
        );

        let started = tokio::time::Instant::now();
        let outcome = engine(&transport, &[retry.clone()], 10)
            .execute(RequestOptions::put("http://db/animals"))
            .await;

        assert_eq!(outcome.status(), Some(StatusCode::PRECONDITION_FAILED));
        assert!(started.elapsed() >= ExponentialBackoff::from_millis(10).total(9));
        assert_eq!(transport.hits(), 10);
        assert_eq!(
            retry.counts(),
            HookCounts {
                request: 10,
                response: 10,
                error: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_once_response_succeeds() {
        let retry = Interceptor::new(RetryPlugin::new(Duration::from_millis(10)));
        let transport = ScriptedTransport::new(vec![
            ok(StatusCode::TOO_MANY_REQUESTS, "{}"),
            reset(),
            ok(StatusCode::OK, r#"{"ok":true}"#),
        ]);

        let outcome = engine(&transport, &[retry.clone()], 5)
            .execute(RequestOptions::get("http://db/animals"))
            .await;

        assert_eq!(outcome.status(), Some(StatusCode::OK));
        assert_eq!(transport.hits(), 3);
        assert_eq!(
            retry.counts(),
            HookCounts {
                request: 3,
                response: 2,
                error: 1
            }
        );
    }

    #[tokio::test]
    async fn max_attempt_one_ignores_retry_directive() {
        let retry = Interceptor::new(RetryPlugin::new(Duration::from_secs(3600)));
        let transport = ScriptedTransport::new(vec![ok(StatusCode::TOO_MANY_REQUESTS, "{}")]);

        let outcome = engine(&transport, &[retry], 1)
            .execute(RequestOptions::get("http://db/animals"))
            .await;

        assert_eq!(outcome.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(transport.hits(), 1);
    }

    struct Reject;

    #[async_trait]
    impl Plugin for Reject {
        async fn on_request(
            &self,
            _state: &CallState,
            _request: &mut RequestOptions,
        ) -> Result<(), TransportError> {
            Err(TransportError::new(TransportErrorKind::Aborted, "blocked"))
        }
    }

    #[tokio::test]
    async fn short_circuit_skips_transfer_and_later_request_hooks() {
        let before = Interceptor::new(Noop);
        let reject = Interceptor::new(Reject);
        let after = Interceptor::new(Noop);
        let transport = ScriptedTransport::new(vec![]);

        let outcome = engine(&transport, &[before.clone(), reject.clone(), after.clone()], 1)
            .execute(RequestOptions::get("http://db/animals"))
            .await;

        match outcome {
            Outcome::Error(err) => assert_eq!(err.kind, TransportErrorKind::Aborted),
            other => panic!("expected aborted error, got {other:?}"),
        }
        assert_eq!(transport.hits(), 0);
        assert_eq!(before.counts().request, 1);
        assert_eq!(reject.counts().request, 1);
        assert_eq!(after.counts().request, 0);
        for plugin in [&before, &reject, &after] {
            assert_eq!(plugin.counts().error, 1);
            assert_eq!(plugin.counts().response, 0);
        }
    }

    struct Rewrite;

    #[async_trait]
    impl Plugin for Rewrite {
        async fn on_request(
            &self,
            _state: &CallState,
            request: &mut RequestOptions,
        ) -> Result<(), TransportError> {
            request.method = Method::POST;
            request.url = format!("{}/_find", request.url);
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_hooks_can_rewrite_method_and_url() {
        let transport = ScriptedTransport::new(vec![]);

        engine(&transport, &[Interceptor::new(Rewrite)], 1)
            .execute(RequestOptions::get("http://db/animals"))
            .await;

        let seen = transport.seen.lock().expect("seen mutex").clone();
        assert_eq!(seen, vec![(Method::POST, "http://db/animals/_find".to_owned())]);
    }

    /// Records hook order into a shared log.
    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Trace {
        async fn on_request(
            &self,
            _state: &CallState,
            _request: &mut RequestOptions,
        ) -> Result<(), TransportError> {
            self.log.lock().expect("log").push(format!("req:{}", self.label));
            Ok(())
        }

        async fn on_response(&self, _state: &CallState, response: Response) -> Reaction {
            self.log.lock().expect("log").push(format!("res:{}", self.label));
            Reaction::proceed(response)
        }
    }

    #[tokio::test]
    async fn reaction_hooks_unwind_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let plugins: Vec<Interceptor> = ["a", "b", "c"]
            .into_iter()
            .map(|label| {
                Interceptor::new(Trace {
                    label,
                    log: log.clone(),
                })
            })
            .collect();
        let transport = ScriptedTransport::new(vec![]);

        engine(&transport, &plugins, 1)
            .execute(RequestOptions::get("http://db/"))
            .await;

        assert_eq!(
            *log.lock().expect("log"),
            ["req:a", "req:b", "req:c", "res:c", "res:b", "res:a"]
        );
    }

    /// Recovers from transport errors by calling a fallback endpoint.
    struct Recover;

    #[async_trait]
    impl Plugin for Recover {
        async fn on_error(&self, state: &CallState, error: TransportError) -> Reaction {
            let fallback = RequestOptions::get(format!("{}/_recover", state.request().url));
            match state.perform(fallback).await {
                Outcome::Response(response) if response.status.is_success() => {
                    Reaction::proceed(response)
                }
                _ => Reaction::proceed(error),
            }
        }
    }

    #[tokio::test]
    async fn error_hook_can_turn_transport_error_into_response() {
        let outer = Interceptor::new(Noop);
        let recover = Interceptor::new(Recover);
        let transport = ScriptedTransport::new(vec![reset(), ok(StatusCode::OK, "recovered")]);

        let outcome = engine(&transport, &[outer.clone(), recover.clone()], 1)
            .execute(RequestOptions::get("http://db"))
            .await;

        match outcome {
            Outcome::Response(response) => assert_eq!(response.text(), "recovered"),
            other => panic!("expected recovered response, got {other:?}"),
        }
        assert_eq!(transport.hits(), 2);
        assert_eq!(recover.counts().error, 1);
        // The outer plugin sees the recovered outcome.
        assert_eq!(outer.counts().response, 1);
        assert_eq!(outer.counts().error, 0);
    }

    /// Turns every response into a transport error.
    struct Spoil;

    #[async_trait]
    impl Plugin for Spoil {
        async fn on_response(&self, _state: &CallState, _response: Response) -> Reaction {
            Reaction::proceed(TransportError::new(TransportErrorKind::Other, "rejected"))
        }
    }

    #[tokio::test]
    async fn response_turned_into_error_reaches_outer_error_hooks() {
        let outer = Interceptor::new(Noop);
        let spoil = Interceptor::new(Spoil);
        let transport = ScriptedTransport::new(vec![ok(StatusCode::OK, "{}")]);

        let outcome = engine(&transport, &[outer.clone(), spoil.clone()], 1)
            .execute(RequestOptions::get("http://db"))
            .await;

        assert!(!outcome.is_response());
        assert_eq!(spoil.counts().response, 1);
        assert_eq!(outer.counts().error, 1);
        assert_eq!(outer.counts().response, 0);
    }

    /// Asks for a retry against a different URL.
    struct Redirect {
        target: &'static str,
    }

    #[async_trait]
    impl Plugin for Redirect {
        async fn on_response(&self, state: &CallState, response: Response) -> Reaction {
            if state.attempt() > 1 {
                return Reaction::proceed(response);
            }
            let request = RequestOptions::get(self.target);
            Reaction::retry(response, RetryDirective::new().with_request(request))
        }
    }

    #[tokio::test]
    async fn first_retry_directive_by_hook_order_wins() {
        let plugins = [
            Interceptor::new(Redirect { target: "http://db/second" }),
            Interceptor::new(Redirect { target: "http://db/first" }),
        ];
        let transport = ScriptedTransport::new(vec![]);

        engine(&transport, &plugins, 3)
            .execute(RequestOptions::get("http://db/start"))
            .await;

        let urls: Vec<String> = transport
            .seen
            .lock()
            .expect("seen mutex")
            .iter()
            .map(|(_, url)| url.clone())
            .collect();
        assert_eq!(urls, ["http://db/start", "http://db/first"]);
    }

    #[tokio::test]
    async fn same_instance_in_three_slots_shares_counters() {
        let shared = Interceptor::new(Noop);
        let transport = ScriptedTransport::new(vec![]);
        let plugins = vec![shared.clone(), shared.clone(), shared.clone()];

        engine(&transport, &plugins, 1)
            .execute(RequestOptions::get("http://db"))
            .await;

        assert_eq!(shared.counts().request, 3);
        assert_eq!(shared.counts().response, 3);
    }

    /// Retries once against a relative path.
    struct Move;

    #[async_trait]
    impl Plugin for Move {
        async fn on_response(&self, state: &CallState, response: Response) -> Reaction {
            if state.attempt() > 1 {
                return Reaction::proceed(response);
            }
            let login = state.perform(RequestOptions::post("/_session")).await;
            assert!(login.is_response());
            let request = RequestOptions::get("/animals/moved");
            Reaction::retry(response, RetryDirective::new().with_request(request))
        }
    }

    #[tokio::test]
    async fn relative_urls_resolve_against_base_for_every_transfer() {
        let transport = ScriptedTransport::new(vec![]);
        let defaults = Arc::new(RequestDefaults {
            base_url: "http://db:5984".to_owned(),
            credentials: Some(Credentials::bearer("token")),
        });
        let engine = Engine::new(
            transport.clone(),
            vec![Interceptor::new(Move), Interceptor::new(Rewrite)],
            2,
            defaults,
        );

        let outcome = engine.execute(RequestOptions::get("/animals")).await;

        assert_eq!(outcome.status(), Some(StatusCode::OK));
        let seen = transport.seen.lock().expect("seen mutex").clone();
        assert_eq!(
            seen,
            vec![
                (Method::POST, "http://db:5984/animals/_find".to_owned()),
                (Method::POST, "http://db:5984/_session".to_owned()),
                (Method::POST, "http://db:5984/animals/moved/_find".to_owned()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_do_not_lose_counter_updates() {
        let shared = Interceptor::new(Noop);
        let transport = ScriptedTransport::new(vec![]);
        let engine = engine(&transport, &[shared.clone()], 1);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.execute(RequestOptions::get("http://db")).await })
            })
            .collect();
        for task in tasks {
            task.await.expect("call task must not panic");
        }

        assert_eq!(shared.counts().request, 50);
        assert_eq!(shared.counts().response, 50);
    }
}
