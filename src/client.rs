use std::{fmt, sync::Arc, time::Duration};

use crate::{
    delivery::{self, Delivery, DeliveryMode},
    engine::Engine,
    outcome::{Outcome, Response, TransportError},
    plugin::{Interceptor, PluginRef, PluginRegistry, Resolved},
    request::{Credentials, RequestDefaults, RequestOptions},
    transport::{ReqwestTransport, Transport},
    ClientOptions, DocDbError, Result,
};

/// HTTP client for a document-database service.
///
/// Every call runs the attached interceptors around the transport, retries
/// while an interceptor asks for it and `max_attempt` allows, and hands the
/// final outcome back as a callback, events, or a promise-style future.
///
/// Calls are spawned onto the current Tokio runtime.
#[derive(Clone)]
pub struct DocDbClient {
    transport: Arc<dyn Transport>,
    defaults: Arc<RequestDefaults>,
    plugins: Vec<Interceptor>,
    registry: PluginRegistry,
    mode: DeliveryMode,
    options: ClientOptions,
}

impl fmt::Debug for DocDbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocDbClient")
            .field("base_url", &self.defaults.base_url)
            .field("credentials", &self.defaults.credentials)
            .field("plugins", &self.plugins)
            .field("mode", &self.mode)
            .field("options", &self.options)
            .finish()
    }
}

impl DocDbClient {
    /// Creates a client without plugins, using default options.
    pub fn new(base_url: impl Into<String>) -> Self {
        let options = ClientOptions::default();
        Self {
            transport: Arc::new(ReqwestTransport::new(Duration::from_millis(
                options.timeout_ms,
            ))),
            defaults: Arc::new(RequestDefaults {
                base_url: base_url.into(),
                credentials: None,
            }),
            plugins: Vec::new(),
            registry: PluginRegistry::builtin(),
            mode: DeliveryMode::default(),
            options,
        }
    }

    pub fn builder(base_url: impl Into<String>) -> DocDbClientBuilder {
        DocDbClientBuilder::new(base_url)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `DOCDB_URL`: base URL of the service (required)
    /// - `DOCDB_TOKEN`: bearer token (optional, `Bearer` prefix optional)
    /// - `DOCDB_PLUGINS`: comma-separated plugin names, e.g. `retry,promises`
    /// - `DOCDB_TIMEOUT_MS` / `DOCDB_MAX_ATTEMPT`: see [`ClientOptions::from_env`]
    ///
    /// # Example
    ///
    /// ```no_run
    /// use docdb_http::DocDbClient;
    ///
    /// let db = DocDbClient::from_env().expect("missing DOCDB_URL");
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("DOCDB_URL").ok_or_else(|| {
            DocDbError::Config("missing DOCDB_URL environment variable".to_owned())
        })?;
        if url.trim().is_empty() {
            return Err(DocDbError::Config("DOCDB_URL is set but empty".to_owned()));
        }

        let mut builder = Self::builder(url).options(ClientOptions::from_lookup(&lookup)?);
        if let Some(token) = lookup("DOCDB_TOKEN") {
            if !token.trim().is_empty() {
                builder = builder.credentials(Credentials::bearer(token));
            }
        }
        if let Some(names) = lookup("DOCDB_PLUGINS") {
            builder = builder.plugins(
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(PluginRef::named),
            );
        }
        builder.build()
    }

    /// Resolves and appends plugins, keeping their order.
    ///
    /// Fails without modifying the client if any reference is unknown.
    pub fn add_plugins<I, R>(&mut self, plugins: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        let mut attached = Vec::new();
        let mut mode = self.mode;
        for reference in plugins {
            match self.registry.resolve(&reference.into())? {
                Resolved::Plugin(interceptor) => attached.push(interceptor),
                Resolved::Delivery(selected) => mode = selected,
                Resolved::Ignored => {}
            }
        }
        self.plugins.extend(attached);
        self.mode = mode;
        Ok(())
    }

    /// Attached interceptors, in attachment order.
    pub fn plugins(&self) -> &[Interceptor] {
        &self.plugins
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn base_url(&self) -> &str {
        &self.defaults.base_url
    }

    /// Starts a call and returns the handle matching the delivery mode.
    pub fn request(&self, request: RequestOptions) -> Result<Delivery> {
        let rx = self.start(request)?;
        Ok(match self.mode {
            DeliveryMode::Events => Delivery::Events(delivery::events(rx)),
            DeliveryMode::Promise => Delivery::Promise(delivery::promise(rx)),
        })
    }

    /// Starts a call and invokes `callback` exactly once when it settles.
    ///
    /// Any final response is passed as `Ok`, whatever its status code;
    /// `Err` carries a final transport error.
    pub fn request_with_callback<F>(&self, request: RequestOptions, callback: F) -> Result<()>
    where
        F: FnOnce(std::result::Result<Response, TransportError>) + Send + 'static,
    {
        let rx = self.start(request)?;
        delivery::callback(rx, callback);
        Ok(())
    }

    fn start(&self, request: RequestOptions) -> Result<tokio::sync::oneshot::Receiver<Outcome>> {
        request.validate()?;

        let engine = Engine::new(
            Arc::clone(&self.transport),
            self.plugins.clone(),
            self.options.max_attempt,
            Arc::clone(&self.defaults),
        );
        let (tx, rx) = delivery::completion();
        tokio::spawn(async move {
            let outcome = engine.execute(request).await;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                status = ?outcome.status(),
                "request settled"
            );

            let _ = tx.send(outcome);
        });
        Ok(rx)
    }
}

/// Builder for [`DocDbClient`].
pub struct DocDbClientBuilder {
    base_url: String,
    credentials: Option<Credentials>,
    plugins: Vec<PluginRef>,
    registry: PluginRegistry,
    transport: Option<Arc<dyn Transport>>,
    options: ClientOptions,
}

impl DocDbClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
            plugins: Vec::new(),
            registry: PluginRegistry::builtin(),
            transport: None,
            options: ClientOptions::default(),
        }
    }

    pub fn plugin(mut self, plugin: impl Into<PluginRef>) -> Self {
        self.plugins.push(plugin.into());
        self
    }

    pub fn plugins<I, R>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<PluginRef>,
    {
        self.plugins.extend(plugins.into_iter().map(Into::into));
        self
    }

    pub fn max_attempt(mut self, max_attempt: usize) -> Self {
        self.options.max_attempt = max_attempt;
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Credentials applied to requests that carry none.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replaces the plugin name registry used to resolve named plugins.
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the baseline `reqwest` transport.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> Result<DocDbClient> {
        self.options.validate()?;
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(ReqwestTransport::new(Duration::from_millis(
                self.options.timeout_ms,
            )))
        });

        let mut client = DocDbClient {
            transport,
            defaults: Arc::new(RequestDefaults {
                base_url: self.base_url,
                credentials: self.credentials,
            }),
            plugins: Vec::new(),
            registry: self.registry,
            mode: DeliveryMode::default(),
            options: self.options,
        };
        client.add_plugins(self.plugins)?;
        Ok(client)
    }
}

impl fmt::Debug for DocDbClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocDbClientBuilder")
            .field("base_url", &self.base_url)
            .field("plugins", &self.plugins)
            .field("options", &self.options)
            .finish()
    }
}
