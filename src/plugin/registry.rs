use std::{collections::HashMap, fmt, sync::Arc};

use super::{Interceptor, Plugin, RetryPlugin};
use crate::{delivery::DeliveryMode, DocDbError, Result};

/// Builds a fresh interceptor on every call.
pub type PluginFactory = Arc<dyn Fn() -> Interceptor + Send + Sync>;

/// Something that can be attached to a client.
#[derive(Clone)]
pub enum PluginRef {
    /// An existing handle. Attaching it again shares its counters.
    Instance(Interceptor),
    /// A constructor. Every resolution yields an independent instance.
    Factory(PluginFactory),
    /// A name looked up in the [`PluginRegistry`].
    Named(String),
}

impl PluginRef {
    pub fn instance(interceptor: &Interceptor) -> Self {
        Self::Instance(interceptor.clone())
    }

    pub fn factory<F, P>(build: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin + 'static,
    {
        Self::Factory(Arc::new(move || Interceptor::new(build())))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl fmt::Debug for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(interceptor) => f.debug_tuple("Instance").field(interceptor).finish(),
            Self::Factory(_) => f.write_str("Factory"),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

impl From<Interceptor> for PluginRef {
    fn from(interceptor: Interceptor) -> Self {
        Self::Instance(interceptor)
    }
}

impl From<&Interceptor> for PluginRef {
    fn from(interceptor: &Interceptor) -> Self {
        Self::Instance(interceptor.clone())
    }
}

impl From<&str> for PluginRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_owned())
    }
}

impl From<String> for PluginRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Result of resolving a [`PluginRef`].
#[derive(Debug)]
pub enum Resolved {
    Plugin(Interceptor),
    /// Switches the client's delivery mode; adds no interceptor.
    Delivery(DeliveryMode),
    /// Names baseline behavior that is always present.
    Ignored,
}

#[derive(Clone)]
enum Entry {
    Factory(PluginFactory),
    Delivery(DeliveryMode),
    Ignored,
}

/// Closed mapping from plugin names to what they resolve to.
///
/// Built-in names:
/// - `promises` selects [`DeliveryMode::Promise`]
/// - `default` and `base` are accepted and ignored
/// - `retry` attaches a [`RetryPlugin`] with default settings
#[derive(Clone)]
pub struct PluginRegistry {
    entries: HashMap<String, Entry>,
}

impl PluginRegistry {
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        entries.insert("promises".to_owned(), Entry::Delivery(DeliveryMode::Promise));
        entries.insert("default".to_owned(), Entry::Ignored);
        entries.insert("base".to_owned(), Entry::Ignored);
        entries.insert(
            "retry".to_owned(),
            Entry::Factory(Arc::new(|| Interceptor::new(RetryPlugin::default()))),
        );
        Self { entries }
    }

    /// Registers or replaces a named factory.
    pub fn register<F, P>(&mut self, name: &str, build: F)
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Plugin + 'static,
    {
        let factory: PluginFactory = Arc::new(move || Interceptor::new(build()));
        self.entries.insert(normalize(name), Entry::Factory(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    pub fn resolve(&self, reference: &PluginRef) -> Result<Resolved> {
        match reference {
            PluginRef::Instance(interceptor) => Ok(Resolved::Plugin(interceptor.clone())),
            PluginRef::Factory(build) => Ok(Resolved::Plugin(build())),
            PluginRef::Named(name) => match self.entries.get(&normalize(name)) {
                Some(Entry::Factory(build)) => Ok(Resolved::Plugin(build())),
                Some(Entry::Delivery(mode)) => Ok(Resolved::Delivery(*mode)),
                Some(Entry::Ignored) => Ok(Resolved::Ignored),
                None => Err(DocDbError::Config(format!("unknown plugin '{name}'"))),
            },
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("PluginRegistry").field("names", &names).finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
