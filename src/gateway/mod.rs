//! Chat gateway: provider registry plus the client capability trait.

pub mod error;
pub mod image;
pub mod openai_compat;
pub mod providers;
pub mod types;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use tracing::debug;

pub use error::{ErrorContext, ProviderError};
pub use image::{mime_type_for, EncodedImage};
pub use openai_compat::OpenAiCompatClient;
pub use types::*;

/// Capability every provider client exposes.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    /// Registry name of the provider that built this client.
    fn provider(&self) -> &'static str;

    fn model_name(&self) -> &str;

    /// Blocking chat. Must not be called from inside an async task.
    fn chat(&self, input: &ChatInput) -> Result<String, ProviderError>;

    /// Chat that suspends on network I/O.
    async fn async_chat(&self, input: &ChatInput) -> Result<String, ProviderError>;
}

/// Builds a client for `(model_name, options)`.
pub type ClientConstructor =
    Arc<dyn Fn(&str, &ClientOptions) -> Result<Box<dyn ChatClient>, ProviderError> + Send + Sync>;

/// Map from provider name to client constructor.
pub struct ClientFactory {
    constructors: HashMap<String, ClientConstructor>,
}

impl Default for ClientFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        providers::register_builtin(&mut factory);
        factory
    }
}

impl ClientFactory {
    /// Factory with no providers registered.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Process-wide factory with the builtin providers. Built once, read-only.
    pub fn global() -> &'static ClientFactory {
        static GLOBAL: OnceLock<ClientFactory> = OnceLock::new();
        GLOBAL.get_or_init(ClientFactory::default)
    }

    /// Register a constructor. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F>(&mut self, provider: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &ClientOptions) -> Result<Box<dyn ChatClient>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(provider.into(), Arc::new(constructor));
    }

    pub fn create(
        &self,
        provider: &str,
        model_name: &str,
        options: &ClientOptions,
    ) -> Result<Box<dyn ChatClient>, ProviderError> {
        let constructor = self.constructors.get(provider).ok_or_else(|| {
            let known = self.list_providers().into_iter().collect::<Vec<_>>().join(", ");
            ProviderError::config(format!("unsupported provider: {provider} (known: {known})"))
        })?;
        debug!(provider, model = model_name, "creating chat client");
        constructor(model_name, options)
    }

    pub fn list_providers(&self) -> BTreeSet<String> {
        self.constructors.keys().cloned().collect()
    }
}

/// Create a client from the global factory.
pub fn create_client(
    provider: &str,
    model_name: &str,
    options: &ClientOptions,
) -> Result<Box<dyn ChatClient>, ProviderError> {
    ClientFactory::global().create(provider, model_name, options)
}

/// Providers known to the global factory.
pub fn list_providers() -> BTreeSet<String> {
    ClientFactory::global().list_providers()
}
