use crate::client::FetchClient;
use crate::config::{Configuration, FetchOptions};
use crate::error::FetchError;
use crate::telemetry::IdGenerator;
use crate::template::{DEFAULT_TEMPLATE_CACHE_CAPACITY, Params, TemplateCache};
use crate::tls::TlsRootConfig;
use crate::transport::{HyperTransport, Transport, TransportSettings};
use std::sync::Arc;
use std::time::Duration;

/// Base URL of a root client when none is given
pub const DEFAULT_BASE_URL: &str = "http://localhost/";

/// Builder for a root [`FetchClient`].
pub struct FetchClientBuilder {
    base_url: String,
    params: Params,
    options: FetchOptions,
    settings: TransportSettings,
    transport: Option<Arc<dyn Transport>>,
    template_cache_capacity: usize,
}

impl FetchClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            params: Params::new(),
            options: FetchOptions::new(),
            settings: TransportSettings::default(),
            transport: None,
            template_cache_capacity: DEFAULT_TEMPLATE_CACHE_CAPACITY,
        }
    }

    /// Base URL template every call resolves against
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Default template parameters
    #[must_use]
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Default options layered over the built-in defaults
    #[must_use]
    pub fn options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.settings.user_agent = user_agent.into();
        self
    }

    /// Set idle timeout for pooled connections
    ///
    /// `None` keeps idle connections indefinitely.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.settings.pool_max_idle_per_host = max;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.settings.tls_roots = roots;
        self
    }

    /// Number of distinct URL templates whose parse is retained
    #[must_use]
    pub fn template_cache_capacity(mut self, capacity: usize) -> Self {
        self.template_cache_capacity = capacity;
        self
    }

    /// Replace the hyper transport, e.g. with an in-memory one in tests.
    ///
    /// Transport settings (user agent, pool, TLS roots) are ignored when set.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// # Errors
    /// Returns `FetchError::InvalidHeaderValue` if the user agent is invalid.
    pub fn build(self) -> Result<FetchClient, FetchError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(self.settings)?),
        };

        Ok(FetchClient {
            url: Arc::from(self.base_url),
            params: Arc::new(self.params),
            config: Arc::new(Configuration::default().merge(&self.options)),
            transport,
            templates: Arc::new(TemplateCache::with_capacity(self.template_cache_capacity)),
            ids: Arc::new(IdGenerator::new()),
        })
    }
}

impl Default for FetchClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::As;

    #[test]
    fn test_builder_defaults() {
        let client = FetchClientBuilder::new().build().unwrap();
        assert_eq!(client.url(), DEFAULT_BASE_URL);
        assert!(client.params().is_empty());
        assert_eq!(client.config().as_(), As::Stream);
        assert!(client.config().follow_redirects());
    }

    #[test]
    fn test_builder_applies_options() {
        let client = FetchClient::builder()
            .base_url("http://api.example.com/v1/")
            .params(Params::new().with("tenant", "acme"))
            .options(FetchOptions::new().as_(As::Json).header("accept", "application/json"))
            .build()
            .unwrap();

        assert_eq!(client.url(), "http://api.example.com/v1/");
        assert_eq!(client.params().get("tenant"), Some(Some("acme")));
        assert_eq!(client.config().as_(), As::Json);
        assert_eq!(client.config().headers().get("Accept"), Some("application/json"));
    }

    #[test]
    fn test_builder_rejects_invalid_user_agent() {
        let result = FetchClient::builder().user_agent("bad\nagent").build();
        assert!(matches!(result, Err(FetchError::InvalidHeaderValue(_))));
    }

    #[test]
    fn test_template_cache_capacity_applied() {
        let client = FetchClient::builder()
            .template_cache_capacity(0)
            .build()
            .unwrap();
        _ = client.templates.get("http://a/:id");
        assert!(client.templates.is_empty());
    }
}
