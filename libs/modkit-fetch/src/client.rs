use crate::builder::FetchClientBuilder;
use crate::config::{Configuration, FetchOptions};
use crate::dispatch::{Dispatcher, ResolvedRequest};
use crate::error::{FetchError, InvalidUriKind};
use crate::redirect::RedirectFollower;
use crate::response::{FetchResponse, Fetched};
use crate::status;
use crate::telemetry::{IdGenerator, Telemetry, TelemetryEvent};
use crate::template::{Params, TemplateCache, resolve_reference};
use crate::transport::Transport;
use http::HeaderMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use url::Url;

/// Templated HTTP fetch client.
///
/// A client is an immutable bundle of a base URL template, default
/// parameters and a merged [`Configuration`]. [`extend`](Self::extend)
/// derives a child client without touching the parent; [`fetch`](Self::fetch)
/// derives one for a single call and runs it.
///
/// Derived clients share the transport, the template cache and the telemetry
/// id sequence of their root. Cloning is cheap.
///
/// # Example
///
/// ```ignore
/// let api = FetchClient::new()?.extend(
///     "http://api.example.com/v1/",
///     &Params::new(),
///     &FetchOptions::new().header("accept", "application/json"),
/// );
/// let user = api
///     .fetch("users/:id", &Params::new().with("id", "42"), &FetchOptions::new().as_(As::Json))
///     .await?
///     .into_json();
/// ```
#[derive(Clone)]
pub struct FetchClient {
    pub(crate) url: Arc<str>,
    pub(crate) params: Arc<Params>,
    pub(crate) config: Arc<Configuration>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) templates: Arc<TemplateCache>,
    pub(crate) ids: Arc<IdGenerator>,
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("url", &self.url)
            .field("params", &self.params)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Root client for `http://localhost/` with default options.
    ///
    /// # Errors
    /// Returns an error if the default transport cannot be created.
    pub fn new() -> Result<Self, FetchError> {
        FetchClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::new()
    }

    /// Base URL template, resolved against every ancestor.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Derive a child client.
    ///
    /// `url` is resolved against this client's URL (empty keeps it); params,
    /// headers and query merge shallowly with the child winning; every other
    /// option takes the child's value when set.
    #[must_use]
    pub fn extend(&self, url: &str, params: &Params, opts: &FetchOptions) -> FetchClient {
        let params = if params.is_empty() {
            Arc::clone(&self.params)
        } else {
            Arc::new(self.params.merge(params))
        };
        FetchClient {
            url: Arc::from(resolve_reference(&self.url, url)),
            params,
            config: Arc::new(self.config.merge(opts)),
            transport: Arc::clone(&self.transport),
            templates: Arc::clone(&self.templates),
            ids: Arc::clone(&self.ids),
        }
    }

    /// Run one request: `extend(url, params, opts)` then the pipeline.
    ///
    /// # Errors
    /// Any [`FetchError`] raised while resolving the URL, dispatching,
    /// following redirects, checking the status or materializing the body.
    pub async fn fetch(
        &self,
        url: &str,
        params: &Params,
        opts: &FetchOptions,
    ) -> Result<Fetched, FetchError> {
        let call = self.extend(url, params, opts);
        let (id, span) = call.next_call();
        async {
            let response = call.run(id).await?;
            response.materialize(call.config.as_()).await
        }
        .instrument(span)
        .await
    }

    /// [`fetch`](Self::fetch) returning the unread response whatever `as` says.
    ///
    /// # Errors
    /// As [`fetch`](Self::fetch), minus materialization.
    pub async fn send(
        &self,
        url: &str,
        params: &Params,
        opts: &FetchOptions,
    ) -> Result<FetchResponse, FetchError> {
        let call = self.extend(url, params, opts);
        let (id, span) = call.next_call();
        call.run(id).instrument(span).await
    }

    /// `GET` returning the decoded body.
    ///
    /// # Errors
    /// As [`fetch`](Self::fetch).
    pub async fn get_text(&self, url: &str, params: &Params) -> Result<String, FetchError> {
        self.send(url, params, &FetchOptions::new()).await?.text().await
    }

    /// `GET` returning the body parsed as JSON.
    ///
    /// # Errors
    /// As [`fetch`](Self::fetch).
    pub async fn get_json(&self, url: &str, params: &Params) -> Result<Value, FetchError> {
        self.send(url, params, &FetchOptions::new()).await?.json().await
    }

    fn next_call(&self) -> (u64, tracing::Span) {
        let id = self.ids.next_id();
        let span = tracing::debug_span!(
            "outgoing_fetch",
            telemetry_id = id,
            method = %self.config.method(),
        );
        (id, span)
    }

    fn resolve_url(&self) -> Result<Url, FetchError> {
        // The client URL is already resolved against every ancestor
        let mut url = self.templates.resolve_url(
            "",
            &self.url,
            &self.params,
            self.config.require_expanded_params(),
        )?;
        if !url.has_host() {
            return Err(FetchError::invalid_uri(
                url.as_str(),
                InvalidUriKind::MissingAuthority,
                "URL has no host",
            ));
        }
        self.config.query().apply_to(&mut url);
        Ok(url)
    }

    async fn run(&self, id: u64) -> Result<FetchResponse, FetchError> {
        let config = &self.config;
        let telemetry = Arc::new(Telemetry::new(id, config.telemetry().cloned()));

        let url = self.resolve_url()?;
        telemetry.set("url", url.as_str());
        telemetry.set("method", config.method().as_str());

        let request = ResolvedRequest::from_config(url.clone(), config)?;
        telemetry.set("requestHeaders", headers_to_json(&request.headers));
        telemetry.emit(TelemetryEvent::Start);

        let transport = Arc::clone(&request.transport);
        let dispatcher = Dispatcher::new(self.transport.as_ref());
        let response = dispatcher.dispatch(request, &telemetry).await?;

        let (url, response) = if config.follow_redirects() {
            RedirectFollower::new()
                .follow(&dispatcher, url, &transport, response, &telemetry)
                .await?
        } else {
            (url, response)
        };

        let status = response.status();
        tracing::debug!(status = status.as_u16(), url = %url, "response received");
        telemetry.set("status", status.as_u16());
        telemetry.set("responseHeaders", headers_to_json(response.headers()));
        telemetry.emit(TelemetryEvent::Received);

        if config.success_only() {
            status::check_success(status)?;
        }

        Ok(FetchResponse::new(response, url, telemetry))
    }
}

/// Header map as a JSON object; repeated headers are joined with `, ` and
/// sensitive values are masked.
fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut object = serde_json::Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| {
                if v.is_sensitive() {
                    "<redacted>".to_owned()
                } else {
                    String::from_utf8_lossy(v.as_bytes()).into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        object.insert(name.as_str().to_owned(), Value::String(joined));
    }
    Value::Object(object)
}
