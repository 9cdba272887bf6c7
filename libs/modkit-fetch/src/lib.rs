#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Templated HTTP fetch client for `ModKit`
//!
//! This crate provides a fetch client built around URL templates and
//! hierarchical options:
//! - `:name` and `*` placeholders expanded from named and positional params
//! - Child clients via `extend`, merging headers, query and params (child wins)
//! - Redirect following, at most 20 hops
//! - Success-status checking with classified error messages
//! - Body materialization as text, JSON, bytes or a raw stream, with charset
//!   detection from `Content-Type`
//! - Per-call telemetry: lifecycle events with timestamps and collected facts
//!
//! Requests go through a [`Transport`]; the default [`HyperTransport`] uses
//! hyper with rustls.
//!
//! # Example
//!
//! ```ignore
//! use modkit_fetch::{As, FetchClient, FetchOptions, Params};
//!
//! let client = FetchClient::new()?;
//! let api = client.extend(
//!     "https://api.example.com/v1/",
//!     &Params::new(),
//!     &FetchOptions::new().header("accept", "application/json"),
//! );
//!
//! let item = api
//!     .fetch(
//!         "items/:id",
//!         &Params::new().with("id", "42"),
//!         &FetchOptions::new().as_(As::Json),
//!     )
//!     .await?
//!     .into_json();
//! ```

mod builder;
pub mod charset;
mod client;
mod config;
mod dispatch;
mod error;
mod layers;
mod redirect;
mod response;
pub mod status;
pub mod telemetry;
pub mod template;
mod tls;
mod transport;

#[cfg(test)]
mod testing;

pub use builder::{DEFAULT_BASE_URL, FetchClientBuilder};
pub use client::FetchClient;
pub use config::{
    As, Body, BodyStream, BoxError, ByteStream, Configuration, FetchOptions, Headers, IpFamily,
    Query, RequestBody, TlsVersion, TransportOptions,
};
pub use dispatch::{Dispatcher, ResolvedRequest};
pub use error::{FetchError, InvalidUriKind};
pub use layers::{DefaultHeaders, DefaultHeadersLayer};
pub use redirect::{MAX_REDIRECTS, RedirectFollower, redirect_target};
pub use response::{FetchResponse, Fetched, ResponseBody};
pub use status::{StatusClass, check_success};
pub use telemetry::{
    Broadcaster, Facts, HistoryEntry, IdGenerator, Telemetry, TelemetryEvent, TelemetrySink,
    TelemetrySnapshot,
};
pub use template::{DEFAULT_TEMPLATE_CACHE_CAPACITY, Params, Template, TemplateCache};
pub use tls::TlsRootConfig;
pub use transport::{DEFAULT_USER_AGENT, HyperTransport, Transport, TransportSettings};
