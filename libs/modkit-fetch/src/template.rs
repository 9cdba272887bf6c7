//! URL templates with `:name` and `*` placeholders
//!
//! A template string is split once into a fixed `base` (scheme and authority,
//! or a protocol-relative `//host:port`) and a `path` (path plus query) that
//! carries the placeholders. Parsed templates are memoized in a
//! [`TemplateCache`] keyed by the literal template string.
//!
//! ```ignore
//! use modkit_fetch::{Params, TemplateCache};
//!
//! let cache = TemplateCache::default();
//! let params = Params::new().with("id", "1 3");
//! let url = cache.resolve("http://api.example.com/items/:id", &params, false)?;
//! assert_eq!(url, "http://api.example.com/items/1%203");
//! ```

use crate::error::{FetchError, InvalidUriKind};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Default number of distinct template strings kept by a [`TemplateCache`].
pub const DEFAULT_TEMPLATE_CACHE_CAPACITY: usize = 1024;

/// Placeholder values for template expansion.
///
/// Named values fill `:name` placeholders; a name present with `None`
/// expands to the empty string. Positional values fill `*` globs in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Params {
    named: BTreeMap<String, Option<String>>,
    positional: Vec<String>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional-only params for `*` globs.
    #[must_use]
    pub fn positional<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            named: BTreeMap::new(),
            positional: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Set a named value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.named.insert(name.into(), Some(value.into()));
        self
    }

    /// Set a named value that expands to the empty string.
    #[must_use]
    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.named.insert(name.into(), None);
        self
    }

    /// Append a positional value.
    #[must_use]
    pub fn push(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Look up a named value. The outer `Option` is presence, the inner one nullness.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.named.get(name).map(Option::as_deref)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.positional.is_empty()
    }

    /// Shallow merge: `child` names win, `child` positionals replace ours when non-empty.
    #[must_use]
    pub fn merge(&self, child: &Params) -> Params {
        let mut named = self.named.clone();
        named.extend(child.named.iter().map(|(k, v)| (k.clone(), v.clone())));
        let positional = if child.positional.is_empty() {
            self.positional.clone()
        } else {
            child.positional.clone()
        };
        Params { named, positional }
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            named: iter
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
            positional: Vec::new(),
        }
    }
}

/// A parsed URL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    base: String,
    path: String,
}

impl Template {
    /// Split a template string into base and path.
    #[must_use]
    pub fn parse(template: &str) -> Self {
        let authority_start = if template.starts_with("//") {
            Some(2)
        } else {
            scheme_len(template).map(|len| len + 3)
        };

        match authority_start {
            Some(start) => {
                let end = template[start..]
                    .find(['/', '?', '#'])
                    .map_or(template.len(), |i| start + i);
                Self {
                    base: template[..end].to_owned(),
                    path: template[end..].to_owned(),
                }
            }
            None => Self {
                base: String::new(),
                path: template.to_owned(),
            },
        }
    }

    /// Fixed scheme and authority part; empty for relative templates.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Path and query part carrying the placeholders.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Expand placeholders and reattach the base.
    ///
    /// # Errors
    /// Returns `FetchError::UnexpandedParameters` if `require_expanded` is set
    /// and a `:` or `*` survives expansion.
    pub fn execute(&self, params: &Params, require_expanded: bool) -> Result<String, FetchError> {
        let path = expand(&self.path, params);
        if require_expanded && path.contains([':', '*']) {
            return Err(FetchError::UnexpandedParameters { residual: path });
        }
        let mut out = String::with_capacity(self.base.len() + path.len());
        out.push_str(&self.base);
        out.push_str(&path);
        Ok(out)
    }
}

/// Length of a leading `scheme` if the string starts with `scheme://`.
fn scheme_len(s: &str) -> Option<usize> {
    let idx = s.find("://")?;
    let scheme = &s[..idx];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    (first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
    .then_some(idx)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace `:name` and `*` placeholders in `pattern`.
///
/// Unknown names and surplus globs are left verbatim.
#[must_use]
pub fn expand(pattern: &str, params: &Params) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut globs = params.positional.iter();
    let mut rest = pattern;

    while let Some(pos) = rest.find([':', '*']) {
        out.push_str(&rest[..pos]);
        let marker = &rest[pos..];

        if marker.starts_with('*') {
            match globs.next() {
                Some(value) => out.push_str(&urlencoding::encode(value)),
                None => out.push('*'),
            }
            rest = &marker[1..];
            continue;
        }

        let name_len = marker[1..]
            .char_indices()
            .take_while(|&(i, c)| if i == 0 { is_ident_start(c) } else { is_ident_char(c) })
            .count();
        let name = &marker[1..=name_len];

        match params.get(name) {
            Some(value) if name_len > 0 => {
                out.push_str(&urlencoding::encode(value.unwrap_or_default()));
            }
            _ => out.push_str(&marker[..=name_len]),
        }
        rest = &marker[1 + name_len..];
    }

    out.push_str(rest);
    out
}

/// Resolve `reference` against `base` per URL reference resolution.
///
/// An empty reference keeps `base`. When `base` is not an absolute URL the
/// reference is returned as given, so a malformed template surfaces when it
/// is finally dispatched rather than here.
#[must_use]
pub fn resolve_reference(base: &str, reference: &str) -> String {
    if reference.is_empty() {
        return base.to_owned();
    }
    match Url::parse(base) {
        Ok(base_url) => base_url
            .join(reference)
            .map_or_else(|_| reference.to_owned(), String::from),
        Err(_) => reference.to_owned(),
    }
}

/// Concurrent memo of parsed templates keyed by literal template string.
///
/// Two callers racing on a new template may both parse it; only one parse is
/// kept and both observe the same `Arc` afterwards. Once `capacity` distinct
/// templates are cached, further templates are parsed per call.
#[derive(Debug)]
pub struct TemplateCache {
    entries: DashMap<String, Arc<Template>>,
    capacity: usize,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TEMPLATE_CACHE_CAPACITY)
    }
}

impl TemplateCache {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Fetch the parsed template for `template`, parsing it on first use.
    #[must_use]
    pub fn get(&self, template: &str) -> Arc<Template> {
        if let Some(hit) = self.entries.get(template) {
            return Arc::clone(hit.value());
        }

        let parsed = Arc::new(Template::parse(template));
        if self.entries.len() >= self.capacity {
            tracing::debug!(
                capacity = self.capacity,
                "template cache full; parsed template not retained"
            );
            return parsed;
        }

        Arc::clone(
            self.entries
                .entry(template.to_owned())
                .or_insert(parsed)
                .value(),
        )
    }

    /// Number of cached templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand `template` with `params`.
    ///
    /// # Errors
    /// Returns `FetchError::UnexpandedParameters` under `require_expanded`
    /// when placeholders remain.
    pub fn resolve(
        &self,
        template: &str,
        params: &Params,
        require_expanded: bool,
    ) -> Result<String, FetchError> {
        self.get(template).execute(params, require_expanded)
    }

    /// Expand `template` and resolve the result against `base` into a URL.
    ///
    /// # Errors
    /// Returns `FetchError::UnexpandedParameters` as [`resolve`](Self::resolve)
    /// does, or `FetchError::InvalidUri` if the result is not a valid URL.
    pub fn resolve_url(
        &self,
        base: &str,
        template: &str,
        params: &Params,
        require_expanded: bool,
    ) -> Result<Url, FetchError> {
        let expanded = self.resolve(template, params, require_expanded)?;
        let absolute = resolve_reference(base, &expanded);
        Url::parse(&absolute)
            .map_err(|e| FetchError::invalid_uri(&absolute, InvalidUriKind::ParseError, e))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn ut(template: &str, params: &Params) -> String {
        TemplateCache::default()
            .resolve(template, params, false)
            .unwrap()
    }

    #[test]
    fn test_no_params() {
        assert_eq!(ut("foo/bar", &Params::new()), "foo/bar");
    }

    #[test]
    fn test_two_params() {
        let params = Params::new().with("bar", "1").with("baz", "2");
        assert_eq!(ut("foo/:bar/:baz", &params), "foo/1/2");
    }

    #[test]
    fn test_escapes_params() {
        assert_eq!(ut("foo/:id", &Params::new().with("id", "1 3")), "foo/1%203");
        assert_eq!(ut("/foo/:id", &Params::new().with("id", " ")), "/foo/%20");
    }

    #[test]
    fn test_null_param_expands_empty() {
        assert_eq!(ut("/foo/:id/x", &Params::new().with_null("id")), "/foo//x");
    }

    #[test]
    fn test_root_relative() {
        assert_eq!(ut("/foo/:id", &Params::new().with("id", "123")), "/foo/123");
    }

    #[test]
    fn test_protocol_relative_with_port() {
        let params = Params::new().with("id", "123");
        assert_eq!(
            ut("//foo.com:8080/foo/:id", &params),
            "//foo.com:8080/foo/123"
        );
        assert_eq!(ut("//foo.com/foo/:id", &params), "//foo.com/foo/123");
    }

    #[test]
    fn test_absolute_keeps_port() {
        let params = Params::new().with("id", "123");
        assert_eq!(
            ut("http://foo.com:80/foo/:id", &params),
            "http://foo.com:80/foo/123"
        );
    }

    #[test]
    fn test_param_in_query() {
        let params = Params::new().with("id", "123");
        assert_eq!(ut("/foo?bar=:id", &params), "/foo?bar=123");
        assert_eq!(ut("/foo?bar=3", &params), "/foo?bar=3");
    }

    #[test]
    fn test_unexpanded_left_verbatim() {
        assert_eq!(ut("/foo/:id", &Params::new()), "/foo/:id");
    }

    #[test]
    fn test_require_expanded_fails() {
        let err = TemplateCache::default()
            .resolve("/foo?bar=:id", &Params::new().with("x", "123"), true)
            .unwrap_err();
        match err {
            FetchError::UnexpandedParameters { residual } => assert_eq!(residual, "/foo?bar=:id"),
            other => panic!("expected UnexpandedParameters, got {other:?}"),
        }
    }

    #[test]
    fn test_require_expanded_ignores_scheme_colon() {
        let url = TemplateCache::default()
            .resolve("http://foo.com:80/:id", &Params::new().with("id", "1"), true)
            .unwrap();
        assert_eq!(url, "http://foo.com:80/1");
    }

    #[test]
    fn test_globs_in_order() {
        let params = Params::positional(["yo", "there"]).with("bar", "9");
        assert_eq!(
            ut("/foo/:bar/zap/*/hello/*", &params),
            "/foo/9/zap/yo/hello/there"
        );
    }

    #[test]
    fn test_encoded_values_never_reintroduce_placeholders() {
        let params = Params::positional(["a*b"]).with("id", "x:y");
        let out = ut("/:id/*", &params);
        assert_eq!(out, "/x%3Ay/a%2Ab");
        assert!(!out.contains([':', '*']));
    }

    #[test]
    fn test_name_prefix_does_not_match_longer_ident() {
        let params = Params::new().with("id", "1");
        assert_eq!(ut("/:identifier/:id", &params), "/:identifier/1");
    }

    #[test]
    fn test_repeated_placeholder() {
        let params = Params::new().with("id", "7");
        assert_eq!(ut("/:id/:id", &params), "/7/7");
    }

    #[test]
    fn test_cache_returns_identical_parse() {
        let cache = TemplateCache::default();
        let a = cache.get("http://foo.com/:id");
        let b = cache.get("http://foo.com/:id");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.base(), "http://foo.com");
        assert_eq!(a.path(), "/:id");
    }

    #[test]
    fn test_cache_capacity_bound() {
        let cache = TemplateCache::with_capacity(1);
        _ = cache.get("/a");
        let b1 = cache.get("/b");
        let b2 = cache.get("/b");
        assert_eq!(cache.len(), 1);
        assert!(!Arc::ptr_eq(&b1, &b2));
        assert_eq!(*b1, *b2);
    }

    #[test]
    fn test_resolve_reference_forms() {
        let base = "http://localhost:8080/foo/";
        assert_eq!(
            resolve_reference(base, "//localhost:8080/"),
            "http://localhost:8080/"
        );
        assert_eq!(
            resolve_reference(base, "/foo/bar"),
            "http://localhost:8080/foo/bar"
        );
        assert_eq!(
            resolve_reference(base, "foo/bar"),
            "http://localhost:8080/foo/foo/bar"
        );
        assert_eq!(
            resolve_reference("http://localhost:8080/foo", "foo/bar"),
            "http://localhost:8080/foo/bar"
        );
        assert_eq!(
            resolve_reference(base, "https://other.com/x"),
            "https://other.com/x"
        );
        assert_eq!(resolve_reference(base, ""), base);
    }

    #[test]
    fn test_resolve_reference_keeps_placeholders() {
        assert_eq!(
            resolve_reference("http://localhost/", "/:foo/:bar?q=:q"),
            "http://localhost/:foo/:bar?q=:q"
        );
    }

    #[test]
    fn test_resolve_url_relative_to_base() {
        let url = TemplateCache::default()
            .resolve_url(
                "http://localhost:9000/api/",
                "items/:id",
                &Params::new().with("id", "42"),
                false,
            )
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/items/42");
    }

    #[test]
    fn test_params_merge_child_wins() {
        let parent = Params::new().with("foo", "1").with("bar", "1");
        let child = Params::new().with("bar", "2");
        let merged = parent.merge(&child);
        assert_eq!(merged.get("foo"), Some(Some("1")));
        assert_eq!(merged.get("bar"), Some(Some("2")));
        assert_eq!(parent.get("bar"), Some(Some("1")));
    }
}
