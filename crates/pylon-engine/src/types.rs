//! Common types used throughout the engine.

use bytes::Bytes;
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// The inbound HTTP request type.
///
/// This is a standard `http::Request` with a fully buffered body.
pub type Request = http::Request<Bytes>;

/// The HTTP response type produced once a request completes.
pub type HttpResponse = http::Response<Full<Bytes>>;

/// A boxed future returned by filters, handlers and render steps.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for one request easy to
/// correlate and sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A content object a request (or nested dispatch) targets.
///
/// Resources are produced by an external
/// [`ResourceResolver`](crate::ResourceResolver); the engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    path: String,
    resource_type: String,
}

impl Resource {
    /// Creates a resource at `path` with the given type.
    pub fn new(path: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Returns the resource path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the resource type used for handler resolution.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }
}

/// Decomposition of a request path relative to its resource.
///
/// The part of the URL after the resource path is split into selectors,
/// an extension and a suffix:
///
/// ```text
/// /content/page.print.a4.html/extra/info
/// └──resource──┘└selectors┘└ext┘└─suffix─┘
/// ```
///
/// # Example
///
/// ```
/// use pylon_engine::RequestPathInfo;
///
/// let info = RequestPathInfo::parse("/content/page", ".print.a4.html/extra/info");
/// assert_eq!(info.selectors(), ["print", "a4"]);
/// assert_eq!(info.extension(), Some("html"));
/// assert_eq!(info.suffix(), Some("/extra/info"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPathInfo {
    resource_path: String,
    selectors: Vec<String>,
    extension: Option<String>,
    suffix: Option<String>,
}

impl RequestPathInfo {
    /// Creates path info with no selectors, extension or suffix.
    pub fn new(resource_path: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            ..Self::default()
        }
    }

    /// Parses the remainder that follows `resource_path` in a request path.
    pub fn parse(resource_path: impl Into<String>, remainder: &str) -> Self {
        let (head, suffix) = match remainder.find('/') {
            Some(idx) => (&remainder[..idx], Some(&remainder[idx..])),
            None => (remainder, None),
        };

        let mut parts: Vec<String> = head
            .split('.')
            .filter(|part| !part.is_empty())
            .map(ToString::to_string)
            .collect();
        let extension = parts.pop();

        Self {
            resource_path: resource_path.into(),
            selectors: parts,
            extension,
            suffix: suffix.map(ToString::to_string),
        }
    }

    /// Derives path info from a full request path and the resolved resource path.
    ///
    /// If `request_path` does not start with `resource_path` followed by a
    /// path boundary (`.`, `/` or the end), the request is taken to address
    /// the resource directly.
    #[must_use]
    pub fn for_request(request_path: &str, resource_path: &str) -> Self {
        match request_path.strip_prefix(resource_path) {
            Some(remainder)
                if remainder.is_empty() || remainder.starts_with(['.', '/']) =>
            {
                Self::parse(resource_path, remainder)
            }
            _ => Self::new(resource_path),
        }
    }

    /// Returns the resource path part.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Returns the selectors in request order.
    #[must_use]
    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    /// Returns the selectors joined with `.`, if any.
    #[must_use]
    pub fn selector_string(&self) -> Option<String> {
        if self.selectors.is_empty() {
            None
        } else {
            Some(self.selectors.join("."))
        }
    }

    /// Returns the extension, if any.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Returns the suffix (starting with `/`), if any.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Replaces the selectors.
    #[must_use]
    pub fn with_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors = selectors.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Replaces the suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_remainder() {
        let info = RequestPathInfo::parse("/content/page", ".print.a4.html/extra/info");
        assert_eq!(info.resource_path(), "/content/page");
        assert_eq!(info.selectors(), ["print", "a4"]);
        assert_eq!(info.selector_string().as_deref(), Some("print.a4"));
        assert_eq!(info.extension(), Some("html"));
        assert_eq!(info.suffix(), Some("/extra/info"));
    }

    #[test]
    fn test_parse_extension_only() {
        let info = RequestPathInfo::parse("/content/page", ".json");
        assert!(info.selectors().is_empty());
        assert_eq!(info.selector_string(), None);
        assert_eq!(info.extension(), Some("json"));
        assert_eq!(info.suffix(), None);
    }

    #[test]
    fn test_parse_empty_remainder() {
        let info = RequestPathInfo::parse("/content/page", "");
        assert_eq!(info, RequestPathInfo::new("/content/page"));
    }

    #[test]
    fn test_parse_suffix_without_extension() {
        let info = RequestPathInfo::parse("/content/page", "/suffix");
        assert_eq!(info.extension(), None);
        assert_eq!(info.suffix(), Some("/suffix"));
    }

    #[test]
    fn test_parse_dot_inside_suffix_is_not_an_extension() {
        let info = RequestPathInfo::parse("/content/page", ".html/file.txt");
        assert_eq!(info.extension(), Some("html"));
        assert_eq!(info.suffix(), Some("/file.txt"));
    }

    #[test]
    fn test_for_request_strips_resource_path() {
        let info = RequestPathInfo::for_request("/content/page.tidy.json", "/content/page");
        assert_eq!(info.selectors(), ["tidy"]);
        assert_eq!(info.extension(), Some("json"));
    }

    #[test]
    fn test_for_request_unrelated_path() {
        let info = RequestPathInfo::for_request("/other", "/content/page");
        assert_eq!(info.resource_path(), "/content/page");
        assert_eq!(info.extension(), None);
    }

    #[test]
    fn test_for_request_requires_path_boundary() {
        let info = RequestPathInfo::for_request("/content/pagefoo", "/content/page");
        assert_eq!(info.resource_path(), "/content/page");
        assert_eq!(info.extension(), None);
        assert!(info.selectors().is_empty());

        let info = RequestPathInfo::for_request("/content/page/tail", "/content/page");
        assert_eq!(info.suffix(), Some("/tail"));
    }

    #[test]
    fn test_builders() {
        let info = RequestPathInfo::new("/a")
            .with_selectors(["x", "y"])
            .with_extension("html")
            .with_suffix("/s");
        assert_eq!(info.selectors(), ["x", "y"]);
        assert_eq!(info.extension(), Some("html"));
        assert_eq!(info.suffix(), Some("/s"));
    }

    #[test]
    fn test_request_id_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
