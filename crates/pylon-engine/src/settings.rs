//! Runtime settings read by the engine during request processing.
//!
//! [`EngineSettings`] is immutable. A [`SettingsHandle`] publishes a new
//! snapshot atomically; every request takes one snapshot when its context is
//! created and keeps it until the request completes, so a reconfiguration
//! racing with in-flight requests is seen either entirely or not at all.

use http::header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Default bound on nested include/forward dispatches.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 50;

/// Default bound on nested handler invocations.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Why a configured response header entry was rejected.
#[derive(Debug, Error)]
pub enum HeaderEntryError {
    /// The entry has no `=` separator.
    #[error("expected 'name=value'")]
    MissingSeparator,

    /// The part before `=` is empty.
    #[error("header name is empty")]
    EmptyName,

    /// The header name contains invalid characters.
    #[error("invalid header name: {0}")]
    InvalidName(#[from] InvalidHeaderName),

    /// The header value contains invalid characters.
    #[error("invalid header value: {0}")]
    InvalidValue(#[from] InvalidHeaderValue),
}

/// A header added to every top-level response.
///
/// # Example
///
/// ```
/// use pylon_engine::StaticResponseHeader;
///
/// let header = StaticResponseHeader::parse("X-Frame-Options=SAMEORIGIN").unwrap();
/// assert_eq!(header.name().as_str(), "x-frame-options");
/// assert_eq!(header.value(), "SAMEORIGIN");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResponseHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl StaticResponseHeader {
    /// Creates a header from an already validated name and value.
    #[must_use]
    pub const fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    /// Parses a `name=value` entry. Surrounding whitespace is ignored.
    pub fn parse(entry: &str) -> Result<Self, HeaderEntryError> {
        let (name, value) = entry
            .trim()
            .split_once('=')
            .ok_or(HeaderEntryError::MissingSeparator)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HeaderEntryError::EmptyName);
        }

        Ok(Self {
            name: HeaderName::from_bytes(name.as_bytes())?,
            value: HeaderValue::from_str(value.trim())?,
        })
    }

    /// Parses a list of entries, skipping blank ones and ignoring invalid ones.
    pub fn parse_all<I, S>(entries: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        entries
            .into_iter()
            .filter(|entry| !entry.as_ref().trim().is_empty())
            .filter_map(|entry| {
                let entry = entry.as_ref();
                match Self::parse(entry) {
                    Ok(header) => Some(header),
                    Err(error) => {
                        tracing::info!("configure: Ignoring '{}': {}", entry, error);
                        None
                    }
                }
            })
            .collect()
    }

    /// Returns the header name.
    #[must_use]
    pub const fn name(&self) -> &HeaderName {
        &self.name
    }

    /// Returns the header value.
    #[must_use]
    pub const fn value(&self) -> &HeaderValue {
        &self.value
    }
}

/// Immutable engine settings snapshot.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    max_include_depth: usize,
    max_call_depth: usize,
    additional_response_headers: Vec<StaticResponseHeader>,
    mime_types: HashMap<String, String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            additional_response_headers: Vec::new(),
            mime_types: default_mime_types(),
        }
    }
}

impl EngineSettings {
    /// Creates settings with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the include/forward nesting bound.
    #[must_use]
    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Sets the handler call nesting bound.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the headers applied to every top-level response.
    #[must_use]
    pub fn with_additional_response_headers(mut self, headers: Vec<StaticResponseHeader>) -> Self {
        self.additional_response_headers = headers;
        self
    }

    /// Adds or replaces an extension to content type mapping.
    #[must_use]
    pub fn with_mime_type(mut self, extension: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.mime_types
            .insert(extension.into().to_ascii_lowercase(), content_type.into());
        self
    }

    /// Returns the include/forward nesting bound.
    #[must_use]
    pub const fn max_include_depth(&self) -> usize {
        self.max_include_depth
    }

    /// Returns the handler call nesting bound.
    #[must_use]
    pub const fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    /// Returns the headers applied to every top-level response.
    #[must_use]
    pub fn additional_response_headers(&self) -> &[StaticResponseHeader] {
        &self.additional_response_headers
    }

    /// Looks up the content type for an extension.
    #[must_use]
    pub fn mime_type(&self, extension: &str) -> Option<&str> {
        self.mime_types
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }
}

fn default_mime_types() -> HashMap<String, String> {
    [
        ("html", "text/html"),
        ("htm", "text/html"),
        ("txt", "text/plain"),
        ("json", "application/json"),
        ("xml", "application/xml"),
        ("css", "text/css"),
        ("js", "application/javascript"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("svg", "image/svg+xml"),
        ("pdf", "application/pdf"),
    ]
    .into_iter()
    .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
    .collect()
}

/// Shared, atomically replaceable holder of the current [`EngineSettings`].
///
/// Cloning the handle shares the underlying slot.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<EngineSettings>>>,
}

impl SettingsHandle {
    /// Creates a handle holding `settings`.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<EngineSettings> {
        Arc::clone(&self.current.read())
    }

    /// Publishes a new snapshot. Requests already in flight keep theirs.
    pub fn store(&self, settings: EngineSettings) {
        *self.current.write() = Arc::new(settings);
        tracing::debug!("engine settings updated");
    }
}
