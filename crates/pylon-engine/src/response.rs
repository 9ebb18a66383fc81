//! Response abstraction and the decorators the engine wraps around it.
//!
//! Handlers and filters write through the object-safe [`Response`] trait.
//! The engine composes decorators over a `&mut dyn Response` instead of
//! replacing it:
//!
//! - [`IncludeResponse`] turns status and header mutations into no-ops so a
//!   nested include cannot clobber the including page's response.
//! - [`ErrorResponse`] lets error rendering write text even if the byte
//!   channel was selected before the failure.
//!
//! [`BufferedResponse`] is the in-memory implementation used by hosts and
//! tests.

use crate::error::{EngineError, EngineResult};
use crate::types::HttpResponse;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;

/// Default number of buffered bytes after which a [`BufferedResponse`] commits.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Encoding the error writer falls back to when none is set.
pub const DEFAULT_ERROR_ENCODING: &str = "ISO-8859-1";

/// An HTTP response under construction.
pub trait Response: Send {
    /// Returns the current status.
    fn status(&self) -> StatusCode;

    /// Sets the status.
    fn set_status(&mut self, status: StatusCode);

    /// Returns the headers set so far.
    fn headers(&self) -> &HeaderMap;

    /// Sets a header, replacing existing values.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Appends a header value.
    fn add_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Sets the `Content-Type` header.
    fn set_content_type(&mut self, content_type: &str) -> EngineResult<()> {
        let value = HeaderValue::from_str(content_type)
            .map_err(|e| EngineError::illegal_state(format!("invalid content type: {e}")))?;
        self.set_header(CONTENT_TYPE, value);
        Ok(())
    }

    /// Returns the character encoding used for text output, if set.
    fn character_encoding(&self) -> Option<&str>;

    /// Sets the character encoding used for text output.
    fn set_character_encoding(&mut self, encoding: &str);

    /// Replaces the response with a container-generated error response.
    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> EngineResult<()>;

    /// Writes text through the text writer.
    fn write_str(&mut self, text: &str) -> EngineResult<()>;

    /// Writes raw bytes through the byte output stream.
    fn write_bytes(&mut self, bytes: &[u8]) -> EngineResult<()>;

    /// Sends buffered content, committing the response.
    fn flush_buffer(&mut self) -> EngineResult<()>;

    /// Returns `true` once status and headers have been sent.
    fn is_committed(&self) -> bool;

    /// Discards status, headers and buffered body.
    ///
    /// Fails with [`EngineError::IllegalState`] once the response is committed.
    fn reset(&mut self) -> EngineResult<()>;
}

/// Which output channel a response body is being written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputChannel {
    /// Nothing written yet.
    #[default]
    None,
    /// The text writer.
    Writer,
    /// The byte output stream.
    Stream,
}

/// In-memory [`Response`].
///
/// The body is buffered until it reaches the buffer size, `flush_buffer` is
/// called, or the response is closed; any of these commits the response.
/// The first write selects the output channel. Writing through the other
/// channel fails with [`EngineError::IllegalState`], and a `reset` keeps the
/// selection.
///
/// # Example
///
/// ```
/// use pylon_engine::{BufferedResponse, Response};
///
/// let mut response = BufferedResponse::new();
/// response.write_str("hello").unwrap();
/// assert!(!response.is_committed());
///
/// let response = response.into_http_response();
/// assert_eq!(response.status(), 200);
/// ```
#[derive(Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    encoding: Option<String>,
    body: Vec<u8>,
    buffer_size: usize,
    channel: OutputChannel,
    committed: bool,
    closed: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }
}

impl BufferedResponse {
    /// Creates an empty `200 OK` response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty response that commits after `buffer_size` bytes.
    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            encoding: None,
            body: Vec::new(),
            buffer_size,
            channel: OutputChannel::None,
            committed: false,
            closed: false,
        }
    }

    /// Closes the response. Later writes fail with
    /// [`EngineError::WriterAlreadyClosed`].
    pub fn close(&mut self) {
        self.closed = true;
        self.committed = true;
    }

    /// Returns `true` if the response was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the selected output channel.
    #[must_use]
    pub const fn channel(&self) -> OutputChannel {
        self.channel
    }

    /// Returns the body written so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Converts into an `http::Response`.
    #[must_use]
    pub fn into_http_response(self) -> HttpResponse {
        let mut response = http::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn select(&mut self, channel: OutputChannel) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::WriterAlreadyClosed);
        }
        match (self.channel, channel) {
            (OutputChannel::None, _) => {
                self.channel = channel;
                Ok(())
            }
            (current, requested) if current == requested => Ok(()),
            (OutputChannel::Stream, _) => Err(EngineError::illegal_state(
                "output stream already in use, text writer unavailable",
            )),
            _ => Err(EngineError::illegal_state(
                "text writer already in use, output stream unavailable",
            )),
        }
    }

    fn append(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
        if self.body.len() >= self.buffer_size {
            self.committed = true;
        }
    }
}

impl Response for BufferedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        if !self.committed {
            self.status = status;
        }
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.committed {
            self.headers.insert(name, value);
        }
    }

    fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.committed {
            self.headers.append(name, value);
        }
    }

    fn character_encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    fn set_character_encoding(&mut self, encoding: &str) {
        if !self.committed {
            self.encoding = Some(encoding.to_string());
        }
    }

    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> EngineResult<()> {
        if self.committed {
            return Err(EngineError::illegal_state(
                "cannot send error, response already committed",
            ));
        }
        self.headers.clear();
        self.body.clear();
        self.status = status;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        if let Some(message) = message {
            self.body.extend_from_slice(message.as_bytes());
        }
        self.committed = true;
        Ok(())
    }

    fn write_str(&mut self, text: &str) -> EngineResult<()> {
        self.select(OutputChannel::Writer)?;
        self.append(text.as_bytes());
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> EngineResult<()> {
        self.select(OutputChannel::Stream)?;
        self.append(bytes);
        Ok(())
    }

    fn flush_buffer(&mut self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::WriterAlreadyClosed);
        }
        self.committed = true;
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    fn reset(&mut self) -> EngineResult<()> {
        if self.committed {
            return Err(EngineError::illegal_state(
                "cannot reset, response already committed",
            ));
        }
        self.status = StatusCode::OK;
        self.headers.clear();
        self.encoding = None;
        self.body.clear();
        Ok(())
    }
}

/// Response seen by an included handler when header protection is on.
///
/// Status, header and encoding changes and `send_error`/`reset` are ignored;
/// body writes reach the including response.
pub struct IncludeResponse<'r> {
    inner: &'r mut dyn Response,
}

impl<'r> IncludeResponse<'r> {
    /// Wraps the including response.
    pub fn new(inner: &'r mut dyn Response) -> Self {
        Self { inner }
    }
}

impl Response for IncludeResponse<'_> {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn set_status(&mut self, status: StatusCode) {
        tracing::trace!(%status, "ignoring set_status in included render");
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn set_header(&mut self, name: HeaderName, _value: HeaderValue) {
        tracing::trace!(header = %name, "ignoring set_header in included render");
    }

    fn add_header(&mut self, name: HeaderName, _value: HeaderValue) {
        tracing::trace!(header = %name, "ignoring add_header in included render");
    }

    fn character_encoding(&self) -> Option<&str> {
        self.inner.character_encoding()
    }

    fn set_character_encoding(&mut self, encoding: &str) {
        tracing::trace!(encoding, "ignoring set_character_encoding in included render");
    }

    fn send_error(&mut self, status: StatusCode, _message: Option<&str>) -> EngineResult<()> {
        tracing::trace!(%status, "ignoring send_error in included render");
        Ok(())
    }

    fn write_str(&mut self, text: &str) -> EngineResult<()> {
        self.inner.write_str(text)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> EngineResult<()> {
        self.inner.write_bytes(bytes)
    }

    fn flush_buffer(&mut self) -> EngineResult<()> {
        self.inner.flush_buffer()
    }

    fn is_committed(&self) -> bool {
        self.inner.is_committed()
    }

    fn reset(&mut self) -> EngineResult<()> {
        tracing::trace!("ignoring reset in included render");
        Ok(())
    }
}

/// Response seen by the error chain.
///
/// If the text writer is unavailable because the byte stream was selected
/// before the failure, text is encoded and sent through the byte stream.
pub struct ErrorResponse<'r> {
    inner: &'r mut dyn Response,
}

impl<'r> ErrorResponse<'r> {
    /// Wraps the response the error will be rendered into.
    pub fn new(inner: &'r mut dyn Response) -> Self {
        Self { inner }
    }

    fn write_encoded(&mut self, text: &str) -> EngineResult<()> {
        let encoding = match self.inner.character_encoding() {
            Some(encoding) => encoding.to_string(),
            None => {
                self.inner.set_character_encoding(DEFAULT_ERROR_ENCODING);
                DEFAULT_ERROR_ENCODING.to_string()
            }
        };
        let bytes = encode(text, &encoding)?;
        self.inner.write_bytes(&bytes)
    }
}

impl Response for ErrorResponse<'_> {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.set_header(name, value);
    }

    fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.add_header(name, value);
    }

    fn character_encoding(&self) -> Option<&str> {
        self.inner.character_encoding()
    }

    fn set_character_encoding(&mut self, encoding: &str) {
        self.inner.set_character_encoding(encoding);
    }

    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> EngineResult<()> {
        self.inner.send_error(status, message)
    }

    fn write_str(&mut self, text: &str) -> EngineResult<()> {
        match self.inner.write_str(text) {
            Err(EngineError::IllegalState(reason)) => {
                tracing::debug!(%reason, "text writer unavailable, writing error through output stream");
                self.write_encoded(text)
            }
            other => other,
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> EngineResult<()> {
        self.inner.write_bytes(bytes)
    }

    fn flush_buffer(&mut self) -> EngineResult<()> {
        self.inner.flush_buffer()
    }

    fn is_committed(&self) -> bool {
        self.inner.is_committed()
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.inner.reset()
    }
}

fn encode(text: &str, encoding: &str) -> EngineResult<Vec<u8>> {
    let single_byte = |max: u32| -> Vec<u8> {
        text.chars()
            .map(|c| {
                u8::try_from(u32::from(c))
                    .ok()
                    .filter(|b| u32::from(*b) <= max)
                    .unwrap_or(b'?')
            })
            .collect()
    };

    match encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => Ok(text.as_bytes().to_vec()),
        "iso-8859-1" | "latin1" | "latin-1" | "iso8859-1" => Ok(single_byte(0xFF)),
        "us-ascii" | "ascii" => Ok(single_byte(0x7F)),
        other => Err(EngineError::illegal_state(format!(
            "unsupported character encoding: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_commits_at_buffer_size() {
        let mut response = BufferedResponse::with_buffer_size(4);
        response.write_str("abc").unwrap();
        assert!(!response.is_committed());
        response.write_str("d").unwrap();
        assert!(response.is_committed());
        assert!(response.reset().is_err());
    }

    #[test]
    fn test_buffered_channel_exclusivity_survives_reset() {
        let mut response = BufferedResponse::new();
        response.write_bytes(b"raw").unwrap();
        assert!(matches!(
            response.write_str("text"),
            Err(EngineError::IllegalState(_))
        ));

        response.reset().unwrap();
        assert!(response.body().is_empty());
        assert_eq!(response.channel(), OutputChannel::Stream);
        assert!(response.write_str("text").is_err());
    }

    #[test]
    fn test_buffered_close() {
        let mut response = BufferedResponse::new();
        response.close();
        assert!(matches!(
            response.write_str("late"),
            Err(EngineError::WriterAlreadyClosed)
        ));
    }

    #[test]
    fn test_buffered_reset_clears_state() {
        let mut response = BufferedResponse::new();
        response.set_status(StatusCode::CREATED);
        response.set_header(HeaderName::from_static("x-a"), HeaderValue::from_static("1"));
        response.write_str("partial").unwrap();

        response.reset().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_buffered_send_error() {
        let mut response = BufferedResponse::new();
        response.write_str("partial").unwrap();
        response
            .send_error(StatusCode::SERVICE_UNAVAILABLE, Some("gone"))
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body_text(), "gone");
        assert!(response.is_committed());
        assert!(response.send_error(StatusCode::OK, None).is_err());
    }

    #[test]
    fn test_include_response_protects_headers() {
        let mut outer = BufferedResponse::new();
        outer.set_header(HeaderName::from_static("x"), HeaderValue::from_static("1"));

        {
            let mut include = IncludeResponse::new(&mut outer);
            include.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            include.set_header(HeaderName::from_static("x"), HeaderValue::from_static("2"));
            include.add_header(HeaderName::from_static("y"), HeaderValue::from_static("3"));
            include.reset().unwrap();
            include.write_str("included").unwrap();
        }

        assert_eq!(outer.status(), StatusCode::OK);
        assert_eq!(outer.headers().get("x").unwrap(), "1");
        assert!(outer.headers().get("y").is_none());
        assert_eq!(outer.body_text(), "included");
    }

    #[test]
    fn test_error_response_falls_back_to_stream() {
        let mut inner = BufferedResponse::new();
        inner.write_bytes(b"x").unwrap();
        inner.reset().unwrap();

        {
            let mut error = ErrorResponse::new(&mut inner);
            error.write_str("Fehler: ü").unwrap();
        }

        assert_eq!(inner.character_encoding(), Some(DEFAULT_ERROR_ENCODING));
        assert_eq!(inner.body(), b"Fehler: \xfc");
    }

    #[test]
    fn test_error_response_uses_set_encoding() {
        let mut inner = BufferedResponse::new();
        inner.write_bytes(b"x").unwrap();
        inner.reset().unwrap();
        inner.set_character_encoding("UTF-8");

        let mut error = ErrorResponse::new(&mut inner);
        error.write_str("€").unwrap();
        drop(error);

        assert_eq!(inner.body_text(), "€");
    }

    #[test]
    fn test_error_response_writer_passthrough() {
        let mut inner = BufferedResponse::new();
        let mut error = ErrorResponse::new(&mut inner);
        error.write_str("plain").unwrap();
        drop(error);
        assert_eq!(inner.channel(), OutputChannel::Writer);
        assert_eq!(inner.character_encoding(), None);
    }

    #[test]
    fn test_encode_replaces_unmappable() {
        assert_eq!(encode("a€", "ISO-8859-1").unwrap(), b"a?");
        assert_eq!(encode("aü", "US-ASCII").unwrap(), b"a?");
        assert!(encode("a", "x-unknown").is_err());
    }

    #[test]
    fn test_into_http_response() {
        let mut response = BufferedResponse::new();
        response.set_status(StatusCode::NOT_FOUND);
        response.set_content_type("text/plain").unwrap();
        response.write_str("missing").unwrap();

        let http = response.into_http_response();
        assert_eq!(http.status(), StatusCode::NOT_FOUND);
        assert_eq!(http.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }
}
