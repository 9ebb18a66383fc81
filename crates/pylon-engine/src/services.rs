//! Collaborators the engine calls out to.
//!
//! Resource lookup, handler selection, error rendering and telemetry are not
//! part of the engine; it reaches them through the traits in this module.

use crate::context::{ProgressEntry, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::processor::RequestProcessor;
use crate::response::Response;
use crate::types::{BoxFuture, Request, RequestId, RequestPathInfo, Resource};
use http::StatusCode;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Maps an inbound request to the resource it targets.
pub trait ResourceResolver: Send + Sync {
    /// Resolves the top-level resource.
    ///
    /// Fails with [`EngineError::ResourceNotFound`] if nothing matches.
    fn resolve(&self, request: &Request) -> EngineResult<Resource>;
}

/// Selects the handler that renders a resource.
pub trait HandlerResolver: Send + Sync {
    /// Resolves the handler for `resource` addressed with `path_info`.
    ///
    /// Fails with [`EngineError::HandlerNotFound`] if no handler applies.
    fn resolve(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        path_info: &RequestPathInfo,
    ) -> EngineResult<Arc<dyn Handler>>;
}

/// Renders a resource.
///
/// Handlers receive the processor so they can include or forward to other
/// resources.
pub trait Handler: Send + Sync + 'static {
    /// Returns the handler name for logs and error reports.
    fn name(&self) -> &str;

    /// Renders the active content frame into `response`.
    fn service<'a>(
        &'a self,
        processor: &'a RequestProcessor,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>>;
}

/// Produces error responses.
pub trait ErrorHandler: Send + Sync {
    /// Renders an error for a status code and optional message.
    fn handle_status<'a>(
        &'a self,
        status: StatusCode,
        message: Option<&'a str>,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>>;

    /// Renders an error for a failure.
    fn handle_failure<'a>(
        &'a self,
        failure: &'a EngineError,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>>;
}

/// Receives a summary of every completed request.
pub trait TelemetrySink: Send + Sync {
    /// Records a completed request. Must not fail.
    fn record(&self, summary: &RequestSummary);
}

/// What telemetry learns about a completed request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    /// Request ID.
    pub request_id: RequestId,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Final response status.
    pub status: u16,
    /// Time spent in the processor.
    pub duration: Duration,
    /// Handler invocations, nested ones included.
    pub handler_calls: u64,
    /// Error chains that reached their filters.
    pub error_chains: u32,
    /// Innermost handler that failed, if any.
    pub failed_handler: Option<String>,
    /// The request progress log.
    pub progress: Vec<ProgressEntry>,
}

impl RequestSummary {
    /// Summarizes a finished request.
    #[must_use]
    pub fn from_context(ctx: &RequestContext, status: StatusCode) -> Self {
        Self {
            request_id: ctx.request_id(),
            method: ctx.request().method().to_string(),
            path: ctx.request().uri().path().to_string(),
            status: status.as_u16(),
            duration: ctx.elapsed(),
            handler_calls: ctx.total_handler_calls(),
            error_chains: ctx.error_chain_runs(),
            failed_handler: ctx.failed_handler_name().map(ToString::to_string),
            progress: ctx.tracker().entries().to_vec(),
        }
    }
}

/// A handler built from a closure.
///
/// # Example
///
/// ```
/// use pylon_engine::{FnHandler, Handler, Response};
///
/// let handler = FnHandler::new("hello", |_processor, _ctx, response| {
///     Box::pin(async move {
///         response.set_content_type("text/plain")?;
///         response.write_str("hello")
///     })
/// });
/// assert_eq!(handler.name(), "hello");
/// ```
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: for<'a> Fn(
            &'a RequestProcessor,
            &'a mut RequestContext,
            &'a mut dyn Response,
        ) -> BoxFuture<'a, EngineResult<()>>
        + Send
        + Sync
        + 'static,
{
    /// Creates a named closure handler.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(
            &'a RequestProcessor,
            &'a mut RequestContext,
            &'a mut dyn Response,
        ) -> BoxFuture<'a, EngineResult<()>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn service<'a>(
        &'a self,
        processor: &'a RequestProcessor,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        (self.func)(processor, ctx, response)
    }
}

/// Error handler used when no other is configured.
///
/// Renders a small HTML page. A delegate can be installed at runtime; while
/// one is present, every call goes to it instead.
#[derive(Default)]
pub struct DefaultErrorHandler {
    delegate: RwLock<Option<Arc<dyn ErrorHandler>>>,
    server_info: Option<String>,
}

impl DefaultErrorHandler {
    /// Creates the handler without a delegate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server description printed at the bottom of error pages.
    #[must_use]
    pub fn with_server_info(mut self, server_info: impl Into<String>) -> Self {
        self.server_info = Some(server_info.into());
        self
    }

    /// Installs or removes the delegate.
    pub fn set_delegate(&self, delegate: Option<Arc<dyn ErrorHandler>>) {
        *self.delegate.write() = delegate;
    }

    /// Returns `true` if a delegate is installed.
    #[must_use]
    pub fn has_delegate(&self) -> bool {
        self.delegate.read().is_some()
    }

    fn delegate(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.delegate.read().clone()
    }

    fn render_page(
        &self,
        status: StatusCode,
        message: Option<&str>,
        ctx: &RequestContext,
        response: &mut dyn Response,
    ) -> EngineResult<()> {
        let reason = status.canonical_reason().unwrap_or("Error");
        let path = ctx.request().uri().path();

        let mut page = String::with_capacity(256);
        let _ = write!(
            page,
            "<html><head><title>{} {}</title></head><body><h1>{} {}</h1>",
            status.as_u16(),
            escape_html(reason),
            status.as_u16(),
            escape_html(reason)
        );
        match ctx.failed_handler_name() {
            Some(handler) => {
                let _ = write!(
                    page,
                    "<p>The requested URL {} resulted in an error in {}.</p>",
                    escape_html(path),
                    escape_html(handler)
                );
            }
            None => {
                let _ = write!(page, "<p>Cannot serve request to {}.</p>", escape_html(path));
            }
        }
        if let Some(message) = message {
            let _ = write!(page, "<p>{}</p>", escape_html(message));
        }
        if let Some(info) = &self.server_info {
            let _ = write!(page, "<hr><address>{}</address>", escape_html(info));
        }
        page.push_str("</body></html>");

        response.set_status(status);
        response.set_content_type("text/html;charset=UTF-8")?;
        response.set_character_encoding("UTF-8");
        response.write_str(&page)
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle_status<'a>(
        &'a self,
        status: StatusCode,
        message: Option<&'a str>,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            if let Some(delegate) = self.delegate() {
                return delegate.handle_status(status, message, ctx, response).await;
            }
            self.render_page(status, message, ctx, response)
        })
    }

    fn handle_failure<'a>(
        &'a self,
        failure: &'a EngineError,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            if let Some(delegate) = self.delegate() {
                return delegate.handle_failure(failure, ctx, response).await;
            }
            let message = failure.to_string();
            self.render_page(StatusCode::INTERNAL_SERVER_ERROR, Some(&message), ctx, response)
        })
    }
}

impl fmt::Debug for DefaultErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultErrorHandler")
            .field("has_delegate", &self.has_delegate())
            .field("server_info", &self.server_info)
            .finish()
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
