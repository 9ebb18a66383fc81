//! Test fixtures for engine development and testing.
//!
//! Simple in-memory collaborators: a resource resolver backed by a path
//! table, a handler resolver backed by a resource-type table, handlers that
//! write a fixed body or fail, and recorders for filters and error handlers.
//!
//! # Example
//!
//! ```
//! use pylon_engine::fixtures::{MapHandlerResolver, StaticHandler, StaticResourceResolver};
//! use pylon_engine::{BufferedResponse, RequestProcessor};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let processor = RequestProcessor::builder()
//!     .handler_resolver(Arc::new(
//!         MapHandlerResolver::new().with("demo/page", StaticHandler::new("page", "hi")),
//!     ))
//!     .build();
//! let resources = StaticResourceResolver::new().with("/demo", "demo/page");
//!
//! let mut response = BufferedResponse::new();
//! processor
//!     .process_request(pylon_engine::fixtures::request("/demo.html"), &mut response, Some(&resources))
//!     .await
//!     .unwrap();
//! assert_eq!(response.body_text(), "hi");
//! # });
//! ```

use crate::chain::{Filter, Next};
use crate::context::{DispatchKind, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::processor::RequestProcessor;
use crate::response::Response;
use crate::services::{ErrorHandler, Handler, HandlerResolver, ResourceResolver};
use crate::settings::EngineSettings;
use crate::types::{BoxFuture, Request, RequestPathInfo, Resource};
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a `GET` request for `path`.
#[must_use]
pub fn request(path: &str) -> Request {
    let mut request = http::Request::new(Bytes::new());
    match path.parse() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(err) => tracing::warn!(path, error = %err, "fixture request path is not a valid URI"),
    }
    request
}

/// Builds a context for a `GET` request to `path` with default settings.
#[must_use]
pub fn context(path: &str) -> RequestContext {
    RequestContext::new(request(path), Arc::new(EngineSettings::default()))
}

/// Resolves request paths against a fixed table.
///
/// A table entry matches when it equals the request path or is followed in
/// it by `.` or `/`. The longest match wins.
#[derive(Debug, Default, Clone)]
pub struct StaticResourceResolver {
    resources: HashMap<String, String>,
}

impl StaticResourceResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.resources.insert(path.into(), resource_type.into());
        self
    }

    /// Resolves a path directly.
    pub fn resolve_path(&self, path: &str) -> EngineResult<Resource> {
        self.resources
            .iter()
            .filter(|(candidate, _)| {
                path.strip_prefix(candidate.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('/'))
            })
            .max_by_key(|(candidate, _)| candidate.len())
            .map(|(candidate, resource_type)| Resource::new(candidate.clone(), resource_type.clone()))
            .ok_or_else(|| EngineError::resource_not_found(path))
    }
}

impl ResourceResolver for StaticResourceResolver {
    fn resolve(&self, request: &Request) -> EngineResult<Resource> {
        self.resolve_path(request.uri().path())
    }
}

/// Resolves handlers by resource type.
#[derive(Default, Clone)]
pub struct MapHandlerResolver {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl MapHandlerResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a resource type.
    #[must_use]
    pub fn with(self, resource_type: impl Into<String>, handler: impl Handler) -> Self {
        self.with_shared(resource_type, Arc::new(handler))
    }

    /// Registers a shared handler for a resource type.
    #[must_use]
    pub fn with_shared(mut self, resource_type: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(resource_type.into(), handler);
        self
    }
}

impl HandlerResolver for MapHandlerResolver {
    fn resolve(
        &self,
        _ctx: &RequestContext,
        resource: &Resource,
        _path_info: &RequestPathInfo,
    ) -> EngineResult<Arc<dyn Handler>> {
        self.handlers
            .get(resource.resource_type())
            .cloned()
            .ok_or_else(|| EngineError::handler_not_found(resource.path()))
    }
}

impl std::fmt::Debug for MapHandlerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("MapHandlerResolver").field("types", &types).finish()
    }
}

enum Behavior {
    Body(String),
    Fail(Box<dyn Fn() -> EngineError + Send + Sync>),
}

/// Handler that writes a fixed body or fails.
pub struct StaticHandler {
    name: String,
    behavior: Behavior,
}

impl StaticHandler {
    /// Creates a handler that writes `body`.
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: Behavior::Body(body.into()),
        }
    }

    /// Creates a handler that fails with the error `make` returns.
    pub fn failing<F>(name: impl Into<String>, make: F) -> Self
    where
        F: Fn() -> EngineError + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            behavior: Behavior::Fail(Box::new(make)),
        }
    }
}

impl Handler for StaticHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn service<'a>(
        &'a self,
        _processor: &'a RequestProcessor,
        _ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            match &self.behavior {
                Behavior::Body(body) => response.write_str(body),
                Behavior::Fail(make) => Err(make()),
            }
        })
    }
}

impl std::fmt::Debug for StaticHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticHandler").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Shared, ordered list of events.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Returns a copy of all events.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

/// Filter that logs `<name>:before` and `<name>:after` around the chain.
///
/// The `after` event is logged whether or not the chain succeeded.
#[derive(Debug)]
pub struct RecordingFilter {
    name: String,
    log: EventLog,
}

impl RecordingFilter {
    /// Creates a recording filter.
    pub fn new(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

impl Filter for RecordingFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_filter<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            self.log.push(format!("{}:before", self.name));
            let result = next.run(ctx, response).await;
            self.log.push(format!("{}:after", self.name));
            result
        })
    }
}

/// One call received by a [`RecordingErrorHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCall {
    /// `handle_status` was called.
    Status {
        /// Status passed in.
        status: StatusCode,
        /// Message passed in.
        message: Option<String>,
    },
    /// `handle_failure` was called.
    Failure {
        /// [`EngineError::code`] of the failure.
        code: &'static str,
        /// Display text of the failure.
        message: String,
    },
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<ErrorCall>,
    dispatch_kinds: Vec<DispatchKind>,
    failed_handlers: Vec<Option<String>>,
}

/// Error handler that records its calls and writes a short body.
#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    recorded: Mutex<Recorded>,
    fail: bool,
}

impl RecordingErrorHandler {
    /// Creates a handler that records the call and then fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            recorded: Mutex::default(),
            fail: true,
        }
    }

    /// Returns the calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ErrorCall> {
        self.recorded.lock().calls.clone()
    }

    /// Returns the dispatch kind seen during each call.
    #[must_use]
    pub fn dispatch_kinds(&self) -> Vec<DispatchKind> {
        self.recorded.lock().dispatch_kinds.clone()
    }

    /// Returns the failed handler name seen during each call.
    #[must_use]
    pub fn failed_handlers(&self) -> Vec<Option<String>> {
        self.recorded.lock().failed_handlers.clone()
    }

    fn record(
        &self,
        call: ErrorCall,
        ctx: &RequestContext,
        response: &mut dyn Response,
    ) -> EngineResult<()> {
        let body = match &call {
            ErrorCall::Status { status, .. } => format!("error {}", status.as_u16()),
            ErrorCall::Failure { code, .. } => format!("error {code}"),
        };
        {
            let mut recorded = self.recorded.lock();
            recorded.calls.push(call);
            recorded.dispatch_kinds.push(ctx.dispatching_info().kind());
            recorded
                .failed_handlers
                .push(ctx.failed_handler_name().map(ToString::to_string));
        }

        if self.fail {
            return Err(EngineError::Other(anyhow::anyhow!("error handler failed")));
        }
        response.write_str(&body)
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle_status<'a>(
        &'a self,
        status: StatusCode,
        message: Option<&'a str>,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            response.set_status(status);
            let call = ErrorCall::Status {
                status,
                message: message.map(ToString::to_string),
            };
            self.record(call, ctx, response)
        })
    }

    fn handle_failure<'a>(
        &'a self,
        failure: &'a EngineError,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            let call = ErrorCall::Failure {
                code: failure.code(),
                message: failure.to_string(),
            };
            self.record(call, ctx, response)
        })
    }
}
