//! The request processor.
//!
//! [`RequestProcessor`] turns one inbound request into a response:
//!
//! ```text
//! process_request
//!   ├─ 503 if a required resolver is missing (no filters, no error chain)
//!   ├─ resolve resource + handler, install the root content frame
//!   ├─ REQUEST chain
//!   │    └─ COMPONENT chain
//!   │         └─ handler.service ──► dispatch_request (include / forward)
//!   │                                  └─ INCLUDE / FORWARD chain
//!   │                                       └─ handler.service ...
//!   ├─ map failures onto the ERROR chain
//!   └─ record telemetry
//! ```
//!
//! Only transport failures (`EngineError::Io`) leave `process_request`;
//! everything else is converted into exactly one error render.

use crate::chain::{FilterChain, FilterChainType, Render};
use crate::context::{ContentFrame, DispatchKind, DispatchingInfo, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::error_chain::{ErrorChain, ErrorState};
use crate::registry::{FilterManager, FilterRegistry};
use crate::response::{ErrorResponse, IncludeResponse, Response};
use crate::services::{
    DefaultErrorHandler, ErrorHandler, HandlerResolver, RequestSummary, ResourceResolver,
    TelemetrySink,
};
use crate::settings::SettingsHandle;
use crate::types::{BoxFuture, Request, RequestPathInfo, Resource};
use http::StatusCode;
use parking_lot::RwLock;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::Instrument;

/// How a nested dispatch treats the outer response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    include: bool,
    protect_headers: bool,
}

impl DispatchOptions {
    /// Include the target into the current response.
    #[must_use]
    pub const fn include() -> Self {
        Self {
            include: true,
            protect_headers: false,
        }
    }

    /// Forward the request to the target.
    #[must_use]
    pub const fn forward() -> Self {
        Self {
            include: false,
            protect_headers: false,
        }
    }

    /// Ignore status and header changes made by an included render.
    ///
    /// Has no effect on forwards.
    #[must_use]
    pub const fn with_protect_headers(mut self, protect: bool) -> Self {
        self.protect_headers = protect;
        self
    }

    /// Returns `true` for includes.
    #[must_use]
    pub const fn is_include(&self) -> bool {
        self.include
    }

    /// Returns `true` if header protection applies.
    #[must_use]
    pub const fn protects_headers(&self) -> bool {
        self.include && self.protect_headers
    }

    const fn chain_type(self) -> FilterChainType {
        if self.include {
            FilterChainType::Include
        } else {
            FilterChainType::Forward
        }
    }

    const fn dispatch_kind(self) -> DispatchKind {
        if self.include {
            DispatchKind::Include
        } else {
            DispatchKind::Forward
        }
    }
}

/// Builder for [`RequestProcessor`].
#[derive(Default)]
pub struct RequestProcessorBuilder {
    filters: Option<Arc<dyn FilterRegistry>>,
    handler_resolver: Option<Arc<dyn HandlerResolver>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    server_info: Option<String>,
    settings: SettingsHandle,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl RequestProcessorBuilder {
    /// Sets the filter registry. Defaults to an empty [`FilterManager`].
    #[must_use]
    pub fn filters(mut self, filters: Arc<dyn FilterRegistry>) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Binds the handler resolver.
    #[must_use]
    pub fn handler_resolver(mut self, resolver: Arc<dyn HandlerResolver>) -> Self {
        self.handler_resolver = Some(resolver);
        self
    }

    /// Installs an error handler in front of the default one.
    #[must_use]
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Sets the server description shown on default error pages.
    #[must_use]
    pub fn server_info(mut self, server_info: impl Into<String>) -> Self {
        self.server_info = Some(server_info.into());
        self
    }

    /// Shares a settings handle with the processor.
    #[must_use]
    pub fn settings(mut self, settings: SettingsHandle) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the telemetry sink.
    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Builds the processor.
    #[must_use]
    pub fn build(self) -> RequestProcessor {
        let mut default_handler = DefaultErrorHandler::new();
        if let Some(info) = self.server_info {
            default_handler = default_handler.with_server_info(info);
        }
        default_handler.set_delegate(self.error_handler);

        RequestProcessor {
            filters: self
                .filters
                .unwrap_or_else(|| Arc::new(FilterManager::new())),
            handler_resolver: RwLock::new(self.handler_resolver),
            error_handler: default_handler,
            settings: self.settings,
            telemetry: self.telemetry,
        }
    }
}

/// Drives requests through the filter chains.
pub struct RequestProcessor {
    filters: Arc<dyn FilterRegistry>,
    handler_resolver: RwLock<Option<Arc<dyn HandlerResolver>>>,
    error_handler: DefaultErrorHandler,
    settings: SettingsHandle,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl RequestProcessor {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> RequestProcessorBuilder {
        RequestProcessorBuilder::default()
    }

    /// Returns the settings handle.
    #[must_use]
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Binds or replaces the handler resolver.
    pub fn bind_handler_resolver(&self, resolver: Arc<dyn HandlerResolver>) {
        *self.handler_resolver.write() = Some(resolver);
    }

    /// Unbinds the handler resolver. Requests are answered with 503 until a
    /// new one is bound.
    pub fn unbind_handler_resolver(&self) {
        *self.handler_resolver.write() = None;
    }

    /// Installs or removes the error handler used instead of the default page.
    pub fn set_error_handler(&self, handler: Option<Arc<dyn ErrorHandler>>) {
        self.error_handler.set_delegate(handler);
    }

    fn handler_resolver(&self) -> Option<Arc<dyn HandlerResolver>> {
        self.handler_resolver.read().clone()
    }

    /// Processes one request.
    ///
    /// Returns `Err` only for transport failures; every other failure is
    /// rendered into `response` by the error chain.
    pub async fn process_request(
        &self,
        request: Request,
        response: &mut dyn Response,
        resource_resolver: Option<&dyn ResourceResolver>,
    ) -> io::Result<()> {
        let handler_resolver = self.handler_resolver();
        let (resource_resolver, handler_resolver) = match (resource_resolver, handler_resolver) {
            (Some(resources), Some(handlers)) => (resources, handlers),
            (resources, handlers) => {
                let mut missing = Vec::with_capacity(2);
                if resources.is_none() {
                    missing.push("ResourceResolver");
                }
                if handlers.is_none() {
                    missing.push("HandlerResolver");
                }
                let message = format!("Required service missing ({})", missing.join(", "));
                tracing::debug!("{}", message);
                return match response.send_error(StatusCode::SERVICE_UNAVAILABLE, Some(&message)) {
                    Ok(()) => Ok(()),
                    Err(EngineError::Io(err)) => Err(err),
                    Err(err) => {
                        tracing::warn!(error = %err, "could not send 503 response");
                        Ok(())
                    }
                };
            }
        };

        let mut ctx = RequestContext::new(request, self.settings.load());
        let span = tracing::debug_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.request().method(),
            path = %ctx.request().uri().path(),
        );

        async {
            for header in ctx.settings().additional_response_headers() {
                response.set_header(header.name().clone(), header.value().clone());
            }

            let outcome = self
                .run_request(&mut ctx, response, resource_resolver, handler_resolver.as_ref())
                .await;
            let result = match outcome {
                Ok(()) => Ok(()),
                Err(err) => self.handle_failure(&mut ctx, response, err).await,
            };

            self.record(&ctx, response.status());
            result
        }
        .instrument(span)
        .await
    }

    async fn run_request(
        &self,
        ctx: &mut RequestContext,
        response: &mut dyn Response,
        resource_resolver: &dyn ResourceResolver,
        handler_resolver: &dyn HandlerResolver,
    ) -> EngineResult<()> {
        let resource = resource_resolver.resolve(ctx.request())?;
        let path_info = RequestPathInfo::for_request(ctx.request().uri().path(), resource.path());
        let handler = handler_resolver.resolve(ctx, &resource, &path_info)?;
        tracing::debug!(
            resource = resource.path(),
            resource_type = resource.resource_type(),
            handler = handler.name(),
            "resolved request target"
        );
        ctx.set_root_frame(ContentFrame::new(resource, path_info, handler));

        ctx.tracker_mut().log("Applying REQUEST filters");
        let chain = FilterChain::new(
            FilterChainType::Request,
            self.filters.filters(FilterChainType::Request),
            RequestRender { processor: self },
        );
        chain.run(ctx, response).await
    }

    async fn handle_failure(
        &self,
        ctx: &mut RequestContext,
        response: &mut dyn Response,
        err: EngineError,
    ) -> io::Result<()> {
        match err {
            EngineError::WriterAlreadyClosed => {
                tracing::error!("service: Writer has already been closed.");
                Ok(())
            }
            EngineError::ResourceNotFound { resource, message } => {
                tracing::debug!(resource = %resource, "service: Resource not found");
                self.handle_error_status(ctx, response, StatusCode::NOT_FOUND, Some(&message))
                    .await
            }
            err @ EngineError::HandlerNotFound { .. } => {
                tracing::debug!(error = %err, "service: No handler for resource");
                let message = err.to_string();
                self.handle_error_status(ctx, response, StatusCode::NOT_FOUND, Some(&message))
                    .await
            }
            err @ EngineError::Domain { .. } => {
                let cause = err.into_root_cause();
                tracing::error!(
                    error = %cause,
                    code = cause.code(),
                    handler = ctx.failed_handler_name(),
                    "service: Uncaught domain failure"
                );
                self.handle_error(ctx, response, cause).await
            }
            EngineError::AccessDenied { message } => {
                tracing::debug!(
                    reason = %message,
                    "service: Caller does not have enough rights to execute the requested action"
                );
                self.handle_error_status(ctx, response, StatusCode::FORBIDDEN, None)
                    .await
            }
            EngineError::Io(err) => Err(err),
            other => {
                tracing::error!(
                    error = %other,
                    code = other.code(),
                    handler = ctx.failed_handler_name(),
                    "service: Uncaught failure"
                );
                self.handle_error(ctx, response, other).await
            }
        }
    }

    fn record(&self, ctx: &RequestContext, status: StatusCode) {
        let summary = RequestSummary::from_context(ctx, status);
        tracing::debug!(
            status = summary.status,
            duration_ms = summary.duration.as_secs_f64() * 1000.0,
            handler_calls = summary.handler_calls,
            "request completed"
        );
        if let Some(sink) = &self.telemetry {
            sink.record(&summary);
        }
    }

    /// Renders an error for a status code through the ERROR chain.
    ///
    /// Does nothing if the request is already handling an error or the
    /// response is committed. Failures of the error chain itself are logged
    /// and swallowed unless they are transport failures.
    pub async fn handle_error_status(
        &self,
        ctx: &mut RequestContext,
        response: &mut dyn Response,
        status: StatusCode,
        message: Option<&str>,
    ) -> io::Result<()> {
        self.run_error_chain(ctx, response, ErrorState::status(status, message))
            .await
    }

    /// Renders an error for a failure through the ERROR chain.
    ///
    /// See [`handle_error_status`](Self::handle_error_status).
    pub async fn handle_error(
        &self,
        ctx: &mut RequestContext,
        response: &mut dyn Response,
        failure: EngineError,
    ) -> io::Result<()> {
        self.run_error_chain(ctx, response, ErrorState::Failure(failure))
            .await
    }

    async fn run_error_chain(
        &self,
        ctx: &mut RequestContext,
        response: &mut dyn Response,
        state: ErrorState,
    ) -> io::Result<()> {
        ctx.tracker_mut().log("Applying ERROR filters");
        let chain = ErrorChain::new(
            self.filters.filters(FilterChainType::Error),
            state,
            &self.error_handler,
        );
        let mut error_response = ErrorResponse::new(response);

        match chain.run(ctx, &mut error_response).await {
            Ok(()) => Ok(()),
            Err(EngineError::Io(err)) => Err(err),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    state = %chain.state(),
                    "handleError: Error handling failed"
                );
                Ok(())
            }
        }
    }

    /// Renders another resource as part of the current request.
    ///
    /// Resolves the handler, pushes a content frame, switches the
    /// dispatching info and runs the INCLUDE or FORWARD chain. Frame and
    /// dispatching info are restored on return, whatever the outcome.
    pub async fn dispatch_request(
        &self,
        ctx: &mut RequestContext,
        response: &mut dyn Response,
        resource: Resource,
        path_info: RequestPathInfo,
        options: DispatchOptions,
    ) -> EngineResult<()> {
        let resolver = self
            .handler_resolver()
            .ok_or_else(|| EngineError::illegal_state("no handler resolver bound"))?;
        let handler = resolver.resolve(ctx, &resource, &path_info)?;
        let target = resource.path().to_string();
        tracing::debug!(
            target = %target,
            handler = handler.name(),
            include = options.is_include(),
            "dispatching"
        );

        let mut frame = ctx.push_frame(ContentFrame::new(resource, path_info, handler))?;
        let mut scope =
            frame.enter_dispatch(DispatchingInfo::new(options.dispatch_kind()).with_target(target));

        if options.protects_headers() {
            let mut protected = IncludeResponse::new(response);
            self.process_component(&mut scope, &mut protected, options.chain_type())
                .await
        } else {
            self.process_component(&mut scope, response, options.chain_type())
                .await
        }
    }

    /// Runs the filters of `chain_type` around the active frame's handler.
    pub fn process_component<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
        chain_type: FilterChainType,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            ctx.tracker_mut().log(format!("Applying {chain_type} filters"));
            let chain = FilterChain::new(
                chain_type,
                self.filters.filters(chain_type),
                ComponentRender { processor: self },
            );
            chain.run(ctx, response).await
        })
    }

    fn call_handler<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let handler = ctx
                .active_frame()
                .map(|frame| Arc::clone(frame.handler()))
                .ok_or_else(|| EngineError::illegal_state("no active content frame"))?;
            let name = handler.name().to_string();

            let mut scope = ctx.enter_handler(&name)?;
            scope.tracker_mut().log(format!("Calling handler {name}"));
            let result = handler.service(self, &mut scope, response).await;

            match &result {
                Ok(()) => scope.tracker_mut().log(format!("Handler {name} finished")),
                Err(err) => {
                    scope.tracker_mut().log(format!("Handler {name} failed: {err}"));
                    if matches!(
                        err,
                        EngineError::Domain { .. }
                            | EngineError::Other(_)
                            | EngineError::IllegalState(_)
                            | EngineError::TooManyRecursions { .. }
                    ) {
                        scope.record_failed_handler(&name);
                    }
                }
            }
            result
        })
    }
}

impl fmt::Debug for RequestProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("handler_resolver_bound", &self.handler_resolver.read().is_some())
            .field("error_handler", &self.error_handler)
            .field("telemetry", &self.telemetry.is_some())
            .finish_non_exhaustive()
    }
}

struct RequestRender<'p> {
    processor: &'p RequestProcessor,
}

impl Render for RequestRender<'_> {
    fn render<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        self.processor
            .process_component(ctx, response, FilterChainType::Component)
    }
}

struct ComponentRender<'p> {
    processor: &'p RequestProcessor,
}

impl Render for ComponentRender<'_> {
    fn render<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        self.processor.call_handler(ctx, response)
    }
}
