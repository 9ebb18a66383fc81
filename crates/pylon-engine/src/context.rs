//! Per-request state.
//!
//! The [`RequestContext`] is created by the
//! [`RequestProcessor`](crate::RequestProcessor) for each inbound request and
//! passed by mutable reference through every filter, handler and nested
//! dispatch. It owns:
//!
//! - the content frame stack (which resource and handler are active),
//! - the include and call depth counters,
//! - the current [`DispatchingInfo`],
//! - the error-handling recursion guard,
//! - a [`ProgressTracker`] and typed extensions.
//!
//! State that must be restored after a nested operation is changed only
//! through scope guards ([`FrameGuard`], [`DispatchScope`], [`HandlerScope`]).
//! Each guard dereferences to the context and restores the previous state
//! when dropped, on success, on error and when the future is cancelled.

use crate::error::{EngineError, EngineResult, RecursionKind};
use crate::services::Handler;
use crate::settings::EngineSettings;
use crate::types::{Request, RequestId, RequestPathInfo, Resource};
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One entry of the content stack: a target resource, its path info and the
/// handler resolved for it.
#[derive(Clone)]
pub struct ContentFrame {
    resource: Resource,
    path_info: RequestPathInfo,
    handler: Arc<dyn Handler>,
}

impl ContentFrame {
    /// Creates a frame.
    pub fn new(resource: Resource, path_info: RequestPathInfo, handler: Arc<dyn Handler>) -> Self {
        Self {
            resource,
            path_info,
            handler,
        }
    }

    /// Returns the target resource.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Returns the path info the target was addressed with.
    #[must_use]
    pub fn path_info(&self) -> &RequestPathInfo {
        &self.path_info
    }

    /// Returns the resolved handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for ContentFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFrame")
            .field("resource", &self.resource)
            .field("path_info", &self.path_info)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// The kind of dispatch currently rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchKind {
    /// The top-level request.
    Request,
    /// A nested include.
    Include,
    /// A nested forward.
    Forward,
    /// Error handling.
    Error,
}

/// Marker describing the dispatch the current render runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchingInfo {
    kind: DispatchKind,
    target: Option<String>,
}

impl DispatchingInfo {
    /// Creates a marker of the given kind.
    #[must_use]
    pub const fn new(kind: DispatchKind) -> Self {
        Self { kind, target: None }
    }

    /// Records the path the dispatch targets.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Returns the dispatch kind.
    #[must_use]
    pub const fn kind(&self) -> DispatchKind {
        self.kind
    }

    /// Returns the dispatch target path, if recorded.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// A timestamped message in the [`ProgressTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    /// Time since the request started.
    pub elapsed: Duration,
    /// The message.
    pub message: String,
}

/// Records what happened while a request was processed.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started_at: Instant,
    entries: Vec<ProgressEntry>,
}

impl ProgressTracker {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            entries: Vec::new(),
        }
    }

    /// Appends a message.
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::trace!(progress = %message);
        self.entries.push(ProgressEntry {
            elapsed: self.started_at.elapsed(),
            message,
        });
    }

    /// Returns all entries in the order they were logged.
    #[must_use]
    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    /// Returns `true` if any entry has exactly this message.
    #[must_use]
    pub fn contains(&self, message: &str) -> bool {
        self.entries.iter().any(|entry| entry.message == message)
    }

    /// Renders the entries as lines of `"<micros> <message>"`.
    #[must_use]
    pub fn dump(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| format!("{:>8} {}", entry.elapsed.as_micros(), entry.message))
            .collect()
    }
}

/// Per-request state carried through the whole processing pipeline.
pub struct RequestContext {
    request_id: RequestId,
    request: Request,
    settings: Arc<EngineSettings>,
    started_at: Instant,

    frames: Vec<ContentFrame>,
    include_depth: usize,
    call_depth: usize,
    total_handler_calls: u64,
    active_handler: Option<String>,
    failed_handler: Option<String>,

    dispatching_info: DispatchingInfo,
    handling_error: bool,
    error_chain_runs: u32,

    tracker: ProgressTracker,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    /// Creates a context for `request` bound to a settings snapshot.
    #[must_use]
    pub fn new(request: Request, settings: Arc<EngineSettings>) -> Self {
        let started_at = Instant::now();
        Self {
            request_id: RequestId::new(),
            request,
            settings,
            started_at,
            frames: Vec::new(),
            include_depth: 0,
            call_depth: 0,
            total_handler_calls: 0,
            active_handler: None,
            failed_handler: None,
            dispatching_info: DispatchingInfo::new(DispatchKind::Request),
            handling_error: false,
            error_chain_runs: 0,
            tracker: ProgressTracker::new(started_at),
            extensions: HashMap::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the inbound request.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the settings snapshot taken for this request.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Installs the frame for the top-level target.
    ///
    /// The root frame lives as long as the context and does not count
    /// towards the include depth.
    pub fn set_root_frame(&mut self, frame: ContentFrame) {
        if self.frames.is_empty() {
            self.frames.push(frame);
        } else {
            self.frames[0] = frame;
        }
    }

    /// Pushes a frame for a nested dispatch and makes it the active one.
    ///
    /// Fails with [`EngineError::TooManyRecursions`] without pushing when the
    /// include depth has reached the configured maximum. The frame is popped
    /// when the returned guard is dropped.
    pub fn push_frame(&mut self, frame: ContentFrame) -> EngineResult<FrameGuard<'_>> {
        let limit = self.settings.max_include_depth();
        if self.include_depth >= limit {
            return Err(EngineError::too_many_recursions(
                RecursionKind::Include,
                limit,
                frame.resource().path(),
            ));
        }

        self.include_depth += 1;
        tracing::trace!(
            depth = self.include_depth,
            resource = frame.resource().path(),
            "pushing content frame"
        );
        self.frames.push(frame);
        Ok(FrameGuard { ctx: self })
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            tracing::trace!(
                depth = self.include_depth,
                resource = frame.resource().path(),
                "popping content frame"
            );
        }
        self.include_depth = self.include_depth.saturating_sub(1);
    }

    /// Returns the active content frame, if the root target has been resolved.
    #[must_use]
    pub fn active_frame(&self) -> Option<&ContentFrame> {
        self.frames.last()
    }

    /// Returns the number of frames on the stack, including the root.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of nested dispatch frames currently pushed.
    #[must_use]
    pub const fn include_depth(&self) -> usize {
        self.include_depth
    }

    /// Returns the content type for the active frame's extension.
    #[must_use]
    pub fn response_content_type(&self) -> Option<&str> {
        let extension = self.active_frame()?.path_info().extension()?;
        self.settings.mime_type(extension)
    }

    /// Marks the start of a handler invocation.
    ///
    /// Fails with [`EngineError::TooManyRecursions`] when the call depth has
    /// reached the configured maximum. The previous active handler name is
    /// restored when the returned scope is dropped.
    pub fn enter_handler(&mut self, name: &str) -> EngineResult<HandlerScope<'_>> {
        let limit = self.settings.max_call_depth();
        if self.call_depth >= limit {
            let path = self
                .active_frame()
                .map_or_else(String::new, |frame| frame.resource().path().to_string());
            return Err(EngineError::too_many_recursions(RecursionKind::Call, limit, path));
        }

        self.call_depth += 1;
        self.total_handler_calls += 1;
        let previous = self.active_handler.replace(name.to_string());
        Ok(HandlerScope {
            ctx: self,
            previous,
        })
    }

    /// Returns the current handler call nesting depth.
    #[must_use]
    pub const fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Returns how many handler invocations this request has made in total.
    #[must_use]
    pub const fn total_handler_calls(&self) -> u64 {
        self.total_handler_calls
    }

    /// Returns the name of the handler currently rendering.
    #[must_use]
    pub fn active_handler(&self) -> Option<&str> {
        self.active_handler.as_deref()
    }

    /// Returns the name of the innermost handler that failed, if any.
    #[must_use]
    pub fn failed_handler_name(&self) -> Option<&str> {
        self.failed_handler.as_deref()
    }

    pub(crate) fn record_failed_handler(&mut self, name: &str) {
        if self.failed_handler.is_none() {
            self.failed_handler = Some(name.to_string());
        }
    }

    /// Returns the current dispatching marker.
    #[must_use]
    pub fn dispatching_info(&self) -> &DispatchingInfo {
        &self.dispatching_info
    }

    /// Replaces the dispatching marker until the returned scope is dropped.
    pub fn enter_dispatch(&mut self, info: DispatchingInfo) -> DispatchScope<'_> {
        let previous = std::mem::replace(&mut self.dispatching_info, info);
        DispatchScope {
            ctx: self,
            previous: Some(previous),
        }
    }

    /// Returns `true` once an error chain has started for this request.
    #[must_use]
    pub const fn is_handling_error(&self) -> bool {
        self.handling_error
    }

    pub(crate) fn begin_error_handling(&mut self) {
        self.handling_error = true;
    }

    pub(crate) fn record_error_render(&mut self) {
        self.error_chain_runs += 1;
    }

    /// Returns how many error chains reached their filters for this request.
    #[must_use]
    pub const fn error_chain_runs(&self) -> u32 {
        self.error_chain_runs
    }

    /// Returns the progress tracker.
    #[must_use]
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Returns the progress tracker for logging.
    pub fn tracker_mut(&mut self) -> &mut ProgressTracker {
        &mut self.tracker
    }

    /// Stores a typed extension value.
    ///
    /// Extensions let filters and handlers share request-scoped data.
    ///
    /// # Example
    ///
    /// ```
    /// use pylon_engine::{EngineSettings, RequestContext};
    /// use std::sync::Arc;
    ///
    /// struct CacheHit(bool);
    ///
    /// let request = http::Request::new(bytes::Bytes::new());
    /// let mut ctx = RequestContext::new(request, Arc::new(EngineSettings::default()));
    /// ctx.set_extension(CacheHit(true));
    ///
    /// assert!(ctx.get_extension::<CacheHit>().unwrap().0);
    /// ```
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Retrieves a typed extension value for modification.
    pub fn get_extension_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("path", &self.request.uri().path())
            .field("frames", &self.frames)
            .field("include_depth", &self.include_depth)
            .field("call_depth", &self.call_depth)
            .field("dispatching_info", &self.dispatching_info)
            .field("handling_error", &self.handling_error)
            .finish_non_exhaustive()
    }
}

/// Keeps a nested content frame active; pops it on drop.
#[derive(Debug)]
pub struct FrameGuard<'c> {
    ctx: &'c mut RequestContext,
}

impl Deref for FrameGuard<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        self.ctx
    }
}

impl DerefMut for FrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        self.ctx
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.ctx.pop_frame();
    }
}

/// Keeps a dispatching marker in place; restores the previous one on drop.
#[derive(Debug)]
pub struct DispatchScope<'c> {
    ctx: &'c mut RequestContext,
    previous: Option<DispatchingInfo>,
}

impl Deref for DispatchScope<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        self.ctx
    }
}

impl DerefMut for DispatchScope<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        self.ctx
    }
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.ctx.dispatching_info = previous;
        }
    }
}

/// Tracks one handler invocation; restores call depth and active handler on drop.
#[derive(Debug)]
pub struct HandlerScope<'c> {
    ctx: &'c mut RequestContext,
    previous: Option<String>,
}

impl Deref for HandlerScope<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        self.ctx
    }
}

impl DerefMut for HandlerScope<'_> {
    fn deref_mut(&mut self) -> &mut RequestContext {
        self.ctx
    }
}

impl Drop for HandlerScope<'_> {
    fn drop(&mut self) {
        self.ctx.call_depth = self.ctx.call_depth.saturating_sub(1);
        self.ctx.active_handler = self.previous.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::StaticHandler;
    use bytes::Bytes;

    fn context(settings: EngineSettings) -> RequestContext {
        let request = http::Request::builder()
            .uri("/content/page.html")
            .body(Bytes::new())
            .unwrap();
        RequestContext::new(request, Arc::new(settings))
    }

    fn frame(path: &str) -> ContentFrame {
        ContentFrame::new(
            Resource::new(path, "test/page"),
            RequestPathInfo::new(path),
            Arc::new(StaticHandler::new("page", "body")),
        )
    }

    #[test]
    fn test_new_context_defaults() {
        let ctx = context(EngineSettings::default());
        assert!(ctx.active_frame().is_none());
        assert_eq!(ctx.include_depth(), 0);
        assert_eq!(ctx.call_depth(), 0);
        assert_eq!(ctx.dispatching_info().kind(), DispatchKind::Request);
        assert!(!ctx.is_handling_error());
    }

    #[test]
    fn test_push_and_pop_frame() {
        let mut ctx = context(EngineSettings::default());
        ctx.set_root_frame(frame("/root"));

        {
            let guard = ctx.push_frame(frame("/nested")).unwrap();
            assert_eq!(guard.active_frame().unwrap().resource().path(), "/nested");
            assert_eq!(guard.include_depth(), 1);
            assert_eq!(guard.frame_count(), 2);
        }

        assert_eq!(ctx.active_frame().unwrap().resource().path(), "/root");
        assert_eq!(ctx.include_depth(), 0);
        assert_eq!(ctx.frame_count(), 1);
    }

    #[test]
    fn test_push_frame_limit() {
        let mut ctx = context(EngineSettings::new().with_max_include_depth(1));
        ctx.set_root_frame(frame("/root"));

        let mut guard = ctx.push_frame(frame("/one")).unwrap();
        let err = guard.push_frame(frame("/two")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::TooManyRecursions {
                kind: RecursionKind::Include,
                limit: 1,
                ..
            }
        ));
        assert_eq!(guard.frame_count(), 2);
        drop(guard);
        assert_eq!(ctx.frame_count(), 1);
    }

    #[test]
    fn test_handler_scope_restores() {
        let mut ctx = context(EngineSettings::default());
        {
            let mut outer = ctx.enter_handler("outer").unwrap();
            assert_eq!(outer.active_handler(), Some("outer"));
            {
                let inner = outer.enter_handler("inner").unwrap();
                assert_eq!(inner.active_handler(), Some("inner"));
                assert_eq!(inner.call_depth(), 2);
            }
            assert_eq!(outer.active_handler(), Some("outer"));
            assert_eq!(outer.call_depth(), 1);
        }
        assert_eq!(ctx.active_handler(), None);
        assert_eq!(ctx.call_depth(), 0);
        assert_eq!(ctx.total_handler_calls(), 2);
    }

    #[test]
    fn test_handler_scope_limit() {
        let mut ctx = context(EngineSettings::new().with_max_call_depth(1));
        let mut scope = ctx.enter_handler("only").unwrap();
        let err = scope.enter_handler("too-deep").unwrap_err();
        assert!(matches!(
            err,
            EngineError::TooManyRecursions {
                kind: RecursionKind::Call,
                ..
            }
        ));
    }

    #[test]
    fn test_dispatch_scope_restores() {
        let mut ctx = context(EngineSettings::default());
        {
            let mut include = ctx.enter_dispatch(DispatchingInfo::new(DispatchKind::Include).with_target("/a"));
            assert_eq!(include.dispatching_info().kind(), DispatchKind::Include);
            assert_eq!(include.dispatching_info().target(), Some("/a"));
            {
                let error = include.enter_dispatch(DispatchingInfo::new(DispatchKind::Error));
                assert_eq!(error.dispatching_info().kind(), DispatchKind::Error);
            }
            assert_eq!(include.dispatching_info().kind(), DispatchKind::Include);
        }
        assert_eq!(ctx.dispatching_info(), &DispatchingInfo::new(DispatchKind::Request));
    }

    #[test]
    fn test_response_content_type_from_extension() {
        let mut ctx = context(EngineSettings::default());
        assert_eq!(ctx.response_content_type(), None);

        ctx.set_root_frame(ContentFrame::new(
            Resource::new("/a", "t"),
            RequestPathInfo::new("/a").with_extension("json"),
            Arc::new(StaticHandler::new("a", "")),
        ));
        assert_eq!(ctx.response_content_type(), Some("application/json"));

        ctx.set_root_frame(ContentFrame::new(
            Resource::new("/a", "t"),
            RequestPathInfo::new("/a").with_extension("pdfx"),
            Arc::new(StaticHandler::new("a", "")),
        ));
        assert_eq!(ctx.response_content_type(), None);
    }

    #[test]
    fn test_failed_handler_keeps_innermost() {
        let mut ctx = context(EngineSettings::default());
        ctx.record_failed_handler("inner");
        ctx.record_failed_handler("outer");
        assert_eq!(ctx.failed_handler_name(), Some("inner"));
    }

    #[test]
    fn test_progress_tracker() {
        let mut ctx = context(EngineSettings::default());
        ctx.tracker_mut().log("Applying REQUEST filters");
        assert!(ctx.tracker().contains("Applying REQUEST filters"));
        assert_eq!(ctx.tracker().dump().len(), 1);
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let mut ctx = context(EngineSettings::default());
        assert!(ctx.get_extension::<Marker>().is_none());

        ctx.set_extension(Marker(1));
        ctx.get_extension_mut::<Marker>().unwrap().0 = 2;
        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(2)));
        assert!(ctx.get_extension::<Marker>().is_none());
    }
}
