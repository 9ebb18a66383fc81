//! The error filter chain.
//!
//! An [`ErrorChain`] renders one error into the response through the ERROR
//! filters and the [`ErrorHandler`]. Its first run is guarded:
//!
//! 1. If the request is already handling an error, it logs and returns
//!    without rendering. An error handler that fails therefore never triggers
//!    a second error render.
//! 2. If the response is committed, it logs and returns without resetting.
//! 3. Otherwise it switches the dispatching info to
//!    [`DispatchKind::Error`], resets the response and runs the filters.
//!    The previous dispatching info is restored on every exit path.
//!
//! A run stopped by the recursion check leaves the chain fresh, so every
//! later run is guarded again. Once the first run got past that check, later
//! runs of the same chain instance skip the guards and behave like a plain
//! [`FilterChain`](crate::FilterChain).

use crate::chain::{Next, Render};
use crate::context::{DispatchKind, DispatchingInfo, RequestContext};
use crate::error::{EngineError, EngineResult};
use crate::registry::FilterHandle;
use crate::response::Response;
use crate::services::ErrorHandler;
use crate::types::BoxFuture;
use http::StatusCode;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// What triggered error handling.
#[derive(Debug)]
pub enum ErrorState {
    /// An explicit status code with an optional message.
    Status {
        /// The status to send.
        status: StatusCode,
        /// Message passed to the error handler.
        message: Option<String>,
    },
    /// A failure raised while processing.
    Failure(EngineError),
}

impl ErrorState {
    /// Creates a status state.
    pub fn status(status: StatusCode, message: Option<&str>) -> Self {
        Self::Status {
            status,
            message: message.map(ToString::to_string),
        }
    }
}

impl fmt::Display for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status {
                status,
                message: Some(message),
            } => write!(f, "status {} ({})", status.as_u16(), message),
            Self::Status { status, .. } => write!(f, "status {}", status.as_u16()),
            Self::Failure(failure) => write!(f, "failure: {failure}"),
        }
    }
}

/// Lifecycle of an [`ErrorChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorChainPhase {
    /// Not run yet.
    Fresh,
    /// The guarded first run is in progress.
    Dispatching,
    /// The first run has finished, or stopped at the commit check.
    Done,
}

impl ErrorChainPhase {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Fresh => 0,
            Self::Dispatching => 1,
            Self::Done => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Fresh,
            1 => Self::Dispatching,
            _ => Self::Done,
        }
    }
}

struct ErrorRender<'h> {
    handler: &'h dyn ErrorHandler,
    state: ErrorState,
}

impl Render for ErrorRender<'_> {
    fn render<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        match &self.state {
            ErrorState::Status { status, message } => {
                self.handler
                    .handle_status(*status, message.as_deref(), ctx, response)
            }
            ErrorState::Failure(failure) => self.handler.handle_failure(failure, ctx, response),
        }
    }
}

/// Filter chain that renders one error.
pub struct ErrorChain<'h> {
    filters: Arc<[FilterHandle]>,
    render: ErrorRender<'h>,
    phase: AtomicU8,
}

impl<'h> ErrorChain<'h> {
    /// Creates a chain over the ERROR filter snapshot.
    pub fn new(filters: Arc<[FilterHandle]>, state: ErrorState, handler: &'h dyn ErrorHandler) -> Self {
        Self {
            filters,
            render: ErrorRender { handler, state },
            phase: AtomicU8::new(ErrorChainPhase::Fresh.as_u8()),
        }
    }

    /// Returns what triggered this chain.
    #[must_use]
    pub fn state(&self) -> &ErrorState {
        &self.render.state
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> ErrorChainPhase {
        ErrorChainPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: ErrorChainPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    /// Runs the chain.
    pub fn run<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            if self.phase() != ErrorChainPhase::Fresh {
                return Next::new(&self.filters, &self.render).run(ctx, response).await;
            }

            if ctx.is_handling_error() {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    "handleError: Recursive invocation. Not further handling {}",
                    self.render.state
                );
                return Ok(());
            }
            ctx.begin_error_handling();
            self.set_phase(ErrorChainPhase::Dispatching);

            if response.is_committed() {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    "handleError: Response already committed; cannot send error {}",
                    self.render.state
                );
                self.set_phase(ErrorChainPhase::Done);
                return Ok(());
            }

            let result = {
                let mut scope = ctx.enter_dispatch(DispatchingInfo::new(DispatchKind::Error));
                match response.reset() {
                    Ok(()) => {
                        scope.record_error_render();
                        Next::new(&self.filters, &self.render)
                            .run(&mut scope, response)
                            .await
                    }
                    Err(err) => Err(err),
                }
            };

            self.set_phase(ErrorChainPhase::Done);
            result
        })
    }
}

impl fmt::Debug for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChain")
            .field("filters", &self.filters.len())
            .field("state", &self.render.state)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{FilterChainType, FnFilter};
    use crate::fixtures::{self, ErrorCall, RecordingErrorHandler};
    use crate::response::BufferedResponse;
    use http::{HeaderMap, HeaderName, HeaderValue};
    use std::sync::Mutex;

    /// Uncommitted response that refuses to reset.
    struct UnresettableResponse(BufferedResponse);

    impl Response for UnresettableResponse {
        fn status(&self) -> StatusCode {
            self.0.status()
        }

        fn set_status(&mut self, status: StatusCode) {
            self.0.set_status(status);
        }

        fn headers(&self) -> &HeaderMap {
            self.0.headers()
        }

        fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
            self.0.set_header(name, value);
        }

        fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
            self.0.add_header(name, value);
        }

        fn character_encoding(&self) -> Option<&str> {
            self.0.character_encoding()
        }

        fn set_character_encoding(&mut self, encoding: &str) {
            self.0.set_character_encoding(encoding);
        }

        fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> EngineResult<()> {
            self.0.send_error(status, message)
        }

        fn write_str(&mut self, text: &str) -> EngineResult<()> {
            self.0.write_str(text)
        }

        fn write_bytes(&mut self, bytes: &[u8]) -> EngineResult<()> {
            self.0.write_bytes(bytes)
        }

        fn flush_buffer(&mut self) -> EngineResult<()> {
            self.0.flush_buffer()
        }

        fn is_committed(&self) -> bool {
            self.0.is_committed()
        }

        fn reset(&mut self) -> EngineResult<()> {
            Err(EngineError::illegal_state("reset refused"))
        }
    }

    fn no_filters() -> Arc<[FilterHandle]> {
        Arc::from(Vec::new())
    }

    #[tokio::test]
    async fn test_renders_status_and_restores_dispatch() {
        let handler = RecordingErrorHandler::default();
        let chain = ErrorChain::new(
            no_filters(),
            ErrorState::status(StatusCode::NOT_FOUND, Some("/x not found")),
            &handler,
        );
        let mut ctx = fixtures::context("/x");
        let mut response = BufferedResponse::new();
        response.write_str("partial").unwrap();

        chain.run(&mut ctx, &mut response).await.unwrap();

        assert_eq!(
            handler.calls(),
            vec![ErrorCall::Status {
                status: StatusCode::NOT_FOUND,
                message: Some("/x not found".to_string())
            }]
        );
        assert_eq!(handler.dispatch_kinds(), vec![DispatchKind::Error]);
        assert_eq!(ctx.dispatching_info().kind(), DispatchKind::Request);
        assert!(ctx.is_handling_error());
        assert_eq!(ctx.error_chain_runs(), 1);
        assert_eq!(chain.phase(), ErrorChainPhase::Done);
        assert!(!response.body_text().contains("partial"));
    }

    #[tokio::test]
    async fn test_recursion_guard_skips_render() {
        let handler = RecordingErrorHandler::default();
        let mut ctx = fixtures::context("/x");
        let mut response = BufferedResponse::new();

        let first = ErrorChain::new(no_filters(), ErrorState::status(StatusCode::NOT_FOUND, None), &handler);
        first.run(&mut ctx, &mut response).await.unwrap();

        let second = ErrorChain::new(
            no_filters(),
            ErrorState::Failure(EngineError::domain("again")),
            &handler,
        );
        second.run(&mut ctx, &mut response).await.unwrap();

        assert_eq!(handler.calls().len(), 1);
        assert_eq!(second.phase(), ErrorChainPhase::Fresh);
    }

    #[tokio::test]
    async fn test_recursion_guard_holds_on_repeated_runs() {
        let handler = RecordingErrorHandler::default();
        let mut ctx = fixtures::context("/x");
        let mut response = BufferedResponse::new();

        let first = ErrorChain::new(no_filters(), ErrorState::status(StatusCode::NOT_FOUND, None), &handler);
        first.run(&mut ctx, &mut response).await.unwrap();

        let second = ErrorChain::new(
            no_filters(),
            ErrorState::Failure(EngineError::domain("again")),
            &handler,
        );
        second.run(&mut ctx, &mut response).await.unwrap();
        second.run(&mut ctx, &mut response).await.unwrap();

        assert_eq!(handler.calls().len(), 1);
        assert_eq!(ctx.error_chain_runs(), 1);
        assert_eq!(second.phase(), ErrorChainPhase::Fresh);
    }

    #[tokio::test]
    async fn test_commit_guard_skips_reset_and_render() {
        let handler = RecordingErrorHandler::default();
        let chain = ErrorChain::new(
            no_filters(),
            ErrorState::Failure(EngineError::domain("late")),
            &handler,
        );
        let mut ctx = fixtures::context("/x");
        let mut response = BufferedResponse::new();
        response.write_str("already sent").unwrap();
        response.flush_buffer().unwrap();

        chain.run(&mut ctx, &mut response).await.unwrap();

        assert!(handler.calls().is_empty());
        assert_eq!(response.body_text(), "already sent");
        assert_eq!(ctx.error_chain_runs(), 0);
    }

    #[tokio::test]
    async fn test_failed_reset_is_not_counted() {
        let handler = RecordingErrorHandler::default();
        let chain = ErrorChain::new(
            no_filters(),
            ErrorState::status(StatusCode::NOT_FOUND, None),
            &handler,
        );
        let mut ctx = fixtures::context("/x");
        let mut response = UnresettableResponse(BufferedResponse::new());

        let err = chain.run(&mut ctx, &mut response).await.unwrap_err();

        assert!(matches!(err, EngineError::IllegalState(_)));
        assert!(handler.calls().is_empty());
        assert_eq!(ctx.error_chain_runs(), 0);
        assert_eq!(ctx.dispatching_info().kind(), DispatchKind::Request);
    }

    #[tokio::test]
    async fn test_dispatch_restored_when_handler_fails() {
        let handler = RecordingErrorHandler::failing();
        let chain = ErrorChain::new(
            no_filters(),
            ErrorState::Failure(EngineError::domain("boom")),
            &handler,
        );
        let mut ctx = fixtures::context("/x");
        let mut response = BufferedResponse::new();

        let err = chain.run(&mut ctx, &mut response).await.unwrap_err();

        assert!(matches!(err, EngineError::Other(_)));
        assert_eq!(ctx.dispatching_info().kind(), DispatchKind::Request);
    }

    #[tokio::test]
    async fn test_error_filters_see_error_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let filter = FnFilter::new("observer", move |ctx, response, next| {
            recorded.lock().unwrap().push(ctx.dispatching_info().kind());
            next.run(ctx, response)
        });
        let filters: Arc<[FilterHandle]> =
            Arc::from(vec![FilterHandle::new(Arc::new(filter), [FilterChainType::Error], 0)]);

        let handler = RecordingErrorHandler::default();
        let chain = ErrorChain::new(
            filters,
            ErrorState::status(StatusCode::FORBIDDEN, None),
            &handler,
        );
        let mut ctx = fixtures::context("/x");
        let mut response = BufferedResponse::new();
        chain.run(&mut ctx, &mut response).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![DispatchKind::Error]);
        assert_eq!(handler.calls().len(), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ErrorState::status(StatusCode::NOT_FOUND, Some("gone")).to_string(),
            "status 404 (gone)"
        );
        assert_eq!(
            ErrorState::Failure(EngineError::domain("boom")).to_string(),
            "failure: boom"
        );
    }
}
