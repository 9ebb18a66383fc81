//! # Pylon Engine
//!
//! Filter-chain request processing for the Pylon server.
//!
//! This crate turns one inbound request into a response by running it
//! through ordered filter chains, rendering the resolved handler, and
//! converting every failure into exactly one error render.
//!
//! ## Request Flow
//!
//! ```text
//! Request → REQUEST filters → COMPONENT filters → Handler
//!                                                    │ include / forward
//!                                                    ↓
//!                                  INCLUDE / FORWARD filters → Handler ...
//!
//! any failure → ERROR filters → ErrorHandler
//! ```
//!
//! ## Chain Types
//!
//! | Chain | Runs |
//! |-------|------|
//! | `REQUEST` | once per top-level request |
//! | `COMPONENT` | around the top-level handler |
//! | `INCLUDE` | around each included handler |
//! | `FORWARD` | around each forwarded handler |
//! | `ERROR` | around error rendering |
//!
//! ## Guarantees
//!
//! - Filters run in registry order; each chain works on one snapshot.
//! - Content frames and dispatching info are restored by scope guards on
//!   every exit path.
//! - Include depth and handler call depth are bounded by [`EngineSettings`].
//! - An error chain never renders twice for one request and never touches a
//!   committed response.
//! - Only transport failures leave [`RequestProcessor::process_request`].
//!
//! ## Example
//!
//! ```
//! use pylon_engine::fixtures::{self, MapHandlerResolver, StaticHandler, StaticResourceResolver};
//! use pylon_engine::{BufferedResponse, RequestProcessor, Response};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let processor = RequestProcessor::builder()
//!     .handler_resolver(Arc::new(MapHandlerResolver::new()))
//!     .build();
//! let resources = StaticResourceResolver::new();
//!
//! let mut response = BufferedResponse::new();
//! processor
//!     .process_request(fixtures::request("/missing"), &mut response, Some(&resources))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(response.status(), 404);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/pylon-engine/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod context;
pub mod error;
pub mod error_chain;
pub mod fixtures;
pub mod processor;
pub mod registry;
pub mod response;
pub mod services;
pub mod settings;
pub mod types;

// Re-export main types at crate root
pub use chain::{Filter, FilterChain, FilterChainType, FnFilter, Next, Render, RenderFn};
pub use context::{
    ContentFrame, DispatchKind, DispatchScope, DispatchingInfo, FrameGuard, HandlerScope,
    ProgressEntry, ProgressTracker, RequestContext,
};
pub use error::{EngineError, EngineResult, RecursionKind};
pub use error_chain::{ErrorChain, ErrorChainPhase, ErrorState};
pub use processor::{DispatchOptions, RequestProcessor, RequestProcessorBuilder};
pub use registry::{FilterHandle, FilterId, FilterManager, FilterRegistry, FilterStats};
pub use response::{
    BufferedResponse, ErrorResponse, IncludeResponse, OutputChannel, Response,
    DEFAULT_BUFFER_SIZE, DEFAULT_ERROR_ENCODING,
};
pub use services::{
    DefaultErrorHandler, ErrorHandler, FnHandler, Handler, HandlerResolver, RequestSummary,
    ResourceResolver, TelemetrySink,
};
pub use settings::{
    EngineSettings, HeaderEntryError, SettingsHandle, StaticResponseHeader,
    DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_INCLUDE_DEPTH,
};
pub use types::{BoxFuture, HttpResponse, Request, RequestId, RequestPathInfo, Resource};
