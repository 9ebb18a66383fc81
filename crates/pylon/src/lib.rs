//! # Pylon
//!
//! **Filter-chain request processing with hot-reloadable configuration**
//!
//! Pylon turns a request into a response by running ordered filter chains
//! around a resolved handler, with nested include and forward dispatch and a
//! single, guarded error-rendering path.
//!
//! This crate ties the pieces together:
//!
//! - [`engine`] - filter chains, content frames, dispatch, error chain
//! - [`config`] - layered TOML/JSON/env configuration and file watching
//! - [`telemetry`] - structured logging and Prometheus request metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pylon::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::builder()
//!         .config_file("pylon.toml")
//!         .env_prefix("PYLON")
//!         .handler_resolver(Arc::new(MyHandlers::new()))
//!         .build()?;
//!     engine.init_telemetry()?;
//!     let _reload = engine.watch_config()?;
//!
//!     let mut response = BufferedResponse::new();
//!     engine
//!         .processor()
//!         .process_request(request, &mut response, Some(&resources))
//!         .await?;
//!     Ok(())
//! }
//! ```
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

#![doc(html_root_url = "https://docs.rs/pylon/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod reload;
mod runtime;

// Re-export member crates
pub use pylon_config as config;
pub use pylon_engine as engine;
pub use pylon_telemetry as telemetry;

pub use runtime::{Engine, EngineBuilder};
pub use error::{PylonError, PylonResult};
pub use reload::{ConfigReloader, ReloadTask};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use pylon::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{ConfigReloader, Engine, EngineBuilder, PylonError, ReloadTask};

    pub use pylon_config::{ConfigLoader, PylonConfig};

    pub use pylon_engine::{
        BufferedResponse, DispatchOptions, EngineError, EngineResult, ErrorHandler, Filter,
        FilterChainType, FilterHandle, FilterManager, FnFilter, FnHandler, Handler,
        HandlerResolver, Next, Request, RequestContext, RequestPathInfo, RequestProcessor,
        Resource, ResourceResolver, Response,
    };
}
