//! Filter chains.
//!
//! A [`FilterChain`] runs an ordered snapshot of [`FilterHandle`]s and then a
//! terminal [`Render`] step. Each filter receives a [`Next`] cursor over the
//! rest of the chain and decides whether and when to call it, so it can do
//! work before and after the remainder or short-circuit it entirely.
//!
//! The runner catches nothing: any failure from a filter or the render step
//! is returned to the caller unchanged.
//!
//! # Example
//!
//! ```
//! use pylon_engine::{FnFilter, Filter};
//!
//! let filter = FnFilter::new("timing", |ctx, response, next| {
//!     Box::pin(async move {
//!         let started = std::time::Instant::now();
//!         let result = next.run(ctx, response).await;
//!         tracing::debug!(elapsed = ?started.elapsed(), "chain finished");
//!         result
//!     })
//! });
//! assert_eq!(filter.name(), "timing");
//! ```

use crate::context::RequestContext;
use crate::error::EngineResult;
use crate::registry::FilterHandle;
use crate::response::Response;
use crate::types::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Selects which filter set a chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterChainType {
    /// Runs once per top-level request.
    Request,
    /// Runs around every handler invocation of a top-level request.
    Component,
    /// Runs around included renders.
    Include,
    /// Runs around forwarded renders.
    Forward,
    /// Runs while rendering an error.
    Error,
}

impl FilterChainType {
    /// All chain types.
    pub const ALL: [Self; 5] = [
        Self::Request,
        Self::Component,
        Self::Include,
        Self::Forward,
        Self::Error,
    ];

    /// Returns the upper-case name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Component => "COMPONENT",
            Self::Include => "INCLUDE",
            Self::Forward => "FORWARD",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for FilterChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An interceptor in a filter chain.
///
/// Implementations call `next.run(ctx, response)` to continue the chain, or
/// return without calling it to short-circuit. `next` is consumed by `run`,
/// so the remainder of the chain runs at most once per filter invocation.
pub trait Filter: Send + Sync + 'static {
    /// Returns the filter name for logs and statistics.
    fn name(&self) -> &str;

    /// Processes the request.
    fn do_filter<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, EngineResult<()>>;
}

/// The terminal step of a filter chain.
pub trait Render: Send + Sync {
    /// Produces the response once every filter has delegated.
    fn render<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>>;
}

/// Cursor over the rest of a filter chain.
pub struct Next<'a> {
    filters: &'a [FilterHandle],
    render: &'a dyn Render,
}

impl<'a> Next<'a> {
    pub(crate) fn new(filters: &'a [FilterHandle], render: &'a dyn Render) -> Self {
        Self { filters, render }
    }

    /// Returns how many filters remain before the render step.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }

    /// Runs the next filter, or the render step if no filters remain.
    pub fn run<'r>(
        self,
        ctx: &'r mut RequestContext,
        response: &'r mut dyn Response,
    ) -> BoxFuture<'r, EngineResult<()>>
    where
        'a: 'r,
    {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let next = Next::new(rest, self.render);
                filter.invoke(ctx, response, next)
            }
            None => self.render.render(ctx, response),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// An ordered filter snapshot plus its terminal render step.
pub struct FilterChain<R> {
    chain_type: FilterChainType,
    filters: Arc<[FilterHandle]>,
    render: R,
}

impl<R: Render> FilterChain<R> {
    /// Creates a chain over a filter snapshot.
    pub fn new(chain_type: FilterChainType, filters: Arc<[FilterHandle]>, render: R) -> Self {
        Self {
            chain_type,
            filters,
            render,
        }
    }

    /// Returns the chain type.
    #[must_use]
    pub const fn chain_type(&self) -> FilterChainType {
        self.chain_type
    }

    /// Returns the filters in execution order.
    #[must_use]
    pub fn filters(&self) -> &[FilterHandle] {
        &self.filters
    }

    /// Runs every filter in order and then the render step.
    pub fn run<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        tracing::trace!(
            chain = %self.chain_type,
            filters = self.filters.len(),
            "running filter chain"
        );
        Next::new(&self.filters, &self.render).run(ctx, response)
    }
}

impl<R> fmt::Debug for FilterChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("chain_type", &self.chain_type)
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// A filter built from a closure.
pub struct FnFilter<F> {
    name: String,
    func: F,
}

impl<F> FnFilter<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut dyn Response, Next<'a>) -> BoxFuture<'a, EngineResult<()>>
        + Send
        + Sync
        + 'static,
{
    /// Creates a named closure filter.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Filter for FnFilter<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut dyn Response, Next<'a>) -> BoxFuture<'a, EngineResult<()>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn do_filter<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, EngineResult<()>> {
        (self.func)(ctx, response, next)
    }
}

/// A render step built from a closure.
pub struct RenderFn<F> {
    func: F,
}

impl<F> RenderFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut dyn Response) -> BoxFuture<'a, EngineResult<()>>
        + Send
        + Sync,
{
    /// Wraps a closure as a render step.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Render for RenderFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut dyn Response) -> BoxFuture<'a, EngineResult<()>>
        + Send
        + Sync,
{
    fn render<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
    ) -> BoxFuture<'a, EngineResult<()>> {
        (self.func)(ctx, response)
    }
}
