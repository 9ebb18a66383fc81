//! Filter registration.
//!
//! The engine only reads filters through the [`FilterRegistry`] trait, one
//! immutable snapshot per chain build. [`FilterManager`] is the bundled
//! implementation: filters can be registered and unregistered at any time and
//! the per-type snapshots are rebuilt on every change, so a chain that is
//! already running never sees a partially updated list.

use crate::chain::{Filter, FilterChainType, Next};
use crate::context::RequestContext;
use crate::error::EngineResult;
use crate::response::Response;
use crate::types::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FilterId(u64);

impl FilterId {
    fn next() -> Self {
        Self(NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter-{}", self.0)
    }
}

/// Source of ordered filter snapshots.
pub trait FilterRegistry: Send + Sync {
    /// Returns the filters for `chain_type` in execution order.
    fn filters(&self, chain_type: FilterChainType) -> Arc<[FilterHandle]>;
}

struct HandleInner {
    id: FilterId,
    filter: Arc<dyn Filter>,
    chains: Vec<FilterChainType>,
    order: i32,
    calls: AtomicU64,
    nanos: AtomicU64,
}

/// A registered filter with its chain types, order rank and statistics.
///
/// Cloning is cheap and clones share statistics.
#[derive(Clone)]
pub struct FilterHandle {
    inner: Arc<HandleInner>,
}

impl FilterHandle {
    /// Creates a handle. Lower `order` values run first.
    pub fn new(
        filter: Arc<dyn Filter>,
        chains: impl IntoIterator<Item = FilterChainType>,
        order: i32,
    ) -> Self {
        let mut chains: Vec<_> = chains.into_iter().collect();
        chains.sort_unstable();
        chains.dedup();
        Self {
            inner: Arc::new(HandleInner {
                id: FilterId::next(),
                filter,
                chains,
                order,
                calls: AtomicU64::new(0),
                nanos: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the handle ID.
    #[must_use]
    pub fn id(&self) -> FilterId {
        self.inner.id
    }

    /// Returns the filter name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.filter.name()
    }

    /// Returns the order rank.
    #[must_use]
    pub fn order(&self) -> i32 {
        self.inner.order
    }

    /// Returns the chain types this filter applies to.
    #[must_use]
    pub fn chains(&self) -> &[FilterChainType] {
        &self.inner.chains
    }

    /// Returns `true` if the filter applies to `chain_type`.
    #[must_use]
    pub fn applies_to(&self, chain_type: FilterChainType) -> bool {
        self.inner.chains.contains(&chain_type)
    }

    /// Returns how often the filter was invoked.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }

    /// Returns the cumulative time spent in the filter, including the part
    /// of the chain it delegated to.
    #[must_use]
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.inner.nanos.load(Ordering::Relaxed))
    }

    /// Returns a serializable statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> FilterStats {
        FilterStats {
            id: self.id(),
            name: self.name().to_string(),
            order: self.order(),
            calls: self.calls(),
            total_time: self.total_time(),
        }
    }

    pub(crate) fn invoke<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        response: &'a mut dyn Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            self.inner.calls.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let result = self.inner.filter.do_filter(ctx, response, next).await;
            let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.inner.nanos.fetch_add(nanos, Ordering::Relaxed);
            result
        })
    }
}

impl fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterHandle")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("chains", &self.inner.chains)
            .field("order", &self.inner.order)
            .finish_non_exhaustive()
    }
}

/// Invocation statistics for one filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Handle ID.
    pub id: FilterId,
    /// Filter name.
    pub name: String,
    /// Order rank.
    pub order: i32,
    /// Number of invocations.
    pub calls: u64,
    /// Cumulative time, including the delegated remainder of the chain.
    pub total_time: Duration,
}

#[derive(Default)]
struct ManagerState {
    handles: Vec<FilterHandle>,
    snapshots: HashMap<FilterChainType, Arc<[FilterHandle]>>,
}

impl ManagerState {
    fn rebuild(&mut self) {
        // Stable sort keeps registration order for equal ranks.
        self.handles.sort_by_key(FilterHandle::order);
        self.snapshots = FilterChainType::ALL
            .into_iter()
            .map(|chain_type| {
                let filters: Arc<[FilterHandle]> = self
                    .handles
                    .iter()
                    .filter(|handle| handle.applies_to(chain_type))
                    .cloned()
                    .collect();
                (chain_type, filters)
            })
            .collect();
    }
}

/// Thread-safe [`FilterRegistry`] with runtime registration.
///
/// # Example
///
/// ```
/// use pylon_engine::{FilterChainType, FilterManager, FilterRegistry, FnFilter};
///
/// let manager = FilterManager::new();
/// let id = manager.register(
///     FnFilter::new("audit", |ctx, response, next| next.run(ctx, response)),
///     [FilterChainType::Request],
///     10,
/// );
///
/// assert_eq!(manager.filters(FilterChainType::Request).len(), 1);
/// assert!(manager.filters(FilterChainType::Error).is_empty());
///
/// assert!(manager.unregister(id));
/// assert!(manager.filters(FilterChainType::Request).is_empty());
/// ```
#[derive(Default)]
pub struct FilterManager {
    state: RwLock<ManagerState>,
}

impl FilterManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self::default();
        manager.state.write().rebuild();
        manager
    }

    /// Registers a filter for the given chain types.
    pub fn register<F: Filter>(
        &self,
        filter: F,
        chains: impl IntoIterator<Item = FilterChainType>,
        order: i32,
    ) -> FilterId {
        self.register_shared(Arc::new(filter), chains, order)
    }

    /// Registers an already shared filter.
    pub fn register_shared(
        &self,
        filter: Arc<dyn Filter>,
        chains: impl IntoIterator<Item = FilterChainType>,
        order: i32,
    ) -> FilterId {
        let handle = FilterHandle::new(filter, chains, order);
        let id = handle.id();
        tracing::debug!(
            filter = handle.name(),
            %id,
            order,
            chains = ?handle.chains(),
            "registering filter"
        );

        let mut state = self.state.write();
        state.handles.push(handle);
        state.rebuild();
        id
    }

    /// Removes a filter. Returns `false` if it was not registered.
    pub fn unregister(&self, id: FilterId) -> bool {
        let mut state = self.state.write();
        let before = state.handles.len();
        state.handles.retain(|handle| handle.id() != id);
        if state.handles.len() == before {
            return false;
        }
        tracing::debug!(%id, "unregistered filter");
        state.rebuild();
        true
    }

    /// Returns statistics for every registered filter.
    #[must_use]
    pub fn stats(&self) -> Vec<FilterStats> {
        self.state.read().handles.iter().map(FilterHandle::stats).collect()
    }

    /// Returns the number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().handles.len()
    }

    /// Returns `true` if no filters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FilterRegistry for FilterManager {
    fn filters(&self, chain_type: FilterChainType) -> Arc<[FilterHandle]> {
        self.state
            .read()
            .snapshots
            .get(&chain_type)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }
}

impl fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterManager")
            .field("filters", &self.state.read().handles)
            .finish()
    }
}
