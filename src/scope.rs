//! Scopes
//!
//! A scope bounds the lifetime of Scoped instances and of every disposable
//! Transient it resolved. Each scope owns an instance cache and a
//! [`DisposableContainer`], is bound to exactly one [`Activator`], and moves
//! from active to disposed exactly once.

use crate::container::ContainerInner;
use crate::{
    Activator, AnyArc, DiError, DisposableContainer, DisposeHandle, Result, ServiceIdentity,
    ServiceProvider,
};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Unique scope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Fired once when a scope finishes disposal.
pub(crate) type DisposedCallback = Box<dyn FnOnce(ScopeId) + Send>;

// =============================================================================
// Scope state
// =============================================================================

pub(crate) struct Scope {
    id: ScopeId,
    root: bool,
    instances: DashMap<ServiceIdentity, AnyArc, RandomState>,
    disposables: DisposableContainer,
    activator: OnceCell<Arc<dyn Activator>>,
    disposed: AtomicBool,
    /// Guards the disposal flag transition and holds the owner callback.
    on_disposed: Mutex<Option<DisposedCallback>>,
}

impl Scope {
    pub(crate) fn root() -> Self {
        Self::new(true, None)
    }

    pub(crate) fn child(on_disposed: DisposedCallback) -> Self {
        Self::new(false, Some(on_disposed))
    }

    fn new(root: bool, on_disposed: Option<DisposedCallback>) -> Self {
        Self {
            id: ScopeId::next(),
            root,
            instances: DashMap::with_hasher(RandomState::new()),
            disposables: DisposableContainer::new(),
            activator: OnceCell::new(),
            disposed: AtomicBool::new(false),
            on_disposed: Mutex::new(on_disposed),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    #[inline]
    pub(crate) fn is_root(&self) -> bool {
        self.root
    }

    /// Bind the activator used for this scope. One-shot.
    pub(crate) fn bind(&self, activator: Arc<dyn Activator>) -> Result<()> {
        self.activator
            .set(activator)
            .map_err(|_| DiError::ScopeAlreadyBound { scope: self.id })
    }

    #[inline]
    pub(crate) fn activator(&self) -> Option<Arc<dyn Activator>> {
        self.activator.get().cloned()
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DiError::Disposed {
                object: "ServiceScope",
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn cached(&self, identity: &ServiceIdentity) -> Option<AnyArc> {
        self.instances.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    #[inline]
    pub(crate) fn cache(&self, identity: ServiceIdentity, instance: AnyArc) {
        self.instances.insert(identity, instance);
    }

    /// Register a handle for release when this scope is disposed.
    ///
    /// A scope disposed since construction started no longer accepts
    /// handles. The instance is released here and the caller gets
    /// [`DiError::Disposed`].
    pub(crate) fn track(&self, handle: DisposeHandle) -> Result<()> {
        let Err(rejected) = self.disposables.try_add(handle) else {
            return Ok(());
        };

        if let Err(_failure) = rejected.release_now() {
            #[cfg(feature = "logging")]
            warn!(
                target: "scoped_di",
                scope_id = %self.id,
                failure = %_failure,
                "Releasing instance built for a disposed scope failed"
            );
        }
        Err(DiError::Disposed {
            object: "ServiceScope",
        })
    }

    #[inline]
    pub(crate) fn pending_disposables(&self) -> usize {
        self.disposables.len()
    }

    /// Flip active -> disposed. Only the caller that wins does release work.
    fn begin_dispose(&self) -> bool {
        let _state = self.on_disposed.lock();
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    fn finish_dispose(&self, result: Result<()>) -> Result<()> {
        self.instances.clear();

        let callback = self.on_disposed.lock().take();
        if let Some(callback) = callback {
            callback(self.id);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            scope_id = %self.id,
            root = self.root,
            ok = result.is_ok(),
            "Scope disposed"
        );

        result
    }

    pub(crate) fn dispose(&self) -> Result<()> {
        if !self.begin_dispose() {
            return Ok(());
        }
        let result = self.disposables.dispose();
        self.finish_dispose(result)
    }

    pub(crate) async fn dispose_async(&self) -> Result<()> {
        if !self.begin_dispose() {
            return Ok(());
        }
        let result = self.disposables.dispose_async().await;
        self.finish_dispose(result)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("cached", &self.instances.len())
            .field("disposables", &self.disposables)
            .finish()
    }
}

// =============================================================================
// Public handles
// =============================================================================

/// An owned, disposable scope.
///
/// Derefs to the scope's [`ServiceProvider`]. Dropping an undisposed scope
/// disposes it synchronously; errors are logged and discarded, so prefer an
/// explicit [`dispose`](Self::dispose) or [`dispose_async`](Self::dispose_async).
///
/// ```rust
/// use scoped_di::{Container, ServiceDescriptor};
/// use std::sync::Arc;
///
/// struct RequestContext {
///     request_id: String,
/// }
///
/// let container = Container::new();
/// container
///     .register(ServiceDescriptor::scoped(|_| {
///         Ok(Arc::new(RequestContext { request_id: "req-123".into() }))
///     }))
///     .unwrap();
///
/// let scope = container.create_scope().unwrap();
/// let ctx = scope.get::<RequestContext>().unwrap();
/// assert_eq!(ctx.request_id, "req-123");
/// scope.dispose().unwrap();
/// ```
pub struct ServiceScope {
    provider: ServiceProvider,
}

impl ServiceScope {
    pub(crate) fn new(provider: ServiceProvider) -> Self {
        Self { provider }
    }

    #[inline]
    pub fn id(&self) -> ScopeId {
        self.provider.scope().id()
    }

    /// The provider resolving against this scope.
    #[inline]
    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.provider.scope().is_disposed()
    }

    /// Release every disposable this scope owns, newest first. Idempotent.
    pub fn dispose(&self) -> Result<()> {
        self.provider.scope().dispose()
    }

    /// Like [`dispose`](Self::dispose), awaiting async disposables in turn.
    pub async fn dispose_async(&self) -> Result<()> {
        self.provider.scope().dispose_async().await
    }
}

impl std::ops::Deref for ServiceScope {
    type Target = ServiceProvider;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl Drop for ServiceScope {
    fn drop(&mut self) {
        if self.is_disposed() {
            return;
        }
        if let Err(_err) = self.dispose() {
            #[cfg(feature = "logging")]
            warn!(
                target: "scoped_di",
                scope_id = %self.id(),
                error = %_err,
                "Disposing dropped scope failed"
            );
        }
    }
}

impl std::fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceScope")
            .field("id", &self.id())
            .field("pending_disposables", &self.provider.scope().pending_disposables())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Mints scopes for a container. Resolvable as a built-in service.
#[derive(Clone)]
pub struct ScopeFactory {
    inner: Arc<ContainerInner>,
}

impl ScopeFactory {
    pub(crate) fn new(inner: Arc<ContainerInner>) -> Self {
        Self { inner }
    }

    /// Create a scope bound to the container's activator.
    pub fn create_scope(&self) -> Result<ServiceScope> {
        self.inner.create_scope(self.inner.default_activator())
    }

    /// Create a scope bound to a custom activator.
    pub fn create_scope_with(&self, activator: Arc<dyn Activator>) -> Result<ServiceScope> {
        self.inner.create_scope(activator)
    }
}

impl std::fmt::Debug for ScopeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeFactory").finish_non_exhaustive()
    }
}
