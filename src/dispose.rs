//! Disposal of container-owned instances
//!
//! Instances whose descriptor carries a disposal probe are turned into a
//! [`DisposeHandle`] right after construction and pushed into the owning
//! scope's [`DisposableContainer`]. Handles are released in reverse
//! registration order, exactly once.

use crate::{BoxError, DiError, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Outcome of releasing a single instance.
pub type DisposeResult = std::result::Result<(), BoxError>;

/// Boxed future produced by asynchronous disposal.
pub type DisposeFuture = Pin<Box<dyn Future<Output = DisposeResult> + Send>>;

/// Synchronous release of resources held by a service.
///
/// ```rust
/// use scoped_di::{Dispose, DisposeResult};
///
/// struct Connection;
///
/// impl Dispose for Connection {
///     fn dispose(&self) -> DisposeResult {
///         // close sockets, flush buffers...
///         Ok(())
///     }
/// }
/// ```
pub trait Dispose: Send + Sync {
    fn dispose(&self) -> DisposeResult;
}

/// Asynchronous release of resources held by a service.
#[async_trait::async_trait]
pub trait AsyncDispose: Send + Sync {
    async fn dispose_async(&self) -> DisposeResult;
}

pub(crate) type SyncRelease = Box<dyn FnOnce() -> DisposeResult + Send>;
pub(crate) type AsyncRelease = Box<dyn FnOnce() -> DisposeFuture + Send>;

enum Release {
    Sync(SyncRelease),
    Async(AsyncRelease),
    Both(SyncRelease, AsyncRelease),
}

/// A registered "thing needing release".
pub struct DisposeHandle {
    type_name: &'static str,
    release: Release,
}

impl DisposeHandle {
    /// Handle for a synchronously disposable instance.
    pub fn new<T>(instance: Arc<T>) -> Self
    where
        T: Dispose + ?Sized + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            release: Release::Sync(sync_release(instance)),
        }
    }

    /// Handle for an instance that only supports asynchronous disposal.
    pub fn new_async<T>(instance: Arc<T>) -> Self
    where
        T: AsyncDispose + ?Sized + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            release: Release::Async(async_release(instance)),
        }
    }

    /// Handle for an instance supporting both disposal styles.
    ///
    /// Synchronous disposal calls [`Dispose::dispose`], asynchronous disposal
    /// calls [`AsyncDispose::dispose_async`]; never both.
    pub fn dual<T>(instance: Arc<T>) -> Self
    where
        T: Dispose + AsyncDispose + ?Sized + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            release: Release::Both(sync_release(Arc::clone(&instance)), async_release(instance)),
        }
    }

    pub(crate) fn from_parts(
        type_name: &'static str,
        sync: Option<SyncRelease>,
        asynchronous: Option<AsyncRelease>,
    ) -> Option<Self> {
        let release = match (sync, asynchronous) {
            (Some(s), Some(a)) => Release::Both(s, a),
            (Some(s), None) => Release::Sync(s),
            (None, Some(a)) => Release::Async(a),
            (None, None) => return None,
        };
        Some(Self { type_name, release })
    }

    /// Name of the type this handle releases.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn release_sync(self) -> std::result::Result<(), String> {
        match self.release {
            Release::Sync(f) | Release::Both(f, _) => run_sync(self.type_name, f),
            Release::Async(_) => Err(DiError::AsyncDisposalRequired {
                type_name: self.type_name,
            }
            .to_string()),
        }
    }

    async fn release_async(self) -> std::result::Result<(), String> {
        let type_name = self.type_name;
        match self.release {
            Release::Async(f) | Release::Both(_, f) => {
                match AssertUnwindSafe(async move { f().await }).catch_unwind().await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(format!("{type_name}: {err}")),
                    Err(panic) => Err(format!("{type_name}: panicked: {}", panic_message(&*panic))),
                }
            }
            Release::Sync(f) => run_sync(type_name, f),
        }
    }

    /// Release outside any scope's disposal pass. Async-only handles are
    /// driven to completion on the current thread.
    pub(crate) fn release_now(self) -> std::result::Result<(), String> {
        if matches!(self.release, Release::Async(_)) {
            futures::executor::block_on(self.release_async())
        } else {
            self.release_sync()
        }
    }
}

fn run_sync(type_name: &'static str, release: SyncRelease) -> std::result::Result<(), String> {
    match catch_unwind(AssertUnwindSafe(release)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{type_name}: {err}")),
        Err(panic) => Err(format!("{type_name}: panicked: {}", panic_message(&*panic))),
    }
}

impl std::fmt::Debug for DisposeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.release {
            Release::Sync(_) => "sync",
            Release::Async(_) => "async",
            Release::Both(..) => "sync+async",
        };
        f.debug_struct("DisposeHandle")
            .field("type_name", &self.type_name)
            .field("kind", &kind)
            .finish()
    }
}

pub(crate) fn sync_release<T>(instance: Arc<T>) -> SyncRelease
where
    T: Dispose + ?Sized + 'static,
{
    Box::new(move || instance.dispose())
}

pub(crate) fn async_release<T>(instance: Arc<T>) -> AsyncRelease
where
    T: AsyncDispose + ?Sized + 'static,
{
    Box::new(move || Box::pin(async move { instance.dispose_async().await }))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Disposable Container
// =============================================================================

/// Thread-safe bag of handles released in LIFO order.
///
/// Disposal is idempotent: the first call takes every handle, later calls
/// return `Ok(())` without doing anything. Adding a handle after disposal
/// fails with [`DiError::Disposed`].
#[derive(Default)]
pub struct DisposableContainer {
    entries: Mutex<Vec<DisposeHandle>>,
    disposed: AtomicBool,
}

impl DisposableContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle for release when this container is disposed.
    pub fn add(&self, handle: DisposeHandle) -> Result<()> {
        self.try_add(handle).map_err(|_| DiError::Disposed {
            object: "DisposableContainer",
        })
    }

    /// Like [`add`](Self::add), handing the handle back when the container
    /// is already disposed.
    pub(crate) fn try_add(&self, handle: DisposeHandle) -> std::result::Result<(), DisposeHandle> {
        let mut entries = self.entries.lock();
        if self.disposed.load(Ordering::Acquire) {
            return Err(handle);
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "scoped_di",
            service = handle.type_name,
            position = entries.len(),
            "Tracking disposable instance"
        );

        entries.push(handle);
        Ok(())
    }

    /// Number of handles waiting for release.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Take every handle exactly once; `None` if already disposed.
    fn drain(&self) -> Option<Vec<DisposeHandle>> {
        let mut entries = self.entries.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut *entries))
    }

    /// Release every handle synchronously, newest first.
    pub fn dispose(&self) -> Result<()> {
        let Some(entries) = self.drain() else {
            return Ok(());
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            disposables = entries.len(),
            "Releasing disposables"
        );

        let failures: Vec<String> = entries
            .into_iter()
            .rev()
            .filter_map(|handle| handle.release_sync().err())
            .collect();
        finish(failures)
    }

    /// Release every handle, awaiting async handles one after another,
    /// newest first.
    pub async fn dispose_async(&self) -> Result<()> {
        let Some(entries) = self.drain() else {
            return Ok(());
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_di",
            disposables = entries.len(),
            "Releasing disposables asynchronously"
        );

        let mut failures = Vec::new();
        for handle in entries.into_iter().rev() {
            if let Err(failure) = handle.release_async().await {
                failures.push(failure);
            }
        }
        finish(failures)
    }
}

fn finish(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }

    #[cfg(feature = "logging")]
    tracing::warn!(
        target: "scoped_di",
        failures = failures.len(),
        "Some disposables failed to release"
    );

    Err(DiError::DisposalFailed { failures })
}

impl std::fmt::Debug for DisposableContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposableContainer")
            .field("pending", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail: false,
            })
        }
    }

    impl Dispose for Recorder {
        fn dispose(&self) -> DisposeResult {
            self.log.lock().unwrap().push(format!("sync:{}", self.name));
            if self.fail {
                return Err("refused".into());
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl AsyncDispose for Recorder {
        async fn dispose_async(&self) -> DisposeResult {
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(format!("async:{}", self.name));
            Ok(())
        }
    }

    struct Panicker;

    impl Dispose for Panicker {
        fn dispose(&self) -> DisposeResult {
            panic!("dispose exploded");
        }
    }

    #[async_trait::async_trait]
    impl AsyncDispose for Panicker {
        async fn dispose_async(&self) -> DisposeResult {
            tokio::task::yield_now().await;
            panic!("async dispose exploded");
        }
    }

    #[test]
    fn test_releases_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        for name in ["A", "B", "C"] {
            bag.add(DisposeHandle::new(Recorder::new(name, &log))).unwrap();
        }

        bag.dispose().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["sync:C", "sync:B", "sync:A"]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        bag.add(DisposeHandle::new(Recorder::new("A", &log))).unwrap();

        bag.dispose().unwrap();
        bag.dispose().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(bag.is_disposed());
        assert!(bag.is_empty());
    }

    #[test]
    fn test_add_after_dispose_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        bag.dispose().unwrap();

        let err = bag.add(DisposeHandle::new(Recorder::new("late", &log))).unwrap_err();
        assert!(err.is_disposed());
    }

    #[test]
    fn test_failures_do_not_abandon_remaining_handles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        bag.add(DisposeHandle::new(Recorder::new("A", &log))).unwrap();
        bag.add(DisposeHandle::new(Arc::new(Recorder {
            name: "B",
            log: Arc::clone(&log),
            fail: true,
        })))
        .unwrap();
        bag.add(DisposeHandle::new(Arc::new(Panicker))).unwrap();
        bag.add(DisposeHandle::new(Recorder::new("D", &log))).unwrap();

        let err = bag.dispose().unwrap_err();
        match err {
            DiError::DisposalFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].contains("dispose exploded"));
                assert!(failures[1].contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["sync:D", "sync:B", "sync:A"]);
    }

    #[test]
    fn test_sync_dispose_reports_async_only_handles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        bag.add(DisposeHandle::new(Recorder::new("A", &log))).unwrap();
        bag.add(DisposeHandle::new_async(Recorder::new("B", &log))).unwrap();

        let err = bag.dispose().unwrap_err();
        assert!(matches!(err, DiError::DisposalFailed { ref failures } if failures.len() == 1));
        assert_eq!(*log.lock().unwrap(), vec!["sync:A"]);
    }

    #[tokio::test]
    async fn test_async_dispose_prefers_async_release() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        bag.add(DisposeHandle::new(Recorder::new("A", &log))).unwrap();
        bag.add(DisposeHandle::dual(Recorder::new("B", &log))).unwrap();
        bag.add(DisposeHandle::new_async(Recorder::new("C", &log))).unwrap();

        bag.dispose_async().await.unwrap();
        bag.dispose_async().await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["async:C", "async:B", "sync:A"]
        );
    }

    #[tokio::test]
    async fn test_async_panic_does_not_abandon_older_handles() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposableContainer::new();
        bag.add(DisposeHandle::new(Recorder::new("A", &log))).unwrap();
        bag.add(DisposeHandle::new_async(Arc::new(Panicker))).unwrap();

        match bag.dispose_async().await.unwrap_err() {
            DiError::DisposalFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("panicked: async dispose exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["sync:A"]);
    }

    struct Socket {
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl AsyncDispose for Socket {
        async fn dispose_async(&self) -> DisposeResult {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_rejected_handle_is_returned_and_released_now() {
        let bag = DisposableContainer::new();
        bag.dispose().unwrap();

        let socket = Arc::new(Socket {
            closed: AtomicBool::new(false),
        });
        let handle = bag.try_add(DisposeHandle::new_async(Arc::clone(&socket))).unwrap_err();
        assert_eq!(handle.type_name(), std::any::type_name::<Socket>());
        handle.release_now().unwrap();
        assert!(socket.closed.load(Ordering::SeqCst));
    }
}
