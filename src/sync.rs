//! Double-checked initialization
//!
//! Singleton construction, scoped construction and open-generic
//! materialization all follow the same shape: look without a lock, take a
//! lock, look again, and only then build. They share this one helper so the
//! race windows stay identical.

/// Return the value `probe` finds, or build it under the guard returned by
/// `acquire`.
///
/// `probe` runs once before and once after acquiring the guard. `init`
/// receives the guard by value so it can upgrade it (and check a third
/// time) before publishing.
#[inline]
pub(crate) fn lock_then_init<V, G, E>(
    probe: impl Fn() -> Option<V>,
    acquire: impl FnOnce() -> G,
    init: impl FnOnce(G) -> Result<V, E>,
) -> Result<V, E> {
    if let Some(value) = probe() {
        return Ok(value);
    }

    let guard = acquire();
    if let Some(value) = probe() {
        return Ok(value);
    }

    init(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::OnceCell;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_fast_path_skips_lock_and_init() {
        let acquired = AtomicUsize::new(0);
        let result: Result<u32, ()> = lock_then_init(
            || Some(7),
            || acquired.fetch_add(1, Ordering::SeqCst),
            |_| unreachable!("value already present"),
        );
        assert_eq!(result, Ok(7));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_init_errors_propagate() {
        let result: Result<u32, &str> = lock_then_init(|| None, || (), |_| Err("nope"));
        assert_eq!(result, Err("nope"));
    }

    #[test]
    fn test_concurrent_callers_build_once() {
        let cell = Arc::new(OnceCell::<usize>::new());
        let lock = Arc::new(Mutex::new(()));
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cell = Arc::clone(&cell);
                let lock = Arc::clone(&lock);
                let builds = Arc::clone(&builds);
                thread::spawn(move || {
                    lock_then_init(
                        || cell.get().copied(),
                        || lock.lock(),
                        |_guard| {
                            builds.fetch_add(1, Ordering::SeqCst);
                            let _ = cell.set(i);
                            Ok::<_, ()>(i)
                        },
                    )
                    .unwrap()
                })
            })
            .collect();

        let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == results[0]));
    }
}
