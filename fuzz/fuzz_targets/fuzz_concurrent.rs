#![no_main]

//! Fuzz target for concurrent resolution
//!
//! Threads race on singleton construction, scope churn and registration
//! while one of them may dispose the container.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_di::Container;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[derive(Debug)]
#[allow(dead_code)]
struct Shared {
    id: usize,
}

#[derive(Debug)]
struct PerScope;

#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    GetSingleton,
    ScopeRoundTrip,
    Register(u16),
    Contains,
    Dispose,
}

#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    // Number of threads (clamped to 1-8)
    thread_count: u8,
    ops_per_thread: Vec<ThreadOp>,
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let builds = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let counter = Arc::clone(&builds);
    container
        .add_singleton(move |_| {
            Ok(Shared {
                id: counter.fetch_add(1, Ordering::SeqCst),
            })
        })
        .unwrap();
    container.add_scoped(|_| Ok(PerScope)).unwrap();

    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops = scenario.ops_per_thread;

    let handles: Vec<_> = (0..thread_count)
        .map(|_| {
            let container = container.clone();
            let ops = ops.clone();
            thread::spawn(move || {
                for op in ops.into_iter().take(50) {
                    match op {
                        ThreadOp::GetSingleton => {
                            if let Err(e) = container.get::<Shared>() {
                                assert!(e.is_disposed());
                            }
                        }
                        ThreadOp::ScopeRoundTrip => match container.create_scope() {
                            Ok(scope) => {
                                let first = scope.get::<PerScope>();
                                let second = scope.get::<PerScope>();
                                if let (Ok(a), Ok(b)) = (first, second) {
                                    assert!(Arc::ptr_eq(&a, &b));
                                }
                                let _ = scope.dispose();
                            }
                            Err(e) => assert!(e.is_disposed()),
                        },
                        ThreadOp::Register(key) => {
                            let _ = container.try_register_keyed(
                                key as u64,
                                scoped_di::ServiceDescriptor::instance(Arc::new(key)),
                            );
                        }
                        ThreadOp::Contains => {
                            let _ = container.contains(&scoped_di::ServiceIdentity::of::<Shared>());
                        }
                        ThreadOp::Dispose => {
                            let _ = container.dispose();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    // At most one singleton instance ever existed.
    assert!(builds.load(Ordering::SeqCst) <= 1);
    let _ = container.dispose();
    assert_eq!(container.live_scopes(), 0);
});
