#![no_main]

//! Fuzz target for scope lifecycles
//!
//! Drives registration, scope creation, resolution and disposal in arbitrary
//! order and checks lifetime sharing plus release bookkeeping.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_di::{Container, Dispose, DisposeResult, ServiceDescriptor, ServiceScope};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct Counted {
    released: Arc<AtomicUsize>,
}

impl Dispose for Counted {
    fn dispose(&self) -> DisposeResult {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScopedCounted(Counted);

impl Dispose for ScopedCounted {
    fn dispose(&self) -> DisposeResult {
        self.0.dispose()
    }
}

struct TransientCounted(Counted);

impl Dispose for TransientCounted {
    fn dispose(&self) -> DisposeResult {
        self.0.dispose()
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum ScopedOp {
    CreateScope,
    DisposeScope(u8),
    ResolveSingleton(Option<u8>),
    ResolveScoped(Option<u8>),
    ResolveTransient(Option<u8>),
    ResolveKeyed(u8),
    RegisterKeyed(u8),
    DisposeContainer,
}

fuzz_target!(|ops: Vec<ScopedOp>| {
    let built = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let container = Container::new();

    let (b, r) = (Arc::clone(&built), Arc::clone(&released));
    container
        .register(
            ServiceDescriptor::singleton(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Counted { released: Arc::clone(&r) }))
            })
            .disposable(),
        )
        .unwrap();
    let (b, r) = (Arc::clone(&built), Arc::clone(&released));
    container
        .register(
            ServiceDescriptor::scoped(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(ScopedCounted(Counted { released: Arc::clone(&r) })))
            })
            .disposable(),
        )
        .unwrap();
    let (b, r) = (Arc::clone(&built), Arc::clone(&released));
    container
        .register(
            ServiceDescriptor::transient(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(TransientCounted(Counted { released: Arc::clone(&r) })))
            })
            .disposable(),
        )
        .unwrap();

    let mut scopes: Vec<ServiceScope> = Vec::new();
    let mut singleton: Option<Arc<Counted>> = None;
    let mut container_disposed = false;

    for op in ops.into_iter().take(100) {
        let pick = |idx: Option<u8>, scopes: &Vec<ServiceScope>| {
            idx.filter(|_| !scopes.is_empty())
                .map(|i| i as usize % scopes.len())
        };

        match op {
            ScopedOp::CreateScope => match container.create_scope() {
                Ok(scope) => scopes.push(scope),
                Err(e) => assert!(container_disposed && e.is_disposed()),
            },
            ScopedOp::DisposeScope(idx) => {
                if let Some(i) = pick(Some(idx), &scopes) {
                    let _ = scopes[i].dispose();
                    assert!(scopes[i].is_disposed());
                }
            }
            ScopedOp::ResolveSingleton(idx) => {
                let result = match pick(idx, &scopes) {
                    Some(i) => scopes[i].get::<Counted>(),
                    None => container.get::<Counted>(),
                };
                match result {
                    Ok(instance) => {
                        if let Some(first) = &singleton {
                            assert!(Arc::ptr_eq(first, &instance));
                        }
                        singleton = Some(instance);
                    }
                    Err(e) => assert!(e.is_disposed()),
                }
            }
            ScopedOp::ResolveScoped(idx) => {
                if let Some(i) = pick(idx, &scopes) {
                    match (scopes[i].get::<ScopedCounted>(), scopes[i].get::<ScopedCounted>()) {
                        (Ok(a), Ok(b)) => assert!(Arc::ptr_eq(&a, &b)),
                        (Err(e), _) | (_, Err(e)) => assert!(e.is_disposed()),
                    }
                }
            }
            ScopedOp::ResolveTransient(idx) => {
                let result = match pick(idx, &scopes) {
                    Some(i) => scopes[i]
                        .get::<TransientCounted>()
                        .and_then(|a| scopes[i].get::<TransientCounted>().map(|b| (a, b))),
                    None => container
                        .get::<TransientCounted>()
                        .and_then(|a| container.get::<TransientCounted>().map(|b| (a, b))),
                };
                match result {
                    Ok((a, b)) => assert!(!Arc::ptr_eq(&a, &b)),
                    Err(e) => assert!(e.is_disposed()),
                }
            }
            ScopedOp::ResolveKeyed(key) => match container.try_get_keyed::<u8>(key as u64) {
                Ok(Some(found)) => assert_eq!(*found, key),
                Ok(None) => assert!(container.try_get::<u8>().unwrap().is_none()),
                Err(e) => assert!(e.is_disposed()),
            },
            ScopedOp::RegisterKeyed(key) => {
                let result = container.try_register_keyed(
                    key as u64,
                    ServiceDescriptor::instance(Arc::new(key)),
                );
                if let Err(e) = result {
                    assert!(container_disposed && e.is_disposed());
                }
            }
            ScopedOp::DisposeContainer => {
                let _ = container.dispose();
                container_disposed = true;
                assert!(container.get::<Counted>().unwrap_err().is_disposed());
            }
        }
    }

    for scope in &scopes {
        let _ = scope.dispose();
    }
    let _ = container.dispose();

    // Everything built was tracked by some owner and released exactly once.
    assert_eq!(built.load(Ordering::SeqCst), released.load(Ordering::SeqCst));
});
