//! # scoped-di - Scoped Dependency Injection for Rust
//!
//! A dependency injection container with lifetime management: singletons
//! shared container-wide, scoped services built once per scope, transients
//! built on every resolution, and deterministic disposal of everything the
//! container created.
//!
//! ## Features
//!
//! - **Lock-free lookups** - Registry and scope caches use `DashMap`
//! - **At-most-once construction** - Singleton and scoped services are built under a
//!   double-checked lock, even under contention
//! - **Keyed services** - Any `Eq + Hash` value can disambiguate registrations
//! - **Open generics** - Closed instantiations materialize on first resolution
//! - **Disposal** - Sync and async release in reverse construction order
//! - **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use scoped_di::{Container, Dispose, DisposeResult, ServiceDescriptor, ServiceProvider};
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str);
//! }
//!
//! struct ConsoleLogger;
//!
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) {
//!         println!("{msg}");
//!     }
//! }
//!
//! struct Handler {
//!     logger: Arc<dyn Logger>,
//! }
//!
//! impl Dispose for Handler {
//!     fn dispose(&self) -> DisposeResult {
//!         self.logger.log("handler released");
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::new();
//! container
//!     .register(ServiceDescriptor::singleton(|_| {
//!         Ok(Arc::new(ConsoleLogger) as Arc<dyn Logger>)
//!     }))
//!     .unwrap();
//! container
//!     .register(
//!         ServiceDescriptor::scoped(|p: &ServiceProvider| {
//!             Ok(Arc::new(Handler { logger: p.get::<dyn Logger>()? }))
//!         })
//!         .disposable(),
//!     )
//!     .unwrap();
//!
//! let scope = container.create_scope().unwrap();
//! let handler = scope.get::<Handler>().unwrap();
//! handler.logger.log("handling request");
//! scope.dispose().unwrap();
//! container.dispose().unwrap();
//! ```
//!
//! ## Service Lifetimes
//!
//! - [`Lifetime::Singleton`] - one instance per container, built against the
//!   root scope and released when the container is disposed
//! - [`Lifetime::Scoped`] - one instance per scope, released with that scope
//! - [`Lifetime::Transient`] - a new instance per resolution, released by the
//!   scope that requested it
//!
//! ## Disposal
//!
//! Declare disposal on the descriptor with
//! [`DescriptorBuilder::disposable`] or [`DescriptorBuilder::async_disposable`].
//! Disposing a scope or container releases its instances newest first;
//! failures are collected into [`DiError::DisposalFailed`] after every
//! instance has been attempted.

mod container;
mod descriptor;
mod dispose;
mod engine;
mod error;
mod factory;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod options;
mod provider;
mod scope;
mod storage;
mod sync;
pub mod verified;

pub use container::{Container, ServiceProvider};
pub use descriptor::{DescriptorBuilder, FactoryFn, ServiceDescriptor, ServiceRequest};
pub use dispose::{AsyncDispose, DisposableContainer, Dispose, DisposeFuture, DisposeHandle, DisposeResult};
pub use error::*;
pub use factory::{Activator, ServiceActivator};
pub use key::{Generic, ServiceIdentity, ServiceKey, ServiceType};
pub use options::{ContainerOptions, DuplicatePolicy};
pub use provider::*;
pub use scope::{ScopeFactory, ScopeId, ServiceScope};
pub use verified::{Closed, Resolvable, Service};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Container, DiError, Dispose, Injectable, Lifetime, Result, Service, ServiceDescriptor,
        ServiceIdentity, ServiceProvider, ServiceScope,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Logger: Send + Sync {
        fn id(&self) -> usize;
    }

    struct ConsoleLogger {
        id: usize,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Logger for ConsoleLogger {
        fn id(&self) -> usize {
            self.id
        }
    }

    impl Dispose for ConsoleLogger {
        fn dispose(&self) -> DisposeResult {
            self.log.lock().unwrap().push("logger".into());
            Ok(())
        }
    }

    trait RequestHandler: Send + Sync {
        fn logger(&self) -> Arc<dyn Logger>;
    }

    struct Handler {
        logger: Arc<dyn Logger>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RequestHandler for Handler {
        fn logger(&self) -> Arc<dyn Logger> {
            Arc::clone(&self.logger)
        }
    }

    impl Dispose for Handler {
        fn dispose(&self) -> DisposeResult {
            self.log.lock().unwrap().push("handler".into());
            Ok(())
        }
    }

    fn logger_and_handler(log: &Arc<Mutex<Vec<String>>>) -> Container {
        let container = Container::new();
        let ids = Arc::new(AtomicUsize::new(0));

        let logger_log = Arc::clone(log);
        container
            .register(ServiceDescriptor::singleton(move |_| {
                let logger = Arc::new(ConsoleLogger {
                    id: ids.fetch_add(1, Ordering::SeqCst),
                    log: Arc::clone(&logger_log),
                });
                Ok(logger)
            })
            .disposable())
            .unwrap();
        container
            .register(ServiceDescriptor::singleton(|p: &ServiceProvider| {
                Ok(p.get::<ConsoleLogger>()? as Arc<dyn Logger>)
            }))
            .unwrap();

        let handler_log = Arc::clone(log);
        container
            .register(
                ServiceDescriptor::scoped(move |p: &ServiceProvider| {
                    let handler = Arc::new(Handler {
                        logger: p.get::<dyn Logger>()?,
                        log: Arc::clone(&handler_log),
                    });
                    Ok(handler)
                })
                .disposable(),
            )
            .unwrap();
        container
            .register(ServiceDescriptor::scoped(|p: &ServiceProvider| {
                Ok(p.get::<Handler>()? as Arc<dyn RequestHandler>)
            }))
            .unwrap();
        container
    }

    #[test]
    fn test_scoped_handlers_share_singleton_logger() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let container = logger_and_handler(&log);

        let scope1 = container.create_scope().unwrap();
        let scope2 = container.create_scope().unwrap();
        let h1 = scope1.get::<dyn RequestHandler>().unwrap();
        let h2 = scope2.get::<dyn RequestHandler>().unwrap();

        assert!(!Arc::ptr_eq(&h1, &h2));
        assert!(Arc::ptr_eq(&h1.logger(), &h2.logger()));
        assert_eq!(h1.logger().id(), 0);

        scope1.dispose().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);

        container.dispose().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler", "logger"]);

        scope2.dispose().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler", "logger", "handler"]);
    }

    #[test]
    fn test_dispose_releases_in_reverse_construction_order() {
        let log = Arc::new(Mutex::new(Vec::new()));

        struct Named(&'static str, Arc<Mutex<Vec<String>>>);

        impl Dispose for Named {
            fn dispose(&self) -> DisposeResult {
                self.1.lock().unwrap().push(self.0.into());
                Ok(())
            }
        }

        let container = Container::new();
        for name in ["A", "B", "C"] {
            let log = Arc::clone(&log);
            container
                .register_keyed(
                    name,
                    ServiceDescriptor::singleton(move |_| Ok(Arc::new(Named(name, Arc::clone(&log)))))
                        .disposable(),
                )
                .unwrap();
        }
        for name in ["A", "B", "C"] {
            container.get_keyed::<Named>(name).unwrap();
        }

        container.dispose().unwrap();
        container.dispose().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_post_disposal_rejection() {
        let container = Container::new();
        container.add_instance(7u32).unwrap();
        let scope = container.create_scope().unwrap();
        container.dispose().unwrap();

        assert!(container.is_disposed());
        assert!(container.add_instance(8u64).unwrap_err().is_disposed());
        assert!(container.get::<u32>().unwrap_err().is_disposed());
        assert!(container
            .get_service(&ServiceIdentity::of::<u32>())
            .unwrap_err()
            .is_disposed());
        assert!(container
            .resolve(&ServiceIdentity::of::<u32>(), &scope)
            .unwrap_err()
            .is_disposed());
        assert!(container.create_scope().unwrap_err().is_disposed());
    }

    #[test]
    fn test_duplicate_policy() {
        let container = Container::new();
        container.add_instance(1u8).unwrap();
        assert!(matches!(
            container.add_instance(2u8).unwrap_err(),
            DiError::AlreadyRegistered { .. }
        ));
        assert!(!container.try_register(ServiceDescriptor::instance(Arc::new(3u8))).unwrap());
        assert_eq!(*container.get::<u8>().unwrap(), 1);

        let replacing =
            Container::with_options(ContainerOptions::new().duplicate_policy(DuplicatePolicy::Replace));
        replacing.add_instance(1u8).unwrap();
        replacing.add_instance(2u8).unwrap();
        assert_eq!(*replacing.get::<u8>().unwrap(), 2);
    }

    #[test]
    fn test_keyed_and_unkeyed_are_independent() {
        let container = Container::new();
        container.add_instance(String::from("default")).unwrap();
        container
            .register_keyed("replica", ServiceDescriptor::instance(Arc::new(String::from("replica"))))
            .unwrap();

        assert_eq!(*container.get::<String>().unwrap(), "default");
        assert_eq!(*container.get_keyed::<String>("replica").unwrap(), "replica");
        assert!(container.try_get_keyed::<String>("missing").unwrap().is_none());
        assert!(matches!(
            container.get_keyed::<String>("missing").unwrap_err(),
            DiError::NotRegistered { .. }
        ));
    }

    #[test]
    fn test_service_descriptor_lookup() {
        let container = Container::new();
        container
            .add_scoped(|_| Ok(Vec::<u8>::new()))
            .unwrap();

        let descriptor = container
            .get_service_descriptor(&ServiceIdentity::of::<Vec<u8>>())
            .unwrap();
        assert_eq!(descriptor.lifetime(), Lifetime::Scoped);
        assert!(container
            .get_service_descriptor(&ServiceIdentity::of::<u8>())
            .is_err());
    }

    #[test]
    fn test_live_scopes_tracked() {
        let container = Container::new();
        let a = container.create_scope().unwrap();
        let b = container.scope_factory().create_scope().unwrap();
        assert_eq!(container.live_scopes(), 2);

        a.dispose().unwrap();
        assert_eq!(container.live_scopes(), 1);

        drop(b);
        assert_eq!(container.live_scopes(), 0);
    }

    #[test]
    fn test_custom_activator_receives_scopes_released() {
        struct Recording(Arc<AtomicUsize>);

        impl Activator for Recording {
            fn create_instance(
                &self,
                implementation: &ServiceType,
                _provider: &ServiceProvider,
                _generic_arguments: &[ServiceType],
            ) -> Result<AnyArc> {
                Err(DiError::CreationFailed {
                    type_name: implementation.name().into(),
                    reason: "recording activator builds nothing".into(),
                })
            }

            fn scopes_released(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let container = Container::new();
        container
            .register(ServiceDescriptor::activated::<u16>(Lifetime::Scoped))
            .unwrap();

        let released = Arc::new(AtomicUsize::new(0));
        let scope = container
            .create_scope_with(Arc::new(Recording(Arc::clone(&released))))
            .unwrap();
        assert!(matches!(
            scope.get::<u16>().unwrap_err(),
            DiError::CreationFailed { .. }
        ));

        // Custom activators are per scope; the container notifies its own.
        container.dispose().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_async_container_disposal() {
        struct Pool(Arc<AtomicUsize>);

        #[async_trait::async_trait]
        impl AsyncDispose for Pool {
            async fn dispose_async(&self) -> DisposeResult {
                tokio::task::yield_now().await;
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let closed = Arc::new(AtomicUsize::new(0));
        let source = Arc::clone(&closed);
        let container = Container::new();
        container
            .register(
                ServiceDescriptor::singleton(move |_| Ok(Arc::new(Pool(Arc::clone(&source)))))
                    .async_disposable(),
            )
            .unwrap();
        container.get::<Pool>().unwrap();

        let scope = container.create_scope().unwrap();
        scope.dispose_async().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        container.dispose_async().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_container_disposes_root() {
        let released = Arc::new(AtomicUsize::new(0));

        struct Conn(Arc<AtomicUsize>);

        impl Dispose for Conn {
            fn dispose(&self) -> DisposeResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        {
            let source = Arc::clone(&released);
            let container = Container::new();
            container
                .register(
                    ServiceDescriptor::singleton(move |_| Ok(Arc::new(Conn(Arc::clone(&source)))))
                        .disposable(),
                )
                .unwrap();
            container.get::<Conn>().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
