//! Resolution engine
//!
//! Turns an identity and a scope into an instance: built-in services first,
//! then the registry, then the lifetime policy of the descriptor found.
//!
//! Singleton and Scoped construction run under the container's reentrant
//! lock via [`lock_then_init`]. Every constructed instance with a disposal
//! probe is tracked by its owner: singletons by the root scope, everything
//! else by the resolving scope.

use crate::container::ContainerInner;
use crate::scope::Scope;
use crate::sync::lock_then_init;
use crate::{
    Activator, AnyArc, Container, DiError, Lifetime, Result, ScopeFactory, ServiceDescriptor,
    ServiceIdentity, ServiceProvider, ServiceRequest, erase,
};
use std::any::TypeId;
use std::cell::RefCell;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Resolve `identity` in `scope`. `Ok(None)` means nothing is registered.
pub(crate) fn resolve(
    inner: &Arc<ContainerInner>,
    identity: &ServiceIdentity,
    scope: &Arc<Scope>,
) -> Result<Option<AnyArc>> {
    inner.ensure_live()?;
    scope.ensure_live()?;

    #[cfg(feature = "logging")]
    trace!(
        target: "scoped_di",
        service = %identity,
        scope_id = %scope.id(),
        "Resolving service"
    );

    if identity.key().is_none() {
        if let Some(instance) = builtin(inner, identity, scope) {
            return Ok(Some(instance));
        }
    }

    let Some(descriptor) = inner.registry.lookup(identity) else {
        return Ok(None);
    };
    if descriptor.is_generic_definition() {
        // An open definition only answers for its closed instantiations.
        return Ok(None);
    }

    let instance = match descriptor.lifetime() {
        Lifetime::Singleton => singleton(inner, identity, &descriptor)?,
        Lifetime::Scoped => scoped(inner, identity, &descriptor, scope)?,
        Lifetime::Transient => transient(inner, identity, &descriptor, scope)?,
    };
    Ok(Some(instance))
}

/// Services every container answers for without registration.
fn builtin(inner: &Arc<ContainerInner>, identity: &ServiceIdentity, scope: &Arc<Scope>) -> Option<AnyArc> {
    let requested = identity.service_type().type_id();

    if requested == TypeId::of::<Container>() {
        Some(erase(Arc::new(Container::from_inner(Arc::clone(inner)))))
    } else if requested == TypeId::of::<ServiceProvider>() {
        Some(erase(Arc::new(ServiceProvider::new(
            Arc::clone(inner),
            Arc::clone(scope),
        ))))
    } else if requested == TypeId::of::<ScopeFactory>() {
        Some(erase(Arc::new(ScopeFactory::new(Arc::clone(inner)))))
    } else if requested == TypeId::of::<dyn Activator>() {
        Some(erase(inner.activator_for(scope)))
    } else {
        None
    }
}

fn singleton(
    inner: &Arc<ContainerInner>,
    identity: &ServiceIdentity,
    descriptor: &ServiceDescriptor,
) -> Result<AnyArc> {
    lock_then_init(
        || descriptor.singleton_instance(),
        || inner.lock.lock(),
        |_guard| {
            inner.ensure_live()?;

            let root = &inner.root;
            let instance = construct(inner, identity, descriptor, root)?;
            if let Some(handle) = descriptor.disposal_handle(&instance) {
                root.track(handle)?;
            }
            descriptor.set_singleton_instance(Arc::clone(&instance));

            #[cfg(feature = "logging")]
            debug!(
                target: "scoped_di",
                service = %identity,
                lifetime = "singleton",
                "Constructed singleton"
            );

            Ok(instance)
        },
    )
}

fn scoped(
    inner: &Arc<ContainerInner>,
    identity: &ServiceIdentity,
    descriptor: &ServiceDescriptor,
    scope: &Arc<Scope>,
) -> Result<AnyArc> {
    lock_then_init(
        || scope.cached(identity),
        || inner.lock.lock(),
        |_guard| {
            inner.ensure_live()?;
            scope.ensure_live()?;

            let instance = construct(inner, identity, descriptor, scope)?;
            if let Some(handle) = descriptor.disposal_handle(&instance) {
                scope.track(handle)?;
            }
            scope.cache(identity.clone(), Arc::clone(&instance));

            #[cfg(feature = "logging")]
            debug!(
                target: "scoped_di",
                service = %identity,
                lifetime = "scoped",
                scope_id = %scope.id(),
                "Constructed scoped instance"
            );

            Ok(instance)
        },
    )
}

fn transient(
    inner: &Arc<ContainerInner>,
    identity: &ServiceIdentity,
    descriptor: &ServiceDescriptor,
    scope: &Arc<Scope>,
) -> Result<AnyArc> {
    let instance = construct(inner, identity, descriptor, scope)?;
    if let Some(handle) = descriptor.disposal_handle(&instance) {
        scope.track(handle)?;
    }

    #[cfg(feature = "logging")]
    trace!(
        target: "scoped_di",
        service = %identity,
        scope_id = %scope.id(),
        "Constructed transient instance"
    );

    Ok(instance)
}

/// Run the descriptor's factory, or the scope's activator when it has none.
/// Failures propagate unchanged.
fn construct(
    inner: &Arc<ContainerInner>,
    identity: &ServiceIdentity,
    descriptor: &ServiceDescriptor,
    scope: &Arc<Scope>,
) -> Result<AnyArc> {
    let _frame = ConstructionFrame::enter(inner, identity)?;

    let provider = ServiceProvider::new(Arc::clone(inner), Arc::clone(scope));
    let request = ServiceRequest::new(descriptor.service_type(), identity.key());
    match descriptor.factory() {
        Some(factory) => factory(&provider, &request),
        None => inner.activator_for(scope).create_instance(
            descriptor.implementation_type(),
            &provider,
            request.type_arguments(),
        ),
    }
}

// =============================================================================
// Circular dependency detection
// =============================================================================

thread_local! {
    static CONSTRUCTING: RefCell<Vec<(usize, ServiceIdentity)>> = const { RefCell::new(Vec::new()) };
}

/// Marks `identity` as under construction on this thread until dropped.
struct ConstructionFrame;

impl ConstructionFrame {
    fn enter(inner: &Arc<ContainerInner>, identity: &ServiceIdentity) -> Result<Self> {
        let container = Arc::as_ptr(inner) as usize;
        CONSTRUCTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack
                .iter()
                .any(|(owner, building)| *owner == container && building == identity)
            {
                return Err(DiError::circular(identity));
            }
            stack.push((container, identity.clone()));
            Ok(ConstructionFrame)
        })
    }
}

impl Drop for ConstructionFrame {
    fn drop(&mut self) {
        CONSTRUCTING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
