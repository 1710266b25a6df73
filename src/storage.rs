//! Service registry
//!
//! Maps [`ServiceIdentity`] to [`ServiceDescriptor`] in a `DashMap` so exact
//! lookups never take a lock. Registration and open-generic
//! materialization go through an upgradeable `RwLock` gate.
//!
//! Descriptors materialized from an open definition live apart from explicit
//! registrations and only answer identities built with
//! [`ServiceType::generic`](crate::ServiceType::generic). A plain lookup of
//! the same type sees explicit registrations only, whatever was resolved
//! before it.

use crate::sync::lock_then_init;
use crate::{DiError, DuplicatePolicy, Result, ServiceDescriptor, ServiceIdentity};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Thread-safe registry of service descriptors.
pub(crate) struct ServiceRegistry {
    descriptors: DashMap<ServiceIdentity, Arc<ServiceDescriptor>, RandomState>,
    materialized: DashMap<ServiceIdentity, Arc<ServiceDescriptor>, RandomState>,
    gate: RwLock<()>,
    policy: DuplicatePolicy,
}

/// Marker for a generic lookup that found no open registration.
struct NoDefinition;

impl ServiceRegistry {
    /// Create a registry sized for roughly `capacity` descriptors.
    ///
    /// Shard count scales with the expected size; the DashMap default of
    /// `num_cpus * 4` shards is far more than a typical registry needs.
    pub(crate) fn with_capacity(capacity: usize, policy: DuplicatePolicy) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self {
            descriptors: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
            materialized: DashMap::with_hasher_and_shard_amount(RandomState::new(), shard_amount),
            gate: RwLock::new(()),
            policy,
        }
    }

    /// Insert a descriptor, honouring the duplicate policy.
    ///
    /// `live` is checked again once the gate is held, so a registration
    /// cannot land after the owner sealed the registry.
    pub(crate) fn register(
        &self,
        identity: ServiceIdentity,
        descriptor: ServiceDescriptor,
        live: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let _write = self.gate.write();
        live()?;
        match self.descriptors.entry(identity) {
            Entry::Occupied(mut occupied) => match self.policy {
                DuplicatePolicy::Reject => Err(DiError::already_registered(occupied.key())),
                DuplicatePolicy::Replace => {
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "scoped_di",
                        service = %occupied.key(),
                        "Replacing existing registration"
                    );
                    occupied.insert(Arc::new(descriptor));
                    Ok(())
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// Insert only if the identity is free. Returns whether it was inserted.
    pub(crate) fn try_register(
        &self,
        identity: ServiceIdentity,
        descriptor: ServiceDescriptor,
        live: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        let _write = self.gate.write();
        live()?;
        match self.descriptors.entry(identity) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(descriptor));
                Ok(true)
            }
        }
    }

    /// Hold the gate exclusively, blocking registration and materialization.
    pub(crate) fn seal(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    /// Drop every descriptor along with its published singleton.
    ///
    /// Instances are dropped after the gate is released, so their `Drop`
    /// may still touch the registry.
    pub(crate) fn clear(&self) {
        let mut released = Vec::new();
        {
            let _write = self.gate.write();
            let mut take = |_: &ServiceIdentity, descriptor: &mut Arc<ServiceDescriptor>| {
                released.push(Arc::clone(descriptor));
                false
            };
            self.descriptors.retain(&mut take);
            self.materialized.retain(&mut take);
        }
        drop(released);
    }

    /// Exact lookup, falling back to open-generic materialization for
    /// closed generic identities.
    pub(crate) fn lookup(&self, identity: &ServiceIdentity) -> Option<Arc<ServiceDescriptor>> {
        if let Some(found) = self.get_exact(identity) {
            return Some(found);
        }

        let open = identity.open_generic()?;
        lock_then_init(
            || self.get_materialized(identity),
            || self.gate.upgradable_read(),
            |guard| self.materialize(identity, &open, guard),
        )
        .ok()
    }

    fn materialize(
        &self,
        identity: &ServiceIdentity,
        open: &ServiceIdentity,
        guard: RwLockUpgradableReadGuard<'_, ()>,
    ) -> std::result::Result<Arc<ServiceDescriptor>, NoDefinition> {
        let definition = self.get_exact(open).ok_or(NoDefinition)?;
        let closed = definition.clone_for(identity.service_type().clone());

        let _write = RwLockUpgradableReadGuard::upgrade(guard);
        let winner = match self.materialized.entry(identity.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "scoped_di",
                    service = %identity,
                    definition = %open,
                    lifetime = %closed.lifetime(),
                    "Materialized closed generic descriptor"
                );
                Arc::clone(vacant.insert(Arc::new(closed)).value())
            }
        };
        Ok(winner)
    }

    #[inline]
    fn get_exact(&self, identity: &ServiceIdentity) -> Option<Arc<ServiceDescriptor>> {
        self.descriptors.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    #[inline]
    fn get_materialized(&self, identity: &ServiceIdentity) -> Option<Arc<ServiceDescriptor>> {
        self.materialized.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    /// Check for an exact registration (no materialization).
    #[inline]
    pub(crate) fn contains(&self, identity: &ServiceIdentity) -> bool {
        self.descriptors.contains_key(identity)
    }

    /// Get number of registered descriptors, materialized ones included
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.descriptors.len() + self.materialized.len()
    }

    /// All registered identities.
    pub(crate) fn identities(&self) -> Vec<ServiceIdentity> {
        self.descriptors
            .iter()
            .chain(self.materialized.iter())
            .map(|r| r.key().clone())
            .collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("count", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Generic, Lifetime, ServiceType, erase};
    use std::marker::PhantomData;
    use std::sync::Barrier;
    use std::thread;

    struct Repo<T>(PhantomData<T>);
    struct RepoDef;

    impl<T: 'static> Generic for Repo<T> {
        type Definition = RepoDef;

        fn type_arguments() -> Vec<ServiceType> {
            vec![ServiceType::of::<T>()]
        }
    }

    fn live() -> Result<()> {
        Ok(())
    }

    fn value(v: u32) -> ServiceDescriptor {
        ServiceDescriptor::instance(Arc::new(v)).build()
    }

    fn open_repo() -> ServiceDescriptor {
        ServiceDescriptor::open_generic(ServiceType::open::<RepoDef>(), Lifetime::Scoped, |_, _| {
            Ok(erase(Arc::new(0u8)))
        })
    }

    fn closed<T: 'static>() -> ServiceIdentity {
        ServiceIdentity::new(ServiceType::generic::<Repo<T>>(), None)
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry.register(ServiceIdentity::of::<u32>(), value(1), live).unwrap();

        let err = registry
            .register(ServiceIdentity::of::<u32>(), value(2), live)
            .unwrap_err();
        assert!(matches!(err, DiError::AlreadyRegistered { .. }));

        let kept = registry.lookup(&ServiceIdentity::of::<u32>()).unwrap();
        let instance = kept.singleton_instance().unwrap();
        assert_eq!(*crate::downcast::<u32>(&instance).unwrap(), 1);
    }

    #[test]
    fn test_replace_policy_overwrites() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Replace);
        registry.register(ServiceIdentity::of::<u32>(), value(1), live).unwrap();
        registry.register(ServiceIdentity::of::<u32>(), value(2), live).unwrap();

        let kept = registry.lookup(&ServiceIdentity::of::<u32>()).unwrap();
        let instance = kept.singleton_instance().unwrap();
        assert_eq!(*crate::downcast::<u32>(&instance).unwrap(), 2);
    }

    #[test]
    fn test_try_register_never_overwrites() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Replace);
        assert!(registry.try_register(ServiceIdentity::of::<u32>(), value(1), live).unwrap());
        assert!(!registry.try_register(ServiceIdentity::of::<u32>(), value(2), live).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_keyed_identities_are_distinct() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry.register(ServiceIdentity::keyed::<u32>("a"), value(1), live).unwrap();
        registry.register(ServiceIdentity::keyed::<u32>("b"), value(2), live).unwrap();

        assert!(registry.lookup(&ServiceIdentity::of::<u32>()).is_none());
        assert!(registry.contains(&ServiceIdentity::keyed::<u32>("a")));
        assert_eq!(registry.identities().len(), 2);
    }

    #[test]
    fn test_non_generic_miss_does_not_materialize() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();

        assert!(registry.lookup(&ServiceIdentity::of::<u64>()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_materializes_each_closed_type_once() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();

        let a1 = registry.lookup(&closed::<u8>()).unwrap();
        let a2 = registry.lookup(&closed::<u8>()).unwrap();
        let b = registry.lookup(&closed::<u16>()).unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(a1.service_type(), &ServiceType::of::<Repo<u8>>());
        assert_eq!(a1.lifetime(), Lifetime::Scoped);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_plain_lookup_ignores_materialized_descriptors() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();
        let plain = ServiceIdentity::of::<Repo<u8>>();

        assert!(registry.lookup(&plain).is_none());
        assert!(registry.lookup(&closed::<u8>()).is_some());
        assert!(registry.lookup(&plain).is_none());
        assert!(!registry.contains(&plain));
    }

    #[test]
    fn test_explicit_closed_registration_wins() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();
        let explicit = ServiceDescriptor::instance(Arc::new(Repo::<u8>(PhantomData))).build();
        registry
            .register(ServiceIdentity::of::<Repo<u8>>(), explicit, live)
            .unwrap();

        let via_generic = registry.lookup(&closed::<u8>()).unwrap();
        let via_plain = registry.lookup(&ServiceIdentity::of::<Repo<u8>>()).unwrap();
        assert!(Arc::ptr_eq(&via_generic, &via_plain));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_rechecks_liveness_under_gate() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        let sealed = || -> Result<()> {
            Err(DiError::Disposed {
                object: "Container",
            })
        };

        let err = registry
            .register(ServiceIdentity::of::<u32>(), value(1), sealed)
            .unwrap_err();
        assert!(err.is_disposed());
        assert!(registry
            .try_register(ServiceIdentity::of::<u32>(), value(1), sealed)
            .unwrap_err()
            .is_disposed());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry.register(ServiceIdentity::of::<u32>(), value(1), live).unwrap();
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();
        registry.lookup(&closed::<u8>()).unwrap();

        registry.clear();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_keyed_generic_needs_keyed_definition() {
        let registry = ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject);
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();

        let keyed = ServiceIdentity::new(ServiceType::generic::<Repo<u8>>(), Some("x".into()));
        assert!(registry.lookup(&keyed).is_none());
    }

    #[test]
    fn test_concurrent_materialization_has_one_winner() {
        let registry = Arc::new(ServiceRegistry::with_capacity(0, DuplicatePolicy::Reject));
        registry
            .register(ServiceIdentity::new(ServiceType::open::<RepoDef>(), None), open_repo(), live)
            .unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.lookup(&closed::<u32>()).unwrap()
                })
            })
            .collect();

        let found: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(found.iter().all(|d| Arc::ptr_eq(d, &found[0])));
        assert_eq!(registry.len(), 2);
    }
}
