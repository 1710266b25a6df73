//! Provider traits for dependency injection
//!
//! These traits define what types can be injected, how long they live, and
//! how instances travel through the container in type-erased form.

use std::any::Any;
use std::sync::Arc;

/// Marker trait for types that can be injected via the DI container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Service lifetime specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// One instance for the whole container, released at container shutdown
    #[default]
    Singleton,

    /// One instance per scope, released with that scope
    Scoped,

    /// New instance created on every resolve, released by the requesting scope
    Transient,
}

impl std::fmt::Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
            Lifetime::Transient => "transient",
        })
    }
}

/// Type-erased service instance.
///
/// The concrete value behind the `dyn Any` is always an `Arc<T>` for the
/// service type `T`, which lets trait-object services travel the same path as
/// sized ones.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Erase a typed service instance into an [`AnyArc`].
#[inline]
pub fn erase<T: ?Sized + Send + Sync + 'static>(service: Arc<T>) -> AnyArc {
    Arc::new(service)
}

/// Recover the typed instance from an [`AnyArc`] produced by [`erase`].
#[inline]
pub fn downcast<T: ?Sized + Send + Sync + 'static>(instance: &AnyArc) -> Option<Arc<T>> {
    (**instance).downcast_ref::<Arc<T>>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_erase_roundtrip_sized() {
        let value = Arc::new(42u32);
        let any = erase(Arc::clone(&value));
        let back = downcast::<u32>(&any).unwrap();
        assert!(Arc::ptr_eq(&value, &back));
    }

    #[test]
    fn test_erase_trait_object() {
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        let any = erase(greeter);
        let back = downcast::<dyn Greeter>(&any).unwrap();
        assert_eq!(back.greet(), "hello");
        assert!(downcast::<English>(&any).is_none());
    }

    #[test]
    fn test_lifetime_defaults_and_display() {
        assert_eq!(Lifetime::default(), Lifetime::Singleton);
        assert_eq!(Lifetime::Scoped.to_string(), "scoped");
    }
}
