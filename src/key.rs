//! Service identities
//!
//! A [`ServiceIdentity`] pairs a [`ServiceType`] with an optional
//! [`ServiceKey`] and is the lookup key of the registry and of every scope
//! cache.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// Service Type
// =============================================================================

#[derive(Clone)]
enum Shape {
    Plain,
    Definition,
    Closed {
        definition: TypeId,
        definition_name: &'static str,
        arguments: Arc<[ServiceType]>,
    },
}

/// Runtime description of a requested or implementing type.
///
/// Equality and hashing only look at the underlying `TypeId`, so a closed
/// generic built through [`ServiceType::generic`] equals [`ServiceType::of`]
/// for the same type.
#[derive(Clone)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
    shape: Shape,
}

impl ServiceType {
    /// Describe a plain (non-generic) type.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            shape: Shape::Plain,
        }
    }

    /// Describe an open generic definition through its marker type `D`.
    #[inline]
    pub fn open<D: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<D>(),
            name: std::any::type_name::<D>(),
            shape: Shape::Definition,
        }
    }

    /// Describe a closed generic type together with its definition and
    /// type arguments.
    pub fn generic<T: Generic + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            shape: Shape::Closed {
                definition: TypeId::of::<T::Definition>(),
                definition_name: std::any::type_name::<T::Definition>(),
                arguments: T::type_arguments().into(),
            },
        }
    }

    /// The underlying `TypeId`.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Human-readable type name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this is a closed generic instantiation.
    #[inline]
    pub fn is_generic(&self) -> bool {
        matches!(self.shape, Shape::Closed { .. })
    }

    /// Whether this describes an open generic definition.
    #[inline]
    pub fn is_generic_definition(&self) -> bool {
        matches!(self.shape, Shape::Definition)
    }

    /// Type arguments of a closed generic, empty otherwise.
    pub fn type_arguments(&self) -> &[ServiceType] {
        match &self.shape {
            Shape::Closed { arguments, .. } => arguments,
            _ => &[],
        }
    }

    /// The open definition this closed generic was instantiated from.
    pub fn generic_definition(&self) -> Option<ServiceType> {
        match &self.shape {
            Shape::Closed {
                definition,
                definition_name,
                ..
            } => Some(ServiceType {
                id: *definition,
                name: *definition_name,
                shape: Shape::Definition,
            }),
            _ => None,
        }
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Links a closed generic type to its open definition.
///
/// Rust has no runtime generic reflection, so a generic service declares a
/// marker type standing for its definition and lists its type arguments.
///
/// ```rust
/// use scoped_di::{Generic, ServiceType};
///
/// struct Repository<T>(std::marker::PhantomData<T>);
/// struct RepositoryDef;
///
/// impl<T: 'static> Generic for Repository<T> {
///     type Definition = RepositoryDef;
///
///     fn type_arguments() -> Vec<ServiceType> {
///         vec![ServiceType::of::<T>()]
///     }
/// }
///
/// let closed = ServiceType::generic::<Repository<u32>>();
/// assert_eq!(closed.generic_definition(), Some(ServiceType::open::<RepositoryDef>()));
/// ```
pub trait Generic: 'static {
    /// Marker type identifying the open generic definition.
    type Definition: ?Sized + 'static;

    /// The type arguments this instantiation was closed over.
    fn type_arguments() -> Vec<ServiceType>;
}

// =============================================================================
// Service Key
// =============================================================================

trait KeyValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_key(&self, other: &dyn KeyValue) -> bool;
    fn hash_key(&self, state: &mut dyn Hasher);
}

impl<K> KeyValue for K
where
    K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_key(&self, other: &dyn KeyValue) -> bool {
        other.as_any().downcast_ref::<K>() == Some(self)
    }

    fn hash_key(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<K>().hash(&mut state);
        self.hash(&mut state);
    }
}

/// Disambiguating key with value equality over any hashable type.
///
/// Keys of different concrete types never compare equal. String slices are
/// stored as `String` so `"a"` and `String::from("a")` are the same key.
#[derive(Clone)]
pub struct ServiceKey(Arc<dyn KeyValue>);

impl ServiceKey {
    /// Wrap an arbitrary key value.
    pub fn new<K>(key: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(key))
    }

    /// Borrow the key as its concrete type.
    pub fn downcast_ref<K: 'static>(&self) -> Option<&K> {
        self.0.as_any().downcast_ref::<K>()
    }
}

impl From<&str> for ServiceKey {
    fn from(key: &str) -> Self {
        Self::new(key.to_string())
    }
}

impl From<String> for ServiceKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<u64> for ServiceKey {
    fn from(key: u64) -> Self {
        Self::new(key)
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_key(&*other.0)
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_key(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

// =============================================================================
// Service Identity
// =============================================================================

/// Registry lookup key: a requested type plus an optional key.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ServiceIdentity {
    service_type: ServiceType,
    key: Option<ServiceKey>,
}

impl ServiceIdentity {
    #[inline]
    pub fn new(service_type: ServiceType, key: Option<ServiceKey>) -> Self {
        Self { service_type, key }
    }

    /// Unkeyed identity for `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceType::of::<T>(), None)
    }

    /// Keyed identity for `T`.
    #[inline]
    pub fn keyed<T: ?Sized + 'static>(key: impl Into<ServiceKey>) -> Self {
        Self::new(ServiceType::of::<T>(), Some(key.into()))
    }

    #[inline]
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    #[inline]
    pub fn key(&self) -> Option<&ServiceKey> {
        self.key.as_ref()
    }

    /// The identity of the open generic registration this identity would
    /// materialize from, keeping the same key.
    pub fn open_generic(&self) -> Option<ServiceIdentity> {
        self.service_type
            .generic_definition()
            .map(|definition| ServiceIdentity::new(definition, self.key.clone()))
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{:?}]", self.service_type, key),
            None => write!(f, "{}", self.service_type),
        }
    }
}
