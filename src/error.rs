//! Error types for dependency injection

use crate::ScopeId;
use thiserror::Error;

/// Boxed error returned by user disposal code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during dependency injection operations
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No descriptor exists for the requested identity
    #[error("Service type not registered: {service}")]
    NotRegistered { service: String },

    /// Registration rejected because the identity is already taken
    #[error("Service already registered: {service}")]
    AlreadyRegistered { service: String },

    /// The container or scope has already been disposed
    #[error("Cannot access a disposed object: {object}")]
    Disposed { object: &'static str },

    /// A resolved instance does not have the statically requested type
    #[error("Service {service} could not be cast to {expected}")]
    InvalidCast {
        service: String,
        expected: &'static str,
    },

    /// A scope was bound to an activator twice
    #[error("Activator already bound for {scope}")]
    ScopeAlreadyBound { scope: ScopeId },

    /// Circular dependency detected during resolution
    #[error("Circular dependency detected while resolving: {service}")]
    CircularDependency { service: String },

    /// Factory or activator failed to create service
    #[error("Failed to create service {type_name}: {reason}")]
    CreationFailed { type_name: String, reason: String },

    /// Synchronous disposal reached a handle that only supports async release
    #[error("{type_name} only supports asynchronous disposal; use dispose_async")]
    AsyncDisposalRequired { type_name: &'static str },

    /// One or more disposables failed; every handle was still attempted
    #[error("{} disposable(s) failed to release: {}", failures.len(), failures.join("; "))]
    DisposalFailed { failures: Vec<String> },
}

impl DiError {
    /// Create a NotRegistered error for a service description
    #[inline]
    pub fn not_registered(service: impl ToString) -> Self {
        Self::NotRegistered {
            service: service.to_string(),
        }
    }

    /// Create a CreationFailed error for a type
    #[inline]
    pub fn creation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name: std::any::type_name::<T>().to_string(),
            reason: reason.into(),
        }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(service: impl ToString) -> Self {
        Self::AlreadyRegistered {
            service: service.to_string(),
        }
    }

    /// Create an InvalidCast error for the expected type
    #[inline]
    pub fn invalid_cast<T: ?Sized + 'static>(service: impl ToString) -> Self {
        Self::InvalidCast {
            service: service.to_string(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a CircularDependency error
    #[inline]
    pub fn circular(service: impl ToString) -> Self {
        Self::CircularDependency {
            service: service.to_string(),
        }
    }

    /// Whether this error reports use after disposal
    #[inline]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
