//! Container configuration

/// What `register` does when the identity is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail with [`DiError::AlreadyRegistered`](crate::DiError::AlreadyRegistered)
    #[default]
    Reject,
    /// Overwrite the earlier registration
    Replace,
}

/// Options applied when building a [`Container`](crate::Container).
///
/// ```rust
/// use scoped_di::{Container, ContainerOptions, DuplicatePolicy};
///
/// let container = Container::with_options(
///     ContainerOptions::new()
///         .capacity(128)
///         .duplicate_policy(DuplicatePolicy::Replace),
/// );
/// assert!(container.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerOptions {
    pub(crate) capacity: usize,
    pub(crate) duplicate_policy: DuplicatePolicy,
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected number of registrations; sizes the registry up front.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            capacity: 16,
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}
