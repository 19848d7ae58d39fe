use std::cmp;
use std::sync::{Mutex, PoisonError};

/// A value shared across workers and folded with a fixed combinator.
///
/// The combinator must be commutative and associative; the final value is
/// then the same whatever order workers complete in. Every update is a
/// read-combine-write under one lock.
pub struct Reduction<T> {
    value: Mutex<T>,
    combine: fn(T, T) -> T,
}

impl<T: Copy> Reduction<T> {
    /// Start from `identity`, the value meaning "nothing observed yet".
    pub fn new(identity: T, combine: fn(T, T) -> T) -> Self {
        Self {
            value: Mutex::new(identity),
            combine,
        }
    }

    /// Fold `candidate` into the shared value.
    pub fn update(&self, candidate: T) {
        // A poisoned lock still holds a whole T: the write below is a single store.
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value = (self.combine)(*value, candidate);
    }

    /// Current value. Only meaningful once every worker has finished.
    pub fn value(&self) -> T {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> T {
        self.value
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Copy + Ord> Reduction<T> {
    /// Keeps the smallest value seen. `identity` should be the type's maximum.
    pub fn minimum(identity: T) -> Self {
        Self::new(identity, cmp::min)
    }
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for Reduction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reduction")
            .field("value", &self.value())
            .finish()
    }
}
