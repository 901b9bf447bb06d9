//! Type-erased value carried through the engine.
//!
//! The modeled language is polymorphic at the user-API boundary (any `T: Send + Sync +
//! 'static` can live in an `MVar`/`IORef`/`TVar`) but the engine itself only ever moves
//! opaque handles around. See `SPEC_FULL.md` §9 "Existential-typed primitives".

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An opaque, cheaply-cloneable value.
///
/// Cloning a `Value` clones the `Arc`, not the payload, so cells can be freely copied
/// into waiter queues, undo logs, and trace snapshots without duplicating user data.
#[derive(Clone)]
pub struct Value(Arc<dyn Any + Send + Sync>);

impl Value {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self { Value(Arc::new(inner)) }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> { self.0.downcast_ref::<T>() }

    /// Clones the underlying `T` out of the opaque value.
    #[must_use]
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> { self.downcast_ref::<T>().cloned() }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Value(..)") }
}

/// A modeled exception: same type-erasure trick as [`Value`], downcast by a
/// [`crate::stepper::Handler`] against its expected kind.
#[derive(Clone)]
pub struct ModeledException(Arc<dyn Any + Send + Sync>);

impl ModeledException {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self { ModeledException(Arc::new(inner)) }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool { self.0.is::<T>() }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> { self.0.downcast_ref::<T>() }
}

impl fmt::Debug for ModeledException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ModeledException(..)") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_round_trips() {
        let v = Value::new(42i32);
        assert_eq!(v.downcast::<i32>(), Some(42));
        assert_eq!(v.downcast::<String>(), None);
    }

    #[test]
    fn exception_kind_matches_by_type() {
        #[derive(Debug)]
        struct MyError;
        let e = ModeledException::new(MyError);
        assert!(e.is::<MyError>());
        assert!(!e.is::<i32>());
    }
}
