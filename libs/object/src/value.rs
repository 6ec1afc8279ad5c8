//! Type-Erased Value Container
//!
//! `Object` wraps an arbitrary `'static` value behind a reference-counted,
//! type-erased payload. Cloning shares the payload; mutable access requires
//! the container to be the sole owner. The null container is represented
//! without any payload allocation and compares null by that sentinel alone.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::{ObjectError, Result};

/// Type tag shown for the null container
pub const NULL_TYPE_NAME: &str = "null";

struct Inner {
    type_id: TypeId,
    type_name: &'static str,
    payload: Box<dyn Any + Send + Sync>,
}

/// Reference-counted, type-erased holder of an arbitrary value.
///
/// Copying an `Object` shares the payload (copy-on-handoff); the payload is
/// dropped when the last reference goes away.
#[derive(Clone)]
pub struct Object(Option<Arc<Inner>>);

impl Object {
    /// The null container.
    pub fn null() -> Self {
        Object(None)
    }

    /// Wrap a value into a new container with a single reference.
    pub fn wrap<T: Any + Send + Sync>(value: T) -> Self {
        Object(Some(Arc::new(Inner {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            payload: Box::new(value),
        })))
    }

    /// A container is null iff its type tag is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Name of the stored type, or `"null"`.
    pub fn type_name(&self) -> &'static str {
        match &self.0 {
            Some(inner) => inner.type_name,
            None => NULL_TYPE_NAME,
        }
    }

    /// `TypeId` of the stored type, if any.
    pub fn type_id(&self) -> Option<TypeId> {
        self.0.as_ref().map(|inner| inner.type_id)
    }

    /// Whether the container holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }

    /// Number of live references to the shared payload (0 for null).
    pub fn ref_count(&self) -> usize {
        self.0.as_ref().map(Arc::strong_count).unwrap_or(0)
    }

    /// Extract a shared reference to the stored value.
    ///
    /// Fails with [`ObjectError::TypeMismatch`] when the stored type differs
    /// (the null container mismatches every type).
    pub fn extract<T: Any>(&self) -> Result<&T> {
        let inner = self
            .0
            .as_ref()
            .ok_or_else(|| ObjectError::type_mismatch(std::any::type_name::<T>(), NULL_TYPE_NAME))?;
        inner
            .payload
            .downcast_ref::<T>()
            .ok_or_else(|| ObjectError::type_mismatch(std::any::type_name::<T>(), inner.type_name))
    }

    /// Extract a mutable reference to the stored value.
    ///
    /// The payload must be uniquely owned; a shared container fails with
    /// [`ObjectError::NotUnique`] rather than mutating behind other holders.
    pub fn extract_mut<T: Any>(&mut self) -> Result<&mut T> {
        let inner = self
            .0
            .as_mut()
            .ok_or_else(|| ObjectError::type_mismatch(std::any::type_name::<T>(), NULL_TYPE_NAME))?;
        if inner.type_id != TypeId::of::<T>() {
            return Err(ObjectError::type_mismatch(
                std::any::type_name::<T>(),
                inner.type_name,
            ));
        }
        let ref_count = Arc::strong_count(inner);
        let type_name = inner.type_name;
        let unique = Arc::get_mut(inner).ok_or(ObjectError::NotUnique {
            type_name,
            ref_count,
        })?;
        unique
            .payload
            .downcast_mut::<T>()
            .ok_or_else(|| ObjectError::type_mismatch(std::any::type_name::<T>(), type_name))
    }

    /// Stable-per-instance identity hash: type name plus payload address.
    ///
    /// Used as the fallback when no hasher is registered for the stored type.
    pub(crate) fn identity_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.type_name().hash(&mut hasher);
        if let Some(inner) = &self.0 {
            (Arc::as_ptr(inner) as usize).hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Whether two containers share one payload allocation.
    pub fn same_payload(&self, other: &Object) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Object::null()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(inner) => write!(f, "Object<{}>", inner.type_name),
            None => write!(f, "Object<null>"),
        }
    }
}

// Display mirrors Debug; values themselves are opaque at this layer.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinel() {
        let obj = Object::null();
        assert!(obj.is_null());
        assert_eq!(obj.type_name(), NULL_TYPE_NAME);
        assert_eq!(obj.ref_count(), 0);
        assert!(obj.extract::<i64>().is_err());
    }

    #[test]
    fn test_wrap_and_extract() {
        let obj = Object::wrap(42i64);
        assert!(!obj.is_null());
        assert!(obj.is::<i64>());
        assert_eq!(*obj.extract::<i64>().unwrap(), 42);

        match obj.extract::<String>() {
            Err(ObjectError::TypeMismatch { found, .. }) => assert_eq!(found, "i64"),
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_clone_shares_payload() {
        let a = Object::wrap(String::from("shared"));
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert!(a.same_payload(&b));
    }

    #[test]
    fn test_extract_mut_requires_unique() {
        let mut a = Object::wrap(7u64);
        *a.extract_mut::<u64>().unwrap() = 8;
        assert_eq!(*a.extract::<u64>().unwrap(), 8);

        let _b = a.clone();
        match a.extract_mut::<u64>() {
            Err(ObjectError::NotUnique { ref_count, .. }) => assert_eq!(ref_count, 2),
            other => panic!("expected NotUnique, got {:?}", other),
        }
    }

    #[test]
    fn test_identity_hash_stable() {
        let a = Object::wrap(1i64);
        let b = a.clone();
        assert_eq!(a.identity_hash(), b.identity_hash());
        assert_ne!(a.identity_hash(), Object::wrap(1i64).identity_hash());
    }
}
