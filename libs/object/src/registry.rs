//! Type Capability Registry
//!
//! A single explicitly-constructed registry object holding everything the
//! container cannot derive from type erasure alone: conversions between
//! types, wire codecs keyed by a stable tag string, comparators and hashers.
//! The registry is injected into the layers that need it (environments, the
//! RPC client/server) rather than living in an ambient global.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ObjectError, Result};
use crate::value::{Object, NULL_TYPE_NAME};
use crate::wire::WireValue;

/// Wire tag reserved for the null container
pub const NULL_TAG: &str = "null";

type ConvertFn = Arc<dyn Fn(&Object) -> Result<Object> + Send + Sync>;
type EncodeFn = Arc<dyn Fn(&Object) -> Result<Vec<u8>> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Object> + Send + Sync>;
type CompareFn = Arc<dyn Fn(&Object, &Object) -> Result<Ordering> + Send + Sync>;
type HashFn = Arc<dyn Fn(&Object) -> u64 + Send + Sync>;

#[derive(Clone)]
struct Codec {
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Immutable capability registry. Build once with [`TypeRegistryBuilder`],
/// share behind an `Arc`.
pub struct TypeRegistry {
    conversions: HashMap<(TypeId, TypeId), ConvertFn>,
    codecs: HashMap<String, Codec>,
    tags: HashMap<TypeId, String>,
    comparators: HashMap<TypeId, CompareFn>,
    hashers: HashMap<TypeId, HashFn>,
}

/// Builder for [`TypeRegistry`]
#[derive(Default)]
pub struct TypeRegistryBuilder {
    conversions: HashMap<(TypeId, TypeId), ConvertFn>,
    codecs: HashMap<String, Codec>,
    tags: HashMap<TypeId, String>,
    comparators: HashMap<TypeId, CompareFn>,
    hashers: HashMap<TypeId, HashFn>,
}

impl TypeRegistryBuilder {
    /// Register a fallible conversion from `A` containers to `B` containers.
    pub fn convert<A, B, F>(mut self, convert: F) -> Self
    where
        A: Any + Send + Sync,
        B: Any + Send + Sync,
        F: Fn(&A) -> Result<B> + Send + Sync + 'static,
    {
        let f: ConvertFn = Arc::new(move |obj: &Object| {
            let a = obj.extract::<A>()?;
            Ok(Object::wrap(convert(a)?))
        });
        self.conversions
            .insert((TypeId::of::<A>(), TypeId::of::<B>()), f);
        self
    }

    /// Register a serde codec for `T` under a stable wire tag.
    ///
    /// The tag travels on the wire, so it must agree between peers; the Rust
    /// type name does not qualify (it is not stable across builds).
    pub fn codec<T>(mut self, tag: &str) -> Self
    where
        T: Any + Send + Sync + Serialize + DeserializeOwned,
    {
        let tag_owned = tag.to_string();
        let encode: EncodeFn = Arc::new(move |obj: &Object| {
            let value = obj.extract::<T>()?;
            bincode::serialize(value)
                .map_err(|e| ObjectError::not_serializable(format!("{}: {}", obj.type_name(), e)))
        });
        let decode_tag = tag_owned.clone();
        let decode: DecodeFn = Arc::new(move |bytes: &[u8]| {
            let value: T = bincode::deserialize(bytes)
                .map_err(|e| ObjectError::decode(decode_tag.clone(), e.to_string()))?;
            Ok(Object::wrap(value))
        });
        self.codecs.insert(tag_owned.clone(), Codec { encode, decode });
        self.tags.insert(TypeId::of::<T>(), tag_owned);
        self
    }

    /// Register total ordering for `T` via its `Ord` impl.
    pub fn ord<T>(mut self) -> Self
    where
        T: Any + Send + Sync + Ord,
    {
        let f: CompareFn = Arc::new(|lhs: &Object, rhs: &Object| {
            Ok(lhs.extract::<T>()?.cmp(rhs.extract::<T>()?))
        });
        self.comparators.insert(TypeId::of::<T>(), f);
        self
    }

    /// Register an explicit comparator for `T`.
    pub fn ord_with<T, F>(mut self, compare: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        let f: CompareFn = Arc::new(move |lhs: &Object, rhs: &Object| {
            Ok(compare(lhs.extract::<T>()?, rhs.extract::<T>()?))
        });
        self.comparators.insert(TypeId::of::<T>(), f);
        self
    }

    /// Register hashing for `T` via its `Hash` impl.
    pub fn hash<T>(mut self) -> Self
    where
        T: Any + Send + Sync + Hash,
    {
        let f: HashFn = Arc::new(|obj: &Object| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            // extract cannot fail: the registry dispatches by stored TypeId
            if let Ok(value) = obj.extract::<T>() {
                value.hash(&mut hasher);
            }
            hasher.finish()
        });
        self.hashers.insert(TypeId::of::<T>(), f);
        self
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            conversions: self.conversions,
            codecs: self.codecs,
            tags: self.tags,
            comparators: self.comparators,
            hashers: self.hashers,
        }
    }
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Registry pre-populated with the builtin scalar types: codecs, ordering,
    /// hashing and the numeric widening conversions.
    pub fn with_builtins() -> TypeRegistry {
        Self::builtins_builder().build()
    }

    /// Builtin registrations as a builder, for callers that add their own
    /// types on top.
    pub fn builtins_builder() -> TypeRegistryBuilder {
        TypeRegistry::builder()
            .codec::<bool>("bool")
            .codec::<i64>("i64")
            .codec::<u64>("u64")
            .codec::<f64>("f64")
            .codec::<String>("str")
            .codec::<Vec<u8>>("bytes")
            .codec::<()>("unit")
            .ord::<bool>()
            .ord::<i64>()
            .ord::<u64>()
            .ord::<String>()
            .ord::<Vec<u8>>()
            .ord_with::<f64, _>(|a, b| a.total_cmp(b))
            .hash::<bool>()
            .hash::<i64>()
            .hash::<u64>()
            .hash::<String>()
            .hash::<Vec<u8>>()
            .convert::<i64, f64, _>(|v| Ok(*v as f64))
            .convert::<u64, f64, _>(|v| Ok(*v as f64))
            .convert::<u64, i64, _>(|v| {
                i64::try_from(*v).map_err(|_| {
                    ObjectError::no_conversion_with_detail("u64", "i64", "value out of range")
                })
            })
            .convert::<i64, u64, _>(|v| {
                u64::try_from(*v).map_err(|_| {
                    ObjectError::no_conversion_with_detail("i64", "u64", "negative value")
                })
            })
    }

    fn conversion(&self, from: TypeId, to: TypeId) -> Option<&ConvertFn> {
        self.conversions.get(&(from, to))
    }

    /// Convert a container into a `T` value, using a registered conversion
    /// when the stored type differs.
    pub fn convert_to<T>(&self, obj: &Object) -> Result<T>
    where
        T: Any + Send + Sync + Clone,
    {
        if let Ok(value) = obj.extract::<T>() {
            return Ok(value.clone());
        }
        let from = obj
            .type_id()
            .ok_or_else(|| ObjectError::no_conversion(NULL_TYPE_NAME, std::any::type_name::<T>()))?;
        let f = self
            .conversion(from, TypeId::of::<T>())
            .ok_or_else(|| {
                ObjectError::no_conversion(obj.type_name(), std::any::type_name::<T>())
            })?;
        let converted = f(obj)?;
        Ok(converted.extract::<T>()?.clone())
    }

    /// Strict-order comparison. A registered comparator wins; otherwise equal
    /// hash codes compare `Equal` and unequal hash codes are not comparable.
    pub fn compare(&self, lhs: &Object, rhs: &Object) -> Result<Ordering> {
        if lhs.is_null() && rhs.is_null() {
            return Ok(Ordering::Equal);
        }
        if let (Some(lhs_id), Some(rhs_id)) = (lhs.type_id(), rhs.type_id()) {
            if lhs_id == rhs_id {
                if let Some(compare) = self.comparators.get(&lhs_id) {
                    return compare(lhs, rhs);
                }
            }
        }
        if self.hash_code(lhs) == self.hash_code(rhs) {
            return Ok(Ordering::Equal);
        }
        Err(ObjectError::NotComparable {
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        })
    }

    /// Hash code for a container: registered hasher, else payload identity.
    pub fn hash_code(&self, obj: &Object) -> u64 {
        match obj.type_id().and_then(|id| self.hashers.get(&id)) {
            Some(hash) => hash(obj),
            None => obj.identity_hash(),
        }
    }

    /// Wire tag for the stored type, if a codec is registered.
    pub fn tag_of(&self, obj: &Object) -> Option<&str> {
        obj.type_id()
            .and_then(|id| self.tags.get(&id))
            .map(String::as_str)
    }

    /// Serialize a container to its tagged wire form.
    ///
    /// Fails with [`ObjectError::NotSerializable`] when no codec covers the
    /// stored type.
    pub fn encode(&self, obj: &Object) -> Result<WireValue> {
        if obj.is_null() {
            return Ok(WireValue {
                tag: NULL_TAG.to_string(),
                bytes: Vec::new(),
            });
        }
        let tag = self
            .tag_of(obj)
            .ok_or_else(|| ObjectError::not_serializable(obj.type_name()))?
            .to_string();
        let codec = &self.codecs[&tag];
        Ok(WireValue {
            bytes: (codec.encode)(obj)?,
            tag,
        })
    }

    /// Deserialize a tagged wire value back into a container.
    pub fn decode(&self, wire: &WireValue) -> Result<Object> {
        if wire.tag == NULL_TAG {
            return Ok(Object::null());
        }
        let codec = self
            .codecs
            .get(&wire.tag)
            .ok_or_else(|| ObjectError::not_serializable(wire.tag.clone()))?;
        (codec.decode)(&wire.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_roundtrip() {
        let registry = TypeRegistry::with_builtins();
        let obj = Object::wrap(String::from("over the wire"));
        let wire = registry.encode(&obj).unwrap();
        assert_eq!(wire.tag, "str");
        let back = registry.decode(&wire).unwrap();
        assert_eq!(back.extract::<String>().unwrap(), "over the wire");
    }

    #[test]
    fn test_null_roundtrip() {
        let registry = TypeRegistry::with_builtins();
        let wire = registry.encode(&Object::null()).unwrap();
        assert_eq!(wire.tag, NULL_TAG);
        assert!(registry.decode(&wire).unwrap().is_null());
    }

    #[test]
    fn test_unregistered_type_not_serializable() {
        struct Opaque;
        let registry = TypeRegistry::with_builtins();
        let err = registry.encode(&Object::wrap(Opaque)).unwrap_err();
        assert!(matches!(err, ObjectError::NotSerializable { .. }));
    }

    #[test]
    fn test_numeric_conversions() {
        let registry = TypeRegistry::with_builtins();
        let obj = Object::wrap(42i64);
        assert_eq!(registry.convert_to::<f64>(&obj).unwrap(), 42.0);
        assert_eq!(registry.convert_to::<u64>(&obj).unwrap(), 42);

        let negative = Object::wrap(-1i64);
        let err = registry.convert_to::<u64>(&negative).unwrap_err();
        assert!(matches!(err, ObjectError::NoConversion { .. }));

        let err = registry
            .convert_to::<bool>(&Object::wrap(1i64))
            .unwrap_err();
        assert!(matches!(err, ObjectError::NoConversion { .. }));
    }

    #[test]
    fn test_compare_registered_order() {
        let registry = TypeRegistry::with_builtins();
        let small = Object::wrap(1i64);
        let big = Object::wrap(2i64);
        assert_eq!(registry.compare(&small, &big).unwrap(), Ordering::Less);
        assert_eq!(registry.compare(&big, &small).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_compare_unregistered_falls_back_to_hash() {
        struct Opaque;
        let registry = TypeRegistry::with_builtins();
        let a = Object::wrap(Opaque);
        let b = a.clone();
        // same payload, same identity hash
        assert_eq!(registry.compare(&a, &b).unwrap(), Ordering::Equal);

        let c = Object::wrap(Opaque);
        let err = registry.compare(&a, &c).unwrap_err();
        assert!(matches!(err, ObjectError::NotComparable { .. }));
    }

    #[test]
    fn test_hash_code_by_value() {
        let registry = TypeRegistry::with_builtins();
        let a = Object::wrap(String::from("same"));
        let b = Object::wrap(String::from("same"));
        assert_eq!(registry.hash_code(&a), registry.hash_code(&b));
    }
}
