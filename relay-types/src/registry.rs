//! Process-wide registry mapping type names to stable type descriptors.

use hashbrown::HashMap;

use crate::value::{TypeId, Value};

/// Equality between two values of this type. Only invoked when both operands
/// carry the descriptor's type id.
pub type TypeEqFn = fn(&Value, &Value) -> bool;
/// Copy of a value of this type.
pub type TypeCopyFn = fn(&Value) -> Value;

/// Descriptor of a registered value type.
#[derive(Debug, Clone, Copy)]
pub struct TypeMeta {
    /// The type name; the id is its FNV-1a/32 hash.
    pub name: &'static str,
    /// Interned type identity.
    pub id: TypeId,
    /// Payload size in bytes.
    pub size: u32,
    /// Payload alignment in bytes.
    pub align: u32,
    /// Per-type equality.
    pub eq: TypeEqFn,
    /// Per-type copy.
    pub copy: TypeCopyFn,
}

fn eq_same_type(left: &Value, right: &Value) -> bool {
    left == right
}

fn copy_value(value: &Value) -> Value {
    *value
}

/// Descriptor of the `void` type, id 0.
pub static VOID_META: TypeMeta = TypeMeta {
    name: "void",
    id: TypeId::VOID,
    size: 0,
    align: 0,
    eq: |_, _| true,
    copy: |_| Value::Nil,
};

/// Descriptor of `nil`.
pub static NIL_META: TypeMeta = TypeMeta {
    name: "nil",
    id: TypeId::NIL,
    size: 0,
    align: 1,
    eq: |_, _| true,
    copy: copy_value,
};

/// Descriptor of `int32`.
pub static INT32_META: TypeMeta = TypeMeta {
    name: "int32",
    id: TypeId::INT32,
    size: 4,
    align: 4,
    eq: eq_same_type,
    copy: copy_value,
};

/// Descriptor of `float32`.
pub static FLOAT32_META: TypeMeta = TypeMeta {
    name: "float32",
    id: TypeId::FLOAT32,
    size: 4,
    align: 4,
    eq: eq_same_type,
    copy: copy_value,
};

/// Descriptor of `bool`.
pub static BOOL_META: TypeMeta = TypeMeta {
    name: "bool",
    id: TypeId::BOOL,
    size: 1,
    align: 1,
    eq: eq_same_type,
    copy: copy_value,
};

/// Name → descriptor map, pre-seeded with the built-in types.
///
/// Looking up an unknown name yields [`TypeId::VOID`]; equality between
/// values of unknown types compares false.
#[derive(Debug)]
pub struct TypeRegistry {
    by_name: HashMap<&'static str, &'static TypeMeta>,
    by_id: HashMap<u32, &'static TypeMeta>,
}

impl TypeRegistry {
    /// A registry holding the built-ins: `void`, `nil`, `int32`, `float32`,
    /// and `bool`.
    pub fn new() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        };
        registry.register(&VOID_META);
        registry.register(&NIL_META);
        registry.register(&INT32_META);
        registry.register(&FLOAT32_META);
        registry.register(&BOOL_META);
        registry
    }

    /// Register a type descriptor. The descriptor must be `'static` so the
    /// id can be handed out as a stable reference.
    pub fn register(&mut self, meta: &'static TypeMeta) {
        self.by_name.insert(meta.name, meta);
        self.by_id.insert(meta.id.raw(), meta);
    }

    /// Resolve a type name to its id; `void` if unknown.
    pub fn lookup(&self, name: &str) -> TypeId {
        self.by_name.get(name).map_or(TypeId::VOID, |meta| meta.id)
    }

    /// The descriptor for an id, if registered.
    pub fn meta(&self, id: TypeId) -> Option<&'static TypeMeta> {
        self.by_id.get(&id.raw()).copied()
    }

    /// Equality through the per-type descriptor: false between distinct or
    /// unknown types, nil/nil true.
    pub fn values_equal(&self, left: &Value, right: &Value) -> bool {
        if left.type_id() != right.type_id() {
            return false;
        }
        match self.meta(left.type_id()) {
            Some(meta) => (meta.eq)(left, right),
            None => false,
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.lookup("int32"), TypeId::INT32);
        assert_eq!(registry.lookup("float32"), TypeId::FLOAT32);
        assert_eq!(registry.lookup("bool"), TypeId::BOOL);
        assert_eq!(registry.lookup("nil"), TypeId::NIL);
        assert_eq!(registry.lookup("void"), TypeId::VOID);
        assert_eq!(registry.lookup("no-such-type"), TypeId::VOID);
    }

    #[test]
    fn meta_round_trips_ids() {
        let registry = TypeRegistry::new();
        let meta = registry.meta(TypeId::INT32).unwrap();
        assert_eq!(meta.name, "int32");
        assert_eq!(meta.size, 4);
        assert!(registry.meta(TypeId::of("no-such-type")).is_none());
    }

    #[test]
    fn equality_goes_through_descriptors() {
        let registry = TypeRegistry::new();
        assert!(registry.values_equal(&Value::Nil, &Value::Nil));
        assert!(registry.values_equal(&Value::Int32(2), &Value::Int32(2)));
        assert!(!registry.values_equal(&Value::Int32(2), &Value::Float32(2.0)));
        assert!(!registry.values_equal(&Value::Int32(2), &Value::Int32(3)));
    }
}
