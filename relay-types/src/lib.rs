//! Atomic types shared by the relay compiler and runtime crates: tagged
//! values, the type registry, id keys, FNV-1a hashing, and the UUID helper.

#![warn(missing_docs)]

mod hash;
mod ids;
mod registry;
mod uuid;
mod value;

pub use hash::{fnv1a_32, fnv1a_64, fnv1a_64_with, NameHash};
pub use ids::{
    AssemblyIndex, EmitterId, FunctionId, InputPlugIndex, InputSlotIndex, InstanceId, NodeId,
    NodeIndex, NodeKind, NodeTypeId, OutputPlugIndex, OutputSlotIndex, BEGIN_PLUG,
    DEFAULT_OUTPUT_PLUG, INVALID_INDEX,
};
pub use registry::{TypeCopyFn, TypeEqFn, TypeMeta, TypeRegistry};
pub use uuid::{Uuid, UuidError};
pub use value::{TypeId, Value};
