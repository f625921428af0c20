//! Id keys and index types.
//!
//! User-defined keys (`NodeId`, `NodeTypeId`, `FunctionId`) are opaque 64-bit
//! values chosen by the host. System keys (`InstanceId`, `EmitterId`) are
//! allocated monotonically by the runtime. Plug and slot indices are only
//! unique within a single node; dense assembly indices are allocated by the
//! graph compiler.

use core::fmt;

macro_rules! key_u64 {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u64);

        impl $name {
            /// Sentinel for "no key".
            pub const INVALID: Self = Self(u64::MAX);

            /// Wrap a raw key value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw key value.
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Whether the key is not the invalid sentinel.
            pub const fn is_valid(self) -> bool {
                self.0 != u64::MAX
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

key_u64! {
    /// Host-chosen identifier of a node type.
    NodeTypeId
}

key_u64! {
    /// Host-chosen identifier of a callable expression function.
    FunctionId
}

key_u64! {
    /// Author-chosen identifier of a node within a graph.
    NodeId
}

key_u64! {
    /// Runtime-allocated identifier of a change emitter.
    EmitterId
}

key_u64! {
    /// Runtime-allocated identifier of an assembly instance.
    InstanceId
}

/// Index of an input plug, unique within a node.
pub type InputPlugIndex = u8;
/// Index of an output plug, unique within a node.
pub type OutputPlugIndex = u8;
/// Index of an input slot, unique within a node.
pub type InputSlotIndex = u8;
/// Index of an output slot, unique within a node.
pub type OutputSlotIndex = u8;

/// Dense index into one of an assembly's record arrays.
pub type AssemblyIndex = u32;
/// Dense index of a node within a loaded assembly.
pub type NodeIndex = u32;

/// Sentinel for an absent assembly cross-reference.
pub const INVALID_INDEX: AssemblyIndex = 0xFFFF_FFFF;

/// The reserved input plug that carries activation power.
pub const BEGIN_PLUG: InputPlugIndex = 254;
/// The reserved output plug that is powered exactly while its node is active.
pub const DEFAULT_OUTPUT_PLUG: OutputPlugIndex = 254;

/// Execution role of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum NodeKind {
    /// Activated automatically when an instance is created.
    Entry,
    /// Holds power while active; the default output plug mirrors activation.
    State,
    /// Fire-and-forget behavior.
    Action,
}
