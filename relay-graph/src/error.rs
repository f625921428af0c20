/// Graph compile error codes.
///
/// `IllegalPlugPower`, `IllegalPlugCustomId`, and `IncompatiblePowerWire`
/// are reserved for power-typing of wires, which is not enforced yet; the
/// compiler never raises them today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompileErrorCode {
    /// Unclassified failure.
    Unknown,
    /// The graph has no entry nodes.
    NoEntries,
    /// A node declares the begin or default-output plug twice.
    DuplicateBuiltinPlug,
    /// A slot carries more than one binding.
    DuplicateSlotBinding,
    /// The host does not know a node's type id.
    UnknownNodeType,
    /// Reserved: a plug cannot carry power of this kind.
    IllegalPlugPower,
    /// Reserved: a custom plug uses a reserved index.
    IllegalPlugCustomId,
    /// Reserved: a wire connects plugs of incompatible power kinds.
    IncompatiblePowerWire,
    /// A wire endpoint names an unknown node.
    NodeNotFound,
    /// A wire endpoint names an unknown plug.
    PlugNotFound,
    /// A binding names an unknown slot.
    SlotNotFound,
    /// A binding names an unknown variable.
    VariableNotFound,
    /// An expression binding failed to compile.
    ExpressionCompileError,
    /// A binding's value type differs from its slot's declared type.
    IncompatibleType,
}

/// A single accumulated compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompileError {
    /// What went wrong.
    pub code: CompileErrorCode,
}

impl From<CompileErrorCode> for CompileError {
    fn from(code: CompileErrorCode) -> Self {
        Self { code }
    }
}

/// Why a byte buffer was rejected as an assembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The buffer cannot hold a header.
    #[error("buffer too small for an assembly header")]
    TooSmall,
    /// The header's declared size does not fit the buffer.
    #[error("assembly declares {declared} bytes but the buffer holds {actual}")]
    SizeMismatch {
        /// Size from the header.
        declared: u32,
        /// Bytes actually provided.
        actual: usize,
    },
    /// The format version is not understood.
    #[error("unsupported assembly version {0}")]
    UnsupportedVersion(u32),
    /// Stored and recomputed hashes differ.
    #[error("assembly hash mismatch")]
    HashMismatch,
    /// An array header points outside the blob.
    #[error("assembly array `{array}` lies outside the blob")]
    ArrayOutOfBounds {
        /// Which array.
        array: &'static str,
    },
    /// A record index points outside its target array.
    #[error("assembly cross-reference out of range in {what}")]
    BadReference {
        /// Which reference.
        what: &'static str,
    },
    /// An input slot binds more than one of variable/expression/constant.
    #[error("input slot {slot} binds more than one source")]
    AmbiguousBinding {
        /// The offending slot's dense index.
        slot: u32,
    },
    /// A serialised constant names a type the loader cannot materialise.
    #[error("unknown constant type id {0:#010x}")]
    UnknownConstantType(u32),
}
