//! The assembly binary format.
//!
//! An assembly is a single contiguous little-endian buffer: a fixed header
//! followed by densely packed record arrays. Every intra-buffer reference
//! is a self-relative offset (`stored = target_offset − field_offset`,
//! wrapping), so the blob is position independent and may be copied or
//! mapped freely. Alignment padding is zero-filled, and the header carries
//! an FNV-1a/64 hash of the whole blob computed as if the hash field itself
//! were zero.

use relay_types::{
    fnv1a_64, fnv1a_64_with, FunctionId, NameHash, NodeTypeId, TypeId, Value, INVALID_INDEX,
};

use crate::error::LoadError;

/// Current format version.
pub const VERSION: u32 = 0;

/// Header size in bytes, including trailing padding to 8-byte alignment.
pub const HEADER_SIZE: usize = 120;

// Fixed header field offsets.
const OFFSET_VERSION: usize = 0;
const OFFSET_SIZE: usize = 4;
const OFFSET_HASH: usize = 8;
const OFFSET_INPUT_PLUG_COUNT: usize = 16;
const OFFSET_ARRAYS: usize = 20;

// Order of the `{rel_offset, count}` array headers after the fixed fields.
const ARRAY_NODES: usize = 0;
const ARRAY_ENTRY_NODES: usize = 1;
const ARRAY_OUTPUT_PLUGS: usize = 2;
const ARRAY_WIRES: usize = 3;
const ARRAY_INPUT_SLOTS: usize = 4;
const ARRAY_OUTPUT_SLOTS: usize = 5;
const ARRAY_VARIABLES: usize = 6;
const ARRAY_DEPENDENCIES: usize = 7;
const ARRAY_EXPRESSIONS: usize = 8;
const ARRAY_FUNCTIONS: usize = 9;
const ARRAY_CONSTANTS: usize = 10;
const ARRAY_BYTE_CODE: usize = 11;
const ARRAY_COUNT: usize = 12;

static_assertions::const_assert_eq!(OFFSET_ARRAYS + ARRAY_COUNT * 8, 116);

const fn align_to(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// One record array's wire shape: encoded size, alignment, and codec.
trait Record: Sized + Default + Clone {
    const SIZE: usize;
    const ALIGN: usize;

    fn write(&self, bytes: &mut [u8]);
    fn read(bytes: &[u8]) -> Self;
}

/// A compiled node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Host type id resolved at load time.
    pub type_id: NodeTypeId,
    /// Dense output-plug index of the default output plug, or
    /// [`INVALID_INDEX`].
    pub default_output_plug: u32,
    /// First dense index of the node's custom output plugs.
    pub custom_output_plug_start: u32,
    /// Number of custom input plugs.
    pub custom_input_plug_count: u32,
    /// Number of custom output plugs.
    pub custom_output_plug_count: u32,
    /// First dense index of the node's input slots.
    pub input_slot_start: u32,
    /// Number of input slots.
    pub input_slot_count: u32,
    /// First dense index of the node's output slots.
    pub output_slot_start: u32,
    /// Number of output slots.
    pub output_slot_count: u32,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            type_id: NodeTypeId::INVALID,
            default_output_plug: INVALID_INDEX,
            custom_output_plug_start: 0,
            custom_input_plug_count: 0,
            custom_output_plug_count: 0,
            input_slot_start: 0,
            input_slot_count: 0,
            output_slot_start: 0,
            output_slot_count: 0,
        }
    }
}

impl Record for NodeRecord {
    const SIZE: usize = 40;
    const ALIGN: usize = 8;

    fn write(&self, bytes: &mut [u8]) {
        write_u64(bytes, 0, self.type_id.raw());
        write_u32(bytes, 8, self.default_output_plug);
        write_u32(bytes, 12, self.custom_output_plug_start);
        write_u32(bytes, 16, self.custom_input_plug_count);
        write_u32(bytes, 20, self.custom_output_plug_count);
        write_u32(bytes, 24, self.input_slot_start);
        write_u32(bytes, 28, self.input_slot_count);
        write_u32(bytes, 32, self.output_slot_start);
        write_u32(bytes, 36, self.output_slot_count);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            type_id: NodeTypeId::new(read_u64(bytes, 0)),
            default_output_plug: read_u32(bytes, 8),
            custom_output_plug_start: read_u32(bytes, 12),
            custom_input_plug_count: read_u32(bytes, 16),
            custom_output_plug_count: read_u32(bytes, 20),
            input_slot_start: read_u32(bytes, 24),
            input_slot_count: read_u32(bytes, 28),
            output_slot_start: read_u32(bytes, 32),
            output_slot_count: read_u32(bytes, 36),
        }
    }
}

/// A compiled output plug: the span of its outgoing wires.
#[derive(Debug, Clone)]
pub struct OutputPlugRecord {
    /// First dense wire index, or [`INVALID_INDEX`] if unwired.
    pub wire_start: u32,
    /// Number of outgoing wires.
    pub wire_count: u32,
}

impl Default for OutputPlugRecord {
    fn default() -> Self {
        Self {
            wire_start: INVALID_INDEX,
            wire_count: 0,
        }
    }
}

impl Record for OutputPlugRecord {
    const SIZE: usize = 8;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.wire_start);
        write_u32(bytes, 4, self.wire_count);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            wire_start: read_u32(bytes, 0),
            wire_count: read_u32(bytes, 4),
        }
    }
}

/// A compiled wire: its target endpoint.
#[derive(Debug, Clone, Default)]
pub struct WireRecord {
    /// Dense index of the target node.
    pub target_node: u32,
    /// Input plug on the target node; [`relay_types::BEGIN_PLUG`] routes
    /// activation power.
    pub target_input_plug: u8,
}

impl Record for WireRecord {
    const SIZE: usize = 8;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.target_node);
        bytes[4] = self.target_input_plug;
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            target_node: read_u32(bytes, 0),
            target_input_plug: bytes[4],
        }
    }
}

/// A compiled input slot and its (at most one) binding.
#[derive(Debug, Clone)]
pub struct InputSlotRecord {
    /// Bound variable, or [`INVALID_INDEX`].
    pub variable: u32,
    /// Bound expression, or [`INVALID_INDEX`].
    pub expression: u32,
    /// Bound constant, or [`INVALID_INDEX`].
    pub constant: u32,
    /// Dense index of the owning node.
    pub node: u32,
}

impl Default for InputSlotRecord {
    fn default() -> Self {
        Self {
            variable: INVALID_INDEX,
            expression: INVALID_INDEX,
            constant: INVALID_INDEX,
            node: INVALID_INDEX,
        }
    }
}

impl Record for InputSlotRecord {
    const SIZE: usize = 16;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.variable);
        write_u32(bytes, 4, self.expression);
        write_u32(bytes, 8, self.constant);
        write_u32(bytes, 12, self.node);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            variable: read_u32(bytes, 0),
            expression: read_u32(bytes, 4),
            constant: read_u32(bytes, 8),
            node: read_u32(bytes, 12),
        }
    }
}

/// A compiled output slot.
#[derive(Debug, Clone)]
pub struct OutputSlotRecord {
    /// Bound variable, or [`INVALID_INDEX`] for an unbound slot.
    pub variable: u32,
}

impl Default for OutputSlotRecord {
    fn default() -> Self {
        Self {
            variable: INVALID_INDEX,
        }
    }
}

impl Record for OutputSlotRecord {
    const SIZE: usize = 4;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.variable);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            variable: read_u32(bytes, 0),
        }
    }
}

/// A compiled variable and the span of its change dependencies.
#[derive(Debug, Clone, Default)]
pub struct VariableRecord {
    /// FNV-1a/64 of the variable name.
    pub name_hash: NameHash,
    /// First dense dependency index.
    pub dependency_start: u32,
    /// Number of dependencies.
    pub dependency_count: u32,
}

impl Record for VariableRecord {
    const SIZE: usize = 16;
    const ALIGN: usize = 8;

    fn write(&self, bytes: &mut [u8]) {
        write_u64(bytes, 0, self.name_hash.raw());
        write_u32(bytes, 8, self.dependency_start);
        write_u32(bytes, 12, self.dependency_count);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            name_hash: NameHash::from_raw(read_u64(bytes, 0)),
            dependency_start: read_u32(bytes, 8),
            dependency_count: read_u32(bytes, 12),
        }
    }
}

/// A recorded variable → input-slot dependency.
#[derive(Debug, Clone, Default)]
pub struct DependencyRecord {
    /// Dense index of the node that re-reads on change.
    pub node: u32,
    /// Dense index of the input slot that reads the variable.
    pub input_slot: u32,
}

impl Record for DependencyRecord {
    const SIZE: usize = 8;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.node);
        write_u32(bytes, 4, self.input_slot);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            node: read_u32(bytes, 0),
            input_slot: read_u32(bytes, 4),
        }
    }
}

/// A compiled expression: its span of the bytecode stream.
#[derive(Debug, Clone, Default)]
pub struct ExpressionRecord {
    /// First byte of the expression's code.
    pub code_start: u32,
    /// Code length in bytes.
    pub code_count: u32,
}

impl Record for ExpressionRecord {
    const SIZE: usize = 8;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.code_start);
        write_u32(bytes, 4, self.code_count);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            code_start: read_u32(bytes, 0),
            code_count: read_u32(bytes, 4),
        }
    }
}

/// A serialised constant: a type id and up to 64 bits of payload.
///
/// Sufficient for the scalar built-ins; larger payloads need a new table
/// and a version bump.
#[derive(Debug, Clone, Default)]
pub struct ConstantRecord {
    /// The constant's type id.
    pub type_id: TypeId,
    /// Bit pattern of the payload, zero-extended.
    pub serialized: u64,
}

impl ConstantRecord {
    /// Serialise a value.
    pub fn from_value(value: Value) -> Self {
        let serialized = match value {
            Value::Nil => 0,
            Value::Bool(v) => v as u64,
            Value::Int32(v) => v as u32 as u64,
            Value::Float32(v) => v.to_bits() as u64,
        };
        Self {
            type_id: value.type_id(),
            serialized,
        }
    }

    /// Materialise the value, if the type id names a built-in.
    pub fn to_value(&self) -> Result<Value, LoadError> {
        match self.type_id {
            TypeId::NIL => Ok(Value::Nil),
            TypeId::BOOL => Ok(Value::Bool(self.serialized != 0)),
            TypeId::INT32 => Ok(Value::Int32(self.serialized as u32 as i32)),
            TypeId::FLOAT32 => Ok(Value::Float32(f32::from_bits(self.serialized as u32))),
            other => Err(LoadError::UnknownConstantType(other.raw())),
        }
    }
}

impl Record for ConstantRecord {
    const SIZE: usize = 16;
    const ALIGN: usize = 8;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.type_id.raw());
        write_u64(bytes, 8, self.serialized);
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            type_id: TypeId::from_raw(read_u32(bytes, 0)),
            serialized: read_u64(bytes, 8),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EntryNodeRecord(u32);

impl Record for EntryNodeRecord {
    const SIZE: usize = 4;
    const ALIGN: usize = 4;

    fn write(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.0);
    }

    fn read(bytes: &[u8]) -> Self {
        Self(read_u32(bytes, 0))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FunctionIdRecord(u64);

impl Record for FunctionIdRecord {
    const SIZE: usize = 8;
    const ALIGN: usize = 8;

    fn write(&self, bytes: &mut [u8]) {
        write_u64(bytes, 0, self.0);
    }

    fn read(bytes: &[u8]) -> Self {
        Self(read_u64(bytes, 0))
    }
}

/// The decoded contents of an assembly blob.
///
/// Produced by the graph compiler before encoding, and by
/// [`AssemblyData::from_bytes`] after validation when loading.
#[derive(Debug, Clone, Default)]
pub struct AssemblyData {
    /// Total number of custom input plugs across all nodes.
    pub input_plug_count: u32,
    /// Live nodes in source order.
    pub nodes: Vec<NodeRecord>,
    /// Dense indices of the entry nodes.
    pub entry_nodes: Vec<u32>,
    /// Output plugs, default-output first per node, then customs.
    pub output_plugs: Vec<OutputPlugRecord>,
    /// Wires in output-plug order.
    pub wires: Vec<WireRecord>,
    /// Input slots, packed per node.
    pub input_slots: Vec<InputSlotRecord>,
    /// Output slots, packed per node.
    pub output_slots: Vec<OutputSlotRecord>,
    /// Live variables.
    pub variables: Vec<VariableRecord>,
    /// Variable change dependencies, packed per variable.
    pub dependencies: Vec<DependencyRecord>,
    /// Compiled expressions.
    pub expressions: Vec<ExpressionRecord>,
    /// Host function ids referenced by expressions.
    pub functions: Vec<FunctionId>,
    /// Interned constants.
    pub constants: Vec<ConstantRecord>,
    /// The expression bytecode stream.
    pub byte_code: Vec<u8>,
}

struct Layout {
    offsets: [usize; ARRAY_COUNT],
    size: usize,
}

impl AssemblyData {
    fn counts(&self) -> [usize; ARRAY_COUNT] {
        [
            self.nodes.len(),
            self.entry_nodes.len(),
            self.output_plugs.len(),
            self.wires.len(),
            self.input_slots.len(),
            self.output_slots.len(),
            self.variables.len(),
            self.dependencies.len(),
            self.expressions.len(),
            self.functions.len(),
            self.constants.len(),
            self.byte_code.len(),
        ]
    }

    fn layout(&self) -> Layout {
        const SIZES: [(usize, usize); ARRAY_COUNT] = [
            (NodeRecord::SIZE, NodeRecord::ALIGN),
            (EntryNodeRecord::SIZE, EntryNodeRecord::ALIGN),
            (OutputPlugRecord::SIZE, OutputPlugRecord::ALIGN),
            (WireRecord::SIZE, WireRecord::ALIGN),
            (InputSlotRecord::SIZE, InputSlotRecord::ALIGN),
            (OutputSlotRecord::SIZE, OutputSlotRecord::ALIGN),
            (VariableRecord::SIZE, VariableRecord::ALIGN),
            (DependencyRecord::SIZE, DependencyRecord::ALIGN),
            (ExpressionRecord::SIZE, ExpressionRecord::ALIGN),
            (FunctionIdRecord::SIZE, FunctionIdRecord::ALIGN),
            (ConstantRecord::SIZE, ConstantRecord::ALIGN),
            (1, 1),
        ];

        let counts = self.counts();
        let mut offsets = [0usize; ARRAY_COUNT];
        let mut offset = HEADER_SIZE;
        for (index, (size, align)) in SIZES.iter().enumerate() {
            // Empty arrays encode offset 0, as the writer never places one.
            if counts[index] == 0 {
                continue;
            }
            offset = align_to(offset, *align);
            offsets[index] = offset;
            offset += size * counts[index];
        }

        Layout {
            offsets,
            size: offset,
        }
    }

    /// Serialise into a fresh, position-independent blob with a valid hash.
    pub fn encode(&self) -> Vec<u8> {
        let layout = self.layout();
        let counts = self.counts();
        let mut bytes = vec![0u8; layout.size];

        write_u32(&mut bytes, OFFSET_VERSION, VERSION);
        write_u32(&mut bytes, OFFSET_SIZE, layout.size as u32);
        write_u32(&mut bytes, OFFSET_INPUT_PLUG_COUNT, self.input_plug_count);

        for index in 0..ARRAY_COUNT {
            let field = OFFSET_ARRAYS + index * 8;
            let rel = (layout.offsets[index] as u32).wrapping_sub(field as u32);
            write_u32(&mut bytes, field, rel);
            write_u32(&mut bytes, field + 4, counts[index] as u32);
        }

        write_records(&mut bytes, layout.offsets[ARRAY_NODES], &self.nodes);
        let entries: Vec<EntryNodeRecord> =
            self.entry_nodes.iter().map(|&n| EntryNodeRecord(n)).collect();
        write_records(&mut bytes, layout.offsets[ARRAY_ENTRY_NODES], &entries);
        write_records(&mut bytes, layout.offsets[ARRAY_OUTPUT_PLUGS], &self.output_plugs);
        write_records(&mut bytes, layout.offsets[ARRAY_WIRES], &self.wires);
        write_records(&mut bytes, layout.offsets[ARRAY_INPUT_SLOTS], &self.input_slots);
        write_records(&mut bytes, layout.offsets[ARRAY_OUTPUT_SLOTS], &self.output_slots);
        write_records(&mut bytes, layout.offsets[ARRAY_VARIABLES], &self.variables);
        write_records(&mut bytes, layout.offsets[ARRAY_DEPENDENCIES], &self.dependencies);
        write_records(&mut bytes, layout.offsets[ARRAY_EXPRESSIONS], &self.expressions);
        let functions: Vec<FunctionIdRecord> =
            self.functions.iter().map(|f| FunctionIdRecord(f.raw())).collect();
        write_records(&mut bytes, layout.offsets[ARRAY_FUNCTIONS], &functions);
        write_records(&mut bytes, layout.offsets[ARRAY_CONSTANTS], &self.constants);

        if !self.byte_code.is_empty() {
            let start = layout.offsets[ARRAY_BYTE_CODE];
            bytes[start..start + self.byte_code.len()].copy_from_slice(&self.byte_code);
        }

        let hash = hash_assembly(&bytes);
        write_u64(&mut bytes, OFFSET_HASH, hash);

        bytes
    }

    /// Validate `bytes` and decode the assembly they hold.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let size = validate_envelope(bytes)?;
        let bytes = &bytes[..size];

        let arrays = read_array_headers(bytes)?;

        let data = Self {
            input_plug_count: read_u32(bytes, OFFSET_INPUT_PLUG_COUNT),
            nodes: read_records(bytes, arrays[ARRAY_NODES]),
            entry_nodes: read_records::<EntryNodeRecord>(bytes, arrays[ARRAY_ENTRY_NODES])
                .into_iter()
                .map(|record| record.0)
                .collect(),
            output_plugs: read_records(bytes, arrays[ARRAY_OUTPUT_PLUGS]),
            wires: read_records(bytes, arrays[ARRAY_WIRES]),
            input_slots: read_records(bytes, arrays[ARRAY_INPUT_SLOTS]),
            output_slots: read_records(bytes, arrays[ARRAY_OUTPUT_SLOTS]),
            variables: read_records(bytes, arrays[ARRAY_VARIABLES]),
            dependencies: read_records(bytes, arrays[ARRAY_DEPENDENCIES]),
            expressions: read_records(bytes, arrays[ARRAY_EXPRESSIONS]),
            functions: read_records::<FunctionIdRecord>(bytes, arrays[ARRAY_FUNCTIONS])
                .into_iter()
                .map(|record| FunctionId::new(record.0))
                .collect(),
            constants: read_records(bytes, arrays[ARRAY_CONSTANTS]),
            byte_code: {
                let (start, count) = arrays[ARRAY_BYTE_CODE];
                bytes[start..start + count].to_vec()
            },
        };

        data.validate_references()?;
        Ok(data)
    }

    /// Cross-reference validation: every index a record carries must land
    /// inside its target array, and each input slot binds at most one
    /// source.
    fn validate_references(&self) -> Result<(), LoadError> {
        let in_range = |start: u32, count: u32, len: usize| -> bool {
            (start as usize) <= len && (count as usize) <= len - start as usize
        };
        let index_ok = |index: u32, len: usize| index == INVALID_INDEX || (index as usize) < len;

        for node in &self.nodes {
            if !in_range(
                node.custom_output_plug_start,
                node.custom_output_plug_count,
                self.output_plugs.len(),
            ) {
                return Err(LoadError::BadReference {
                    what: "node custom output plugs",
                });
            }
            if !in_range(node.input_slot_start, node.input_slot_count, self.input_slots.len()) {
                return Err(LoadError::BadReference {
                    what: "node input slots",
                });
            }
            if !in_range(
                node.output_slot_start,
                node.output_slot_count,
                self.output_slots.len(),
            ) {
                return Err(LoadError::BadReference {
                    what: "node output slots",
                });
            }
            if !index_ok(node.default_output_plug, self.output_plugs.len()) {
                return Err(LoadError::BadReference {
                    what: "node default output plug",
                });
            }
        }

        for &entry in &self.entry_nodes {
            if entry as usize >= self.nodes.len() {
                return Err(LoadError::BadReference { what: "entry node" });
            }
        }

        for plug in &self.output_plugs {
            // An unwired plug stores an invalid start with a zero count.
            if plug.wire_start == INVALID_INDEX && plug.wire_count == 0 {
                continue;
            }
            if !in_range(plug.wire_start, plug.wire_count, self.wires.len()) {
                return Err(LoadError::BadReference {
                    what: "output plug wires",
                });
            }
        }

        for wire in &self.wires {
            if wire.target_node as usize >= self.nodes.len() {
                return Err(LoadError::BadReference { what: "wire target" });
            }
        }

        for (index, slot) in self.input_slots.iter().enumerate() {
            let bound = [slot.variable, slot.expression, slot.constant]
                .iter()
                .filter(|&&field| field != INVALID_INDEX)
                .count();
            if bound > 1 {
                return Err(LoadError::AmbiguousBinding { slot: index as u32 });
            }
            if !index_ok(slot.variable, self.variables.len()) {
                return Err(LoadError::BadReference {
                    what: "input slot variable",
                });
            }
            if !index_ok(slot.expression, self.expressions.len()) {
                return Err(LoadError::BadReference {
                    what: "input slot expression",
                });
            }
            if !index_ok(slot.constant, self.constants.len()) {
                return Err(LoadError::BadReference {
                    what: "input slot constant",
                });
            }
            if !index_ok(slot.node, self.nodes.len()) {
                return Err(LoadError::BadReference {
                    what: "input slot node",
                });
            }
        }

        for slot in &self.output_slots {
            if !index_ok(slot.variable, self.variables.len()) {
                return Err(LoadError::BadReference {
                    what: "output slot variable",
                });
            }
        }

        for variable in &self.variables {
            if !in_range(
                variable.dependency_start,
                variable.dependency_count,
                self.dependencies.len(),
            ) {
                return Err(LoadError::BadReference {
                    what: "variable dependencies",
                });
            }
        }

        for dependency in &self.dependencies {
            if dependency.node as usize >= self.nodes.len() {
                return Err(LoadError::BadReference {
                    what: "dependency node",
                });
            }
            if dependency.input_slot as usize >= self.input_slots.len() {
                return Err(LoadError::BadReference {
                    what: "dependency input slot",
                });
            }
        }

        for expression in &self.expressions {
            if !in_range(expression.code_start, expression.code_count, self.byte_code.len()) {
                return Err(LoadError::BadReference {
                    what: "expression bytecode",
                });
            }
        }

        Ok(())
    }
}

/// Validate the fixed envelope: header presence, declared size, version,
/// and hash. Returns the declared size.
pub fn validate_envelope(bytes: &[u8]) -> Result<usize, LoadError> {
    if bytes.len() < HEADER_SIZE {
        return Err(LoadError::TooSmall);
    }

    let declared = read_u32(bytes, OFFSET_SIZE);
    if (declared as usize) < HEADER_SIZE || (declared as usize) > bytes.len() {
        return Err(LoadError::SizeMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let version = read_u32(bytes, OFFSET_VERSION);
    if version != VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }

    let stored = read_u64(bytes, OFFSET_HASH);
    if stored != hash_assembly(&bytes[..declared as usize]) {
        return Err(LoadError::HashMismatch);
    }

    Ok(declared as usize)
}

/// Whether `bytes` holds a structurally valid assembly.
pub fn validate(bytes: &[u8]) -> bool {
    AssemblyData::from_bytes(bytes).is_ok()
}

/// The blob hash: the header hashed as if its hash field were zero,
/// chained with every byte after the header.
pub fn hash_assembly(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() >= HEADER_SIZE);

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&bytes[..HEADER_SIZE]);
    header[OFFSET_HASH..OFFSET_HASH + 8].fill(0);

    let hash = fnv1a_64(&header);
    fnv1a_64_with(&bytes[HEADER_SIZE..], hash)
}

fn write_records<R: Record>(bytes: &mut [u8], offset: usize, records: &[R]) {
    for (index, record) in records.iter().enumerate() {
        let start = offset + index * R::SIZE;
        record.write(&mut bytes[start..start + R::SIZE]);
    }
}

fn read_records<R: Record>(bytes: &[u8], (start, count): (usize, usize)) -> Vec<R> {
    (0..count)
        .map(|index| {
            let offset = start + index * R::SIZE;
            R::read(&bytes[offset..offset + R::SIZE])
        })
        .collect()
}

/// Resolve every array header to `(absolute_offset, count)`, checking each
/// span lies inside the blob.
fn read_array_headers(bytes: &[u8]) -> Result<[(usize, usize); ARRAY_COUNT], LoadError> {
    const NAMES: [&str; ARRAY_COUNT] = [
        "nodes",
        "entry_nodes",
        "output_plugs",
        "wires",
        "input_slots",
        "output_slots",
        "variables",
        "dependencies",
        "expressions",
        "functions",
        "constants",
        "byte_code",
    ];
    const ELEM_SIZES: [usize; ARRAY_COUNT] = [
        NodeRecord::SIZE,
        EntryNodeRecord::SIZE,
        OutputPlugRecord::SIZE,
        WireRecord::SIZE,
        InputSlotRecord::SIZE,
        OutputSlotRecord::SIZE,
        VariableRecord::SIZE,
        DependencyRecord::SIZE,
        ExpressionRecord::SIZE,
        FunctionIdRecord::SIZE,
        ConstantRecord::SIZE,
        1,
    ];

    let mut arrays = [(0usize, 0usize); ARRAY_COUNT];
    for index in 0..ARRAY_COUNT {
        let field = OFFSET_ARRAYS + index * 8;
        let rel = read_u32(bytes, field);
        let count = read_u32(bytes, field + 4) as usize;
        if count == 0 {
            continue;
        }

        let start = (field as u32).wrapping_add(rel) as usize;
        let span = count
            .checked_mul(ELEM_SIZES[index])
            .and_then(|len| start.checked_add(len));
        match span {
            Some(end) if start >= HEADER_SIZE && end <= bytes.len() => {
                arrays[index] = (start, count);
            }
            _ => {
                return Err(LoadError::ArrayOutOfBounds {
                    array: NAMES[index],
                })
            }
        }
    }
    Ok(arrays)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AssemblyData {
        AssemblyData {
            input_plug_count: 1,
            nodes: vec![NodeRecord {
                type_id: NodeTypeId::new(0xbaad),
                default_output_plug: 0,
                custom_output_plug_start: 1,
                custom_input_plug_count: 1,
                custom_output_plug_count: 0,
                input_slot_start: 0,
                input_slot_count: 1,
                output_slot_start: 0,
                output_slot_count: 1,
            }],
            entry_nodes: vec![0],
            output_plugs: vec![OutputPlugRecord {
                wire_start: 0,
                wire_count: 1,
            }],
            wires: vec![WireRecord {
                target_node: 0,
                target_input_plug: relay_types::BEGIN_PLUG,
            }],
            input_slots: vec![InputSlotRecord {
                variable: 0,
                expression: INVALID_INDEX,
                constant: INVALID_INDEX,
                node: 0,
            }],
            output_slots: vec![OutputSlotRecord { variable: 0 }],
            variables: vec![VariableRecord {
                name_hash: NameHash::of("Count"),
                dependency_start: 0,
                dependency_count: 1,
            }],
            dependencies: vec![DependencyRecord {
                node: 0,
                input_slot: 0,
            }],
            expressions: vec![ExpressionRecord {
                code_start: 0,
                code_count: 1,
            }],
            functions: vec![FunctionId::new(7)],
            constants: vec![ConstantRecord::from_value(Value::Int32(42))],
            byte_code: vec![0x04],
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let data = sample();
        let bytes = data.encode();
        assert!(validate(&bytes));

        let decoded = AssemblyData::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.nodes.len(), 1);
        assert_eq!(decoded.nodes[0].type_id, NodeTypeId::new(0xbaad));
        assert_eq!(decoded.entry_nodes, vec![0]);
        assert_eq!(decoded.wires[0].target_input_plug, relay_types::BEGIN_PLUG);
        assert_eq!(decoded.variables[0].name_hash, NameHash::of("Count"));
        assert_eq!(decoded.functions, vec![FunctionId::new(7)]);
        assert_eq!(decoded.byte_code, vec![0x04]);
        assert_eq!(decoded.input_plug_count, 1);
    }

    #[test]
    fn stored_hash_matches_zeroed_recomputation() {
        let bytes = sample().encode();
        let stored = read_u64(&bytes, OFFSET_HASH);
        assert_eq!(stored, hash_assembly(&bytes));

        let mut zeroed = bytes.clone();
        zeroed[OFFSET_HASH..OFFSET_HASH + 8].fill(0);
        // Hashing ignores the hash field, so zeroing it changes nothing.
        assert_eq!(hash_assembly(&zeroed), stored);
    }

    #[test]
    fn corruption_fails_validation() {
        let bytes = sample().encode();
        for index in [0usize, 20, HEADER_SIZE, bytes.len() - 1] {
            let mut corrupt = bytes.clone();
            corrupt[index] ^= 0x01;
            assert!(!validate(&corrupt), "corrupting byte {index} passed");
        }
    }

    #[test]
    fn truncation_fails_validation() {
        let bytes = sample().encode();
        assert!(!validate(&bytes[..HEADER_SIZE - 1]));
        assert!(!validate(&bytes[..bytes.len() - 1]));
    }

    #[test]
    fn trailing_bytes_are_tolerated() {
        // The declared size governs; a larger buffer is fine.
        let mut bytes = sample().encode();
        bytes.extend_from_slice(&[0xab; 13]);
        assert!(validate(&bytes));
    }

    #[test]
    fn out_of_range_references_are_rejected() {
        let mut data = sample();
        data.wires[0].target_node = 9;
        assert!(matches!(
            AssemblyData::from_bytes(&data.encode()),
            Err(LoadError::BadReference { what: "wire target" })
        ));

        let mut data = sample();
        data.input_slots[0].expression = 0; // variable is already bound
        assert!(matches!(
            AssemblyData::from_bytes(&data.encode()),
            Err(LoadError::AmbiguousBinding { slot: 0 })
        ));
    }

    #[test]
    fn constants_round_trip_bit_patterns() {
        for value in [
            Value::Nil,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int32(-123456),
            Value::Float32(-0.5),
        ] {
            let record = ConstantRecord::from_value(value);
            assert_eq!(record.to_value().unwrap(), value);
        }

        let unknown = ConstantRecord {
            type_id: TypeId::of("matrix4"),
            serialized: 0,
        };
        assert!(matches!(
            unknown.to_value(),
            Err(LoadError::UnknownConstantType(_))
        ));
    }

    #[test]
    fn empty_assembly_encodes() {
        let data = AssemblyData::default();
        let bytes = data.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert!(validate(&bytes));
    }
}
