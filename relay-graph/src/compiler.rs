//! The graph compiler: a stateful builder API plus the compile pass
//! pipeline and the assembly writer.

use relay_asm::Instruction;
use relay_expr::{
    ExpressionBuilder, ExpressionCompiler, ExpressionCompilerHost, FunctionCompileMeta,
};
use relay_types::{
    FunctionId, InputPlugIndex, InputSlotIndex, NameHash, NodeId, NodeKind, NodeTypeId,
    OutputPlugIndex, OutputSlotIndex, TypeId, Value, BEGIN_PLUG, DEFAULT_OUTPUT_PLUG,
    INVALID_INDEX,
};
use tracing::debug;

use crate::error::{CompileError, CompileErrorCode};
use crate::format::{
    AssemblyData, ConstantRecord, DependencyRecord, ExpressionRecord, InputSlotRecord, NodeRecord,
    OutputPlugRecord, OutputSlotRecord, VariableRecord, WireRecord,
};

/// What the host knows about a node type at compile time.
#[derive(Debug, Clone, Copy)]
pub struct NodeCompileMeta {
    /// The node type being described.
    pub type_id: NodeTypeId,
    /// Its execution role.
    pub kind: NodeKind,
}

/// Name and type resolution for the graph compiler.
pub trait GraphCompilerHost {
    /// Resolve a node type id.
    fn lookup_node_type(&self, type_id: NodeTypeId) -> Option<NodeCompileMeta>;
    /// Resolve an expression function by name.
    fn lookup_function(&self, name: &str) -> Option<FunctionCompileMeta>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Reset,
    Compiled,
    Errored,
}

struct Node {
    node_id: NodeId,
    type_id: NodeTypeId,
    kind: NodeKind,
    input_plugs: Vec<u32>,
    output_plugs: Vec<u32>,
    input_slots: Vec<u32>,
    output_slots: Vec<u32>,
    begin_plug: Option<u32>,
    default_output_plug: Option<u32>,
    live: bool,
    index: Option<u32>,
    custom_output_start: u32,
    custom_input_count: u32,
    custom_output_count: u32,
    input_slot_start: u32,
    input_slot_count: u32,
    output_slot_start: u32,
    output_slot_count: u32,
}

impl Node {
    fn new(node_id: NodeId, type_id: NodeTypeId) -> Self {
        Self {
            node_id,
            type_id,
            kind: NodeKind::State,
            input_plugs: Vec::new(),
            output_plugs: Vec::new(),
            input_slots: Vec::new(),
            output_slots: Vec::new(),
            begin_plug: None,
            default_output_plug: None,
            live: false,
            index: None,
            custom_output_start: 0,
            custom_input_count: 0,
            custom_output_count: 0,
            input_slot_start: 0,
            input_slot_count: 0,
            output_slot_start: 0,
            output_slot_count: 0,
        }
    }
}

struct InputPlug {
    plug: InputPlugIndex,
    node: u32,
    live: bool,
}

struct OutputPlug {
    plug: OutputPlugIndex,
    node: u32,
    wires: Vec<u32>,
    live: bool,
    index: Option<u32>,
    wire_start: u32,
    wire_count: u32,
}

struct Wire {
    from_node: NodeId,
    from_plug: OutputPlugIndex,
    to_node: NodeId,
    to_plug: InputPlugIndex,
    output_plug: Option<u32>,
    input_plug: Option<u32>,
    live: bool,
    index: Option<u32>,
}

struct InputSlot {
    slot: InputSlotIndex,
    ty: TypeId,
    node: u32,
    binding: Option<u32>,
    live: bool,
    index: Option<u32>,
}

struct OutputSlot {
    slot: OutputSlotIndex,
    ty: TypeId,
    node: u32,
    binding: Option<u32>,
    live: bool,
    index: Option<u32>,
}

struct Variable {
    name_hash: NameHash,
    ty: TypeId,
    live: bool,
    index: Option<u32>,
    /// Arena indices of the input slots that read this variable.
    dependencies: Vec<u32>,
    dependency_start: u32,
}

enum InputBindingKind {
    Variable(String),
    Expression(u32),
    Constant(u32),
}

/// Lightweight copy of a binding's kind so pass bodies can mutate the
/// compiler while branching on it.
#[derive(Clone, Copy)]
enum BoundKind {
    Variable,
    Expression(u32),
    Constant(u32),
}

struct InputBinding {
    slot: u32,
    kind: InputBindingKind,
    variable: Option<u32>,
    live: bool,
}

struct OutputBinding {
    slot: u32,
    variable_name: String,
    variable: Option<u32>,
    live: bool,
}

struct Expression {
    source: String,
    live: bool,
    index: Option<u32>,
    code_start: u32,
    code_count: u32,
}

/// Compiles authored graphs into assemblies.
///
/// Mutation is only accepted while the compiler is in the reset state; a
/// compile (successful or not) freezes it until [`GraphCompiler::reset`].
pub struct GraphCompiler<'host> {
    host: &'host dyn GraphCompilerHost,
    status: Status,

    nodes: Vec<Node>,
    entries: Vec<u32>,
    input_plugs: Vec<InputPlug>,
    output_plugs: Vec<OutputPlug>,
    wires: Vec<Wire>,
    input_slots: Vec<InputSlot>,
    output_slots: Vec<OutputSlot>,
    variables: Vec<Variable>,
    input_bindings: Vec<InputBinding>,
    output_bindings: Vec<OutputBinding>,
    expressions: Vec<Expression>,
    constants: Vec<Value>,
    functions: Vec<FunctionId>,
    byte_code: Vec<u8>,

    errors: Vec<CompileError>,
    assembly: Vec<u8>,

    open_node: Option<u32>,
    open_input_slot: Option<u32>,
    open_output_slot: Option<u32>,

    compiled_variable_count: u32,
    compiled_dependency_count: u32,
    compiled_input_plug_count: u32,
}

impl<'host> GraphCompiler<'host> {
    /// A fresh compiler working against `host`.
    pub fn new(host: &'host dyn GraphCompilerHost) -> Self {
        Self {
            host,
            status: Status::Reset,
            nodes: Vec::new(),
            entries: Vec::new(),
            input_plugs: Vec::new(),
            output_plugs: Vec::new(),
            wires: Vec::new(),
            input_slots: Vec::new(),
            output_slots: Vec::new(),
            variables: Vec::new(),
            input_bindings: Vec::new(),
            output_bindings: Vec::new(),
            expressions: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            byte_code: Vec::new(),
            errors: Vec::new(),
            assembly: Vec::new(),
            open_node: None,
            open_input_slot: None,
            open_output_slot: None,
            compiled_variable_count: 0,
            compiled_dependency_count: 0,
            compiled_input_plug_count: 0,
        }
    }

    /// Drop all authored state and accept mutation again.
    pub fn reset(&mut self) {
        self.status = Status::Reset;
        self.nodes.clear();
        self.entries.clear();
        self.input_plugs.clear();
        self.output_plugs.clear();
        self.wires.clear();
        self.input_slots.clear();
        self.output_slots.clear();
        self.variables.clear();
        self.input_bindings.clear();
        self.output_bindings.clear();
        self.expressions.clear();
        self.constants.clear();
        self.functions.clear();
        self.byte_code.clear();
        self.errors.clear();
        self.assembly.clear();
        self.open_node = None;
        self.open_input_slot = None;
        self.open_output_slot = None;
        self.compiled_variable_count = 0;
        self.compiled_dependency_count = 0;
        self.compiled_input_plug_count = 0;
    }

    /// Open a node, creating it on first sight. Reopening an id updates its
    /// type and makes it current again.
    pub fn begin_node(&mut self, node_id: NodeId, type_id: NodeTypeId) {
        if self.status != Status::Reset {
            return;
        }

        self.open_input_slot = None;
        self.open_output_slot = None;

        if let Some(index) = self.find_node(node_id) {
            self.nodes[index as usize].type_id = type_id;
            self.open_node = Some(index);
            return;
        }

        self.open_node = Some(self.nodes.len() as u32);
        self.nodes.push(Node::new(node_id, type_id));
    }

    /// Declare an input slot on the open node and make it the open slot.
    pub fn add_input_slot(&mut self, slot: InputSlotIndex, ty: TypeId) {
        let Some(node) = self.open_node.filter(|_| self.status == Status::Reset) else {
            return;
        };

        self.open_output_slot = None;

        if let Some(index) = self
            .input_slots
            .iter()
            .position(|existing| existing.node == node && existing.slot == slot)
        {
            self.input_slots[index].ty = ty;
            self.open_input_slot = Some(index as u32);
            return;
        }

        self.open_input_slot = Some(self.input_slots.len() as u32);
        self.nodes[node as usize]
            .input_slots
            .push(self.input_slots.len() as u32);
        self.input_slots.push(InputSlot {
            slot,
            ty,
            node,
            binding: None,
            live: false,
            index: None,
        });
    }

    /// Declare an output slot on the open node and make it the open slot.
    pub fn add_output_slot(&mut self, slot: OutputSlotIndex, ty: TypeId) {
        let Some(node) = self.open_node.filter(|_| self.status == Status::Reset) else {
            return;
        };

        self.open_input_slot = None;

        if let Some(index) = self
            .output_slots
            .iter()
            .position(|existing| existing.node == node && existing.slot == slot)
        {
            self.output_slots[index].ty = ty;
            self.open_output_slot = Some(index as u32);
            return;
        }

        self.open_output_slot = Some(self.output_slots.len() as u32);
        self.nodes[node as usize]
            .output_slots
            .push(self.output_slots.len() as u32);
        self.output_slots.push(OutputSlot {
            slot,
            ty,
            node,
            binding: None,
            live: false,
            index: None,
        });
    }

    /// Declare an input plug on the open node.
    pub fn add_input_plug(&mut self, plug: InputPlugIndex) {
        let Some(node) = self.open_node.filter(|_| self.status == Status::Reset) else {
            return;
        };

        self.open_input_slot = None;
        self.open_output_slot = None;

        self.nodes[node as usize]
            .input_plugs
            .push(self.input_plugs.len() as u32);
        self.input_plugs.push(InputPlug {
            plug,
            node,
            live: false,
        });
    }

    /// Declare an output plug on the open node.
    pub fn add_output_plug(&mut self, plug: OutputPlugIndex) {
        let Some(node) = self.open_node.filter(|_| self.status == Status::Reset) else {
            return;
        };

        self.open_input_slot = None;
        self.open_output_slot = None;

        self.nodes[node as usize]
            .output_plugs
            .push(self.output_plugs.len() as u32);
        self.output_plugs.push(OutputPlug {
            plug,
            node,
            wires: Vec::new(),
            live: false,
            index: None,
            wire_start: 0,
            wire_count: 0,
        });
    }

    /// Connect an output plug to an input plug. Closes the open node.
    pub fn add_wire(
        &mut self,
        from_node: NodeId,
        from_plug: OutputPlugIndex,
        to_node: NodeId,
        to_plug: InputPlugIndex,
    ) {
        if self.status != Status::Reset {
            return;
        }

        self.open_node = None;
        self.open_input_slot = None;
        self.open_output_slot = None;

        self.wires.push(Wire {
            from_node,
            from_plug,
            to_node,
            to_plug,
            output_plug: None,
            input_plug: None,
            live: false,
            index: None,
        });
    }

    /// Declare a graph variable. Closes the open node.
    pub fn add_variable(&mut self, name: &str, ty: TypeId) {
        if self.status != Status::Reset || name.is_empty() {
            return;
        }

        self.open_node = None;
        self.open_input_slot = None;
        self.open_output_slot = None;

        self.variables.push(Variable {
            name_hash: NameHash::of(name),
            ty,
            live: false,
            index: None,
            dependencies: Vec::new(),
            dependency_start: 0,
        });
    }

    /// Bind the open input slot to a variable by name.
    pub fn bind_slot_variable(&mut self, name: &str) {
        let Some(slot) = self.open_input_slot.filter(|_| self.status == Status::Reset) else {
            return;
        };

        self.input_bindings.push(InputBinding {
            slot,
            kind: InputBindingKind::Variable(name.to_owned()),
            variable: None,
            live: false,
        });
    }

    /// Bind the open input slot to an expression.
    pub fn bind_slot_expression(&mut self, source: &str) {
        let Some(slot) = self.open_input_slot.filter(|_| self.status == Status::Reset) else {
            return;
        };

        let expression = self.expressions.len() as u32;
        self.expressions.push(Expression {
            source: source.to_owned(),
            live: false,
            index: None,
            code_start: 0,
            code_count: 0,
        });
        self.input_bindings.push(InputBinding {
            slot,
            kind: InputBindingKind::Expression(expression),
            variable: None,
            live: false,
        });
    }

    /// Bind the open input slot to a constant value.
    pub fn bind_slot_constant(&mut self, value: Value) {
        let Some(slot) = self.open_input_slot.filter(|_| self.status == Status::Reset) else {
            return;
        };

        let constant = match self.constants.iter().position(|existing| *existing == value) {
            Some(index) => index as u32,
            None => {
                self.constants.push(value);
                (self.constants.len() - 1) as u32
            }
        };
        self.input_bindings.push(InputBinding {
            slot,
            kind: InputBindingKind::Constant(constant),
            variable: None,
            live: false,
        });
    }

    /// Bind the open output slot to a variable by name.
    pub fn bind_output_slot_variable(&mut self, name: &str) {
        let Some(slot) = self.open_output_slot.filter(|_| self.status == Status::Reset) else {
            return;
        };

        self.output_bindings.push(OutputBinding {
            slot,
            variable_name: name.to_owned(),
            variable: None,
            live: false,
        });
    }

    /// Run the compile passes. Errors accumulate; returns `true` iff none
    /// occurred. The compiler freezes afterwards until [`Self::reset`].
    pub fn compile(&mut self) -> bool {
        if self.status != Status::Reset {
            return false;
        }

        self.open_node = None;
        self.open_input_slot = None;
        self.open_output_slot = None;

        self.resolve_nodes();
        self.link_elements();
        self.find_entries();
        self.process_plugs();
        self.update_liveness();
        self.compile_bindings();
        self.allocate_indices();

        let success = self.errors.is_empty();
        self.status = if success {
            Status::Compiled
        } else {
            Status::Errored
        };
        debug!(
            nodes = self.nodes.len(),
            live = self.nodes.iter().filter(|node| node.live).count(),
            errors = self.errors.len(),
            "graph compile finished"
        );
        success
    }

    /// The accumulated compile errors.
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// Serialise the compiled graph. Only valid after a successful
    /// [`Self::compile`]; the bytes are available via [`Self::assembly`].
    pub fn build(&mut self) -> bool {
        if self.status != Status::Compiled {
            return false;
        }

        let data = self.serialize();
        let bytes = data.encode();
        debug_assert!(crate::format::validate(&bytes));
        self.assembly = bytes;
        true
    }

    /// The serialised assembly produced by [`Self::build`].
    pub fn assembly(&self) -> &[u8] {
        &self.assembly
    }

    fn error(&mut self, code: CompileErrorCode) {
        self.errors.push(CompileError { code });
    }

    fn find_node(&self, node_id: NodeId) -> Option<u32> {
        self.nodes
            .iter()
            .position(|node| node.node_id == node_id)
            .map(|index| index as u32)
    }

    // Pass 1: resolve node kinds through the host.
    fn resolve_nodes(&mut self) {
        for index in 0..self.nodes.len() {
            let type_id = self.nodes[index].type_id;
            match self.host.lookup_node_type(type_id) {
                Some(meta) => self.nodes[index].kind = meta.kind,
                None => self.error(CompileErrorCode::UnknownNodeType),
            }
        }
    }

    // Pass 2: resolve wire endpoints and binding targets.
    fn link_elements(&mut self) {
        for index in 0..self.wires.len() {
            let wire = &self.wires[index];
            let (from_node, from_plug, to_node, to_plug) =
                (wire.from_node, wire.from_plug, wire.to_node, wire.to_plug);

            let Some(from) = self.find_node(from_node) else {
                self.error(CompileErrorCode::NodeNotFound);
                continue;
            };
            let Some(to) = self.find_node(to_node) else {
                self.error(CompileErrorCode::NodeNotFound);
                continue;
            };

            let output_plug = self.nodes[from as usize]
                .output_plugs
                .iter()
                .copied()
                .find(|&plug| self.output_plugs[plug as usize].plug == from_plug);
            let Some(output_plug) = output_plug else {
                self.error(CompileErrorCode::PlugNotFound);
                continue;
            };

            let input_plug = self.nodes[to as usize]
                .input_plugs
                .iter()
                .copied()
                .find(|&plug| self.input_plugs[plug as usize].plug == to_plug);
            let Some(input_plug) = input_plug else {
                self.error(CompileErrorCode::PlugNotFound);
                continue;
            };

            self.wires[index].output_plug = Some(output_plug);
            self.wires[index].input_plug = Some(input_plug);
            self.output_plugs[output_plug as usize].wires.push(index as u32);
        }

        for index in 0..self.input_bindings.len() {
            let slot = self.input_bindings[index].slot;
            if self.input_slots[slot as usize].binding.replace(index as u32).is_some() {
                self.error(CompileErrorCode::DuplicateSlotBinding);
                continue;
            }

            if let InputBindingKind::Variable(name) = &self.input_bindings[index].kind {
                let name_hash = NameHash::of(name);
                match self.find_variable(name_hash) {
                    Some(variable) => self.input_bindings[index].variable = Some(variable),
                    None => self.error(CompileErrorCode::VariableNotFound),
                }
            }
        }

        for index in 0..self.output_bindings.len() {
            let slot = self.output_bindings[index].slot;
            if self.output_slots[slot as usize].binding.replace(index as u32).is_some() {
                self.error(CompileErrorCode::DuplicateSlotBinding);
                continue;
            }

            let name_hash = NameHash::of(&self.output_bindings[index].variable_name);
            match self.find_variable(name_hash) {
                Some(variable) => self.output_bindings[index].variable = Some(variable),
                None => self.error(CompileErrorCode::VariableNotFound),
            }
        }
    }

    fn find_variable(&self, name_hash: NameHash) -> Option<u32> {
        self.variables
            .iter()
            .position(|variable| variable.name_hash == name_hash)
            .map(|index| index as u32)
    }

    // Pass 3: collect entry nodes.
    fn find_entries(&mut self) {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.kind == NodeKind::Entry {
                self.entries.push(index as u32);
            }
        }
        if self.entries.is_empty() {
            self.error(CompileErrorCode::NoEntries);
        }
    }

    // Pass 4: identify each node's begin and default-output plugs.
    fn process_plugs(&mut self) {
        for index in 0..self.input_plugs.len() {
            let plug = &self.input_plugs[index];
            if plug.plug != BEGIN_PLUG {
                continue;
            }
            let node = plug.node as usize;
            if self.nodes[node].begin_plug.is_some() {
                self.error(CompileErrorCode::DuplicateBuiltinPlug);
            } else {
                self.nodes[node].begin_plug = Some(index as u32);
            }
        }

        for index in 0..self.output_plugs.len() {
            let plug = &self.output_plugs[index];
            if plug.plug != DEFAULT_OUTPUT_PLUG {
                continue;
            }
            let node = plug.node as usize;
            if self.nodes[node].default_output_plug.is_some() {
                self.error(CompileErrorCode::DuplicateBuiltinPlug);
            } else {
                self.nodes[node].default_output_plug = Some(index as u32);
            }
        }
    }

    // Pass 5: depth-first reachability from the entry nodes. Everything a
    // live node references becomes live transitively; the rest is dropped
    // from the binary.
    fn update_liveness(&mut self) {
        for index in 0..self.entries.len() {
            let entry = self.entries[index];
            self.trace_liveness(entry);
        }
    }

    fn trace_liveness(&mut self, node_index: u32) {
        if self.nodes[node_index as usize].live {
            return;
        }
        self.nodes[node_index as usize].live = true;

        let slots = self.nodes[node_index as usize].input_slots.clone();
        for slot in slots {
            if let Some(binding) = self.input_slots[slot as usize].binding {
                self.input_bindings[binding as usize].live = true;
            }
        }
        let slots = self.nodes[node_index as usize].output_slots.clone();
        for slot in slots {
            if let Some(binding) = self.output_slots[slot as usize].binding {
                self.output_bindings[binding as usize].live = true;
            }
        }

        let plugs = self.nodes[node_index as usize].output_plugs.clone();
        for plug in plugs {
            let wires = self.output_plugs[plug as usize].wires.clone();
            for wire_index in wires {
                let wire = &self.wires[wire_index as usize];
                let (output_plug, input_plug) = match (wire.output_plug, wire.input_plug) {
                    (Some(output_plug), Some(input_plug)) => (output_plug, input_plug),
                    _ => continue,
                };

                self.wires[wire_index as usize].live = true;
                self.output_plugs[output_plug as usize].live = true;
                self.input_plugs[input_plug as usize].live = true;

                let target = self.input_plugs[input_plug as usize].node;
                self.trace_liveness(target);
            }
        }
    }

    // A variable receives its dense assembly index the first time anything
    // live touches it, so `Read` immediates emitted while compiling
    // bindings are final.
    fn touch_variable(&mut self, variable: u32) -> u32 {
        self.variables[variable as usize].live = true;
        if let Some(index) = self.variables[variable as usize].index {
            return index;
        }
        let index = self.compiled_variable_count;
        self.compiled_variable_count += 1;
        self.variables[variable as usize].index = Some(index);
        index
    }

    // Pass 6: type-check and compile the live bindings. Expression
    // bindings are lowered to bytecode here, and every variable a binding
    // reads is recorded as a change dependency of its slot.
    fn compile_bindings(&mut self) {
        let mut expr = ExpressionCompiler::new();

        for index in 0..self.input_bindings.len() {
            if !self.input_bindings[index].live {
                continue;
            }

            let slot = self.input_bindings[index].slot;
            self.input_slots[slot as usize].live = true;
            let slot_ty = self.input_slots[slot as usize].ty;

            let kind = match &self.input_bindings[index].kind {
                InputBindingKind::Variable(_) => BoundKind::Variable,
                InputBindingKind::Expression(expression) => BoundKind::Expression(*expression),
                InputBindingKind::Constant(constant) => BoundKind::Constant(*constant),
            };

            match kind {
                BoundKind::Variable => {
                    let Some(variable) = self.input_bindings[index].variable else {
                        // Unresolved names were reported while linking.
                        continue;
                    };
                    if self.variables[variable as usize].ty != slot_ty {
                        self.error(CompileErrorCode::IncompatibleType);
                        continue;
                    }
                    self.touch_variable(variable);
                    self.variables[variable as usize].dependencies.push(slot);
                }
                BoundKind::Expression(expression) => {
                    let source = self.expressions[expression as usize].source.clone();

                    let compiled = {
                        let host = BindingHost {
                            variables: &self.variables,
                            outer: self.host,
                        };
                        expr.compile(&host, &source)
                    };
                    if compiled.is_err() {
                        self.error(CompileErrorCode::ExpressionCompileError);
                        continue;
                    }
                    if expr.is_empty() {
                        continue;
                    }
                    if expr.result_type() != slot_ty {
                        self.error(CompileErrorCode::IncompatibleType);
                        continue;
                    }
                    if expr.optimize().is_err() {
                        self.error(CompileErrorCode::ExpressionCompileError);
                        continue;
                    }

                    let code_start = self.byte_code.len() as u32;
                    let built = {
                        let mut builder = BindingBuilder {
                            byte_code: &mut self.byte_code,
                            constants: &mut self.constants,
                            functions: &mut self.functions,
                            variables: &mut self.variables,
                            variable_count: &mut self.compiled_variable_count,
                            slot,
                            used: Vec::new(),
                        };
                        expr.build(&mut builder)
                    };
                    if built.is_err() {
                        self.error(CompileErrorCode::ExpressionCompileError);
                        continue;
                    }

                    let record = &mut self.expressions[expression as usize];
                    record.live = true;
                    record.code_start = code_start;
                    record.code_count = self.byte_code.len() as u32 - code_start;
                }
                BoundKind::Constant(constant) => {
                    if self.constants[constant as usize].type_id() != slot_ty {
                        self.error(CompileErrorCode::IncompatibleType);
                        continue;
                    }
                }
            }
        }

        for index in 0..self.output_bindings.len() {
            if !self.output_bindings[index].live {
                continue;
            }

            let slot = self.output_bindings[index].slot;
            self.output_slots[slot as usize].live = true;

            let Some(variable) = self.output_bindings[index].variable else {
                continue;
            };
            if self.variables[variable as usize].ty != self.output_slots[slot as usize].ty {
                self.error(CompileErrorCode::IncompatibleType);
                continue;
            }
            self.touch_variable(variable);
        }
    }

    // Pass 7: assign dense assembly indices to everything that survived.
    // Variables were indexed on first touch while compiling bindings; here
    // their dependency spans are packed, then nodes get their plug and
    // slot ranges in source order, and wires follow output-plug order.
    fn allocate_indices(&mut self) {
        let mut dependency_count = 0u32;
        for variable in &mut self.variables {
            if !variable.live {
                continue;
            }
            variable.dependency_start = dependency_count;
            dependency_count += variable.dependencies.len() as u32;
        }
        self.compiled_dependency_count = dependency_count;

        let mut node_count = 0u32;
        let mut output_plug_count = 0u32;
        let mut input_plug_count = 0u32;
        let mut input_slot_count = 0u32;
        let mut output_slot_count = 0u32;

        for node_index in 0..self.nodes.len() {
            if !self.nodes[node_index].live {
                continue;
            }

            self.nodes[node_index].index = Some(node_count);
            node_count += 1;

            // The default output plug always occupies the first index of
            // the node's plug range.
            if let Some(plug) = self.nodes[node_index].default_output_plug {
                if self.output_plugs[plug as usize].live {
                    self.output_plugs[plug as usize].index = Some(output_plug_count);
                    output_plug_count += 1;
                }
            }

            let mut custom_input_count = 0u32;
            for &plug in &self.nodes[node_index].input_plugs {
                let plug = &self.input_plugs[plug as usize];
                if plug.live && plug.plug != BEGIN_PLUG {
                    custom_input_count = custom_input_count.max(plug.plug as u32 + 1);
                }
            }
            self.nodes[node_index].custom_input_count = custom_input_count;
            input_plug_count += custom_input_count;

            let custom_output_start = output_plug_count;
            let mut custom_output_count = 0u32;
            let plugs = self.nodes[node_index].output_plugs.clone();
            for plug_index in plugs {
                let plug = &self.output_plugs[plug_index as usize];
                if !plug.live || plug.plug == DEFAULT_OUTPUT_PLUG {
                    continue;
                }
                let offset = plug.plug as u32;
                self.output_plugs[plug_index as usize].index = Some(custom_output_start + offset);
                custom_output_count = custom_output_count.max(offset + 1);
            }
            self.nodes[node_index].custom_output_start = custom_output_start;
            self.nodes[node_index].custom_output_count = custom_output_count;
            output_plug_count += custom_output_count;

            let input_slot_start = input_slot_count;
            let mut node_input_slots = 0u32;
            let slots = self.nodes[node_index].input_slots.clone();
            for slot_index in slots {
                let slot = &self.input_slots[slot_index as usize];
                if !slot.live {
                    continue;
                }
                let offset = slot.slot as u32;
                self.input_slots[slot_index as usize].index = Some(input_slot_start + offset);
                node_input_slots = node_input_slots.max(offset + 1);
            }
            self.nodes[node_index].input_slot_start = input_slot_start;
            self.nodes[node_index].input_slot_count = node_input_slots;
            input_slot_count += node_input_slots;

            let output_slot_start = output_slot_count;
            let mut node_output_slots = 0u32;
            let slots = self.nodes[node_index].output_slots.clone();
            for slot_index in slots {
                let slot = &self.output_slots[slot_index as usize];
                if !slot.live {
                    continue;
                }
                let offset = slot.slot as u32;
                self.output_slots[slot_index as usize].index = Some(output_slot_start + offset);
                node_output_slots = node_output_slots.max(offset + 1);
            }
            self.nodes[node_index].output_slot_start = output_slot_start;
            self.nodes[node_index].output_slot_count = node_output_slots;
            output_slot_count += node_output_slots;
        }
        self.compiled_input_plug_count = input_plug_count;

        let mut wire_count = 0u32;
        for plug_index in 0..self.output_plugs.len() {
            if !self.output_plugs[plug_index].live {
                continue;
            }
            let wire_start = wire_count;
            let wires = self.output_plugs[plug_index].wires.clone();
            for wire_index in wires {
                if self.wires[wire_index as usize].live {
                    self.wires[wire_index as usize].index = Some(wire_count);
                    wire_count += 1;
                }
            }
            self.output_plugs[plug_index].wire_start = wire_start;
            self.output_plugs[plug_index].wire_count = wire_count - wire_start;
        }

        let mut expression_count = 0u32;
        for expression in &mut self.expressions {
            if expression.live {
                expression.index = Some(expression_count);
                expression_count += 1;
            }
        }
    }

    // Fill the serialised record arrays through the indices the passes
    // assigned.
    fn serialize(&self) -> AssemblyData {
        let node_count = self.nodes.iter().filter(|node| node.live).count();
        let output_plug_count = self
            .nodes
            .iter()
            .filter(|node| node.live)
            .map(|node| {
                node.custom_output_count
                    + node
                        .default_output_plug
                        .map_or(0, |plug| self.output_plugs[plug as usize].index.is_some() as u32)
            })
            .sum::<u32>() as usize;
        let wire_count = self.wires.iter().filter(|wire| wire.index.is_some()).count();
        let input_slot_count = self
            .nodes
            .iter()
            .filter(|node| node.live)
            .map(|node| node.input_slot_count)
            .sum::<u32>() as usize;
        let output_slot_count = self
            .nodes
            .iter()
            .filter(|node| node.live)
            .map(|node| node.output_slot_count)
            .sum::<u32>() as usize;
        let variable_count = self.compiled_variable_count as usize;
        let expression_count = self
            .expressions
            .iter()
            .filter(|expression| expression.live)
            .count();

        let mut data = AssemblyData {
            input_plug_count: self.compiled_input_plug_count,
            nodes: vec![NodeRecord::default(); node_count],
            entry_nodes: Vec::with_capacity(self.entries.len()),
            output_plugs: vec![OutputPlugRecord::default(); output_plug_count],
            wires: vec![WireRecord::default(); wire_count],
            input_slots: vec![InputSlotRecord::default(); input_slot_count],
            output_slots: vec![OutputSlotRecord::default(); output_slot_count],
            variables: vec![VariableRecord::default(); variable_count],
            dependencies: vec![DependencyRecord::default(); self.compiled_dependency_count as usize],
            expressions: vec![ExpressionRecord::default(); expression_count],
            functions: self.functions.clone(),
            constants: self
                .constants
                .iter()
                .map(|value| ConstantRecord::from_value(*value))
                .collect(),
            byte_code: self.byte_code.clone(),
        };

        for node in self.nodes.iter().filter(|node| node.live) {
            let index = node.index.expect("live node has an index") as usize;
            data.nodes[index] = NodeRecord {
                type_id: node.type_id,
                default_output_plug: node
                    .default_output_plug
                    .and_then(|plug| self.output_plugs[plug as usize].index)
                    .unwrap_or(INVALID_INDEX),
                custom_output_plug_start: node.custom_output_start,
                custom_input_plug_count: node.custom_input_count,
                custom_output_plug_count: node.custom_output_count,
                input_slot_start: node.input_slot_start,
                input_slot_count: node.input_slot_count,
                output_slot_start: node.output_slot_start,
                output_slot_count: node.output_slot_count,
            };
        }

        for &entry in &self.entries {
            let index = self.nodes[entry as usize]
                .index
                .expect("entry nodes are always live");
            data.entry_nodes.push(index);
        }

        for plug in &self.output_plugs {
            let Some(index) = plug.index else {
                continue;
            };
            data.output_plugs[index as usize] = OutputPlugRecord {
                wire_start: plug.wire_start,
                wire_count: plug.wire_count,
            };
        }

        for wire in &self.wires {
            let Some(index) = wire.index else {
                continue;
            };
            let input_plug = wire.input_plug.expect("indexed wire was linked");
            let target = self.input_plugs[input_plug as usize].node;
            data.wires[index as usize] = WireRecord {
                target_node: self.nodes[target as usize].index.expect("wire target is live"),
                target_input_plug: wire.to_plug,
            };
        }

        for slot in &self.input_slots {
            let Some(index) = slot.index else {
                continue;
            };
            let mut record = InputSlotRecord {
                node: self.nodes[slot.node as usize].index.expect("slot node is live"),
                ..InputSlotRecord::default()
            };
            if let Some(binding) = slot.binding {
                let binding = &self.input_bindings[binding as usize];
                match &binding.kind {
                    InputBindingKind::Variable(_) => {
                        if let Some(variable) = binding.variable {
                            record.variable =
                                self.variables[variable as usize].index.unwrap_or(INVALID_INDEX);
                        }
                    }
                    InputBindingKind::Expression(expression) => {
                        record.expression = self.expressions[*expression as usize]
                            .index
                            .unwrap_or(INVALID_INDEX);
                    }
                    InputBindingKind::Constant(constant) => {
                        record.constant = *constant;
                    }
                }
            }
            data.input_slots[index as usize] = record;
        }

        for slot in &self.output_slots {
            let Some(index) = slot.index else {
                continue;
            };
            let variable = slot
                .binding
                .and_then(|binding| self.output_bindings[binding as usize].variable)
                .and_then(|variable| self.variables[variable as usize].index)
                .unwrap_or(INVALID_INDEX);
            data.output_slots[index as usize] = OutputSlotRecord { variable };
        }

        for variable in &self.variables {
            let Some(index) = variable.index else {
                continue;
            };
            data.variables[index as usize] = VariableRecord {
                name_hash: variable.name_hash,
                dependency_start: variable.dependency_start,
                dependency_count: variable.dependencies.len() as u32,
            };

            for (offset, &slot) in variable.dependencies.iter().enumerate() {
                let slot = &self.input_slots[slot as usize];
                data.dependencies[variable.dependency_start as usize + offset] = DependencyRecord {
                    node: self.nodes[slot.node as usize]
                        .index
                        .expect("dependency node is live"),
                    input_slot: slot.index.expect("dependency slot is live"),
                };
            }
        }

        for expression in &self.expressions {
            let Some(index) = expression.index else {
                continue;
            };
            data.expressions[index as usize] = ExpressionRecord {
                code_start: expression.code_start,
                code_count: expression.code_count,
            };
        }

        data
    }
}

/// Expression-compiler host used while compiling bindings: variables
/// resolve against the graph's variable table, functions against the
/// outer host.
struct BindingHost<'a> {
    variables: &'a [Variable],
    outer: &'a dyn GraphCompilerHost,
}

impl ExpressionCompilerHost for BindingHost<'_> {
    fn lookup_variable(&self, name: &str) -> Option<TypeId> {
        let name_hash = NameHash::of(name);
        self.variables
            .iter()
            .find(|variable| variable.name_hash == name_hash)
            .map(|variable| variable.ty)
    }

    fn lookup_function(&self, name: &str) -> Option<FunctionCompileMeta> {
        self.outer.lookup_function(name)
    }
}

/// Expression builder that interns into the assembly-wide tables and
/// records which variables the open slot reads.
struct BindingBuilder<'a> {
    byte_code: &'a mut Vec<u8>,
    constants: &'a mut Vec<Value>,
    functions: &'a mut Vec<FunctionId>,
    variables: &'a mut Vec<Variable>,
    variable_count: &'a mut u32,
    slot: u32,
    used: Vec<NameHash>,
}

impl ExpressionBuilder for BindingBuilder<'_> {
    fn emit(&mut self, instruction: Instruction) {
        instruction.encode(self.byte_code);
    }

    fn push_constant(&mut self, value: Value) -> Option<u16> {
        if let Some(index) = self.constants.iter().position(|existing| *existing == value) {
            return u16::try_from(index).ok();
        }
        self.constants.push(value);
        u16::try_from(self.constants.len() - 1).ok()
    }

    fn push_function(&mut self, function: FunctionId) -> Option<u16> {
        if let Some(index) = self.functions.iter().position(|existing| *existing == function) {
            return u16::try_from(index).ok();
        }
        self.functions.push(function);
        u16::try_from(self.functions.len() - 1).ok()
    }

    fn push_variable(&mut self, name_hash: NameHash) -> Option<u16> {
        let arena = self
            .variables
            .iter()
            .position(|variable| variable.name_hash == name_hash)?;

        let variable = &mut self.variables[arena];
        variable.live = true;
        let index = match variable.index {
            Some(index) => index,
            None => {
                let index = *self.variable_count;
                *self.variable_count += 1;
                variable.index = Some(index);
                index
            }
        };

        // Each variable becomes a dependency of the reading slot once,
        // however often the expression mentions it.
        if !self.used.contains(&name_hash) {
            self.used.push(name_hash);
            variable.dependencies.push(self.slot);
        }

        u16::try_from(index).ok()
    }
}
