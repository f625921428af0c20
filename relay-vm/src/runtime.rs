//! The runtime proper: instance lifecycle, the event drain, power
//! propagation, slot I/O, and the emitter/listener bus.

use std::sync::Arc;

use relay_expr::{evaluate, EvalError, EvaluateHost};
use relay_types::{
    EmitterId, InputSlotIndex, InstanceId, NameHash, NodeIndex, OutputPlugIndex, OutputSlotIndex,
    Value, BEGIN_PLUG, DEFAULT_OUTPUT_PLUG, INVALID_INDEX,
};
use tracing::{debug, trace};

use crate::assembly::Assembly;
use crate::event::{Event, PendingEvent};
use crate::host::FunctionContext;
use crate::instance::{Instance, Param};

/// Failure of a single slot access. Instance state is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The slot index is outside the node's slot range.
    #[error("no such slot")]
    SlotNotFound,
    /// The slot has no binding to read or write through.
    #[error("slot has no binding")]
    UnboundSlot,
    /// The slot's expression failed to evaluate.
    #[error("expression evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

/// The emitter → input-slot subscription table, global to a runtime.
#[derive(Default)]
struct ListenerTable {
    entries: Vec<Listener>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Listener {
    instance: InstanceId,
    emitter: EmitterId,
    input_slot: u32,
}

impl ListenerTable {
    /// Register a subscription; duplicates coalesce.
    fn add(&mut self, instance: InstanceId, input_slot: u32, emitter: EmitterId) {
        let listener = Listener {
            instance,
            emitter,
            input_slot,
        };
        if !self.entries.contains(&listener) {
            self.entries.push(listener);
        }
    }

    /// Drop one slot's subscriptions, e.g. before it re-evaluates.
    fn forget_slot(&mut self, instance: InstanceId, input_slot: u32) {
        self.entries
            .retain(|entry| entry.instance != instance || entry.input_slot != input_slot);
    }

    /// Drop everything a dying instance registered.
    fn forget_instance(&mut self, instance: InstanceId) {
        self.entries.retain(|entry| entry.instance != instance);
    }
}

/// A single-threaded, cooperative runtime over loaded assemblies.
#[derive(Default)]
pub struct Runtime {
    instances: Vec<Option<Instance>>,
    listeners: ListenerTable,
    next_instance_id: u64,
    next_emitter_id: u64,
}

impl Runtime {
    /// A runtime with no instances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an instance of `assembly`: variables start nil, `params`
    /// are applied as variable writes, and every entry node is queued an
    /// activation for the next [`Self::process_events`].
    pub fn create_instance(&mut self, assembly: &Arc<Assembly>, params: &[Param<'_>]) -> InstanceId {
        let id = InstanceId::new(self.next_instance_id);
        self.next_instance_id += 1;

        let mut instance = Instance::new(id, Arc::clone(assembly));

        for param in params {
            write_variable_by_hash(&mut instance, NameHash::of(param.name), None, param.value);
        }

        for &entry in &assembly.data().entry_nodes {
            instance.events.push(PendingEvent {
                node: entry,
                event: Event::Activate,
            });
        }

        debug!(instance = %id, "instance created");
        self.instances.push(Some(instance));
        id
    }

    /// Destroy an instance: every active node is synchronously sent
    /// `Deactivate` (bypassing the queue), its listeners are scrubbed, and
    /// the assembly reference is released.
    pub fn destroy_instance(&mut self, id: InstanceId) {
        let Some(slot) = self
            .instances
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|instance| instance.id == id))
        else {
            return;
        };

        let mut instance = self.instances[slot].take().expect("slot was occupied");
        for node in 0..instance.active_nodes.len() {
            if instance.active_nodes.get(node) {
                dispatch_event(&mut instance, &mut self.listeners, node as u32, Event::Deactivate);
            }
        }
        self.listeners.forget_instance(id);
        debug!(instance = %id, "instance destroyed");
    }

    /// Read a variable by name.
    pub fn read_variable(&self, id: InstanceId, name: &str) -> Option<Value> {
        let instance = self.find_instance(id)?;
        let name_hash = NameHash::of(name);
        let data = instance.assembly.data();
        data.variables
            .iter()
            .position(|variable| variable.name_hash == name_hash)
            .map(|index| instance.values[index])
    }

    /// Write a variable by name, fanning out dependency events to the
    /// active nodes that read it. Returns false if the instance or
    /// variable is unknown.
    pub fn write_variable(&mut self, id: InstanceId, name: &str, value: Value) -> bool {
        let Some(instance) = self.find_instance_mut(id) else {
            return false;
        };
        write_variable_by_hash(instance, NameHash::of(name), None, value)
    }

    /// Drain every instance's event queue. Events enqueued by handlers
    /// during the drain are processed in the same sweep, FIFO.
    pub fn process_events(&mut self) {
        for index in 0..self.instances.len() {
            let Some(instance) = self.instances[index].as_mut() else {
                continue;
            };

            let mut next = 0;
            while next < instance.events.len() {
                let PendingEvent { node, event } = instance.events[next];
                next += 1;
                process_event(instance, &mut self.listeners, node, event);
            }
            instance.events.clear();
        }
    }

    /// Allocate a fresh emitter id.
    pub fn make_emitter_id(&mut self) -> EmitterId {
        let id = EmitterId::new(self.next_emitter_id);
        self.next_emitter_id += 1;
        id
    }

    /// Queue a `Dependency` event to every node whose input slot listens
    /// to `emitter`.
    pub fn notify_change(&mut self, emitter: EmitterId) {
        let matches: Vec<(InstanceId, u32)> = self
            .listeners
            .entries
            .iter()
            .filter(|listener| listener.emitter == emitter)
            .map(|listener| (listener.instance, listener.input_slot))
            .collect();

        for (instance_id, input_slot) in matches {
            let Some(instance) = self.find_instance_mut(instance_id) else {
                continue;
            };
            let data = instance.assembly.data();
            let Some(slot) = data.input_slots.get(input_slot as usize) else {
                continue;
            };
            if slot.node == INVALID_INDEX {
                continue;
            }
            instance.events.push(PendingEvent {
                node: slot.node,
                event: Event::Dependency,
            });
        }
    }

    fn find_instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances
            .iter()
            .flatten()
            .find(|instance| instance.id == id)
    }

    fn find_instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances
            .iter_mut()
            .flatten()
            .find(|instance| instance.id == id)
    }
}

fn process_event(
    instance: &mut Instance,
    listeners: &mut ListenerTable,
    node: u32,
    event: Event,
) {
    match event {
        Event::Activate => {
            if instance.active_nodes.get(node as usize) {
                return;
            }
            instance.active_nodes.set(node as usize, true);
            dispatch_event(instance, listeners, node, event);
            // Downstream observes the activation once the handler is done.
            set_node_plug_power(instance, node, DEFAULT_OUTPUT_PLUG, true);
        }
        Event::Deactivate => {
            if !instance.active_nodes.get(node as usize) {
                return;
            }
            instance.active_nodes.set(node as usize, false);
            dispatch_event(instance, listeners, node, event);

            let record = instance.assembly.data().nodes[node as usize].clone();
            if record.default_output_plug != INVALID_INDEX {
                set_plug_power(instance, record.default_output_plug, false);
            }
            for offset in 0..record.custom_output_plug_count {
                set_plug_power(instance, record.custom_output_plug_start + offset, false);
            }
        }
        Event::Dependency | Event::CustomInput { .. } => {
            if !instance.active_nodes.get(node as usize) {
                return;
            }
            dispatch_event(instance, listeners, node, event);
        }
    }
}

fn dispatch_event(
    instance: &mut Instance,
    listeners: &mut ListenerTable,
    node: u32,
    event: Event,
) {
    trace!(node, ?event, "dispatch");

    let Some(factory) = instance.assembly.node_factory(node) else {
        // Inert node: power still routes through it, nothing dispatches.
        return;
    };
    let assembly = Arc::clone(&instance.assembly);

    match event {
        Event::Activate => {
            let mut state = factory();
            let mut ctx = NodeContext {
                instance: &mut *instance,
                listeners: &mut *listeners,
                assembly: &assembly,
                node,
            };
            state.on_activate(&mut ctx);
            instance.states[node as usize] = Some(state);
        }
        Event::Deactivate => {
            let Some(mut state) = instance.states[node as usize].take() else {
                return;
            };
            let mut ctx = NodeContext {
                instance: &mut *instance,
                listeners: &mut *listeners,
                assembly: &assembly,
                node,
            };
            state.on_deactivate(&mut ctx);
        }
        Event::Dependency => {
            let Some(mut state) = instance.states[node as usize].take() else {
                return;
            };
            let mut ctx = NodeContext {
                instance: &mut *instance,
                listeners: &mut *listeners,
                assembly: &assembly,
                node,
            };
            state.on_dependency(&mut ctx);
            instance.states[node as usize] = Some(state);
        }
        Event::CustomInput { plug } => {
            let Some(mut state) = instance.states[node as usize].take() else {
                return;
            };
            let mut ctx = NodeContext {
                instance: &mut *instance,
                listeners: &mut *listeners,
                assembly: &assembly,
                node,
            };
            state.on_custom_input(&mut ctx, plug);
            instance.states[node as usize] = Some(state);
        }
    }
}

/// Power a node-relative output plug: the default plug or a custom index.
fn set_node_plug_power(instance: &mut Instance, node: u32, plug: OutputPlugIndex, powered: bool) {
    let record = &instance.assembly.data().nodes[node as usize];

    let dense = if plug == DEFAULT_OUTPUT_PLUG {
        if record.default_output_plug == INVALID_INDEX {
            return;
        }
        record.default_output_plug
    } else if (plug as u32) < record.custom_output_plug_count {
        record.custom_output_plug_start + plug as u32
    } else {
        return;
    };

    set_plug_power(instance, dense, powered);
}

/// Power a dense output plug. A no-op when the level is unchanged;
/// otherwise every wire leaving the plug routes the transition: begin
/// plugs translate to activation power, custom plugs get a `CustomInput`
/// event on the rising edge only.
fn set_plug_power(instance: &mut Instance, plug: u32, powered: bool) {
    if instance.active_output_plugs.get(plug as usize) == powered {
        return;
    }
    instance.active_output_plugs.set(plug as usize, powered);

    let record = instance.assembly.data().output_plugs[plug as usize].clone();
    if record.wire_count == 0 {
        return;
    }

    for offset in 0..record.wire_count {
        let wire = instance.assembly.data().wires[(record.wire_start + offset) as usize].clone();
        if wire.target_input_plug == BEGIN_PLUG {
            instance.events.push(PendingEvent {
                node: wire.target_node,
                event: if powered {
                    Event::Activate
                } else {
                    Event::Deactivate
                },
            });
        } else {
            // Custom input power is level-tracked, but only the rising
            // edge produces an event.
            if let Some(bit) = input_plug_bit(instance, wire.target_node, wire.target_input_plug) {
                instance.active_input_plugs.set(bit, powered);
            }
            if powered {
                instance.events.push(PendingEvent {
                    node: wire.target_node,
                    event: Event::CustomInput {
                        plug: wire.target_input_plug,
                    },
                });
            }
        }
    }
}

/// Position of a node's custom input plug within the instance-wide input
/// plug bit set. Custom input plugs are packed per node in node order.
fn input_plug_bit(instance: &Instance, node: u32, plug: u8) -> Option<usize> {
    let data = instance.assembly.data();
    let record = &data.nodes[node as usize];
    if (plug as u32) >= record.custom_input_plug_count {
        return None;
    }
    let start: u32 = data.nodes[..node as usize]
        .iter()
        .map(|node| node.custom_input_plug_count)
        .sum();
    Some((start + plug as u32) as usize)
}

fn read_input_slot(
    instance: &mut Instance,
    listeners: &mut ListenerTable,
    node: u32,
    slot: InputSlotIndex,
) -> Result<Value, RuntimeError> {
    let assembly = Arc::clone(&instance.assembly);
    let data = assembly.data();
    let record = &data.nodes[node as usize];
    if (slot as u32) >= record.input_slot_count {
        return Err(RuntimeError::SlotNotFound);
    }
    let dense = record.input_slot_start + slot as u32;
    let slot_record = &data.input_slots[dense as usize];

    if slot_record.variable != INVALID_INDEX {
        return Ok(instance.values[slot_record.variable as usize]);
    }
    if slot_record.constant != INVALID_INDEX {
        return Ok(assembly.constant(slot_record.constant));
    }
    if slot_record.expression != INVALID_INDEX {
        let expression = &data.expressions[slot_record.expression as usize];
        let code = &data.byte_code[expression.code_start as usize
            ..(expression.code_start + expression.code_count) as usize];

        // Re-evaluation replaces whatever the slot listened to before.
        listeners.forget_slot(instance.id, dense);

        let mut host = InstanceEvalHost {
            assembly: &assembly,
            values: &instance.values,
            listeners,
            instance: instance.id,
            input_slot: dense,
        };
        return Ok(evaluate(&mut host, code)?);
    }

    Err(RuntimeError::UnboundSlot)
}

fn read_output_slot(
    instance: &Instance,
    node: u32,
    slot: OutputSlotIndex,
) -> Result<Value, RuntimeError> {
    let data = instance.assembly.data();
    let record = &data.nodes[node as usize];
    if (slot as u32) >= record.output_slot_count {
        return Err(RuntimeError::SlotNotFound);
    }
    let slot_record = &data.output_slots[(record.output_slot_start + slot as u32) as usize];
    if slot_record.variable == INVALID_INDEX {
        return Err(RuntimeError::UnboundSlot);
    }
    Ok(instance.values[slot_record.variable as usize])
}

fn write_output_slot(
    instance: &mut Instance,
    node: u32,
    slot: OutputSlotIndex,
    value: Value,
) -> Result<(), RuntimeError> {
    let data = instance.assembly.data();
    let record = &data.nodes[node as usize];
    if (slot as u32) >= record.output_slot_count {
        return Err(RuntimeError::SlotNotFound);
    }
    let variable = data.output_slots[(record.output_slot_start + slot as u32) as usize].variable;
    if variable == INVALID_INDEX {
        return Err(RuntimeError::UnboundSlot);
    }
    write_variable_indexed(instance, variable, Some(node), value);
    Ok(())
}

fn write_variable_by_hash(
    instance: &mut Instance,
    name_hash: NameHash,
    source_node: Option<u32>,
    value: Value,
) -> bool {
    let data = instance.assembly.data();
    let Some(variable) = data
        .variables
        .iter()
        .position(|record| record.name_hash == name_hash)
    else {
        return false;
    };
    write_variable_indexed(instance, variable as u32, source_node, value);
    true
}

/// Write a variable by dense index. Writing an equal value is a no-op;
/// a real change queues `Dependency` events to the variable's dependent
/// nodes, skipping the writing node itself and nodes that are inactive
/// (they re-read on their next activation anyway).
fn write_variable_indexed(
    instance: &mut Instance,
    variable: u32,
    source_node: Option<u32>,
    value: Value,
) {
    if instance.values[variable as usize] == value {
        return;
    }
    instance.values[variable as usize] = value;

    let record = instance.assembly.data().variables[variable as usize].clone();
    for offset in 0..record.dependency_count {
        let dependency = instance.assembly.data().dependencies
            [(record.dependency_start + offset) as usize]
            .clone();

        if Some(dependency.node) == source_node {
            continue;
        }
        if !instance.active_nodes.get(dependency.node as usize) {
            continue;
        }
        instance.events.push(PendingEvent {
            node: dependency.node,
            event: Event::Dependency,
        });
    }
}

/// Expression-evaluation host bound to one instance and the reading slot.
struct InstanceEvalHost<'a> {
    assembly: &'a Assembly,
    values: &'a [Value],
    listeners: &'a mut ListenerTable,
    instance: InstanceId,
    input_slot: u32,
}

impl EvaluateHost for InstanceEvalHost<'_> {
    fn read_constant(&mut self, index: u16) -> Option<Value> {
        self.assembly.constants().get(index as usize).copied()
    }

    fn read_variable(&mut self, index: u16) -> Option<Value> {
        self.values.get(index as usize).copied()
    }

    fn invoke_function(&mut self, index: u16, args: &[Value]) -> Result<Value, EvalError> {
        let function = self
            .assembly
            .function(index as usize)
            .ok_or(EvalError::UnknownFunction(index))?
            .clone();
        let mut ctx = HostFunctionContext {
            args,
            listeners: self.listeners,
            instance: self.instance,
            input_slot: self.input_slot,
        };
        Ok(function(&mut ctx))
    }
}

struct HostFunctionContext<'a> {
    args: &'a [Value],
    listeners: &'a mut ListenerTable,
    instance: InstanceId,
    input_slot: u32,
}

impl FunctionContext for HostFunctionContext<'_> {
    fn argc(&self) -> u32 {
        self.args.len() as u32
    }

    fn arg(&self, index: u32) -> Value {
        self.args.get(index as usize).copied().unwrap_or(Value::Nil)
    }

    fn listen(&mut self, emitter: EmitterId) {
        self.listeners.add(self.instance, self.input_slot, emitter);
    }
}

/// The view a node handler gets of its own node and instance.
pub struct NodeContext<'a> {
    instance: &'a mut Instance,
    listeners: &'a mut ListenerTable,
    assembly: &'a Assembly,
    node: u32,
}

impl NodeContext<'_> {
    /// The owning instance.
    pub fn instance_id(&self) -> InstanceId {
        self.instance.id
    }

    /// The node's dense index within the assembly.
    pub fn node_index(&self) -> NodeIndex {
        self.node
    }

    /// Number of custom input plugs.
    pub fn num_input_plugs(&self) -> u32 {
        self.assembly.data().nodes[self.node as usize].custom_input_plug_count
    }

    /// Number of custom output plugs.
    pub fn num_output_plugs(&self) -> u32 {
        self.assembly.data().nodes[self.node as usize].custom_output_plug_count
    }

    /// Number of input slots.
    pub fn num_input_slots(&self) -> u32 {
        self.assembly.data().nodes[self.node as usize].input_slot_count
    }

    /// Number of output slots.
    pub fn num_output_slots(&self) -> u32 {
        self.assembly.data().nodes[self.node as usize].output_slot_count
    }

    /// Read an input slot through its binding: variable, constant, or
    /// expression.
    pub fn read_input_slot(&mut self, slot: InputSlotIndex) -> Result<Value, RuntimeError> {
        read_input_slot(self.instance, self.listeners, self.node, slot)
    }

    /// Read an output slot's bound variable.
    pub fn read_output_slot(&self, slot: OutputSlotIndex) -> Result<Value, RuntimeError> {
        read_output_slot(self.instance, self.node, slot)
    }

    /// Write an output slot's bound variable. The write is attributed to
    /// this node, so it does not trigger its own dependencies.
    pub fn write_output_slot(
        &mut self,
        slot: OutputSlotIndex,
        value: Value,
    ) -> Result<(), RuntimeError> {
        write_output_slot(self.instance, self.node, slot, value)
    }

    /// Set an output plug's power level. Idempotent per level; changes
    /// enqueue downstream events before returning.
    pub fn set_plug_power(&mut self, plug: OutputPlugIndex, powered: bool) {
        set_node_plug_power(self.instance, self.node, plug, powered);
    }
}
