use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use relay_expr::FunctionCompileMeta;
use relay_graph::{GraphCompiler, GraphCompilerHost, NodeCompileMeta};
use relay_types::{
    EmitterId, FunctionId, NodeId, NodeKind, NodeTypeId, TypeId, TypeMeta, TypeRegistry, Value,
    BEGIN_PLUG, DEFAULT_OUTPUT_PLUG,
};
use relay_vm::{
    load_assembly, FunctionRuntimeMeta, Node, NodeContext, NodeRuntimeMeta, Param, Runtime,
    RuntimeHost,
};

const ENTRY_TYPE: NodeTypeId = NodeTypeId::new(1);
const CONDITION_TYPE: NodeTypeId = NodeTypeId::new(2);
const COUNTER_TYPE: NodeTypeId = NodeTypeId::new(3);
const CANARY_TYPE: NodeTypeId = NodeTypeId::new(4);
const SET_TYPE: NodeTypeId = NodeTypeId::new(5);
const EMPTY_TYPE: NodeTypeId = NodeTypeId::new(6);
const TOGGLE_TYPE: NodeTypeId = NodeTypeId::new(7);
const PROBE_TYPE: NodeTypeId = NodeTypeId::new(8);

const SERIES_FN: FunctionId = FunctionId::new(0);
const READ_FLAG_FN: FunctionId = FunctionId::new(1);
const READ_FLAG_NUM_FN: FunctionId = FunctionId::new(2);

struct CompilerHost;

impl GraphCompilerHost for CompilerHost {
    fn lookup_node_type(&self, type_id: NodeTypeId) -> Option<NodeCompileMeta> {
        let kind = match type_id {
            t if t == ENTRY_TYPE => NodeKind::Entry,
            t if t == CONDITION_TYPE
                || t == COUNTER_TYPE
                || t == CANARY_TYPE
                || t == SET_TYPE
                || t == EMPTY_TYPE
                || t == TOGGLE_TYPE
                || t == PROBE_TYPE =>
            {
                NodeKind::State
            }
            _ => return None,
        };
        Some(NodeCompileMeta { type_id, kind })
    }

    fn lookup_function(&self, name: &str) -> Option<FunctionCompileMeta> {
        let (function, return_type) = match name {
            "series" => (SERIES_FN, TypeId::INT32),
            "readFlag" => (READ_FLAG_FN, TypeId::BOOL),
            "readFlagNum" => (READ_FLAG_NUM_FN, TypeId::INT32),
            _ => return None,
        };
        Some(FunctionCompileMeta {
            function,
            return_type,
            params: None,
        })
    }
}

/// Runtime host assembled per test from registered nodes and functions.
struct TestRuntimeHost {
    nodes: Vec<(NodeTypeId, NodeRuntimeMeta)>,
    functions: Vec<(FunctionId, FunctionRuntimeMeta)>,
    types: TypeRegistry,
}

impl TestRuntimeHost {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            functions: Vec::new(),
            types: TypeRegistry::new(),
        }
    }

    fn register_node(&mut self, type_id: NodeTypeId, meta: NodeRuntimeMeta) {
        self.nodes.push((type_id, meta));
    }

    fn register_function(&mut self, function: FunctionId, meta: FunctionRuntimeMeta) {
        self.functions.push((function, meta));
    }
}

impl RuntimeHost for TestRuntimeHost {
    fn lookup_node(&self, type_id: NodeTypeId) -> Option<NodeRuntimeMeta> {
        self.nodes
            .iter()
            .find(|(registered, _)| *registered == type_id)
            .map(|(_, meta)| meta.clone())
    }

    fn lookup_function(&self, function: FunctionId) -> Option<FunctionRuntimeMeta> {
        self.functions
            .iter()
            .find(|(registered, _)| *registered == function)
            .map(|(_, meta)| meta.clone())
    }

    fn lookup_type(&self, type_id: TypeId) -> Option<&'static TypeMeta> {
        self.types.meta(type_id)
    }
}

/// Routes power to plug 0 while its condition slot reads true, plug 1
/// while it reads false.
#[derive(Default)]
struct Condition;

impl Condition {
    fn update(ctx: &mut NodeContext<'_>) {
        let value = ctx
            .read_input_slot(0)
            .ok()
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        ctx.set_plug_power(0, value);
        ctx.set_plug_power(1, !value);
    }
}

impl Node for Condition {
    fn on_activate(&mut self, ctx: &mut NodeContext<'_>) {
        Self::update(ctx);
    }

    fn on_dependency(&mut self, ctx: &mut NodeContext<'_>) {
        Self::update(ctx);
    }
}

/// Adds its increment slot to its counter slot while active, and takes it
/// back off on deactivation.
#[derive(Default)]
struct Counter {
    increment: i32,
}

impl Node for Counter {
    fn on_activate(&mut self, ctx: &mut NodeContext<'_>) {
        let counter = ctx
            .read_output_slot(0)
            .ok()
            .and_then(|value| value.as_i32())
            .unwrap_or(0);
        self.increment = ctx
            .read_input_slot(1)
            .ok()
            .and_then(|value| value.as_i32())
            .unwrap_or(0);
        let _ = ctx.write_output_slot(0, Value::Int32(counter + self.increment));
    }

    fn on_deactivate(&mut self, ctx: &mut NodeContext<'_>) {
        let counter = ctx
            .read_output_slot(0)
            .ok()
            .and_then(|value| value.as_i32())
            .unwrap_or(0);
        let _ = ctx.write_output_slot(0, Value::Int32(counter - self.increment));
    }
}

/// Flips a shared flag while active.
struct Canary {
    active: Arc<AtomicBool>,
}

impl Node for Canary {
    fn on_activate(&mut self, _ctx: &mut NodeContext<'_>) {
        self.active.store(true, Ordering::Relaxed);
    }

    fn on_deactivate(&mut self, _ctx: &mut NodeContext<'_>) {
        self.active.store(false, Ordering::Relaxed);
    }
}

fn canary_meta(active: Arc<AtomicBool>) -> NodeRuntimeMeta {
    NodeRuntimeMeta {
        factory: Some(Arc::new(move || {
            Box::new(Canary {
                active: active.clone(),
            })
        })),
    }
}

/// Copies each input slot to the matching output slot on activation and
/// whenever a read variable changes.
#[derive(Default)]
struct Set;

impl Set {
    fn update(ctx: &mut NodeContext<'_>) {
        for slot in 0..ctx.num_output_slots() as u8 {
            if let Ok(value) = ctx.read_input_slot(slot) {
                let _ = ctx.write_output_slot(slot, value);
            }
        }
    }
}

impl Node for Set {
    fn on_activate(&mut self, ctx: &mut NodeContext<'_>) {
        Self::update(ctx);
    }

    fn on_dependency(&mut self, ctx: &mut NodeContext<'_>) {
        Self::update(ctx);
    }
}

/// Counts rising edges on its custom input plug.
struct Toggle {
    edges: Arc<AtomicU32>,
}

impl Node for Toggle {
    fn on_activate(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_custom_input(&mut self, _ctx: &mut NodeContext<'_>, _plug: u8) {
        self.edges.fetch_add(1, Ordering::Relaxed);
    }
}

fn toggle_meta(edges: Arc<AtomicU32>) -> NodeRuntimeMeta {
    NodeRuntimeMeta {
        factory: Some(Arc::new(move || {
            Box::new(Toggle {
                edges: edges.clone(),
            })
        })),
    }
}

fn series_meta() -> FunctionRuntimeMeta {
    FunctionRuntimeMeta {
        function: Arc::new(|ctx| {
            let mut result = 1i32;
            for index in 0..ctx.argc() {
                result *= ctx.arg(index).as_i32().unwrap_or(0);
            }
            Value::Int32(result)
        }),
    }
}

fn read_flag_meta(flag: Arc<AtomicBool>, emitter: EmitterId) -> FunctionRuntimeMeta {
    FunctionRuntimeMeta {
        function: Arc::new(move |ctx| {
            ctx.listen(emitter);
            Value::Bool(flag.load(Ordering::Relaxed))
        }),
    }
}

fn read_flag_num_meta(flag: Arc<AtomicBool>, emitter: EmitterId) -> FunctionRuntimeMeta {
    FunctionRuntimeMeta {
        function: Arc::new(move |ctx| {
            ctx.listen(emitter);
            Value::Int32(flag.load(Ordering::Relaxed) as i32)
        }),
    }
}

#[test]
fn condition_flip_drives_counters() {
    // Entry powers a condition node; the condition's true plug powers a
    // counter and an increment bumper, its false plug powers a canary.
    let compiler_host = CompilerHost;
    let mut compiler = GraphCompiler::new(&compiler_host);

    let entry = NodeId::new(0);
    let condition = NodeId::new(2);
    let counter = NodeId::new(3);
    let unused = NodeId::new(17);
    let canary = NodeId::new(5);
    let toggle = NodeId::new(999);
    let set_result = NodeId::new(1790);
    let set_increment = NodeId::new(2000);

    compiler.add_variable("Count", TypeId::INT32);
    compiler.add_variable("Result", TypeId::INT32);
    compiler.add_variable("Increment", TypeId::INT32);

    compiler.begin_node(entry, ENTRY_TYPE);
    compiler.add_output_plug(DEFAULT_OUTPUT_PLUG);

    compiler.begin_node(condition, CONDITION_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);
    compiler.add_output_plug(0);
    compiler.add_output_plug(1);
    compiler.add_input_slot(0, TypeId::BOOL);
    compiler.bind_slot_expression("readFlag()");

    compiler.begin_node(counter, COUNTER_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);
    compiler.add_output_slot(0, TypeId::INT32);
    compiler.bind_output_slot_variable("Count");
    compiler.add_input_slot(1, TypeId::INT32);
    compiler.bind_slot_expression("series(2, 1, 2) + readFlagNum()");

    compiler.begin_node(unused, EMPTY_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);

    compiler.begin_node(canary, CANARY_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);

    compiler.begin_node(toggle, TOGGLE_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);
    compiler.add_input_plug(0);

    compiler.begin_node(set_result, SET_TYPE);
    compiler.add_output_slot(0, TypeId::INT32);
    compiler.bind_output_slot_variable("Result");
    compiler.add_input_slot(0, TypeId::INT32);
    compiler.bind_slot_expression("Count * 2");
    compiler.add_input_plug(BEGIN_PLUG);

    compiler.begin_node(set_increment, SET_TYPE);
    compiler.add_output_slot(0, TypeId::INT32);
    compiler.bind_output_slot_variable("Increment");
    compiler.add_input_slot(0, TypeId::INT32);
    compiler.bind_slot_expression("Increment + 1");
    compiler.add_input_plug(BEGIN_PLUG);

    compiler.add_wire(entry, DEFAULT_OUTPUT_PLUG, condition, BEGIN_PLUG);
    compiler.add_wire(condition, 0, counter, BEGIN_PLUG);
    compiler.add_wire(condition, 1, canary, BEGIN_PLUG);
    compiler.add_wire(entry, DEFAULT_OUTPUT_PLUG, toggle, BEGIN_PLUG);
    compiler.add_wire(condition, 0, toggle, 0);
    compiler.add_wire(entry, DEFAULT_OUTPUT_PLUG, set_result, BEGIN_PLUG);
    compiler.add_wire(condition, 0, set_increment, BEGIN_PLUG);

    assert!(compiler.compile(), "errors: {:?}", compiler.errors());
    assert!(compiler.build());
    let blob = compiler.assembly().to_vec();

    let flag = Arc::new(AtomicBool::new(false));
    let canary_active = Arc::new(AtomicBool::new(false));
    let toggle_edges = Arc::new(AtomicU32::new(0));

    let mut runtime = Runtime::new();
    let flag_emitter = runtime.make_emitter_id();

    let mut host = TestRuntimeHost::new();
    host.register_node(ENTRY_TYPE, NodeRuntimeMeta::inert());
    host.register_node(CONDITION_TYPE, NodeRuntimeMeta::of::<Condition>());
    host.register_node(COUNTER_TYPE, NodeRuntimeMeta::of::<Counter>());
    host.register_node(CANARY_TYPE, canary_meta(canary_active.clone()));
    host.register_node(SET_TYPE, NodeRuntimeMeta::of::<Set>());
    host.register_node(EMPTY_TYPE, NodeRuntimeMeta::inert());
    host.register_node(TOGGLE_TYPE, toggle_meta(toggle_edges.clone()));
    host.register_function(SERIES_FN, series_meta());
    host.register_function(READ_FLAG_FN, read_flag_meta(flag.clone(), flag_emitter));
    host.register_function(
        READ_FLAG_NUM_FN,
        read_flag_num_meta(flag.clone(), flag_emitter),
    );

    let assembly = load_assembly(&host, &blob).expect("assembly loads");

    flag.store(true, Ordering::Relaxed);
    runtime.notify_change(flag_emitter);

    let instance = runtime.create_instance(
        &assembly,
        &[
            Param {
                name: "Count",
                value: Value::Int32(0),
            },
            Param {
                name: "Increment",
                value: Value::Int32(0),
            },
        ],
    );

    let read = |runtime: &Runtime, name: &str| -> i32 {
        runtime
            .read_variable(instance, name)
            .and_then(|value| value.as_i32())
            .expect("int variable")
    };

    runtime.process_events();
    assert_eq!(read(&runtime, "Count"), 5);
    assert_eq!(read(&runtime, "Result"), 10);
    assert_eq!(read(&runtime, "Increment"), 1);
    assert!(!canary_active.load(Ordering::Relaxed));
    assert_eq!(toggle_edges.load(Ordering::Relaxed), 1);

    flag.store(false, Ordering::Relaxed);
    runtime.notify_change(flag_emitter);
    runtime.process_events();
    assert_eq!(read(&runtime, "Count"), 0);
    assert_eq!(read(&runtime, "Result"), 0);
    assert_eq!(read(&runtime, "Increment"), 1);
    assert!(canary_active.load(Ordering::Relaxed));

    flag.store(true, Ordering::Relaxed);
    runtime.notify_change(flag_emitter);
    runtime.process_events();
    assert_eq!(read(&runtime, "Count"), 5);
    assert_eq!(read(&runtime, "Result"), 10);
    assert_eq!(read(&runtime, "Increment"), 2);
    assert!(!canary_active.load(Ordering::Relaxed));
    assert_eq!(toggle_edges.load(Ordering::Relaxed), 2);

    flag.store(false, Ordering::Relaxed);
    runtime.notify_change(flag_emitter);
    runtime.process_events();
    assert_eq!(read(&runtime, "Count"), 0);
    assert_eq!(read(&runtime, "Result"), 0);
    assert_eq!(read(&runtime, "Increment"), 2);
    assert!(canary_active.load(Ordering::Relaxed));

    // Destroying the instance deactivates active nodes synchronously.
    runtime.destroy_instance(instance);
    assert!(!canary_active.load(Ordering::Relaxed));

    runtime.process_events();
}

fn entry_probe_graph() -> Vec<u8> {
    let compiler_host = CompilerHost;
    let mut compiler = GraphCompiler::new(&compiler_host);

    compiler.begin_node(NodeId::new(0), ENTRY_TYPE);
    compiler.add_output_plug(DEFAULT_OUTPUT_PLUG);

    compiler.begin_node(NodeId::new(1), PROBE_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);

    compiler.add_wire(NodeId::new(0), DEFAULT_OUTPUT_PLUG, NodeId::new(1), BEGIN_PLUG);

    assert!(compiler.compile(), "errors: {:?}", compiler.errors());
    assert!(compiler.build());
    compiler.assembly().to_vec()
}

fn probe_meta(activations: Arc<AtomicU32>) -> NodeRuntimeMeta {
    struct Probe {
        activations: Arc<AtomicU32>,
    }

    impl Node for Probe {
        fn on_activate(&mut self, _ctx: &mut NodeContext<'_>) {
            self.activations.fetch_add(1, Ordering::Relaxed);
        }
    }

    NodeRuntimeMeta {
        factory: Some(Arc::new(move || {
            Box::new(Probe {
                activations: activations.clone(),
            })
        })),
    }
}

#[test]
fn entry_activation_reaches_wired_nodes() {
    let blob = entry_probe_graph();

    let activations = Arc::new(AtomicU32::new(0));
    let mut host = TestRuntimeHost::new();
    host.register_node(ENTRY_TYPE, NodeRuntimeMeta::inert());
    host.register_node(PROBE_TYPE, probe_meta(activations.clone()));

    let assembly = load_assembly(&host, &blob).unwrap();
    let mut runtime = Runtime::new();
    runtime.create_instance(&assembly, &[]);

    assert_eq!(activations.load(Ordering::Relaxed), 0);
    runtime.process_events();
    assert_eq!(activations.load(Ordering::Relaxed), 1);

    // Activation is level-triggered; a second sweep changes nothing.
    runtime.process_events();
    assert_eq!(activations.load(Ordering::Relaxed), 1);
}

#[test]
fn unknown_node_types_load_as_inert() {
    let blob = entry_probe_graph();

    // The host knows neither node type. Power still routes; nothing
    // dispatches, and nothing crashes.
    let host = TestRuntimeHost::new();
    let assembly = load_assembly(&host, &blob).unwrap();
    let mut runtime = Runtime::new();
    let instance = runtime.create_instance(&assembly, &[]);
    runtime.process_events();
    runtime.destroy_instance(instance);
}

#[test]
fn corrupt_assemblies_fail_to_load() {
    let mut blob = entry_probe_graph();
    let last = blob.len() - 1;
    blob[last] ^= 0xff;

    let host = TestRuntimeHost::new();
    assert!(load_assembly(&host, &blob).is_err());
}

#[test]
fn equal_writes_do_not_fan_out() {
    let compiler_host = CompilerHost;
    let mut compiler = GraphCompiler::new(&compiler_host);

    compiler.add_variable("X", TypeId::INT32);

    compiler.begin_node(NodeId::new(0), ENTRY_TYPE);
    compiler.add_output_plug(DEFAULT_OUTPUT_PLUG);

    compiler.begin_node(NodeId::new(1), PROBE_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);
    compiler.add_input_slot(0, TypeId::INT32);
    compiler.bind_slot_variable("X");

    compiler.add_wire(NodeId::new(0), DEFAULT_OUTPUT_PLUG, NodeId::new(1), BEGIN_PLUG);

    assert!(compiler.compile(), "errors: {:?}", compiler.errors());
    assert!(compiler.build());

    struct DependencyProbe {
        dependencies: Arc<AtomicU32>,
    }

    impl Node for DependencyProbe {
        fn on_activate(&mut self, _ctx: &mut NodeContext<'_>) {}

        fn on_dependency(&mut self, _ctx: &mut NodeContext<'_>) {
            self.dependencies.fetch_add(1, Ordering::Relaxed);
        }
    }

    let dependencies = Arc::new(AtomicU32::new(0));
    let probe_dependencies = dependencies.clone();

    let mut host = TestRuntimeHost::new();
    host.register_node(ENTRY_TYPE, NodeRuntimeMeta::inert());
    host.register_node(
        PROBE_TYPE,
        NodeRuntimeMeta {
            factory: Some(Arc::new(move || {
                Box::new(DependencyProbe {
                    dependencies: probe_dependencies.clone(),
                })
            })),
        },
    );

    let assembly = load_assembly(&host, compiler.assembly()).unwrap();
    let mut runtime = Runtime::new();
    let instance = runtime.create_instance(&assembly, &[]);
    runtime.process_events();

    assert!(runtime.write_variable(instance, "X", Value::Int32(1)));
    runtime.process_events();
    assert_eq!(dependencies.load(Ordering::Relaxed), 1);

    // Writing the same value again is a no-op.
    assert!(runtime.write_variable(instance, "X", Value::Int32(1)));
    runtime.process_events();
    assert_eq!(dependencies.load(Ordering::Relaxed), 1);

    assert!(runtime.write_variable(instance, "X", Value::Int32(2)));
    runtime.process_events();
    assert_eq!(dependencies.load(Ordering::Relaxed), 2);

    assert_eq!(
        runtime.read_variable(instance, "X"),
        Some(Value::Int32(2))
    );
    assert!(!runtime.write_variable(instance, "Y", Value::Int32(9)));
}

#[test]
fn unbound_slot_reads_fail() {
    let compiler_host = CompilerHost;
    let mut compiler = GraphCompiler::new(&compiler_host);

    compiler.add_variable("Out", TypeId::INT32);

    compiler.begin_node(NodeId::new(0), ENTRY_TYPE);
    compiler.add_output_plug(DEFAULT_OUTPUT_PLUG);

    compiler.begin_node(NodeId::new(1), PROBE_TYPE);
    compiler.add_input_plug(BEGIN_PLUG);
    // Slot 1 is bound so the node has two output slots; slot 0 stays
    // unbound.
    compiler.add_output_slot(0, TypeId::INT32);
    compiler.add_output_slot(1, TypeId::INT32);
    compiler.bind_output_slot_variable("Out");

    compiler.add_wire(NodeId::new(0), DEFAULT_OUTPUT_PLUG, NodeId::new(1), BEGIN_PLUG);

    assert!(compiler.compile(), "errors: {:?}", compiler.errors());
    assert!(compiler.build());

    struct SlotProbe {
        unbound_read_failed: Arc<AtomicBool>,
        unbound_write_failed: Arc<AtomicBool>,
    }

    impl Node for SlotProbe {
        fn on_activate(&mut self, ctx: &mut NodeContext<'_>) {
            self.unbound_read_failed
                .store(ctx.read_output_slot(0).is_err(), Ordering::Relaxed);
            self.unbound_write_failed.store(
                ctx.write_output_slot(0, Value::Int32(1)).is_err(),
                Ordering::Relaxed,
            );
            let _ = ctx.write_output_slot(1, Value::Int32(7));
        }
    }

    let read_failed = Arc::new(AtomicBool::new(false));
    let write_failed = Arc::new(AtomicBool::new(false));
    let (probe_read, probe_write) = (read_failed.clone(), write_failed.clone());

    let mut host = TestRuntimeHost::new();
    host.register_node(ENTRY_TYPE, NodeRuntimeMeta::inert());
    host.register_node(
        PROBE_TYPE,
        NodeRuntimeMeta {
            factory: Some(Arc::new(move || {
                Box::new(SlotProbe {
                    unbound_read_failed: probe_read.clone(),
                    unbound_write_failed: probe_write.clone(),
                })
            })),
        },
    );

    let assembly = load_assembly(&host, compiler.assembly()).unwrap();
    let mut runtime = Runtime::new();
    let instance = runtime.create_instance(&assembly, &[]);
    runtime.process_events();

    assert!(read_failed.load(Ordering::Relaxed));
    assert!(write_failed.load(Ordering::Relaxed));
    assert_eq!(
        runtime.read_variable(instance, "Out"),
        Some(Value::Int32(7))
    );
}
