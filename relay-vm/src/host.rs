//! The traits a host implements to give the runtime node and function
//! behaviour.

use std::sync::Arc;

use relay_types::{EmitterId, FunctionId, NodeTypeId, TypeId, TypeMeta, Value};

use crate::runtime::NodeContext;

/// Per-node behaviour. One boxed value exists per active node: it is
/// created when the node activates and dropped when it deactivates, so
/// `self` doubles as the node's scratch state.
pub trait Node {
    /// The node gained power. Called right after the state is created.
    fn on_activate(&mut self, ctx: &mut NodeContext<'_>);

    /// The node is losing power. The state is dropped afterwards.
    fn on_deactivate(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// A variable one of the node's input slots reads has changed.
    fn on_dependency(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// A custom input plug received power.
    fn on_custom_input(&mut self, _ctx: &mut NodeContext<'_>, _plug: u8) {}
}

/// Creates the per-activation state of one node.
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn Node>>;

/// A host function callable from expressions.
pub type HostFunction = Arc<dyn Fn(&mut dyn FunctionContext) -> Value>;

/// What the host supplies for a node type at load time.
#[derive(Clone)]
pub struct NodeRuntimeMeta {
    /// State factory; `None` makes the node inert (it still holds and
    /// routes power, but dispatches nothing).
    pub factory: Option<NodeFactory>,
}

impl NodeRuntimeMeta {
    /// A node with no behaviour of its own, e.g. an entry node.
    pub fn inert() -> Self {
        Self { factory: None }
    }

    /// A node whose state is `N::default()`, fresh per activation.
    pub fn of<N>() -> Self
    where
        N: Node + Default + 'static,
    {
        Self {
            factory: Some(Arc::new(|| Box::<N>::default())),
        }
    }
}

/// What the host supplies for a function at load time.
#[derive(Clone)]
pub struct FunctionRuntimeMeta {
    /// The callable.
    pub function: HostFunction,
}

/// Call context handed to host functions during expression evaluation.
pub trait FunctionContext {
    /// Number of arguments.
    fn argc(&self) -> u32;
    /// The argument at `index`; nil when out of range.
    fn arg(&self, index: u32) -> Value;
    /// Subscribe the reading input slot to an emitter: the next
    /// `notify_change` for it re-evaluates the slot's node.
    fn listen(&mut self, emitter: EmitterId);
}

/// Node, function, and type resolution for the loader and runtime.
pub trait RuntimeHost {
    /// Resolve a node type. `None` substitutes an inert node so partial
    /// hosts can run partial graphs.
    fn lookup_node(&self, type_id: NodeTypeId) -> Option<NodeRuntimeMeta>;
    /// Resolve a function. `None` substitutes one that returns nil.
    fn lookup_function(&self, function: FunctionId) -> Option<FunctionRuntimeMeta>;
    /// Resolve a value type id to its descriptor.
    fn lookup_type(&self, type_id: TypeId) -> Option<&'static TypeMeta>;
}
