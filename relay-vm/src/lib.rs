//! The relay runtime: loads compiled assemblies, creates per-instance
//! state, and drives event and power propagation.
//!
//! Strictly single threaded and cooperative. Node handlers run inside
//! [`Runtime::process_events`] and may enqueue further events, which are
//! drained in the same sweep; nothing blocks, and nothing is retried.

mod assembly;
mod bitset;
mod event;
mod host;
mod instance;
mod runtime;

pub use assembly::{load_assembly, Assembly};
pub use event::Event;
pub use host::{
    FunctionContext, FunctionRuntimeMeta, HostFunction, Node, NodeFactory, NodeRuntimeMeta,
    RuntimeHost,
};
pub use instance::Param;
pub use runtime::{NodeContext, Runtime, RuntimeError};

pub mod prelude {
    //! Convenience re-exports for hosts embedding the runtime.
    pub use crate::{
        load_assembly, Assembly, Event, FunctionContext, FunctionRuntimeMeta, Node, NodeContext,
        NodeFactory, NodeRuntimeMeta, Param, Runtime, RuntimeError, RuntimeHost,
    };
    pub use relay_graph::LoadError;
    pub use relay_types::{
        EmitterId, FunctionId, InstanceId, NodeIndex, NodeKind, NodeTypeId, TypeId, Value,
        BEGIN_PLUG, DEFAULT_OUTPUT_PLUG,
    };
}
