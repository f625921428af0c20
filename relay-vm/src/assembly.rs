//! Loading an assembly blob into a runnable, shareable form.

use std::sync::Arc;

use relay_graph::{AssemblyData, LoadError};
use relay_types::Value;
use tracing::debug;

use crate::host::{HostFunction, NodeFactory, RuntimeHost};

/// A loaded assembly: the validated record arrays plus the host
/// implementations they reference, ready to be instantiated.
///
/// Assemblies are shared through [`Arc`], so instances keep their assembly
/// alive past the creator's scope and release it when destroyed.
pub struct Assembly {
    data: AssemblyData,
    constants: Vec<Value>,
    nodes: Vec<Option<NodeFactory>>,
    functions: Vec<HostFunction>,
}

impl Assembly {
    /// The decoded record arrays.
    pub fn data(&self) -> &AssemblyData {
        &self.data
    }

    /// The materialised constant table.
    pub(crate) fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub(crate) fn constant(&self, index: u32) -> Value {
        self.constants[index as usize]
    }

    pub(crate) fn node_factory(&self, node: u32) -> Option<NodeFactory> {
        self.nodes[node as usize].clone()
    }

    pub(crate) fn function(&self, index: usize) -> Option<&HostFunction> {
        self.functions.get(index)
    }
}

/// Validate `bytes` and resolve host implementations.
///
/// A node type or function the host does not know is substituted with an
/// inert stand-in (no-op node, nil-returning function); the load itself
/// still succeeds. A malformed blob fails.
pub fn load_assembly(host: &dyn RuntimeHost, bytes: &[u8]) -> Result<Arc<Assembly>, LoadError> {
    let data = AssemblyData::from_bytes(bytes)?;

    let mut constants = Vec::with_capacity(data.constants.len());
    for record in &data.constants {
        if host.lookup_type(record.type_id).is_none() {
            return Err(LoadError::UnknownConstantType(record.type_id.raw()));
        }
        constants.push(record.to_value()?);
    }

    let nodes = data
        .nodes
        .iter()
        .map(|node| host.lookup_node(node.type_id).and_then(|meta| meta.factory))
        .collect();

    let nil_function: HostFunction = Arc::new(|_ctx| Value::Nil);
    let functions = data
        .functions
        .iter()
        .map(|&id| {
            host.lookup_function(id)
                .map_or_else(|| nil_function.clone(), |meta| meta.function)
        })
        .collect();

    debug!(
        nodes = data.nodes.len(),
        variables = data.variables.len(),
        byte_code = data.byte_code.len(),
        "assembly loaded"
    );

    Ok(Arc::new(Assembly {
        data,
        constants,
        nodes,
        functions,
    }))
}
