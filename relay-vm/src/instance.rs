use std::sync::Arc;

use relay_types::{InstanceId, Value};

use crate::assembly::Assembly;
use crate::bitset::BitSet;
use crate::event::PendingEvent;
use crate::host::Node;

/// A named initial value applied when an instance is created.
#[derive(Debug, Clone, Copy)]
pub struct Param<'a> {
    /// Variable name.
    pub name: &'a str,
    /// Initial value.
    pub value: Value,
}

/// Per-instance state of one loaded assembly.
pub(crate) struct Instance {
    pub id: InstanceId,
    pub assembly: Arc<Assembly>,
    pub active_nodes: BitSet,
    /// Power levels of custom input plugs, packed per node.
    pub active_input_plugs: BitSet,
    pub active_output_plugs: BitSet,
    pub values: Vec<Value>,
    pub states: Vec<Option<Box<dyn Node>>>,
    pub events: Vec<PendingEvent>,
}

impl Instance {
    pub fn new(id: InstanceId, assembly: Arc<Assembly>) -> Self {
        let data = assembly.data();
        Self {
            id,
            active_nodes: BitSet::new(data.nodes.len()),
            active_input_plugs: BitSet::new(data.input_plug_count as usize),
            active_output_plugs: BitSet::new(data.output_plugs.len()),
            values: vec![Value::Nil; data.variables.len()],
            states: (0..data.nodes.len()).map(|_| None).collect(),
            events: Vec::new(),
            assembly,
        }
    }
}
