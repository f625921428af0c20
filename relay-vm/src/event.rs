use relay_types::InputPlugIndex;

/// What a node is being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The node gained power on its begin plug.
    Activate,
    /// The node lost power on its begin plug.
    Deactivate,
    /// A variable one of the node's input slots reads has changed.
    Dependency,
    /// A custom input plug received power.
    CustomInput {
        /// Which custom input plug.
        plug: InputPlugIndex,
    },
}

/// An event queued against a node of one instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingEvent {
    pub node: u32,
    pub event: Event,
}
