use crate::QueueTraits;

/// A render graph as seen by the orchestrator.
///
/// The content of the graph belongs to the backend. The orchestrator only needs to know which
/// logical queues it uses and in which generation it was compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderGraphInfo {
    pub name: String,
    pub queues: Vec<QueueTraits>,
    /// Incremented every time a graph with the same name is compiled again
    pub generation: u64,
}

impl RenderGraphInfo {
    /// Number of logical queues. A graph without explicit queues uses a single graphics queue.
    pub fn logical_queue_count(&self) -> usize {
        self.queues.len().max(1)
    }

    pub fn queue_traits(&self, logical_queue: usize) -> QueueTraits {
        self.queues.get(logical_queue).copied().unwrap_or_default()
    }
}
