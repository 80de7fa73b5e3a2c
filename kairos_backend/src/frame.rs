use std::sync::Arc;

use crate::{DeviceId, QueueSubmission, RenderGraphInfo, SurfaceId};

/// Everything a per-surface stage needs to know about the frame it works on
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    pub surface: SurfaceId,
    pub device: DeviceId,
    pub frame_number: u64,
    /// Generation of the execution graph the frame is dispatched with
    pub graph_generation: u64,
    pub render_graph: Option<Arc<RenderGraphInfo>>,
    /// One entry per logical queue of the render graph
    pub queues: Vec<QueueSubmission>,
}

impl SurfaceFrame {
    pub fn queue(&self, logical_queue: usize) -> Option<&QueueSubmission> {
        self.queues.get(logical_queue)
    }
}

/// Result of acquiring the next presentable target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    /// The wait was cancelled because the process is terminating
    Cancelled,
}
