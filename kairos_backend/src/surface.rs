use kairos_shared::DebugInfo;

use crate::DeviceId;

/// Configuration of an output surface
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    pub device: DeviceId,
    /// Name of the compiled render graph that renders into the surface
    pub render_graph: Option<String>,
    /// Surfaces with a lower priority submit first when they share a queue
    pub submission_priority: i32,
    pub debug_info: DebugInfo,
}

impl SurfaceConfig {
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            render_graph: None,
            submission_priority: 0,
            debug_info: DebugInfo::default(),
        }
    }

    pub fn with_render_graph(mut self, render_graph: impl Into<String>) -> Self {
        self.render_graph = Some(render_graph.into());
        self
    }

    pub fn with_submission_priority(mut self, submission_priority: i32) -> Self {
        self.submission_priority = submission_priority;
        self
    }

    pub fn with_debug_info(mut self, debug_info: DebugInfo) -> Self {
        self.debug_info = debug_info;
        self
    }
}
