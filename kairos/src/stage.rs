use std::fmt;

use kairos_backend::SurfaceId;

/// The kinds of nodes of an execution graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    /// Root of the frame. Halts the frame when the process is terminating.
    FrameStart,
    /// Runs the render start hooks. Global when the node has no surface.
    EventRenderStart,
    BeginFrame,
    ValidateRenderGraphs,
    ValidateSecondaryNodes,
    ValidateSecondaryDescriptors,
    /// Joins the secondary validation of a surface
    Barrier0,
    SecondaryCommandBuffers,
    ValidatePrimaryNodes,
    ValidatePrimaryDescriptors,
    PrimaryBuffers,
    DrawFrame,
    EndFrame,
    /// Runs the global render finish hooks after every surface is done
    FrameFinish,
}

impl StageKind {
    /// Whether the stage exists once per logical queue of a surface
    pub fn is_per_queue(&self) -> bool {
        matches!(
            self,
            StageKind::ValidatePrimaryNodes | StageKind::ValidatePrimaryDescriptors | StageKind::PrimaryBuffers
        )
    }
}

/// A node of an execution graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageNode {
    pub kind: StageKind,
    pub surface: Option<SurfaceId>,
    pub logical_queue: Option<usize>,
}

impl StageNode {
    pub fn global(kind: StageKind) -> Self {
        Self {
            kind,
            surface: None,
            logical_queue: None,
        }
    }

    pub fn surface(kind: StageKind, surface: SurfaceId) -> Self {
        Self {
            kind,
            surface: Some(surface),
            logical_queue: None,
        }
    }

    pub fn queue(kind: StageKind, surface: SurfaceId, logical_queue: usize) -> Self {
        debug_assert!(kind.is_per_queue(), "{kind:?} is not a per queue stage");
        Self {
            kind,
            surface: Some(surface),
            logical_queue: Some(logical_queue),
        }
    }
}

impl fmt::Display for StageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.surface, self.logical_queue) {
            (None, _) => write!(f, "{:?}", self.kind),
            (Some(surface), None) => write!(f, "{:?}({surface})", self.kind),
            (Some(surface), Some(queue)) => write!(f, "{:?}({surface}, queue {queue})", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let surface = SurfaceId::from_raw(3);
        assert_eq!(StageNode::global(StageKind::FrameStart).to_string(), "FrameStart");
        assert_eq!(StageNode::surface(StageKind::DrawFrame, surface).to_string(), "DrawFrame(surface#3)");
        assert_eq!(
            StageNode::queue(StageKind::PrimaryBuffers, surface, 1).to_string(),
            "PrimaryBuffers(surface#3, queue 1)"
        );
    }

    #[test]
    fn per_queue_stages() {
        assert!(StageKind::PrimaryBuffers.is_per_queue());
        assert!(StageKind::ValidatePrimaryNodes.is_per_queue());
        assert!(!StageKind::DrawFrame.is_per_queue());
        assert!(!StageKind::SecondaryCommandBuffers.is_per_queue());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not a per queue stage")]
    fn queue_node_of_a_surface_stage() {
        StageNode::queue(StageKind::DrawFrame, SurfaceId::from_raw(1), 0);
    }
}
