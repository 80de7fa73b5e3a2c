use std::collections::{BTreeMap, BTreeSet};

use kairos_backend::{Acquisition, Backend, Error, Result, SurfaceFrame, SurfaceId};
use kairos_shared::{
    log::{error, trace, warn},
    TerminationFlag,
};

use crate::{
    dispatcher::{DispatchReport, NodeOutcome, StageFlow},
    execution_graph::ExecutionGraph,
    hooks::{HookPoint, Hooks, RenderContext},
    stage::{StageKind, StageNode},
    triple_buffer::RenderTicket,
};

/// Outcome of one render pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    Succeeded,
    Failed {
        surfaces: BTreeSet<SurfaceId>,
        /// A stage without a surface failed
        global: bool,
    },
    /// The pass was stopped because the process is terminating
    Cancelled,
}

impl FrameStatus {
    pub fn is_success(&self) -> bool {
        *self == FrameStatus::Succeeded
    }
}

/// Executes the stage nodes of one render pass against the backend
pub(crate) struct FrameExecutor<'a, B: Backend> {
    backend: &'a B,
    graph: &'a ExecutionGraph,
    hooks: &'a Hooks,
    ticket: &'a RenderTicket,
    termination: &'a TerminationFlag,
    frames: BTreeMap<SurfaceId, SurfaceFrame>,
}

impl<'a, B: Backend> FrameExecutor<'a, B> {
    pub fn new(
        backend: &'a B,
        graph: &'a ExecutionGraph,
        hooks: &'a Hooks,
        ticket: &'a RenderTicket,
        termination: &'a TerminationFlag,
    ) -> Self {
        let frames = graph
            .surfaces()
            .filter_map(|plan| graph.surface_frame(plan.surface, ticket.frame_number))
            .map(|frame| (frame.surface, frame))
            .collect();
        Self {
            backend,
            graph,
            hooks,
            ticket,
            termination,
            frames,
        }
    }

    fn context(&self, surface: Option<SurfaceId>) -> RenderContext<'_> {
        RenderContext::new(
            self.ticket.frame_number,
            self.ticket.render,
            self.ticket.prev_update,
            self.ticket.render_time_delta,
            self.ticket.interpolation,
            surface,
            self.termination,
        )
    }

    fn frame(&self, node: &StageNode) -> Result<&SurfaceFrame> {
        let surface = node.surface.ok_or_else(|| Error::StageFailed {
            stage: node.to_string(),
            message: "the stage has no surface".to_owned(),
        })?;
        self.frames.get(&surface).ok_or(Error::UnknownSurface(surface))
    }

    pub fn execute(&self, node: &StageNode) -> Result<StageFlow> {
        trace!("Frame {}: {node}", self.ticket.frame_number);
        match node.kind {
            StageKind::FrameStart => {
                if self.termination.is_set() {
                    return Ok(StageFlow::Halt);
                }
            }
            StageKind::EventRenderStart => match node.surface {
                None => self.hooks.run_global(HookPoint::RenderStart, &self.context(None))?,
                Some(surface) => self
                    .hooks
                    .run_surface(surface, HookPoint::RenderStart, &self.context(Some(surface)))?,
            },
            StageKind::BeginFrame => {
                if self.termination.is_set() {
                    return Ok(StageFlow::Halt);
                }
                let frame = self.frame(node)?;
                if self.backend.begin_frame(frame, self.termination)? == Acquisition::Cancelled {
                    return Ok(StageFlow::Halt);
                }
            }
            StageKind::ValidateRenderGraphs => self.backend.validate_render_graph(self.frame(node)?)?,
            StageKind::ValidateSecondaryNodes => self.backend.validate_secondary_nodes(self.frame(node)?)?,
            StageKind::ValidateSecondaryDescriptors => self.backend.validate_secondary_descriptors(self.frame(node)?)?,
            StageKind::Barrier0 => {}
            StageKind::SecondaryCommandBuffers => self.backend.record_secondary_command_buffers(self.frame(node)?)?,
            StageKind::ValidatePrimaryNodes | StageKind::ValidatePrimaryDescriptors | StageKind::PrimaryBuffers => {
                let frame = self.frame(node)?;
                let logical_queue = node.logical_queue.unwrap_or(0);
                let queue = frame.queue(logical_queue).ok_or_else(|| Error::StageFailed {
                    stage: node.to_string(),
                    message: format!("the frame has no logical queue {logical_queue}"),
                })?;
                match node.kind {
                    StageKind::ValidatePrimaryNodes => self.backend.validate_primary_nodes(frame, queue)?,
                    StageKind::ValidatePrimaryDescriptors => self.backend.validate_primary_descriptors(frame, queue)?,
                    _ => self.backend.record_primary_command_buffers(frame, queue)?,
                }
            }
            StageKind::DrawFrame => self.backend.draw_frame(self.frame(node)?)?,
            StageKind::EndFrame => {
                let frame = self.frame(node)?;
                self.backend.end_frame(frame)?;
                self.hooks
                    .run_surface(frame.surface, HookPoint::RenderFinish, &self.context(Some(frame.surface)))?;
            }
            StageKind::FrameFinish => self.hooks.run_global(HookPoint::RenderFinish, &self.context(None))?,
        }
        Ok(StageFlow::Continue)
    }

    /// Derives the status of the pass and gives back the targets of surfaces that acquired one but didn't draw
    pub fn finish(&self, report: &DispatchReport) -> FrameStatus {
        let dag = self.graph.dag();
        let mut surfaces = BTreeSet::new();
        let mut global = false;
        for (index, outcome) in report.failures() {
            let node = dag.node(index);
            warn!("Frame {}: {node} failed: {outcome:?}", self.ticket.frame_number);
            match node.surface {
                Some(surface) => {
                    surfaces.insert(surface);
                }
                None => global = true,
            }
        }

        for plan in self.graph.surfaces() {
            let acquired = *report.outcome(plan.begin_frame) == NodeOutcome::Completed;
            let drawn = *report.outcome(plan.draw_frame) == NodeOutcome::Completed;
            if acquired && !drawn {
                if let Some(frame) = self.frames.get(&plan.surface) {
                    if let Err(err) = self.backend.discard_frame(frame) {
                        error!("Failed to discard frame {} of {}: {err}", frame.frame_number, plan.surface);
                    }
                }
            }
        }

        let halted = report.outcomes().any(|(_, outcome)| *outcome == NodeOutcome::Halted);
        if !surfaces.is_empty() || global {
            FrameStatus::Failed { surfaces, global }
        } else if halted {
            FrameStatus::Cancelled
        } else {
            FrameStatus::Succeeded
        }
    }
}
