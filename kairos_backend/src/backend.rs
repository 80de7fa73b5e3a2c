use kairos_shared::{OrchestratorConfig, TerminationFlag};

use crate::{
    Acquisition, DeviceConfig, DeviceId, DeviceProperties, QueueSubmission, RenderGraphInfo, Result, SurfaceConfig, SurfaceFrame,
    SurfaceId,
};

/// Graphics API side of the orchestrator.
///
/// The orchestrator owns the lifecycle and calls into the backend from its stage nodes. Stages of
/// different surfaces are called concurrently, the stages of one surface are never called
/// concurrently with each other.
pub trait Backend: Sized + Send + Sync + 'static {
    type BackendConfig: Default;

    fn new(config: &OrchestratorConfig, backend_config: Self::BackendConfig) -> Result<Self>;

    /// Opens the device and reports its queue families
    fn realize_device(&self, device: DeviceId, config: &DeviceConfig) -> Result<DeviceProperties>;
    fn cleanup_device(&self, device: DeviceId) -> Result<()>;

    fn realize_surface(&self, surface: SurfaceId, config: &SurfaceConfig) -> Result<()>;
    fn cleanup_surface(&self, surface: SurfaceId) -> Result<()>;

    fn compile_render_graph(&self, render_graph: &RenderGraphInfo) -> Result<()>;

    /// Acquires the next presentable target.
    ///
    /// May block while the surface has the maximum number of frames in flight. Must return
    /// [`Acquisition::Cancelled`] within bounded time after `termination` is set.
    fn begin_frame(&self, frame: &SurfaceFrame, termination: &TerminationFlag) -> Result<Acquisition>;

    fn validate_render_graph(&self, frame: &SurfaceFrame) -> Result<()>;
    fn validate_secondary_nodes(&self, frame: &SurfaceFrame) -> Result<()>;
    fn validate_secondary_descriptors(&self, frame: &SurfaceFrame) -> Result<()>;
    fn record_secondary_command_buffers(&self, frame: &SurfaceFrame) -> Result<()>;

    fn validate_primary_nodes(&self, frame: &SurfaceFrame, queue: &QueueSubmission) -> Result<()>;
    fn validate_primary_descriptors(&self, frame: &SurfaceFrame, queue: &QueueSubmission) -> Result<()>;
    fn record_primary_command_buffers(&self, frame: &SurfaceFrame, queue: &QueueSubmission) -> Result<()>;

    /// Submits the recorded commands and requests presentation
    fn draw_frame(&self, frame: &SurfaceFrame) -> Result<()>;

    /// Releases the per-frame bookkeeping of a frame that was drawn
    fn end_frame(&self, frame: &SurfaceFrame) -> Result<()>;

    /// Gives back the target of a frame that acquired it but failed before it was drawn
    fn discard_frame(&self, frame: &SurfaceFrame) -> Result<()>;

    /// Tears down the global backend state after all surfaces and devices are gone
    fn cleanup(&self) -> Result<()>;
}
