//! Backend without a graphics API.
//!
//! With [`HeadlessConfig::record_calls`] every stage call is recorded so that the order in which the
//! orchestrator drives the backend can be observed. Presentation is simulated by a retire thread that gives the frame-in-flight permit
//! of a surface back after a configurable latency.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use kairos_shared::{
    crossbeam_channel::{self, Receiver, RecvTimeoutError, Sender},
    log::{error, info, trace},
    parking_lot::Mutex,
    thiserror, OrchestratorConfig, TerminationFlag,
};

use crate::{
    Acquisition, Backend, DeviceConfig, DeviceId, DeviceProperties, Error, FrameThrottle, QueueFamily, QueueKinds, QueueSelection,
    QueueSubmission, RenderGraphInfo, Result, SurfaceConfig, SurfaceFrame, SurfaceId,
};

#[derive(Debug, thiserror::Error)]
pub enum HeadlessError {
    #[error("There is no physical device with the index {0}")]
    NoPhysicalDevice(usize),
    #[error("The extension \"{0}\" is not supported")]
    UnsupportedExtension(String),
    #[error("The render graph \"{name}\" of generation {generation} is outdated")]
    OutdatedRenderGraph { name: String, generation: u64 },
}

impl From<HeadlessError> for Error {
    fn from(err: HeadlessError) -> Self {
        Error::Backend(Box::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub physical_device_count: usize,
    pub supported_extensions: Vec<String>,
    /// Queue families that every device reports
    pub queue_families: Vec<QueueFamily>,
    /// Time between drawing a frame and its retirement. `None` means that frames never retire.
    pub present_latency: Option<Duration>,
    /// Keeps a [`StageRecord`] of every stage call. The record grows with every frame.
    pub record_calls: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            physical_device_count: 1,
            supported_extensions: Vec::new(),
            queue_families: vec![QueueFamily::new(
                QueueKinds::GRAPHICS | QueueKinds::COMPUTE | QueueKinds::TRANSFER | QueueKinds::PRESENT,
                1,
            )],
            present_latency: Some(Duration::from_millis(1)),
            record_calls: false,
        }
    }
}

/// Backend entry point that was called
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageCall {
    BeginFrame,
    ValidateRenderGraph,
    ValidateSecondaryNodes,
    ValidateSecondaryDescriptors,
    SecondaryCommandBuffers,
    ValidatePrimaryNodes,
    ValidatePrimaryDescriptors,
    PrimaryCommandBuffers,
    DrawFrame,
    EndFrame,
    DiscardFrame,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub surface: SurfaceId,
    pub frame_number: u64,
    pub graph_generation: u64,
    pub call: StageCall,
    /// Set for the per queue calls. `DrawFrame` is recorded once per submitted queue.
    pub queue: Option<QueueSelection>,
}

/// Behaviour of an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Error,
    Panic,
}

enum RetireMessage {
    Retire { throttle: Arc<FrameThrottle>, due: Instant },
    Shutdown,
}

pub struct HeadlessBackend {
    config: HeadlessConfig,
    frames_in_flight: u32,
    wait_slice: Duration,
    devices: Mutex<BTreeMap<DeviceId, DeviceProperties>>,
    surfaces: Mutex<BTreeMap<SurfaceId, Arc<FrameThrottle>>>,
    render_graphs: Mutex<BTreeMap<String, RenderGraphInfo>>,
    records: Mutex<Vec<StageRecord>>,
    faults: Mutex<BTreeMap<(SurfaceId, StageCall), FaultKind>>,
    retire_sender: Sender<RetireMessage>,
    retire_thread: Option<JoinHandle<()>>,
}

impl HeadlessBackend {
    /// Returns all recorded calls in the order in which they happened. Empty unless
    /// [`HeadlessConfig::record_calls`] is set.
    pub fn records(&self) -> Vec<StageRecord> {
        self.records.lock().clone()
    }

    /// Returns the recorded calls and clears the record
    pub fn take_records(&self) -> Vec<StageRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Returns the recorded calls of one surface
    pub fn records_of(&self, surface: SurfaceId) -> Vec<StageRecord> {
        self.records.lock().iter().filter(|record| record.surface == surface).cloned().collect()
    }

    /// Number of frames the surface has drawn but that are not yet retired
    pub fn in_flight(&self, surface: SurfaceId) -> Option<u32> {
        self.surfaces.lock().get(&surface).map(|throttle| throttle.in_flight())
    }

    pub fn is_surface_realized(&self, surface: SurfaceId) -> bool {
        self.surfaces.lock().contains_key(&surface)
    }

    pub fn is_device_realized(&self, device: DeviceId) -> bool {
        self.devices.lock().contains_key(&device)
    }

    /// Makes every following `call` for the `surface` fail
    #[cfg(any(test, feature = "test-utils"))]
    pub fn inject_fault(&self, surface: SurfaceId, call: StageCall, kind: FaultKind) {
        self.faults.lock().insert((surface, call), kind);
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn throttle(&self, surface: SurfaceId) -> Result<Arc<FrameThrottle>> {
        self.surfaces.lock().get(&surface).cloned().ok_or(Error::UnknownSurface(surface))
    }

    fn stage(&self, frame: &SurfaceFrame, call: StageCall, queue: Option<QueueSelection>) -> Result<()> {
        if !self.is_surface_realized(frame.surface) {
            return Err(Error::UnknownSurface(frame.surface));
        }
        trace!("{} frame {}: {call:?}", frame.surface, frame.frame_number);
        if self.config.record_calls {
            self.records.lock().push(StageRecord {
                surface: frame.surface,
                frame_number: frame.frame_number,
                graph_generation: frame.graph_generation,
                call,
                queue,
            });
        }

        let fault = self.faults.lock().get(&(frame.surface, call)).copied();
        match fault {
            None => Ok(()),
            Some(FaultKind::Error) => Err(Error::StageFailed {
                stage: format!("{call:?}"),
                message: format!("injected fault for {}", frame.surface),
            }),
            Some(FaultKind::Panic) => panic!("injected panic in {call:?} for {}", frame.surface),
        }
    }

    fn queue_stage(&self, frame: &SurfaceFrame, call: StageCall, queue: &QueueSubmission) -> Result<()> {
        self.stage(frame, call, Some(queue.selection))
    }
}

impl Backend for HeadlessBackend {
    type BackendConfig = HeadlessConfig;

    fn new(config: &OrchestratorConfig, backend_config: Self::BackendConfig) -> Result<Self> {
        let (retire_sender, retire_receiver) = crossbeam_channel::unbounded();
        let retire_thread = thread::Builder::new()
            .name("headless-retire-thread".to_owned())
            .spawn(move || run_retire_thread(retire_receiver))?;
        info!(
            "Created HeadlessBackend with {} queue families and present latency {:?}",
            backend_config.queue_families.len(),
            backend_config.present_latency
        );
        Ok(Self {
            config: backend_config,
            frames_in_flight: config.frames_in_flight,
            wait_slice: config.wait_timeout,
            devices: Mutex::new(BTreeMap::new()),
            surfaces: Mutex::new(BTreeMap::new()),
            render_graphs: Mutex::new(BTreeMap::new()),
            records: Mutex::new(Vec::new()),
            faults: Mutex::new(BTreeMap::new()),
            retire_sender,
            retire_thread: Some(retire_thread),
        })
    }

    fn realize_device(&self, device: DeviceId, config: &DeviceConfig) -> Result<DeviceProperties> {
        if config.physical_device_index >= self.config.physical_device_count {
            return Err(HeadlessError::NoPhysicalDevice(config.physical_device_index).into());
        }
        if let Some(extension) = config
            .requested_extensions
            .iter()
            .find(|extension| !self.config.supported_extensions.contains(extension))
        {
            return Err(HeadlessError::UnsupportedExtension(extension.clone()).into());
        }
        let properties = DeviceProperties {
            queue_families: self.config.queue_families.clone(),
        };
        self.devices.lock().insert(device, properties.clone());
        info!("Realized {device} ({})", config.debug_info);
        Ok(properties)
    }

    fn cleanup_device(&self, device: DeviceId) -> Result<()> {
        self.devices.lock().remove(&device).ok_or(Error::UnknownDevice(device))?;
        info!("Cleaned up {device}");
        Ok(())
    }

    fn realize_surface(&self, surface: SurfaceId, config: &SurfaceConfig) -> Result<()> {
        if !self.is_device_realized(config.device) {
            return Err(Error::UnknownDevice(config.device));
        }
        let throttle = Arc::new(FrameThrottle::new(self.frames_in_flight));
        self.surfaces.lock().insert(surface, throttle);
        info!("Realized {surface} on {} ({})", config.device, config.debug_info);
        Ok(())
    }

    fn cleanup_surface(&self, surface: SurfaceId) -> Result<()> {
        let throttle = self.surfaces.lock().remove(&surface).ok_or(Error::UnknownSurface(surface))?;
        throttle.wake_all();
        info!("Cleaned up {surface}");
        Ok(())
    }

    fn compile_render_graph(&self, render_graph: &RenderGraphInfo) -> Result<()> {
        info!(
            "Compiled render graph \"{}\" (generation {}, {} queues)",
            render_graph.name,
            render_graph.generation,
            render_graph.logical_queue_count()
        );
        self.render_graphs
            .lock()
            .insert(render_graph.name.clone(), render_graph.clone());
        Ok(())
    }

    fn begin_frame(&self, frame: &SurfaceFrame, termination: &TerminationFlag) -> Result<Acquisition> {
        let throttle = self.throttle(frame.surface)?;
        self.stage(frame, StageCall::BeginFrame, None)?;
        if throttle.acquire(termination, self.wait_slice) {
            Ok(Acquisition::Acquired)
        } else {
            Ok(Acquisition::Cancelled)
        }
    }

    fn validate_render_graph(&self, frame: &SurfaceFrame) -> Result<()> {
        self.stage(frame, StageCall::ValidateRenderGraph, None)?;
        if let Some(expected) = &frame.render_graph {
            let compiled = self.render_graphs.lock().get(&expected.name).map(|graph| graph.generation);
            if compiled != Some(expected.generation) {
                return Err(HeadlessError::OutdatedRenderGraph {
                    name: expected.name.clone(),
                    generation: expected.generation,
                }
                .into());
            }
        }
        Ok(())
    }

    fn validate_secondary_nodes(&self, frame: &SurfaceFrame) -> Result<()> {
        self.stage(frame, StageCall::ValidateSecondaryNodes, None)
    }

    fn validate_secondary_descriptors(&self, frame: &SurfaceFrame) -> Result<()> {
        self.stage(frame, StageCall::ValidateSecondaryDescriptors, None)
    }

    fn record_secondary_command_buffers(&self, frame: &SurfaceFrame) -> Result<()> {
        self.stage(frame, StageCall::SecondaryCommandBuffers, None)
    }

    fn validate_primary_nodes(&self, frame: &SurfaceFrame, queue: &QueueSubmission) -> Result<()> {
        self.queue_stage(frame, StageCall::ValidatePrimaryNodes, queue)
    }

    fn validate_primary_descriptors(&self, frame: &SurfaceFrame, queue: &QueueSubmission) -> Result<()> {
        self.queue_stage(frame, StageCall::ValidatePrimaryDescriptors, queue)
    }

    fn record_primary_command_buffers(&self, frame: &SurfaceFrame, queue: &QueueSubmission) -> Result<()> {
        self.queue_stage(frame, StageCall::PrimaryCommandBuffers, queue)
    }

    fn draw_frame(&self, frame: &SurfaceFrame) -> Result<()> {
        let throttle = self.throttle(frame.surface)?;
        if frame.queues.is_empty() {
            self.stage(frame, StageCall::DrawFrame, None)?;
        }
        for queue in &frame.queues {
            self.queue_stage(frame, StageCall::DrawFrame, queue)?;
        }
        if let Some(latency) = self.config.present_latency {
            let message = RetireMessage::Retire {
                throttle,
                due: Instant::now() + latency,
            };
            if self.retire_sender.send(message).is_err() {
                error!("Failed to hand the frame {} of {} to the retire thread", frame.frame_number, frame.surface);
            }
        }
        Ok(())
    }

    fn end_frame(&self, frame: &SurfaceFrame) -> Result<()> {
        self.stage(frame, StageCall::EndFrame, None)
    }

    fn discard_frame(&self, frame: &SurfaceFrame) -> Result<()> {
        let throttle = self.throttle(frame.surface)?;
        self.stage(frame, StageCall::DiscardFrame, None)?;
        throttle.release();
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.surfaces.lock().clear();
        self.devices.lock().clear();
        self.render_graphs.lock().clear();
        info!("Cleaned up HeadlessBackend");
        Ok(())
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        if let Err(err) = self.retire_sender.send(RetireMessage::Shutdown) {
            error!("Failed to send the shutdown message to the retire thread: {err}");
        }
        if let Some(retire_thread) = self.retire_thread.take() {
            if retire_thread.join().is_err() {
                error!("The retire thread panicked");
            }
        }
    }
}

fn run_retire_thread(receiver: Receiver<RetireMessage>) {
    let mut pending = VecDeque::<(Arc<FrameThrottle>, Instant)>::new();
    loop {
        let message = match pending.front() {
            Some((_, due)) => receiver.recv_timeout(due.saturating_duration_since(Instant::now())),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match message {
            Ok(RetireMessage::Retire { throttle, due }) => pending.push_back((throttle, due)),
            Ok(RetireMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some((throttle, due)) = pending.front() {
            if *due > now {
                break;
            }
            throttle.release();
            pending.pop_front();
        }
    }
    trace!("Retire thread stopped");
}
