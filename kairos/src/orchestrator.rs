use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use kairos_backend::{
    Backend, DeviceConfig, DeviceId, Error, IdAllocator, QueueTraits, RenderGraphInfo, Result, SurfaceConfig, SurfaceId,
};
use kairos_shared::{
    log::{error, info, trace},
    parking_lot::{Mutex, RwLock},
    tracy_client::Client,
    ActionQueue, OrchestratorConfig, TerminationFlag,
};
use kairos_macros::profile;

use crate::{
    dag::NodeIndex,
    dispatcher::GraphDispatcher,
    execution_graph::{ExecutionGraph, ExecutionGraphBuilder},
    frame_clock::FrameClock,
    frame_executor::{FrameExecutor, FrameStatus},
    hooks::{HookPoint, Hooks, RenderContext},
    time_statistics::OrchestratorStatistics,
    topology::Topology,
    triple_buffer::{SlotRoles, TripleBufferState},
    update_graph::{UpdateContext, UpdateGraph},
    update_scheduler::{TickPacer, UpdateScheduler},
};

/// Drives the update and the render activity of the application.
///
/// The update thread ticks the [`UpdateGraph`] at a fixed rate and publishes its results through
/// the [`TripleBufferState`]. The render loop takes over the latest publication at every frame
/// boundary and dispatches the [`ExecutionGraph`] of the current topology.
pub struct Orchestrator<B: Backend> {
    config: OrchestratorConfig,
    backend: B,
    termination: TerminationFlag,
    triple_buffer: TripleBufferState,
    render_dispatcher: GraphDispatcher,
    update_dispatcher: GraphDispatcher,
    render_actions: ActionQueue,
    update_actions: ActionQueue,
    update_graph: Mutex<Arc<UpdateGraph>>,
    hooks: RwLock<Arc<Hooks>>,
    ids: IdAllocator,
    topology: Mutex<Topology>,
    execution_graph: Mutex<Option<Arc<ExecutionGraph>>>,
    /// Only changed while the topology is locked
    realized: AtomicBool,
    running: AtomicBool,
    update_error: Mutex<Option<Error>>,
    last_frame_status: Mutex<Option<FrameStatus>>,
    statistics: Mutex<OrchestratorStatistics>,
}

impl<B: Backend> Orchestrator<B> {
    /// Creates a new [`OrchestratorBuilder`] to create an instance of the `Orchestrator`
    pub fn builder() -> OrchestratorBuilder<B> {
        OrchestratorBuilder::new()
    }

    fn new(config: OrchestratorConfig, backend: B) -> Result<Self> {
        let termination = TerminationFlag::new();
        let clock = FrameClock::new(config.updates_per_second, Instant::now())?;
        let triple_buffer = TripleBufferState::new(clock, termination.clone(), config.wait_timeout, config.startup_wait);
        Ok(Self {
            render_dispatcher: GraphDispatcher::new("render", config.render_worker_threads)?,
            update_dispatcher: GraphDispatcher::new("update", config.update_worker_threads)?,
            config,
            backend,
            termination,
            triple_buffer,
            render_actions: ActionQueue::new(),
            update_actions: ActionQueue::new(),
            update_graph: Mutex::new(Arc::new(UpdateGraph::new())),
            hooks: RwLock::new(Arc::new(Hooks::default())),
            ids: IdAllocator::default(),
            topology: Mutex::new(Topology::default()),
            execution_graph: Mutex::new(None),
            realized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            update_error: Mutex::new(None),
            last_frame_status: Mutex::new(None),
            statistics: Mutex::new(OrchestratorStatistics::default()),
        })
    }

    /// Returns the [`Backend`] of the `Orchestrator`
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_realized(&self) -> bool {
        self.realized.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Realizes the devices, compiles the render graphs and realizes the surfaces that were added so far.
    ///
    /// Fails with [`Error::AlreadyRealized`] when called again without [`Orchestrator::cleanup`].
    pub fn realize(&self) -> Result<()> {
        let mut topology = self.topology.lock();
        if self.is_realized() {
            return Err(Error::AlreadyRealized);
        }
        for (device, entry) in topology.devices_mut() {
            if entry.properties.is_none() {
                entry.properties = Some(self.backend.realize_device(device, &entry.config)?);
            }
        }
        for render_graph in topology.render_graphs() {
            self.backend.compile_render_graph(render_graph)?;
        }
        for (surface, entry) in topology.surfaces_mut() {
            if !entry.realized {
                self.backend.realize_surface(surface, &entry.config)?;
                entry.realized = true;
            }
        }
        topology.touch();

        // Setup errors of the execution graph like missing queues are reported here and not in the first frame
        let graph = Arc::new(ExecutionGraphBuilder::new(self.config.queue_submission_policy).build(&topology)?);
        *self.execution_graph.lock() = Some(graph);
        self.realized.store(true, Ordering::Release);
        info!(
            "Realized orchestrator \"{}\"",
            self.config.application_name.as_deref().unwrap_or("unnamed")
        );
        Ok(())
    }

    /// Runs the update thread and the render loop until [`Orchestrator::set_terminate`] is called.
    ///
    /// The render loop runs on the calling thread. Returns after the update thread was joined.
    pub fn run(&self) -> Result<()> {
        if !self.is_realized() {
            return Err(Error::NotRealized);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        let result = self.run_threads();
        self.running.store(false, Ordering::Release);
        result
    }

    fn run_threads(&self) -> Result<()> {
        let pacer = TickPacer::new(
            self.config.pacing_policy,
            self.config.update_period(),
            self.triple_buffer.clock().application_start_time(),
            self.config.max_catch_up_ticks,
        );
        let scheduler = UpdateScheduler {
            triple_buffer: &self.triple_buffer,
            actions: &self.update_actions,
            graph: &self.update_graph,
            dispatcher: &self.update_dispatcher,
            termination: &self.termination,
            error: &self.update_error,
            statistics: &self.statistics,
            wait_timeout: self.config.wait_timeout,
        };

        thread::scope(|scope| -> Result<()> {
            let update_thread = thread::Builder::new()
                .name("update-thread".to_owned())
                .spawn_scoped(scope, move || scheduler.run(pacer))?;

            let render_result = self.run_render_loop();
            if let Err(err) = &render_result {
                error!("Render loop stopped: {err}");
            }

            // The update thread might wait for a render pass that will never come
            self.triple_buffer.terminate();
            let update_result = update_thread
                .join()
                .map_err(|_| Error::Panicked("update thread".to_owned()));
            render_result.and(update_result)
        })
    }

    #[allow(deprecated)]
    fn run_render_loop(&self) -> Result<()> {
        let mut loop_helper = self.config.frame_rate.loop_helper();
        info!("Starting render loop with frame rate {:?}", self.config.frame_rate);
        while !self.termination.is_set() {
            loop_helper.loop_start();
            self.render_frame()?;
            if let Some(rate) = loop_helper.report_rate() {
                trace!("Render rate: {rate:.1} fps");
            }
            loop_helper.loop_sleep();
        }
        info!("Render loop stopped at frame {}", self.frame_number());
        Ok(())
    }

    /// Renders a single frame on the calling thread. Fails while [`Orchestrator::run`] is active.
    pub fn step_frame(&self) -> Result<FrameStatus> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.render_frame()
    }

    #[profile]
    fn render_frame(&self) -> Result<FrameStatus> {
        if !self.is_realized() {
            return Err(Error::NotRealized);
        }

        // Frame boundary
        self.render_actions.drain_and_execute();
        let graph = match self.current_execution_graph() {
            Ok(graph) => graph,
            Err(err) => {
                error!("Failed to build the execution graph: {err}");
                let status = FrameStatus::Failed {
                    surfaces: Default::default(),
                    global: true,
                };
                self.statistics.lock().failed_frames += 1;
                *self.last_frame_status.lock() = Some(status.clone());
                return Ok(status);
            }
        };
        let Some(ticket) = self.triple_buffer.acquire_render_slot() else {
            self.statistics.lock().cancelled_frames += 1;
            return Ok(FrameStatus::Cancelled);
        };

        let hooks = self.hooks.read().clone();
        let executor = FrameExecutor::new(&self.backend, &graph, &hooks, &ticket, &self.termination);
        let report = self
            .render_dispatcher
            .dispatch(graph.dag(), |_, node| executor.execute(node));
        let status = match report {
            Ok(report) => executor.finish(&report),
            Err(err) => {
                self.triple_buffer.finish_render(ticket, false);
                return Err(err);
            }
        };

        let elapsed = ticket.render_start_time.elapsed();
        let frame_number = self.triple_buffer.finish_render(ticket, status.is_success());
        {
            let mut statistics = self.statistics.lock();
            statistics.record_render(elapsed);
            match &status {
                FrameStatus::Succeeded => {}
                FrameStatus::Failed { .. } => statistics.failed_frames += 1,
                FrameStatus::Cancelled => statistics.cancelled_frames += 1,
            }
        }
        if let Some(client) = Client::running() {
            client.frame_mark();
        }
        trace!("Frame finished with {status:?}, next frame is {frame_number}");
        *self.last_frame_status.lock() = Some(status.clone());
        Ok(status)
    }

    /// Returns the execution graph for the current topology and rebuilds it when it is outdated
    fn current_execution_graph(&self) -> Result<Arc<ExecutionGraph>> {
        let mut topology = self.topology.lock();
        let mut current = self.execution_graph.lock();
        if let Some(graph) = current
            .as_ref()
            .filter(|graph| graph.is_valid() && graph.generation() == topology.generation())
        {
            return Ok(graph.clone());
        }

        // The previous graph is not dispatched anymore, so removed surfaces can be released
        for surface in topology.take_removed_surfaces() {
            if let Err(err) = self.backend.cleanup_surface(surface) {
                error!("Failed to clean up {surface}: {err}");
            }
        }
        let graph = Arc::new(ExecutionGraphBuilder::new(self.config.queue_submission_policy).build(&topology)?);
        *current = Some(graph.clone());
        Ok(graph)
    }

    fn invalidate_execution_graph(&self) {
        if let Some(graph) = self.execution_graph.lock().as_ref() {
            graph.invalidate();
        }
    }

    /// Requests the update thread and the render loop to stop. Can be called from any thread.
    pub fn set_terminate(&self) {
        info!("Terminating");
        self.triple_buffer.terminate();
    }

    /// Returns the flag that [`Orchestrator::set_terminate`] sets
    pub fn termination_flag(&self) -> TerminationFlag {
        self.termination.clone()
    }

    /// Tears down the surfaces, the devices and the global backend state
    pub fn cleanup(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        let mut topology = self.topology.lock();
        if !self.is_realized() {
            return Err(Error::NotRealized);
        }
        *self.execution_graph.lock() = None;
        for surface in topology.take_removed_surfaces() {
            self.backend.cleanup_surface(surface)?;
        }
        for (surface, entry) in topology.surfaces_mut() {
            if entry.realized {
                self.backend.cleanup_surface(surface)?;
                entry.realized = false;
            }
        }
        for (device, entry) in topology.devices_mut() {
            if entry.properties.take().is_some() {
                self.backend.cleanup_device(device)?;
            }
        }
        self.backend.cleanup()?;
        topology.touch();
        self.realized.store(false, Ordering::Release);
        self.termination.reset();
        info!("Cleaned up orchestrator");
        Ok(())
    }

    /// Adds a device. After [`Orchestrator::realize`] the device is realized immediately.
    pub fn add_device(&self, config: DeviceConfig) -> Result<DeviceId> {
        let mut topology = self.topology.lock();
        let device = self.ids.next_device_id();
        let properties = if self.is_realized() {
            Some(self.backend.realize_device(device, &config)?)
        } else {
            None
        };
        info!("Adding {device} ({})", config.debug_info);
        topology.add_device(device, config, properties);
        self.invalidate_execution_graph();
        Ok(device)
    }

    /// Adds a surface. After [`Orchestrator::realize`] the surface is realized immediately and
    /// rendered from the next frame on. Fails if the surface cannot be scheduled on its device.
    pub fn add_surface(&self, config: SurfaceConfig) -> Result<SurfaceId> {
        let mut topology = self.topology.lock();
        topology.validate_surface_config(&config)?;
        let surface = self.ids.next_surface_id();
        let realized = self.is_realized();
        let mut candidate = topology.clone();
        candidate.add_surface(surface, config.clone(), realized)?;
        if realized {
            self.check_schedulable(&candidate)?;
            self.backend.realize_surface(surface, &config)?;
        }
        info!("Adding {surface} on {} ({})", config.device, config.debug_info);
        *topology = candidate;
        self.invalidate_execution_graph();
        Ok(surface)
    }

    /// Removes a surface. The backend cleans it up at the next frame boundary.
    pub fn remove_surface(&self, surface: SurfaceId) -> Result<()> {
        let mut topology = self.topology.lock();
        topology.remove_surface(surface)?;
        Arc::make_mut(&mut *self.hooks.write()).remove_surface(surface);
        info!("Removing {surface}");
        self.invalidate_execution_graph();
        Ok(())
    }

    /// Compiles a render graph. Compiling a graph with a known name replaces it with a new generation.
    /// Fails without a change if a surface that uses the graph could not be scheduled anymore.
    pub fn compile_render_graph(&self, name: &str, queues: Vec<QueueTraits>) -> Result<Arc<RenderGraphInfo>> {
        let mut topology = self.topology.lock();
        let mut candidate = topology.clone();
        let info = candidate.prepare_render_graph(name, queues);
        let info = candidate.insert_render_graph(info);
        if self.is_realized() {
            self.check_schedulable(&candidate)?;
            self.backend.compile_render_graph(&info)?;
        }
        *topology = candidate;
        self.invalidate_execution_graph();
        Ok(info)
    }

    /// Renders the surface with a compiled render graph. `None` uses the default graph.
    /// Fails without a change if the surface could not be scheduled with the graph.
    pub fn set_surface_render_graph(&self, surface: SurfaceId, render_graph: Option<&str>) -> Result<()> {
        let mut topology = self.topology.lock();
        let mut candidate = topology.clone();
        candidate.set_surface_render_graph(surface, render_graph.map(str::to_owned))?;
        if self.is_realized() {
            self.check_schedulable(&candidate)?;
        }
        *topology = candidate;
        self.invalidate_execution_graph();
        Ok(())
    }

    /// Builds an execution graph for the topology and throws it away
    fn check_schedulable(&self, topology: &Topology) -> Result<()> {
        ExecutionGraphBuilder::new(self.config.queue_submission_policy)
            .build(topology)
            .map(|_| ())
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.topology.lock().surfaces().map(|(surface, _)| surface).collect()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.topology.lock().devices().map(|(device, _)| device).collect()
    }

    /// Returns the execution graph that the last frame was dispatched with
    pub fn execution_graph(&self) -> Option<Arc<ExecutionGraph>> {
        self.execution_graph.lock().clone()
    }

    /// Replaces the global render start hooks
    pub fn set_event_render_start(&self, hook: impl Fn(&RenderContext) -> Result<()> + Send + Sync + 'static) {
        Arc::make_mut(&mut *self.hooks.write()).set_global(HookPoint::RenderStart, Arc::new(hook));
    }

    /// Replaces the global render finish hooks
    pub fn set_event_render_finish(&self, hook: impl Fn(&RenderContext) -> Result<()> + Send + Sync + 'static) {
        Arc::make_mut(&mut *self.hooks.write()).set_global(HookPoint::RenderFinish, Arc::new(hook));
    }

    /// Appends a global render start hook. Hooks of a point run in the order in which they were added.
    pub fn add_event_render_start(&self, hook: impl Fn(&RenderContext) -> Result<()> + Send + Sync + 'static) {
        Arc::make_mut(&mut *self.hooks.write()).add_global(HookPoint::RenderStart, Arc::new(hook));
    }

    /// Appends a global render finish hook
    pub fn add_event_render_finish(&self, hook: impl Fn(&RenderContext) -> Result<()> + Send + Sync + 'static) {
        Arc::make_mut(&mut *self.hooks.write()).add_global(HookPoint::RenderFinish, Arc::new(hook));
    }

    /// Appends a hook that runs for a single surface
    pub fn add_surface_hook(
        &self,
        surface: SurfaceId,
        point: HookPoint,
        hook: impl Fn(&RenderContext) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        if self.topology.lock().surface(surface).is_none() {
            return Err(Error::UnknownSurface(surface));
        }
        Arc::make_mut(&mut *self.hooks.write()).add_surface(surface, point, Arc::new(hook));
        Ok(())
    }

    /// Adds an update task. The task runs from the next tick on.
    pub fn add_update_task(
        &self,
        name: impl Into<String>,
        task: impl Fn(&UpdateContext) -> Result<()> + Send + Sync + 'static,
    ) -> NodeIndex {
        Arc::make_mut(&mut *self.update_graph.lock()).add_task(name, task)
    }

    /// Adds an update task that runs after the tasks in `after`
    pub fn add_update_task_after(
        &self,
        name: impl Into<String>,
        after: &[NodeIndex],
        task: impl Fn(&UpdateContext) -> Result<()> + Send + Sync + 'static,
    ) -> Result<NodeIndex> {
        Arc::make_mut(&mut *self.update_graph.lock()).add_task_after(name, after, task)
    }

    /// Returns the update graph that the next tick runs
    pub fn update_graph(&self) -> Arc<UpdateGraph> {
        self.update_graph.lock().clone()
    }

    /// Replaces the whole update graph
    pub fn set_update_graph(&self, update_graph: UpdateGraph) {
        *self.update_graph.lock() = Arc::new(update_graph);
    }

    /// Runs the action on the render thread at the next frame boundary
    pub fn enqueue_render_action(&self, action: impl FnOnce() + Send + 'static) {
        self.render_actions.enqueue(action);
    }

    /// Runs the action on the update thread at the start of the next tick
    pub fn enqueue_update_action(&self, action: impl FnOnce() + Send + 'static) {
        self.update_actions.enqueue(action);
    }

    /// Number of successfully rendered frames
    pub fn frame_number(&self) -> u64 {
        self.triple_buffer.frame_number()
    }

    pub fn slot_roles(&self) -> SlotRoles {
        self.triple_buffer.roles()
    }

    pub fn has_update_error(&self) -> bool {
        self.update_error.lock().is_some()
    }

    /// Returns the error of the failed update tick. Ticking resumes afterwards.
    pub fn take_update_error(&self) -> Option<Error> {
        self.update_error.lock().take()
    }

    pub fn last_frame_status(&self) -> Option<FrameStatus> {
        self.last_frame_status.lock().clone()
    }

    pub fn statistics(&self) -> OrchestratorStatistics {
        self.statistics.lock().clone()
    }
}

/// Builder type to create an instance of the [`Orchestrator`]
pub struct OrchestratorBuilder<B: Backend> {
    _phantom: PhantomData<B>,
    config: Option<OrchestratorConfig>,
    backend_config: Option<B::BackendConfig>,
}

impl<B: Backend> OrchestratorBuilder<B> {
    fn new() -> Self {
        Self {
            _phantom: PhantomData,
            config: None,
            backend_config: None,
        }
    }

    pub fn add_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn add_backend_config(mut self, backend_config: B::BackendConfig) -> Self {
        self.backend_config = Some(backend_config);
        self
    }

    pub fn build(self) -> Result<Orchestrator<B>> {
        // Create a Tracy client before the backend is created because the first thread creating a Client is called "Main thread".
        let _tracy_client = Client::start();

        // Run deadlock detection in a separate thread.
        #[cfg(feature = "deadlock_detection")]
        {
            thread::Builder::new()
                .name("deadlock-detection".to_owned())
                .spawn(run_deadlock_detection)?;
        }

        let config = self.config.unwrap_or_default();
        config.validate()?;
        let backend_config = self.backend_config.unwrap_or_default();
        let backend = B::new(&config, backend_config)?;
        Orchestrator::new(config, backend)
    }
}

#[cfg(feature = "deadlock_detection")]
fn run_deadlock_detection() {
    use kairos_shared::parking_lot::deadlock;
    use std::time::Duration;

    info!("Deadlock detection thread started");

    loop {
        thread::sleep(Duration::from_secs(1));
        let deadlocks = deadlock::check_deadlock();
        if deadlocks.is_empty() {
            continue;
        }

        error!("{} deadlocks detected", deadlocks.len());
        for (i, threads) in deadlocks.iter().enumerate() {
            error!("Deadlock #{}", i);
            for t in threads {
                error!("Thread Id {:#?}", t.thread_id());
                error!("{:#?}", t.backtrace());
            }
        }
    }
}
