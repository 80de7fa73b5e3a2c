use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use kairos_backend::{
    DeviceId, Error, QueueSubmission, QueueTraits, RenderGraphInfo, Result, SurfaceFrame, SurfaceId,
};
use kairos_shared::{
    itertools::Itertools,
    log::{debug, info},
    QueueSubmissionPolicy,
};

use kairos_macros::profile;

use crate::{
    dag::{Dag, EdgeKind, NodeIndex},
    queue_plan::{QueuePlan, QueueRequest},
    stage::{StageKind, StageNode},
    topology::Topology,
};

/// What the execution graph knows about one surface
#[derive(Debug, Clone)]
pub struct SurfacePlan {
    pub surface: SurfaceId,
    pub device: DeviceId,
    pub submission_priority: i32,
    pub render_graph: Option<Arc<RenderGraphInfo>>,
    pub queues: Vec<QueueSubmission>,
    pub begin_frame: NodeIndex,
    pub secondary_command_buffers: NodeIndex,
    pub validate_primary_nodes: Vec<NodeIndex>,
    pub draw_frame: NodeIndex,
    pub end_frame: NodeIndex,
}

/// The stage graph of one frame for a fixed topology.
///
/// The graph is immutable. When the topology changes, the orchestrator builds a new graph with
/// [`ExecutionGraphBuilder`] at the next frame boundary and swaps it in.
#[derive(Debug)]
pub struct ExecutionGraph {
    generation: u64,
    dag: Dag<StageNode>,
    surfaces: BTreeMap<SurfaceId, SurfacePlan>,
    frame_start: NodeIndex,
    render_start: NodeIndex,
    frame_finish: NodeIndex,
    valid: AtomicBool,
}

impl ExecutionGraph {
    /// Generation of the topology that the graph was built for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dag(&self) -> &Dag<StageNode> {
        &self.dag
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &SurfacePlan> {
        self.surfaces.values()
    }

    pub fn surface(&self, surface: SurfaceId) -> Option<&SurfacePlan> {
        self.surfaces.get(&surface)
    }

    pub fn frame_start(&self) -> NodeIndex {
        self.frame_start
    }

    pub fn render_start(&self) -> NodeIndex {
        self.render_start
    }

    pub fn frame_finish(&self) -> NodeIndex {
        self.frame_finish
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Marks the graph as outdated so that it is rebuilt at the next frame boundary
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Returns the node of the given kind. Per queue stages need the logical queue.
    pub fn find(&self, kind: StageKind, surface: Option<SurfaceId>, logical_queue: Option<usize>) -> Option<NodeIndex> {
        let wanted = StageNode {
            kind,
            surface,
            logical_queue,
        };
        self.dag.nodes().find(|(_, node)| **node == wanted).map(|(index, _)| index)
    }

    /// Creates the frame description that the stages of the surface are called with
    pub fn surface_frame(&self, surface: SurfaceId, frame_number: u64) -> Option<SurfaceFrame> {
        self.surfaces.get(&surface).map(|plan| SurfaceFrame {
            surface,
            device: plan.device,
            frame_number,
            graph_generation: self.generation,
            render_graph: plan.render_graph.clone(),
            queues: plan.queues.clone(),
        })
    }
}

/// Builds the [`ExecutionGraph`] for a topology.
///
/// Per surface the stages form the chain `BeginFrame -> EventRenderStart -> ValidateRenderGraphs`,
/// fan out into the two secondary validations, join in `Barrier0` and continue with
/// `SecondaryCommandBuffers`. Then every logical queue runs `ValidatePrimaryNodes ->
/// ValidatePrimaryDescriptors -> PrimaryBuffers` and all of them join in `DrawFrame -> EndFrame`.
pub struct ExecutionGraphBuilder {
    policy: QueueSubmissionPolicy,
}

impl ExecutionGraphBuilder {
    pub fn new(policy: QueueSubmissionPolicy) -> Self {
        Self { policy }
    }

    #[profile]
    pub fn build(&self, topology: &Topology) -> Result<ExecutionGraph> {
        let surfaces = topology.surfaces_in_submission_order();

        // Plan the queues of every device
        let mut plans = BTreeMap::<DeviceId, QueuePlan>::new();
        for (device, entry) in topology.devices() {
            let properties = entry.properties.as_ref().ok_or(Error::NotRealized)?;
            let requests = surfaces
                .iter()
                .filter(|(_, surface)| surface.config.device == device)
                .flat_map(|(surface, entry)| {
                    let queues = queue_traits(topology, &entry.config.render_graph);
                    queues.into_iter().enumerate().map(move |(logical_queue, traits)| QueueRequest {
                        surface: *surface,
                        logical_queue,
                        traits,
                    })
                })
                .collect::<Vec<_>>();
            plans.insert(device, QueuePlan::new(device, &properties.queue_families, requests)?);
        }

        let mut dag = Dag::new();
        let frame_start = dag.add_node(StageNode::global(StageKind::FrameStart));
        let render_start = dag.add_node(StageNode::global(StageKind::EventRenderStart));
        let frame_finish = dag.add_node(StageNode::global(StageKind::FrameFinish));
        dag.add_edge(frame_start, render_start, EdgeKind::Data)?;
        dag.add_edge(render_start, frame_finish, EdgeKind::Order)?;

        let mut surface_plans = BTreeMap::new();
        for (surface, entry) in &surfaces {
            let surface = *surface;
            let device = entry.config.device;
            let plan = plans.get(&device).ok_or(Error::UnknownDevice(device))?;
            let render_graph = match &entry.config.render_graph {
                Some(name) => Some(
                    topology
                        .render_graph(name)
                        .cloned()
                        .ok_or_else(|| Error::UnknownRenderGraph(name.clone()))?,
                ),
                None => None,
            };
            let logical_queue_count = render_graph.as_ref().map(|info| info.logical_queue_count()).unwrap_or(1);
            let queues = (0..logical_queue_count)
                .map(|logical_queue| {
                    plan.selection(surface, logical_queue)
                        .map(|selection| QueueSubmission::new(logical_queue, selection))
                        .ok_or(Error::NoSuitableQueue {
                            device,
                            surface,
                            kinds: QueueTraits::default().kinds,
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            let node = |kind| StageNode::surface(kind, surface);
            let begin_frame = dag.add_node(node(StageKind::BeginFrame));
            let surface_render_start = dag.add_node(node(StageKind::EventRenderStart));
            let validate_render_graphs = dag.add_node(node(StageKind::ValidateRenderGraphs));
            let validate_secondary_nodes = dag.add_node(node(StageKind::ValidateSecondaryNodes));
            let validate_secondary_descriptors = dag.add_node(node(StageKind::ValidateSecondaryDescriptors));
            let barrier = dag.add_node(node(StageKind::Barrier0));
            let secondary_command_buffers = dag.add_node(node(StageKind::SecondaryCommandBuffers));
            let draw_frame = dag.add_node(node(StageKind::DrawFrame));
            let end_frame = dag.add_node(node(StageKind::EndFrame));

            dag.add_edge(frame_start, begin_frame, EdgeKind::Data)?;
            dag.add_edge(begin_frame, surface_render_start, EdgeKind::Data)?;
            dag.add_edge(render_start, surface_render_start, EdgeKind::Data)?;
            dag.add_edge(surface_render_start, validate_render_graphs, EdgeKind::Data)?;
            dag.add_edge(validate_render_graphs, validate_secondary_nodes, EdgeKind::Data)?;
            dag.add_edge(validate_render_graphs, validate_secondary_descriptors, EdgeKind::Data)?;
            dag.add_edge(validate_secondary_nodes, barrier, EdgeKind::Data)?;
            dag.add_edge(validate_secondary_descriptors, barrier, EdgeKind::Data)?;
            dag.add_edge(barrier, secondary_command_buffers, EdgeKind::Data)?;

            let mut validate_primary_nodes = Vec::with_capacity(logical_queue_count);
            for logical_queue in 0..logical_queue_count {
                let queue_node = |kind| StageNode::queue(kind, surface, logical_queue);
                let nodes = dag.add_node(queue_node(StageKind::ValidatePrimaryNodes));
                let descriptors = dag.add_node(queue_node(StageKind::ValidatePrimaryDescriptors));
                let buffers = dag.add_node(queue_node(StageKind::PrimaryBuffers));
                dag.add_edge(secondary_command_buffers, nodes, EdgeKind::Data)?;
                dag.add_edge(nodes, descriptors, EdgeKind::Data)?;
                dag.add_edge(descriptors, buffers, EdgeKind::Data)?;
                dag.add_edge(buffers, draw_frame, EdgeKind::Data)?;
                validate_primary_nodes.push(nodes);
            }

            dag.add_edge(draw_frame, end_frame, EdgeKind::Data)?;
            dag.add_edge(end_frame, frame_finish, EdgeKind::Order)?;

            surface_plans.insert(
                surface,
                SurfacePlan {
                    surface,
                    device,
                    submission_priority: entry.config.submission_priority,
                    render_graph,
                    queues,
                    begin_frame,
                    secondary_command_buffers,
                    validate_primary_nodes,
                    draw_frame,
                    end_frame,
                },
            );
        }

        if self.policy == QueueSubmissionPolicy::SharedQueueOrdered {
            for plan in plans.values() {
                for (selection, users) in plan.shared_queues() {
                    for pair in users.windows(2) {
                        let ((first, _), (second, second_queue)) = (pair[0], pair[1]);
                        let (Some(first), Some(second)) = (surface_plans.get(&first), surface_plans.get(&second)) else {
                            continue;
                        };
                        debug!(
                            "{} submits to {selection:?} after {}",
                            second.surface, first.surface
                        );
                        dag.add_edge(
                            first.secondary_command_buffers,
                            second.validate_primary_nodes[second_queue],
                            EdgeKind::Order,
                        )?;
                        dag.add_edge(first.draw_frame, second.draw_frame, EdgeKind::Order)?;
                    }
                }
            }
        }

        // Cycles would deadlock the dispatch
        dag.topological_order()?;

        let generation = topology.generation();
        info!(
            "Built execution graph for generation {generation} with {} nodes and {} edges for [{}]",
            dag.len(),
            dag.edge_count(),
            surface_plans.keys().join(", ")
        );
        Ok(ExecutionGraph {
            generation,
            dag,
            surfaces: surface_plans,
            frame_start,
            render_start,
            frame_finish,
            valid: AtomicBool::new(true),
        })
    }
}

/// The queue requirements of a surface. Without a render graph a surface uses one graphics queue.
fn queue_traits(topology: &Topology, render_graph: &Option<String>) -> Vec<QueueTraits> {
    let info = render_graph.as_ref().and_then(|name| topology.render_graph(name));
    match info {
        Some(info) => (0..info.logical_queue_count()).map(|queue| info.queue_traits(queue)).collect(),
        None => vec![QueueTraits::default()],
    }
}
