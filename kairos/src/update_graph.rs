use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use kairos_backend::{Error, Result};
use kairos_shared::TerminationFlag;

use crate::{
    dag::{Dag, EdgeKind, NodeIndex},
    frame_clock::SlotIndex,
};

/// Passed to every update task of a tick
pub struct UpdateContext<'a> {
    /// Number of the tick since the start of the application
    pub tick: u64,
    /// Logical time of the tick
    pub tick_time: Instant,
    pub update_period: Duration,
    /// Slot that the tick writes
    pub update_slot: SlotIndex,
    /// Slot holding the most recently published state
    pub source_slot: SlotIndex,
    termination: &'a TerminationFlag,
}

impl<'a> UpdateContext<'a> {
    pub(crate) fn new(
        tick: u64,
        tick_time: Instant,
        update_period: Duration,
        update_slot: SlotIndex,
        source_slot: SlotIndex,
        termination: &'a TerminationFlag,
    ) -> Self {
        Self {
            tick,
            tick_time,
            update_period,
            update_slot,
            source_slot,
            termination,
        }
    }

    /// Requests the orchestrator to stop
    pub fn set_terminate(&self) {
        self.termination.set();
    }

    pub fn is_terminating(&self) -> bool {
        self.termination.is_set()
    }
}

pub type UpdateFn = Arc<dyn Fn(&UpdateContext) -> Result<()> + Send + Sync>;

/// A named user task of the update graph
#[derive(Clone)]
pub struct UpdateTask {
    name: String,
    function: UpdateFn,
}

impl UpdateTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, context: &UpdateContext) -> Result<()> {
        (self.function)(context)
    }
}

impl fmt::Debug for UpdateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateTask").field("name", &self.name).finish()
    }
}

/// The tasks that run in every update tick.
///
/// Tasks without a dependency between them run in parallel. A failing task skips the tasks that
/// were added after it.
#[derive(Debug, Clone, Default)]
pub struct UpdateGraph {
    dag: Dag<UpdateTask>,
}

impl UpdateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, name: impl Into<String>, function: impl Fn(&UpdateContext) -> Result<()> + Send + Sync + 'static) -> NodeIndex {
        self.dag.add_node(UpdateTask {
            name: name.into(),
            function: Arc::new(function),
        })
    }

    /// Adds a task that runs after all tasks in `after` completed
    pub fn add_task_after(
        &mut self,
        name: impl Into<String>,
        after: &[NodeIndex],
        function: impl Fn(&UpdateContext) -> Result<()> + Send + Sync + 'static,
    ) -> Result<NodeIndex> {
        for upstream in after {
            if self.dag.get(*upstream).is_none() {
                return Err(Error::UnknownNode(upstream.index()));
            }
        }
        let index = self.add_task(name, function);
        for upstream in after {
            self.dag.add_edge(*upstream, index, EdgeKind::Data)?;
        }
        Ok(index)
    }

    pub fn dag(&self) -> &Dag<UpdateTask> {
        &self.dag
    }

    pub fn len(&self) -> usize {
        self.dag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.is_empty()
    }
}
