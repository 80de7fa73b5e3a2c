use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use kairos_backend::Result;
use kairos_shared::{
    log::{info, trace},
    parking_lot::Mutex,
    rayon::{self, Scope, ThreadPool},
};

use crate::dag::{Dag, EdgeKind, NodeIndex};

/// What a node asks the dispatcher to do with its downstream nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    Continue,
    /// The node decided not to do its work. The data dependent downstream nodes are skipped but
    /// nothing counts as failed.
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed,
    Halted,
    Failed(String),
    Panicked(String),
    /// Not executed because a data dependency didn't complete
    Skipped,
}

impl NodeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, NodeOutcome::Failed(_) | NodeOutcome::Panicked(_))
    }
}

/// Outcome of every node of one dispatch
#[derive(Debug, Clone)]
pub struct DispatchReport {
    outcomes: Vec<NodeOutcome>,
    elapsed: Duration,
}

impl DispatchReport {
    pub fn outcome(&self, node: NodeIndex) -> &NodeOutcome {
        &self.outcomes[node.index()]
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (NodeIndex, &NodeOutcome)> + '_ {
        self.outcomes.iter().enumerate().map(|(index, outcome)| (NodeIndex::from_usize(index), outcome))
    }

    pub fn failures(&self) -> impl Iterator<Item = (NodeIndex, &NodeOutcome)> + '_ {
        self.outcomes().filter(|(_, outcome)| outcome.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| !outcome.is_failure())
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Executes the nodes of a [`Dag`] on a worker pool.
///
/// Every node runs exactly once per dispatch and only after all of its upstream nodes finished.
/// Nodes whose dependencies are satisfied run in parallel.
pub struct GraphDispatcher {
    name: String,
    pool: ThreadPool,
}

impl GraphDispatcher {
    pub fn new(name: &str, num_threads: usize) -> Result<Self> {
        let thread_prefix = name.to_owned();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |index| format!("{thread_prefix}-worker-{index}"))
            .build()?;
        info!("Created GraphDispatcher \"{name}\" with {num_threads} worker threads");
        Ok(Self {
            name: name.to_owned(),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs every node of the `dag` with `execute` and blocks until all nodes finished or were skipped.
    ///
    /// Errors and panics of `execute` are caught and recorded in the report.
    pub fn dispatch<N, F>(&self, dag: &Dag<N>, execute: F) -> Result<DispatchReport>
    where
        N: Sync,
        F: Fn(NodeIndex, &N) -> Result<StageFlow> + Sync,
    {
        // Rejects cycles which would leave nodes pending forever
        dag.topological_order()?;

        let start = Instant::now();
        let dispatch = Dispatch {
            dag,
            execute: &execute,
            pending: dag
                .nodes()
                .map(|(index, _)| AtomicUsize::new(dag.upstream(index).len()))
                .collect(),
            blocked: dag.nodes().map(|_| AtomicBool::new(false)).collect(),
            outcomes: dag.nodes().map(|_| Mutex::new(None)).collect(),
        };
        let dispatch = &dispatch;
        self.pool.scope(|scope| {
            for root in dag.roots() {
                scope.spawn(move |scope| dispatch.run(scope, root));
            }
        });

        let outcomes = dispatch
            .outcomes
            .iter()
            .map(|outcome| outcome.lock().take().unwrap_or(NodeOutcome::Skipped))
            .collect();
        let report = DispatchReport {
            outcomes,
            elapsed: start.elapsed(),
        };
        trace!("{} finished a dispatch of {} nodes in {:?}", self.name, dag.len(), report.elapsed);
        Ok(report)
    }
}

struct Dispatch<'a, N, F> {
    dag: &'a Dag<N>,
    execute: &'a F,
    pending: Vec<AtomicUsize>,
    blocked: Vec<AtomicBool>,
    outcomes: Vec<Mutex<Option<NodeOutcome>>>,
}

impl<'a, N, F> Dispatch<'a, N, F>
where
    N: Sync,
    F: Fn(NodeIndex, &N) -> Result<StageFlow> + Sync,
{
    fn run<'s>(&'s self, scope: &Scope<'s>, node: NodeIndex) {
        let outcome = if self.blocked[node.index()].load(Ordering::Acquire) {
            NodeOutcome::Skipped
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| (self.execute)(node, self.dag.node(node)))) {
                Ok(Ok(StageFlow::Continue)) => NodeOutcome::Completed,
                Ok(Ok(StageFlow::Halt)) => NodeOutcome::Halted,
                Ok(Err(err)) => NodeOutcome::Failed(err.to_string()),
                Err(payload) => NodeOutcome::Panicked(panic_message(payload.as_ref())),
            }
        };
        let completed = outcome == NodeOutcome::Completed;
        *self.outcomes[node.index()].lock() = Some(outcome);

        for &(next, kind) in self.dag.downstream(node) {
            if !completed && kind == EdgeKind::Data {
                self.blocked[next.index()].store(true, Ordering::Release);
            }
            if self.pending[next.index()].fetch_sub(1, Ordering::AcqRel) == 1 {
                scope.spawn(move |scope| self.run(scope, next));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
