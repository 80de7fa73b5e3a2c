//! Orchestration core of a real-time renderer.
//!
//! The [`Orchestrator`] runs a fixed rate update thread and a render loop. Both exchange their
//! state through a triple buffer. Apart from a bounded wait for the first publication the render
//! loop never waits for an update. An update waits until the render side has taken over the
//! previous one. Every frame is expressed as an [`ExecutionGraph`] of stages that is dispatched on
//! a worker pool and rebuilt whenever the set of devices, surfaces or render graphs changes.

mod dag;
mod dispatcher;
mod execution_graph;
mod frame_clock;
mod frame_executor;
mod frame_slots;
mod hooks;
mod orchestrator;
mod queue_plan;
mod stage;
mod time_statistics;
mod topology;
mod triple_buffer;
mod update_graph;
mod update_scheduler;

pub use dag::*;
pub use dispatcher::*;
pub use execution_graph::*;
pub use frame_clock::*;
pub use frame_executor::*;
pub use frame_slots::*;
pub use hooks::*;
pub use orchestrator::*;
pub use queue_plan::*;
pub use stage::*;
pub use time_statistics::*;
pub use topology::*;
pub use triple_buffer::*;
pub use update_graph::*;
pub use update_scheduler::*;
