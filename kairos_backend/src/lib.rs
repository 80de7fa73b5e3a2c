mod backend;
mod device;
mod frame;
pub mod headless;
mod ids;
mod queue;
mod render_graph;
mod surface;
mod throttle;

pub use backend::*;
pub use device::*;
pub use frame::*;
pub use ids::*;
pub use queue::*;
pub use render_graph::*;
pub use surface::*;
pub use throttle::*;

use kairos_shared::{rayon, thiserror, ConfigError};

/// Error type for the whole library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The orchestrator is already realized")]
    AlreadyRealized,
    #[error("The orchestrator is not realized")]
    NotRealized,
    #[error("The orchestrator is already running")]
    AlreadyRunning,
    #[error("The surface {0} is not known")]
    UnknownSurface(SurfaceId),
    #[error("The device {0} is not known")]
    UnknownDevice(DeviceId),
    #[error("The render graph \"{0}\" is not compiled")]
    UnknownRenderGraph(String),
    #[error("The node {0} is not part of the graph")]
    UnknownNode(usize),
    #[error("The graph contains a cycle")]
    CyclicGraph,
    #[error("No queue of the device {device} supports {kinds:?} for the surface {surface}")]
    NoSuitableQueue {
        device: DeviceId,
        surface: SurfaceId,
        kinds: QueueKinds,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error("The stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },
    #[error("The update task \"{task}\" failed: {message}")]
    UpdateTask { task: String, message: String },
    #[error("Failed to spawn a thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("Failed to create a worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("A thread panicked: {0}")]
    Panicked(String),
    #[error("Error from the backend: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;
