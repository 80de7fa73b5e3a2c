mod action_queue;
mod config;
mod debug_info;
mod frame_rate;
mod termination;

pub use action_queue::*;
pub use config::*;
pub use debug_info::*;
pub use frame_rate::*;
pub use termination::*;

pub use bitflags;
pub use chrono;
pub use crossbeam_channel;
pub use derive_more;
pub use derive_new;
pub use itertools;
pub use log;
pub use maplit;
pub use num_cpus;
pub use parking_lot;
pub use rayon;
pub use serde;
pub use serde_yaml;
pub use spin_sleep;
pub use thiserror;
pub use tracy_client;

/// Opens a profiling span that ends when the returned value is dropped.
///
/// Evaluates to `None` when no profiler client is running.
#[macro_export]
macro_rules! span {
    ($name:expr) => {{
        let function_name = $crate::function_name!();
        $crate::tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), function_name, file!(), line!(), 0))
    }};
}

/// Records a value in the profiler plot with the given name
#[macro_export]
macro_rules! plot {
    ($name:literal, $value:expr) => {
        if let Some(client) = $crate::tracy_client::Client::running() {
            client.plot($crate::tracy_client::plot_name!($name), $value);
        }
    };
}
