use serde::{Deserialize, Serialize};

/// Upper bound for the rate at which frames are issued
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameRate {
    #[default]
    Unlimited,
    Limited(u32),
}

impl FrameRate {
    /// Creates the `LoopHelper` that paces a loop with this frame rate
    #[allow(deprecated)]
    pub fn loop_helper(&self) -> spin_sleep::LoopHelper {
        match *self {
            FrameRate::Unlimited => spin_sleep::LoopHelper::builder()
                .report_interval_s(1.0)
                .build_without_target_rate(),
            FrameRate::Limited(frame_rate) => spin_sleep::LoopHelper::builder()
                .report_interval_s(1.0)
                .build_with_target_rate(frame_rate as f64),
        }
    }
}
