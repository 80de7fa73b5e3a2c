use kairos_shared::{bitflags::bitflags, derive_new::new};

use crate::DeviceId;

bitflags! {
    /// Capabilities of a device queue
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct QueueKinds: u32 {
        const GRAPHICS = 1;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const PRESENT = 1 << 3;
    }
}

/// A family of queues with identical capabilities as reported by a device
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct QueueFamily {
    pub kinds: QueueKinds,
    pub queue_count: u32,
}

/// Identifies one concrete queue of a device
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueSelection {
    pub device: DeviceId,
    pub family_index: u32,
    pub queue_index: u32,
}

/// Requirements of one logical queue of a render graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTraits {
    pub kinds: QueueKinds,
}

impl QueueTraits {
    /// A queue that can render and present, which is what a surface needs at minimum
    pub fn graphics() -> Self {
        Self {
            kinds: QueueKinds::GRAPHICS | QueueKinds::PRESENT,
        }
    }

    pub fn compute() -> Self {
        Self {
            kinds: QueueKinds::COMPUTE,
        }
    }

    pub fn is_supported_by(&self, family: &QueueFamily) -> bool {
        family.kinds.contains(self.kinds)
    }
}

impl Default for QueueTraits {
    fn default() -> Self {
        Self::graphics()
    }
}

/// The concrete queue that a logical queue of a surface submits to
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSubmission {
    pub logical_queue: usize,
    pub selection: QueueSelection,
}
