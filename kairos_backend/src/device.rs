use kairos_shared::DebugInfo;

use crate::QueueFamily;

/// Requested device that the backend should open
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub physical_device_index: usize,
    pub requested_extensions: Vec<String>,
    pub debug_info: DebugInfo,
}

impl DeviceConfig {
    pub fn new(physical_device_index: usize) -> Self {
        Self {
            physical_device_index,
            ..Default::default()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.requested_extensions.push(extension.into());
        self
    }

    pub fn with_debug_info(mut self, debug_info: DebugInfo) -> Self {
        self.debug_info = debug_info;
        self
    }
}

/// What the backend reports about a realized device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub queue_families: Vec<QueueFamily>,
}
