use std::sync::atomic::{AtomicU64, Ordering};

use kairos_shared::derive_more::Display;

/// Identifies a surface. Identifiers are never reused.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "surface#{}", _0)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Identifies a device. Identifiers are never reused.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "device#{}", _0)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Hands out monotonically increasing identifiers with one counter per kind
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_surface: AtomicU64,
    next_device: AtomicU64,
}

impl IdAllocator {
    pub fn next_surface_id(&self) -> SurfaceId {
        SurfaceId(self.next_surface.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_device_id(&self) -> DeviceId {
        DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(SurfaceId::from_raw(3).to_string(), "surface#3");
        assert_eq!(DeviceId::from_raw(0).to_string(), "device#0");
    }

    #[test]
    fn allocator_never_reuses() {
        let allocator = IdAllocator::default();
        let device0 = allocator.next_device_id();
        let surface0 = allocator.next_surface_id();
        let surface1 = allocator.next_surface_id();
        let device1 = allocator.next_device_id();
        assert_eq!(device0.raw(), 0);
        assert_eq!(surface0.raw(), 0);
        assert_eq!(surface1.raw(), 1);
        assert_eq!(device1.raw(), 1);
    }
}
