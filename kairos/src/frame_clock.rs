use std::{
    fmt,
    time::{Duration, Instant},
};

use kairos_backend::{Error, Result};
use kairos_shared::ConfigError;

/// Index of one of the three buffered copies of the frame state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub const ALL: [SlotIndex; 3] = [SlotIndex(0), SlotIndex(1), SlotIndex(2)];

    pub fn new(index: usize) -> Option<Self> {
        (index < 3).then_some(SlotIndex(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Frame counter and timestamps of the slots.
///
/// The frame number increases by one for every render pass that completes successfully. It wraps
/// around to zero after `u64::MAX`.
#[derive(Debug, Clone)]
pub struct FrameClock {
    application_start_time: Instant,
    update_period: Duration,
    frame_number: u64,
    slot_times: [Instant; 3],
}

impl FrameClock {
    pub fn new(updates_per_second: u32, application_start_time: Instant) -> Result<Self> {
        if updates_per_second == 0 {
            return Err(Error::InvalidConfiguration(ConfigError::ZeroUpdateRate));
        }
        Ok(Self {
            application_start_time,
            update_period: Duration::from_nanos(1_000_000_000 / updates_per_second as u64),
            frame_number: 0,
            slot_times: [application_start_time; 3],
        })
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn update_period(&self) -> Duration {
        self.update_period
    }

    pub fn application_start_time(&self) -> Instant {
        self.application_start_time
    }

    /// Logical time of the update that was written into the slot
    pub fn slot_time(&self, slot: SlotIndex) -> Instant {
        self.slot_times[slot.index()]
    }

    pub(crate) fn set_slot_time(&mut self, slot: SlotIndex, time: Instant) {
        self.slot_times[slot.index()] = time;
    }

    /// Logical time of the given tick
    pub fn tick_time(&self, tick: u64) -> Instant {
        let period_nanos = self.update_period.as_nanos() as u64;
        self.application_start_time + Duration::from_nanos(period_nanos.saturating_mul(tick))
    }

    /// Advances the frame number by one and returns the new value
    pub(crate) fn advance_frame(&mut self) -> u64 {
        self.frame_number = self.frame_number.wrapping_add(1);
        self.frame_number
    }

    #[cfg(test)]
    pub(crate) fn set_frame_number(&mut self, frame_number: u64) {
        self.frame_number = frame_number;
    }
}
