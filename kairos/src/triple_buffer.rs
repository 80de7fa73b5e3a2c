use std::time::{Duration, Instant};

use kairos_shared::{
    log::trace,
    parking_lot::{Condvar, Mutex},
    TerminationFlag,
};

use crate::frame_clock::{FrameClock, SlotIndex};

/// Assignment of the three slots to their roles at one moment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRoles {
    /// Read by the render pass
    pub render: SlotIndex,
    /// Read by the render pass as the state before `render` for interpolation
    pub prev_update: SlotIndex,
    /// Written by the update tick
    pub update: SlotIndex,
}

impl SlotRoles {
    pub fn are_distinct(&self) -> bool {
        self.render != self.prev_update && self.render != self.update && self.prev_update != self.update
    }

    fn rotate(&mut self) {
        *self = SlotRoles {
            render: self.update,
            prev_update: self.render,
            update: self.prev_update,
        };
    }
}

impl Default for SlotRoles {
    fn default() -> Self {
        Self {
            render: SlotIndex::ALL[0],
            update: SlotIndex::ALL[1],
            prev_update: SlotIndex::ALL[2],
        }
    }
}

/// Handed out by [`TripleBufferState::begin_update`] and consumed by `end_update` or `abort_update`
#[derive(Debug)]
pub struct UpdateTicket {
    slot: SlotIndex,
    source: SlotIndex,
    tick_time: Instant,
}

impl UpdateTicket {
    /// Slot the update writes to
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Slot holding the most recently published state that the update may read from
    pub fn source(&self) -> SlotIndex {
        self.source
    }

    pub fn tick_time(&self) -> Instant {
        self.tick_time
    }
}

/// Describes one render pass
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTicket {
    pub render: SlotIndex,
    pub prev_update: SlotIndex,
    /// Frame number of the pass
    pub frame_number: u64,
    pub render_start_time: Instant,
    /// Time between the logical time of the render slot and the start of the pass
    pub render_time_delta: Duration,
    /// `render_time_delta` relative to the update period, clamped to `[0, 1]`
    pub interpolation: f64,
}

struct BufferState {
    roles: SlotRoles,
    clock: FrameClock,
    /// The update slot holds a publication that the render side has not taken over yet
    fresh: bool,
    update_in_progress: bool,
    render_in_progress: bool,
    ever_published: bool,
}

/// Hands the three frame state slots back and forth between the update and the render activity.
///
/// The update writes the `update` slot and publishes it with `end_update`. The next
/// `acquire_render_slot` takes the publication over: it becomes the `render` slot, the former
/// render slot becomes `prev_update` and the former `prev_update` slot is handed to the update.
/// Until that happened there is no slot the update could write without touching one the render
/// pass may still read, so `begin_update` waits for it.
pub struct TripleBufferState {
    state: Mutex<BufferState>,
    condvar: Condvar,
    termination: TerminationFlag,
    wait_timeout: Duration,
    startup_wait: Duration,
}

impl TripleBufferState {
    pub fn new(clock: FrameClock, termination: TerminationFlag, wait_timeout: Duration, startup_wait: Duration) -> Self {
        Self {
            state: Mutex::new(BufferState {
                roles: SlotRoles::default(),
                clock,
                fresh: false,
                update_in_progress: false,
                render_in_progress: false,
                ever_published: false,
            }),
            condvar: Condvar::new(),
            termination,
            wait_timeout,
            startup_wait,
        }
    }

    /// Starts an update for the tick with the given logical time.
    ///
    /// Blocks while the previous publication has not been taken over by the render side. Returns
    /// `None` when the process is terminating.
    pub fn begin_update(&self, tick_time: Instant) -> Option<UpdateTicket> {
        let mut state = self.state.lock();
        loop {
            if self.termination.is_set() {
                return None;
            }
            if !state.fresh && !state.update_in_progress {
                break;
            }
            self.condvar.wait_for(&mut state, self.wait_timeout);
        }
        Some(Self::start_update(&mut state, tick_time))
    }

    /// Like [`TripleBufferState::begin_update`] but returns `None` instead of blocking
    pub fn try_begin_update(&self, tick_time: Instant) -> Option<UpdateTicket> {
        let mut state = self.state.lock();
        if self.termination.is_set() || state.fresh || state.update_in_progress {
            return None;
        }
        Some(Self::start_update(&mut state, tick_time))
    }

    fn start_update(state: &mut BufferState, tick_time: Instant) -> UpdateTicket {
        state.update_in_progress = true;
        UpdateTicket {
            slot: state.roles.update,
            source: state.roles.render,
            tick_time,
        }
    }

    /// Publishes the slot written with the ticket
    pub fn end_update(&self, ticket: UpdateTicket) {
        let mut state = self.state.lock();
        debug_assert_eq!(ticket.slot, state.roles.update);
        state.clock.set_slot_time(ticket.slot, ticket.tick_time);
        state.fresh = true;
        state.ever_published = true;
        state.update_in_progress = false;
        trace!("Published {} for tick time {:?}", ticket.slot, ticket.tick_time);
        self.condvar.notify_all();
    }

    /// Ends an update without publishing it. The render side keeps the previous state.
    pub fn abort_update(&self, ticket: UpdateTicket) {
        let mut state = self.state.lock();
        debug_assert_eq!(ticket.slot, state.roles.update);
        state.update_in_progress = false;
        self.condvar.notify_all();
    }

    /// Starts a render pass and takes over the latest publication.
    ///
    /// Waits at most the startup wait when nothing was published yet. In that case the pass
    /// renders the default initialized state. Returns `None` when the process is terminating.
    pub fn acquire_render_slot(&self) -> Option<RenderTicket> {
        let mut state = self.state.lock();
        if !state.ever_published {
            let deadline = Instant::now() + self.startup_wait;
            while !state.ever_published && !self.termination.is_set() {
                if self.condvar.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        if self.termination.is_set() {
            return None;
        }

        if state.fresh {
            state.roles.rotate();
            state.fresh = false;
            self.condvar.notify_all();
        }
        if cfg!(feature = "assertions") {
            assert!(state.roles.are_distinct(), "slot roles are not distinct: {:?}", state.roles);
        }
        state.render_in_progress = true;

        let render_start_time = Instant::now();
        let render_time_delta = render_start_time.saturating_duration_since(state.clock.slot_time(state.roles.render));
        let interpolation = (render_time_delta.as_secs_f64() / state.clock.update_period().as_secs_f64()).clamp(0.0, 1.0);
        Some(RenderTicket {
            render: state.roles.render,
            prev_update: state.roles.prev_update,
            frame_number: state.clock.frame_number(),
            render_start_time,
            render_time_delta,
            interpolation,
        })
    }

    /// Ends the render pass. The frame number advances only when the pass succeeded.
    pub fn finish_render(&self, ticket: RenderTicket, success: bool) -> u64 {
        let mut state = self.state.lock();
        state.render_in_progress = false;
        if success {
            state.clock.advance_frame()
        } else {
            trace!("Frame {} failed, the frame number is kept", ticket.frame_number);
            state.clock.frame_number()
        }
    }

    /// Releases every waiting thread. All following waits return immediately.
    pub fn terminate(&self) {
        self.termination.set();
        let _state = self.state.lock();
        self.condvar.notify_all();
    }

    pub fn roles(&self) -> SlotRoles {
        self.state.lock().roles
    }

    pub fn frame_number(&self) -> u64 {
        self.state.lock().clock.frame_number()
    }

    pub fn clock(&self) -> FrameClock {
        self.state.lock().clock.clone()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.state.lock().update_in_progress
    }

    pub fn is_render_in_progress(&self) -> bool {
        self.state.lock().render_in_progress
    }

    /// Whether a publication is waiting to be taken over by the next render pass
    pub fn has_fresh_update(&self) -> bool {
        self.state.lock().fresh
    }

    #[cfg(test)]
    pub(crate) fn set_frame_number(&self, frame_number: u64) {
        self.state.lock().clock.set_frame_number(frame_number);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
    };

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::frame_slots::FrameSlots;

    use super::*;

    fn new_state(startup_wait: Duration) -> TripleBufferState {
        let clock = FrameClock::new(100, Instant::now()).unwrap();
        TripleBufferState::new(clock, TerminationFlag::new(), Duration::from_millis(5), startup_wait)
    }

    #[test]
    fn initial_roles_are_distinct() {
        let state = new_state(Duration::ZERO);
        assert!(state.roles().are_distinct());
    }

    #[test]
    fn publication_becomes_render_slot() {
        let state = new_state(Duration::ZERO);
        let before = state.roles();

        let ticket = state.begin_update(Instant::now()).unwrap();
        assert_eq!(ticket.slot(), before.update);
        assert_eq!(ticket.source(), before.render);
        state.end_update(ticket);
        assert!(state.has_fresh_update());

        let render = state.acquire_render_slot().unwrap();
        assert_eq!(render.render, before.update);
        assert_eq!(render.prev_update, before.render);
        assert_eq!(state.roles().update, before.prev_update);
        assert!(!state.has_fresh_update());
        assert_eq!(state.finish_render(render, true), 1);
    }

    #[test]
    fn render_without_publication_keeps_slots() {
        let state = new_state(Duration::ZERO);
        let before = state.roles();
        let render = state.acquire_render_slot().unwrap();
        assert_eq!(render.render, before.render);
        assert_eq!(state.roles(), before);
        state.finish_render(render, true);
    }

    #[test]
    fn update_waits_for_render_to_take_over() {
        let state = Arc::new(new_state(Duration::ZERO));
        state.end_update(state.begin_update(Instant::now()).unwrap());
        assert!(state.try_begin_update(Instant::now()).is_none());

        let updater = {
            let state = state.clone();
            thread::spawn(move || state.begin_update(Instant::now()).map(|ticket| ticket.slot()))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!updater.is_finished());

        let render = state.acquire_render_slot().unwrap();
        let slot = updater.join().unwrap().unwrap();
        assert_ne!(slot, render.render);
        assert_ne!(slot, render.prev_update);
    }

    #[test]
    fn render_does_not_wait_for_update_in_progress() {
        let state = new_state(Duration::from_secs(5));
        state.end_update(state.begin_update(Instant::now()).unwrap());
        let first = state.acquire_render_slot().unwrap();
        let rendered = first.render;
        state.finish_render(first, true);

        let update = state.begin_update(Instant::now()).unwrap();
        assert!(state.is_update_in_progress());
        let start = Instant::now();
        let render = state.acquire_render_slot().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(render.render, rendered);
        assert_ne!(render.render, update.slot());
        state.finish_render(render, true);
        state.end_update(update);
    }

    #[test]
    fn aborted_update_is_not_published() {
        let state = new_state(Duration::ZERO);
        let before = state.roles();
        let ticket = state.begin_update(Instant::now()).unwrap();
        state.abort_update(ticket);
        assert!(!state.has_fresh_update());
        assert!(!state.is_update_in_progress());
        let render = state.acquire_render_slot().unwrap();
        assert_eq!(render.render, before.render);
    }

    #[test]
    fn failed_render_keeps_frame_number() {
        let state = new_state(Duration::ZERO);
        let render = state.acquire_render_slot().unwrap();
        assert_eq!(state.finish_render(render, false), 0);
        let render = state.acquire_render_slot().unwrap();
        assert_eq!(state.finish_render(render, true), 1);
        assert_eq!(state.frame_number(), 1);
    }

    #[test]
    fn frame_number_wraps_around() {
        let state = new_state(Duration::ZERO);
        state.set_frame_number(u64::MAX);
        let render = state.acquire_render_slot().unwrap();
        assert_eq!(render.frame_number, u64::MAX);
        assert_eq!(state.finish_render(render, true), 0);
    }

    #[test]
    fn terminate_releases_blocked_update() {
        let state = Arc::new(new_state(Duration::ZERO));
        state.end_update(state.begin_update(Instant::now()).unwrap());

        let updater = {
            let state = state.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let ticket = state.begin_update(Instant::now());
                (ticket.is_none(), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        state.terminate();
        let (cancelled, elapsed) = updater.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(2));
        assert!(state.acquire_render_slot().is_none());
    }

    #[test]
    fn startup_wait_is_bounded() {
        let state = new_state(Duration::from_millis(20));
        let start = Instant::now();
        assert!(state.acquire_render_slot().is_some());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn interpolation_is_clamped() {
        let state = new_state(Duration::ZERO);
        let long_ago = Instant::now() - Duration::from_secs(1);
        state.end_update(state.begin_update(long_ago).unwrap());
        let render = state.acquire_render_slot().unwrap();
        assert!(render.render_time_delta >= Duration::from_secs(1));
        assert_eq!(render.interpolation, 1.0);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Operation {
        BeginUpdate,
        EndUpdate,
        AbortUpdate,
        Render { success: bool },
    }

    #[test]
    fn roles_stay_distinct_for_random_sequences() {
        let mut rng = StdRng::seed_from_u64(0x6b61_6972_6f73);
        for _ in 0..200 {
            let state = new_state(Duration::ZERO);
            let mut ticket: Option<UpdateTicket> = None;
            let mut last_published: Option<SlotIndex> = None;
            let mut expected_frame_number = 0;

            for _ in 0..100 {
                let operation = match rng.gen_range(0..4) {
                    0 => Operation::BeginUpdate,
                    1 => Operation::EndUpdate,
                    2 => Operation::AbortUpdate,
                    _ => Operation::Render { success: rng.gen_bool(0.8) },
                };
                match operation {
                    Operation::BeginUpdate => {
                        if ticket.is_none() {
                            ticket = state.try_begin_update(Instant::now());
                        }
                    }
                    Operation::EndUpdate => {
                        if let Some(ticket) = ticket.take() {
                            last_published = Some(ticket.slot());
                            state.end_update(ticket);
                        }
                    }
                    Operation::AbortUpdate => {
                        if let Some(ticket) = ticket.take() {
                            state.abort_update(ticket);
                        }
                    }
                    Operation::Render { success } => {
                        let fresh = state.has_fresh_update();
                        let render = state.acquire_render_slot().unwrap();
                        if fresh {
                            assert_eq!(Some(render.render), last_published);
                        }
                        if let Some(ticket) = &ticket {
                            assert_ne!(ticket.slot(), render.render);
                            assert_ne!(ticket.slot(), render.prev_update);
                        }
                        if success {
                            expected_frame_number += 1;
                        }
                        assert_eq!(state.finish_render(render, success), expected_frame_number);
                    }
                }
                assert!(state.roles().are_distinct(), "{operation:?} broke the roles: {:?}", state.roles());
            }
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    struct Pair {
        first: u64,
        second: u64,
    }

    #[test]
    fn concurrent_update_and_render_never_share_a_slot() {
        let state = Arc::new(new_state(Duration::from_millis(10)));
        let slots = Arc::new(FrameSlots::<Pair>::default());
        let stop = Arc::new(AtomicBool::new(false));

        let updater = {
            let state = state.clone();
            let slots = slots.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut value = 0;
                while !stop.load(Ordering::SeqCst) {
                    let Some(ticket) = state.begin_update(Instant::now()) else {
                        break;
                    };
                    value += 1;
                    {
                        let mut slot = slots.try_write(ticket.slot()).expect("update slot is read by the render side");
                        slot.first = value;
                        thread::yield_now();
                        slot.second = value;
                    }
                    state.end_update(ticket);
                }
                value
            })
        };

        let mut last_seen = 0;
        for _ in 0..2_000 {
            let render = state.acquire_render_slot().unwrap();
            {
                let current = slots.try_read(render.render).expect("render slot is written by the update");
                let previous = slots.try_read(render.prev_update).expect("previous slot is written by the update");
                assert_eq!(current.first, current.second);
                assert_eq!(previous.first, previous.second);
                assert!(current.first >= last_seen);
                last_seen = current.first;
            }
            state.finish_render(render, true);
        }

        stop.store(true, Ordering::SeqCst);
        state.terminate();
        let published = updater.join().unwrap();
        assert!(published > 0);
        assert!(state.roles().are_distinct());
    }
}
