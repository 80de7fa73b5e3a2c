use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use kairos_backend::Error;
use kairos_shared::{
    log::{error, info, trace},
    parking_lot::Mutex,
    spin_sleep, tracy_client, ActionQueue, PacingPolicy, TerminationFlag,
};

use crate::{
    dispatcher::{GraphDispatcher, NodeOutcome, StageFlow},
    time_statistics::OrchestratorStatistics,
    triple_buffer::TripleBufferState,
    update_graph::{UpdateContext, UpdateGraph},
};

/// What the update thread should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerDecision {
    /// The tick is due and should run now
    Run { tick: u64, tick_time: Instant },
    /// The next tick is due after the duration
    Wait(Duration),
}

/// Decides when the ticks of a fixed rate clock run.
///
/// Tick `n` is due at `start + n * period`. The pacer doesn't read the clock itself so that it can
/// be driven with simulated time.
#[derive(Debug, Clone)]
pub struct TickPacer {
    policy: PacingPolicy,
    period: Duration,
    start: Instant,
    max_catch_up_ticks: u32,
    next_tick: u64,
    skipped_ticks: u64,
}

impl TickPacer {
    pub fn new(policy: PacingPolicy, period: Duration, start: Instant, max_catch_up_ticks: u32) -> Self {
        Self {
            policy,
            period,
            start,
            max_catch_up_ticks,
            next_tick: 0,
            skipped_ticks: 0,
        }
    }

    pub fn tick_time(&self, tick: u64) -> Instant {
        let nanos = (self.period.as_nanos() as u64).saturating_mul(tick);
        self.start + Duration::from_nanos(nanos)
    }

    /// The latest tick whose time is not after `now`
    fn latest_due_tick(&self, now: Instant) -> Option<u64> {
        let elapsed = now.checked_duration_since(self.start)?;
        let period = self.period.as_nanos().max(1);
        Some((elapsed.as_nanos() / period) as u64)
    }

    pub fn poll(&mut self, now: Instant) -> PacerDecision {
        let latest = match self.latest_due_tick(now) {
            Some(latest) if latest >= self.next_tick => latest,
            _ => return PacerDecision::Wait(self.tick_time(self.next_tick).saturating_duration_since(now)),
        };

        let behind = latest - self.next_tick;
        let allowed = match self.policy {
            PacingPolicy::FixedRate => 0,
            PacingPolicy::CatchUp => self.max_catch_up_ticks as u64,
        };
        if behind > allowed {
            let skipped = behind - allowed;
            self.skipped_ticks += skipped;
            self.next_tick += skipped;
            trace!("Dropped {skipped} update ticks");
        }

        let tick = self.next_tick;
        self.next_tick += 1;
        PacerDecision::Run {
            tick,
            tick_time: self.tick_time(tick),
        }
    }

    pub fn next_tick(&self) -> u64 {
        self.next_tick
    }

    /// Number of ticks that were dropped because they were missed
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    /// A task failed and nothing was published
    Failed,
    /// The process is terminating
    Cancelled,
}

/// Runs the update ticks on the update thread
pub(crate) struct UpdateScheduler<'a> {
    pub triple_buffer: &'a TripleBufferState,
    pub actions: &'a ActionQueue,
    pub graph: &'a Mutex<Arc<UpdateGraph>>,
    pub dispatcher: &'a GraphDispatcher,
    pub termination: &'a TerminationFlag,
    pub error: &'a Mutex<Option<Error>>,
    pub statistics: &'a Mutex<OrchestratorStatistics>,
    pub wait_timeout: Duration,
}

impl<'a> UpdateScheduler<'a> {
    pub fn run(&self, mut pacer: TickPacer) {
        let client = tracy_client::Client::start();
        client.set_thread_name("update_thread");
        info!("Starting update loop with a period of {:?}", pacer.period);

        let mut reported_skips = 0;
        while !self.termination.is_set() {
            // Ticking halts until the owner took the error
            if self.error.lock().is_some() {
                self.termination.wait_timeout(self.wait_timeout);
                continue;
            }

            match pacer.poll(Instant::now()) {
                PacerDecision::Wait(duration) if duration > self.wait_timeout => {
                    self.termination.wait_timeout(self.wait_timeout);
                }
                PacerDecision::Wait(duration) => spin_sleep::sleep(duration),
                PacerDecision::Run { tick, tick_time } => {
                    self.tick(tick, tick_time);
                }
            }

            if pacer.skipped_ticks() != reported_skips {
                self.statistics.lock().skipped_ticks += pacer.skipped_ticks() - reported_skips;
                reported_skips = pacer.skipped_ticks();
            }
        }
        info!("Update loop stopped after {} ticks", pacer.next_tick());
    }

    /// Runs one tick: drains the update actions, writes the update slot and publishes it
    pub fn tick(&self, tick: u64, tick_time: Instant) -> TickOutcome {
        let _span = kairos_shared::span!("update_tick");
        self.actions.drain_and_execute();

        let Some(ticket) = self.triple_buffer.begin_update(tick_time) else {
            return TickOutcome::Cancelled;
        };
        let graph = self.graph.lock().clone();
        let start = Instant::now();
        let context = UpdateContext::new(
            tick,
            tick_time,
            self.triple_buffer.clock().update_period(),
            ticket.slot(),
            ticket.source(),
            self.termination,
        );
        let result = self.dispatcher.dispatch(graph.dag(), |_, task| {
            task.run(&context)?;
            Ok(StageFlow::Continue)
        });
        self.statistics.lock().record_update(start.elapsed());

        let result = result.and_then(|report| match report.failures().next() {
            None => Ok(()),
            Some((node, outcome)) => {
                let message = match outcome {
                    NodeOutcome::Panicked(message) => format!("panicked: {message}"),
                    NodeOutcome::Failed(message) => message.clone(),
                    _ => String::new(),
                };
                Err(Error::UpdateTask {
                    task: graph.dag().node(node).name().to_owned(),
                    message,
                })
            }
        });
        match result {
            Ok(()) => {
                self.triple_buffer.end_update(ticket);
                TickOutcome::Published
            }
            Err(err) => {
                error!("Update tick {tick} failed: {err}");
                self.triple_buffer.abort_update(ticket);
                *self.error.lock() = Some(err);
                TickOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::frame_clock::FrameClock;

    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    /// Polls the pacer at the simulated milliseconds until nothing is due and returns the ticks that ran
    fn simulate(pacer: &mut TickPacer, start: Instant, times: impl IntoIterator<Item = u64>) -> Vec<u64> {
        let mut ticks = Vec::new();
        for millis in times {
            while let PacerDecision::Run { tick, .. } = pacer.poll(start + ms(millis)) {
                ticks.push(tick);
            }
        }
        ticks
    }

    mod tick_pacer {
        use super::*;

        #[test]
        fn hundred_updates_per_second_for_250_ms() {
            let start = Instant::now();
            let mut pacer = TickPacer::new(PacingPolicy::FixedRate, ms(10), start, 5);
            let ticks = simulate(&mut pacer, start, 0..250);
            assert!((24..=26).contains(&ticks.len()), "ran {} ticks", ticks.len());
            assert_eq!(ticks, (0..25).collect::<Vec<_>>());
            assert_eq!(pacer.skipped_ticks(), 0);
        }

        #[test]
        fn fixed_rate_drops_missed_ticks() {
            let start = Instant::now();
            let mut pacer = TickPacer::new(PacingPolicy::FixedRate, ms(10), start, 5);
            let ticks = simulate(&mut pacer, start, [0, 50, 100, 150, 200, 249]);
            assert_eq!(ticks, vec![0, 5, 10, 15, 20, 24]);
            assert_eq!(pacer.skipped_ticks(), 19);
        }

        #[test]
        fn catch_up_runs_missed_ticks() {
            let start = Instant::now();
            let mut pacer = TickPacer::new(PacingPolicy::CatchUp, ms(10), start, 100);
            let ticks = simulate(&mut pacer, start, [0, 50, 100, 150, 200, 249]);
            assert_eq!(ticks, (0..25).collect::<Vec<_>>());
            assert_eq!(pacer.skipped_ticks(), 0);
        }

        #[test]
        fn catch_up_is_bounded() {
            let start = Instant::now();
            let mut pacer = TickPacer::new(PacingPolicy::CatchUp, ms(10), start, 2);
            pacer.poll(start);
            // Ticks 1 to 10 are due, only the last two missed ticks and the current one run
            let ticks = simulate(&mut pacer, start, [100]);
            assert_eq!(ticks, vec![8, 9, 10]);
            assert_eq!(pacer.skipped_ticks(), 7);
        }

        #[test]
        fn wait_until_next_tick() {
            let start = Instant::now();
            let mut pacer = TickPacer::new(PacingPolicy::FixedRate, ms(10), start, 5);
            assert!(matches!(pacer.poll(start), PacerDecision::Run { tick: 0, .. }));
            assert_eq!(pacer.poll(start + ms(3)), PacerDecision::Wait(ms(7)));
        }

        #[test]
        fn tick_time() {
            let start = Instant::now();
            let pacer = TickPacer::new(PacingPolicy::FixedRate, ms(10), start, 5);
            assert_eq!(pacer.tick_time(3), start + ms(30));
        }
    }

    struct Fixture {
        triple_buffer: TripleBufferState,
        actions: ActionQueue,
        graph: Mutex<Arc<UpdateGraph>>,
        dispatcher: GraphDispatcher,
        termination: TerminationFlag,
        error: Mutex<Option<Error>>,
        statistics: Mutex<OrchestratorStatistics>,
    }

    impl Fixture {
        fn new(graph: UpdateGraph) -> Self {
            let termination = TerminationFlag::new();
            let clock = FrameClock::new(100, Instant::now()).unwrap();
            Self {
                triple_buffer: TripleBufferState::new(clock, termination.clone(), ms(5), Duration::ZERO),
                actions: ActionQueue::new(),
                graph: Mutex::new(Arc::new(graph)),
                dispatcher: GraphDispatcher::new("update-test", 2).unwrap(),
                termination,
                error: Mutex::new(None),
                statistics: Mutex::new(OrchestratorStatistics::default()),
            }
        }

        fn scheduler(&self) -> UpdateScheduler<'_> {
            UpdateScheduler {
                triple_buffer: &self.triple_buffer,
                actions: &self.actions,
                graph: &self.graph,
                dispatcher: &self.dispatcher,
                termination: &self.termination,
                error: &self.error,
                statistics: &self.statistics,
                wait_timeout: ms(5),
            }
        }
    }

    mod tick {
        use super::*;

        #[test]
        fn publishes_the_update_slot() {
            let written = Arc::new(AtomicU64::new(u64::MAX));
            let mut graph = UpdateGraph::new();
            let written_clone = written.clone();
            graph.add_task("write", move |context| {
                written_clone.store(context.update_slot.index() as u64, Ordering::SeqCst);
                Ok(())
            });
            let fixture = Fixture::new(graph);
            let update_slot = fixture.triple_buffer.roles().update;

            let ran_action = Arc::new(AtomicU64::new(0));
            let ran_action_clone = ran_action.clone();
            fixture.actions.enqueue(move || {
                ran_action_clone.fetch_add(1, Ordering::SeqCst);
            });

            let outcome = fixture.scheduler().tick(0, Instant::now());
            assert_eq!(outcome, TickOutcome::Published);
            assert_eq!(ran_action.load(Ordering::SeqCst), 1);
            assert_eq!(written.load(Ordering::SeqCst), update_slot.index() as u64);
            assert!(fixture.triple_buffer.has_fresh_update());
            assert_eq!(fixture.statistics.lock().update.total_count(), 1);
        }

        #[test]
        fn failing_task_stores_the_error() {
            let mut graph = UpdateGraph::new();
            let failing = graph.add_task("physics", |_| {
                Err(Error::StageFailed {
                    stage: "physics".to_owned(),
                    message: "exploded".to_owned(),
                })
            });
            let skipped = Arc::new(AtomicU64::new(0));
            let skipped_clone = skipped.clone();
            graph
                .add_task_after("camera", &[failing], move |_| {
                    skipped_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            let fixture = Fixture::new(graph);

            let outcome = fixture.scheduler().tick(0, Instant::now());
            assert_eq!(outcome, TickOutcome::Failed);
            assert_eq!(skipped.load(Ordering::SeqCst), 0);
            assert!(!fixture.triple_buffer.has_fresh_update());
            assert!(!fixture.triple_buffer.is_update_in_progress());
            assert!(matches!(fixture.error.lock().take(), Some(Error::UpdateTask { task, .. }) if task == "physics"));
        }

        #[test]
        fn panicking_task_stores_the_error() {
            let mut graph = UpdateGraph::new();
            graph.add_task("panicking", |_| panic!("task panicked"));
            let fixture = Fixture::new(graph);

            assert_eq!(fixture.scheduler().tick(0, Instant::now()), TickOutcome::Failed);
            assert!(matches!(
                fixture.error.lock().take(),
                Some(Error::UpdateTask { message, .. }) if message.contains("task panicked")
            ));
        }

        #[test]
        fn terminating_cancels_the_tick() {
            let fixture = Fixture::new(UpdateGraph::new());
            fixture.triple_buffer.terminate();
            assert_eq!(fixture.scheduler().tick(0, Instant::now()), TickOutcome::Cancelled);
        }
    }

    #[test]
    fn run_stops_on_termination() {
        let fixture = Fixture::new(UpdateGraph::new());
        let pacer = TickPacer::new(PacingPolicy::FixedRate, ms(10), Instant::now(), 5);
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| fixture.scheduler().run(pacer));
            // The first tick publishes and the second one waits for the render side
            assert!(kairos_test::wait_until(Duration::from_secs(2), || fixture.triple_buffer.has_fresh_update()));
            fixture.triple_buffer.terminate();
            handle.join().unwrap();
        });
    }
}
