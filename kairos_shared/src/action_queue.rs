use std::{
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use log::error;
use parking_lot::Mutex;

/// Deferred piece of work that is executed by the owner of an [`ActionQueue`]
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Queue of actions that can be filled from any thread and is drained by the thread owning it.
///
/// The lock is only held while pushing and while swapping the queued actions out. The actions
/// themselves always run outside of the lock so that an action may enqueue further actions.
/// Those are executed by the next drain.
#[derive(Default)]
pub struct ActionQueue {
    actions: Mutex<VecDeque<Action>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action. Returns immediately.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        self.actions.lock().push_back(Box::new(action));
    }

    /// Takes all currently queued actions and leaves the queue empty
    pub fn take(&self) -> VecDeque<Action> {
        std::mem::take(&mut *self.actions.lock())
    }

    /// Executes all actions that were queued before the call in enqueue order and returns how many ran.
    ///
    /// A panicking action is logged and does not prevent the remaining actions from running.
    pub fn drain_and_execute(&self) -> usize {
        let actions = self.take();
        let count = actions.len();
        for action in actions {
            if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                error!("An action panicked while the ActionQueue was drained");
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use super::*;

    #[test]
    fn executes_in_enqueue_order() {
        let queue = ActionQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let log = log.clone();
            queue.enqueue(move || log.lock().push(i));
        }
        assert_eq!(queue.len(), 100);

        assert_eq!(queue.drain_and_execute(), 100);
        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
        assert!(queue.is_empty());

        // Nothing runs twice
        assert_eq!(queue.drain_and_execute(), 0);
        assert_eq!(log.lock().len(), 100);
    }

    #[test]
    fn enqueue_during_drain_runs_next_time() {
        let queue = Arc::new(ActionQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let inner_queue = queue.clone();
            let counter = counter.clone();
            queue.enqueue(move || {
                let counter = counter.clone();
                inner_queue.enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(queue.drain_and_execute(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain_and_execute(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_action_does_not_stop_the_drain() {
        let queue = ActionQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue.enqueue(|| panic!("action failed"));
        let c = counter.clone();
        queue.enqueue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.drain_and_execute(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_enqueue_loses_nothing() {
        const PRODUCERS: usize = 4;
        const ACTIONS_PER_PRODUCER: usize = 2_000;

        let queue = Arc::new(ActionQueue::new());
        let executed = Arc::new(Mutex::new(vec![Vec::new(); PRODUCERS]));

        let producers = (0..PRODUCERS)
            .map(|producer| {
                let queue = queue.clone();
                let executed = executed.clone();
                thread::spawn(move || {
                    for i in 0..ACTIONS_PER_PRODUCER {
                        let executed = executed.clone();
                        queue.enqueue(move || executed.lock()[producer].push(i));
                    }
                })
            })
            .collect::<Vec<_>>();

        // Drain while the producers are still enqueueing
        let mut total = 0;
        while producers.iter().any(|producer| !producer.is_finished()) {
            total += queue.drain_and_execute();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        total += queue.drain_and_execute();

        assert_eq!(total, PRODUCERS * ACTIONS_PER_PRODUCER);
        for per_producer in executed.lock().iter() {
            // Enqueue order per producer is kept across drains
            assert_eq!(*per_producer, (0..ACTIONS_PER_PRODUCER).collect::<Vec<_>>());
        }
    }
}
