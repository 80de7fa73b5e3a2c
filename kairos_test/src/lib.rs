use std::{
    thread,
    time::{Duration, Instant},
};

use kairos_shared::log::LevelFilter;

pub use spectral;

/// Installs a logger that prints to stdout. Can be called from every test.
pub fn setup_logger() {
    let _ = simple_logger::SimpleLogger::new().with_level(LevelFilter::Trace).init();
}

/// Polls `condition` until it returns `true` or the `timeout` expires. Returns the last result.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return condition();
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn wait_until_success() {
        let counter = AtomicUsize::new(0);
        let result = wait_until(Duration::from_secs(5), || counter.fetch_add(1, Ordering::SeqCst) >= 3);
        assert!(result);
    }

    #[test]
    fn wait_until_timeout() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
