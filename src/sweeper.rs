//! Background task that periodically drops expired records, with an
//! explicit shutdown flag and a configurable sweep cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::Clock;
use crate::store::Store;

pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweeper thread. It wakes every `interval`, asks the
    /// store to drop expired records, and logs a nonzero count. A single
    /// sweep completes uninterrupted before the shutdown flag is
    /// observed.
    pub fn spawn(store: Arc<Store>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_cl = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("secmem-sweeper".into())
            .spawn(move || run(store, clock, interval, stop_cl))
            .expect("failed to spawn sweeper thread");
        Sweeper {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the sweeper to perform one final sweep and exit, then block
    /// until it has done so.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(store: Arc<Store>, clock: Arc<dyn Clock>, interval: Duration, stop: Arc<AtomicBool>) {
    loop {
        thread::sleep(interval);
        let removed = store.sweep_expired(clock.now());
        if removed > 0 {
            tracing::info!(removed, "sweep removed expired records");
        }
        if stop.load(Ordering::SeqCst) {
            // One final sweep before exiting, matching the state
            // machine's ShuttingDown step.
            let removed = store.sweep_expired(clock.now());
            if removed > 0 {
                tracing::info!(removed, "final sweep before shutdown");
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::key::Key;
    use crate::secret::Secret;

    #[test]
    fn sweeper_removes_expired_records_on_cadence() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(Store::new(Arc::clone(&clock), 10));
        let key = Key::parse("k").unwrap();
        let expires = clock.now().checked_add(Duration::from_millis(50)).unwrap();
        store
            .put(key.clone(), Secret::new(b"v".to_vec()).unwrap(), expires)
            .unwrap();

        let sweeper = Sweeper::spawn(Arc::clone(&store), Arc::clone(&clock), Duration::from_millis(20));
        thread::sleep(Duration::from_millis(200));
        sweeper.shutdown();

        assert_eq!(store.len(), 0);
    }
}
