// Lock-cycle detection over the crate's parking_lot locks (scheduler worker
// list, listener handle, local segment map, kernel statistics).

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::error;
use parking_lot::deadlock;

/// Log every lock cycle found since the last check and return how many.
pub fn report_deadlocks() -> usize {
    let cycles = deadlock::check_deadlock();
    for (i, threads) in cycles.iter().enumerate() {
        error!("deadlock #{}: {} threads", i, threads.len());
        for t in threads {
            error!("thread {:?}\n{:?}", t.thread_id(), t.backtrace());
        }
    }
    cycles.len()
}

/// Run [`report_deadlocks`] every `interval` on a background thread for the
/// rest of the process.
pub fn spawn_deadlock_watchdog(interval: Duration) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ksched-deadlock".into())
        .spawn(move || loop {
            thread::sleep(interval);
            report_deadlocks();
        })
}
