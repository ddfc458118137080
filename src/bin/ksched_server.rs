// Scheduler process: owns the registry, accepts clients, answers until SIGINT
// or SIGTERM.

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use ksched_ipc::Core::watchdog::spawn_deadlock_watchdog;
use ksched_ipc::Scheduler::{KernelStats, Scheduler};
use ksched_ipc::{ListenerConfig, RegistryListener, SchedulerConfig, ShmTransport, TransportFactory};

const DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_secs(10);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        error!("failed to install signal handler: {}", e);
        process::exit(1);
    }

    if let Err(e) = spawn_deadlock_watchdog(DEADLOCK_CHECK_INTERVAL) {
        warn!("deadlock watchdog not started: {}", e);
    }

    let scheduler_config = SchedulerConfig::from_env();
    let listener_config = ListenerConfig::from_env();
    let transport = ShmTransport::from_env().with_spin(scheduler_config.spin);
    info!(
        "ksched-server starting (user {}, spin {}, pid {})",
        transport.naming().user(),
        scheduler_config.spin,
        process::id()
    );

    let stats = Arc::new(KernelStats::new());
    let scheduler = Arc::new(
        Scheduler::builder()
            .with_config(scheduler_config)
            .with_observer(stats.clone())
            .build(),
    );

    let mut listener = RegistryListener::with_config(Arc::new(transport), listener_config);
    if let Err(e) = listener.init() {
        error!("cannot create registry: {}", e);
        process::exit(1);
    }

    let sched = scheduler.clone();
    let started = listener.start(move |channel| {
        if let Err(e) = sched.on_new_client(channel) {
            error!("cannot start handler: {}", e);
        }
    });
    if let Err(e) = started {
        error!("cannot start registry listener: {}", e);
        process::exit(1);
    }
    info!("ready");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(50));
    }

    info!("shutting down");
    listener.stop();
    scheduler.stop();

    let totals = stats.totals();
    if !totals.is_empty() {
        info!("{} requests served", stats.total_requests());
        for (kernel_type, count) in totals {
            info!("  {:<32} {:>10}", kernel_type, count);
        }
    }
}
