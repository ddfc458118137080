use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_utils::CachePadded;
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::handler::{Handler, HandlerState};
use super::observer::{NoopObserver, SessionInfo, SessionObserver};
use super::policy::{AllowAll, DecisionPolicy};
use crate::Core::config::SchedulerConfig;
use crate::Core::error::{IpcError, Result};
use crate::Transport::Channel;

pub struct SchedulerBuilder {
    policy: Arc<dyn DecisionPolicy>,
    observer: Arc<dyn SessionObserver>,
    config: SchedulerConfig,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            policy: Arc::new(AllowAll),
            observer: Arc::new(NoopObserver),
            config: SchedulerConfig::default(),
        }
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy<P: DecisionPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Shared so the caller can keep reading the observer (e.g. `KernelStats`).
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            policy: self.policy,
            observer: self.observer,
            config: self.config,
            running: Arc::new(CachePadded::new(AtomicBool::new(true))),
            active: Arc::new(CachePadded::new(AtomicUsize::new(0))),
            next_session: AtomicU64::new(1),
            workers: Mutex::new(Vec::new()),
        }
    }
}

/// Runs one handler thread per accepted channel.
pub struct Scheduler {
    policy: Arc<dyn DecisionPolicy>,
    observer: Arc<dyn SessionObserver>,
    config: SchedulerConfig,
    running: Arc<CachePadded<AtomicBool>>,
    active: Arc<CachePadded<AtomicUsize>>,
    next_session: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Decrements the live-handler count however the handler exits.
struct ActiveGuard(Arc<CachePadded<AtomicUsize>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, AcqRel);
    }
}

impl Scheduler {
    /// Scheduler with the allow-all policy and no observer.
    pub fn new() -> Self {
        SchedulerBuilder::default().build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Take ownership of `channel` and serve it on a dedicated thread.
    pub fn on_new_client(&self, channel: Box<dyn Channel>) -> Result<u64> {
        // Held across the spawn so `stop` cannot miss this handler.
        let mut workers = self.workers.lock();
        if !self.running.load(Acquire) {
            return Err(IpcError::SchedulerStopped);
        }
        workers.retain(|worker| !worker.is_finished());

        let session_id = self.next_session.fetch_add(1, Relaxed);
        let identity = channel.identity();
        let session = SessionInfo {
            session_id,
            channel_name: channel.name().to_owned(),
            client_type: identity.client_type.clone(),
            unique_id: identity.unique_id.clone(),
            pid: identity.pid,
        };
        let handler = Handler {
            channel,
            session,
            policy: Arc::clone(&self.policy),
            observer: Arc::clone(&self.observer),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            state: HandlerState::Started,
        };

        let name = format!("ksched-handler-{}", session_id);
        self.active.fetch_add(1, AcqRel);
        let guard = ActiveGuard(Arc::clone(&self.active));
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = guard;
                handler.run();
            })
            .map_err(|source| IpcError::Spawn { name, source })?;
        workers.push(worker);
        debug!("session {} accepted", session_id);
        Ok(session_id)
    }

    /// Stop every handler and wait for all of them to exit.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        let was_running = self.running.swap(false, AcqRel);
        let count = workers.len();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                warn!("a handler thread panicked");
            }
        }
        if was_running {
            info!("scheduler stopped ({} handler threads joined)", count);
        }
    }

    /// Number of handlers currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Acquire)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
