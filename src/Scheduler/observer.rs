// Session and kernel accounting hooks. The scheduler reports to one injected
// observer; `KernelStats` is the in-memory implementation.

use std::collections::HashMap;
use std::fmt;

use log::info;
use parking_lot::Mutex;

use super::policy::Decision;
use super::protocol::Request;

/// Identity of one handler session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: u64,
    pub channel_name: String,
    pub client_type: String,
    pub unique_id: String,
    pub pid: i64,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {} [{}", self.session_id, self.channel_name)?;
        if self.pid > 0 {
            write!(f, " pid {}", self.pid)?;
        }
        f.write_str("]")
    }
}

/// Why a handler left its receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionEnd {
    /// The scheduler was stopped.
    #[default]
    Shutdown,
    /// The client cleared `client_connected`.
    ClientDisconnected,
    /// The client process no longer exists.
    ClientExited,
}

/// Per-session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub received: u64,
    pub allowed: u64,
    pub denied: u64,
    pub malformed: u64,
    pub send_timeouts: u64,
    pub ended_by: SessionEnd,
}

/// Receives handler events. Every method defaults to doing nothing.
pub trait SessionObserver: Send + Sync {
    fn session_started(&self, _session: &SessionInfo) {}

    fn kernel_received(&self, _session: &SessionInfo, _request: &Request<'_>, _decision: &Decision) {}

    fn response_dropped(&self, _session: &SessionInfo, _request_id: &str) {}

    fn session_ended(&self, _session: &SessionInfo, _summary: &SessionSummary) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Aggregate per-kernel-type request counters, overall and per live session.
#[derive(Debug, Default)]
pub struct KernelStats {
    totals: Mutex<HashMap<String, u64>>,
    sessions: Mutex<HashMap<u64, HashMap<String, u64>>>,
}

fn bump(counts: &mut HashMap<String, u64>, kernel_type: &str) {
    match counts.get_mut(kernel_type) {
        Some(count) => *count += 1,
        None => {
            counts.insert(kernel_type.to_owned(), 1);
        }
    }
}

fn sorted(counts: &HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut rows: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

impl KernelStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts across every session, most frequent first.
    pub fn totals(&self) -> Vec<(String, u64)> {
        sorted(&self.totals.lock())
    }

    /// Counts of a session that has not ended yet.
    pub fn session_counts(&self, session_id: u64) -> Option<Vec<(String, u64)>> {
        self.sessions.lock().get(&session_id).map(sorted)
    }

    pub fn total_requests(&self) -> u64 {
        self.totals.lock().values().sum()
    }
}

impl SessionObserver for KernelStats {
    fn session_started(&self, session: &SessionInfo) {
        self.sessions.lock().insert(session.session_id, HashMap::new());
    }

    fn kernel_received(&self, session: &SessionInfo, request: &Request<'_>, _decision: &Decision) {
        bump(&mut self.totals.lock(), request.kernel_type);
        if let Some(counts) = self.sessions.lock().get_mut(&session.session_id) {
            bump(counts, request.kernel_type);
        }
    }

    fn session_ended(&self, session: &SessionInfo, summary: &SessionSummary) {
        let counts = self.sessions.lock().remove(&session.session_id);
        let Some(counts) = counts else {
            return;
        };
        if counts.is_empty() {
            return;
        }
        let mut table = format!("{} kernel summary ({} requests):", session, summary.received);
        for (kernel_type, count) in sorted(&counts) {
            table.push_str(&format!("\n  {:<32} {:>10}", kernel_type, count));
        }
        info!("{}", table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u64) -> SessionInfo {
        SessionInfo {
            session_id: id,
            channel_name: format!("/ks_pytorch_t_{id}"),
            client_type: "pytorch".into(),
            unique_id: String::new(),
            pid: 0,
        }
    }

    #[test]
    fn kernel_stats_sorts_by_count() {
        let stats = KernelStats::new();
        let s = session(1);
        stats.session_started(&s);
        let ok = Decision::allow("OK");
        for kernel in ["matmul", "conv", "matmul", "add", "matmul", "conv"] {
            stats.kernel_received(&s, &Request::new(kernel, "r", "pytorch"), &ok);
        }

        let expected = vec![
            ("matmul".to_owned(), 3),
            ("conv".to_owned(), 2),
            ("add".to_owned(), 1),
        ];
        assert_eq!(stats.totals(), expected);
        assert_eq!(stats.session_counts(1), Some(expected));
        assert_eq!(stats.total_requests(), 6);

        stats.session_ended(&s, &SessionSummary::default());
        assert_eq!(stats.session_counts(1), None);
        assert_eq!(stats.total_requests(), 6);
    }
}
