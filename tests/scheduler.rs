// Scheduler dispatch tests over the in-process transport.

use ksched_ipc::Core::{IpcError, SchedulerConfig, SpinPolicy};
use ksched_ipc::SPSC::{Message, RingBuffer};
use ksched_ipc::Scheduler::{
    Decision, KernelStats, Scheduler, SessionEnd, SessionInfo, SessionObserver, SessionSummary,
};
use ksched_ipc::Transport::{Channel, ClientIdentity, LocalTransport, TransportFactory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_recv_timeout(Duration::from_millis(10))
        .with_send_timeout(Duration::from_millis(200))
}

fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Client end (connected) and scheduler end of a fresh channel.
fn channel_pair(transport: &LocalTransport, name: &str) -> (Box<dyn Channel>, Box<dyn Channel>) {
    let client = transport.create_channel(name, true).unwrap();
    let server = transport.create_channel(name, false).unwrap();
    client.set_client_connected(true);
    (client, server)
}

fn accept(scheduler: &Scheduler, transport: &LocalTransport, name: &str) -> Box<dyn Channel> {
    let (client, server) = channel_pair(transport, name);
    scheduler.on_new_client(server).unwrap();
    assert!(eventually(|| client.is_server_ready()), "handler never became ready");
    client
}

fn round_trip(client: &dyn Channel, frame: &str) -> Option<String> {
    assert!(client.request_queue().try_send(frame.as_bytes()));
    let mut out = Message::new();
    client
        .response_queue()
        .receive_blocking(&mut out, Some(Duration::from_millis(500)))
        .then(|| out.as_str().unwrap().to_owned())
}

#[test]
fn allows_kernel_and_echoes_request_id() {
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder().with_config(fast_config()).build();
    let client = accept(&scheduler, &transport, "/e2e");

    assert_eq!(
        round_trip(&*client, "matmul|req-1|pytorch|abc").as_deref(),
        Some("req-1|1|OK\n")
    );
    scheduler.stop();
}

#[test]
fn two_field_frame_is_dropped_and_connection_survives() {
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder().with_config(fast_config()).build();
    let client = accept(&scheduler, &transport, "/short-frame");

    assert!(client.request_queue().try_send(b"req-1|pytorch"));
    let mut out = Message::new();
    assert!(!client
        .response_queue()
        .receive_blocking(&mut out, Some(Duration::from_millis(150))));
    assert!(client.is_server_ready());

    assert_eq!(
        round_trip(&*client, "conv2d|req-2|pytorch").as_deref(),
        Some("req-2|1|OK\n")
    );
    scheduler.stop();
}

#[test]
fn responses_preserve_request_order() {
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder().with_config(fast_config()).build();
    let client = accept(&scheduler, &transport, "/order");

    for i in 0..200 {
        assert!(client
            .request_queue()
            .send_blocking(format!("k|{i}|pytorch").as_bytes(), Some(WAIT)));
    }
    let mut out = Message::new();
    for i in 0..200 {
        assert!(client.response_queue().receive_blocking(&mut out, Some(WAIT)));
        assert_eq!(out.as_str(), Some(format!("{i}|1|OK\n").as_str()));
    }
    scheduler.stop();
}

#[test]
fn injected_policy_decides() {
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder()
        .with_config(fast_config())
        .with_policy(|kernel: &str| {
            if kernel == "forbidden" {
                Decision::deny("blocked|by policy")
            } else {
                Decision::allow("OK")
            }
        })
        .build();
    let client = accept(&scheduler, &transport, "/policy");

    assert_eq!(
        round_trip(&*client, "forbidden|r1|sglang").as_deref(),
        Some("r1|0|blocked by policy\n")
    );
    assert_eq!(
        round_trip(&*client, "matmul|r2|sglang").as_deref(),
        Some("r2|1|OK\n")
    );
    scheduler.stop();
}

#[test]
fn stop_joins_every_handler() {
    const CLIENTS: usize = 16;
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder().with_config(fast_config()).build();

    let clients: Vec<_> = (0..CLIENTS)
        .map(|i| accept(&scheduler, &transport, &format!("/stop-{i}")))
        .collect();
    assert_eq!(scheduler.active_count(), CLIENTS);

    scheduler.stop();
    assert_eq!(scheduler.active_count(), 0);
    assert!(!scheduler.is_running());
    assert!(clients.iter().all(|c| !c.is_server_ready()));

    let (_client, server) = channel_pair(&transport, "/too-late");
    assert!(matches!(
        scheduler.on_new_client(server),
        Err(IpcError::SchedulerStopped)
    ));
}

#[test]
fn handler_exits_when_client_disconnects() {
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder().with_config(fast_config()).build();
    let client = accept(&scheduler, &transport, "/bye");
    assert_eq!(scheduler.active_count(), 1);

    client.set_client_connected(false);
    assert!(eventually(|| scheduler.active_count() == 0));
    assert!(!client.is_server_ready());
    scheduler.stop();
}

#[test]
fn handler_exits_when_client_process_is_gone() {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id() as i64;
    child.wait().unwrap();

    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder()
        .with_config(fast_config().with_recv_timeout(Duration::from_millis(2)).with_liveness_check_every(1))
        .build();
    let (client, mut server) = channel_pair(&transport, "/crashed");
    server.bind_identity(ClientIdentity {
        client_type: "pytorch".into(),
        unique_id: String::new(),
        pid,
    });
    scheduler.on_new_client(server).unwrap();

    assert!(eventually(|| scheduler.active_count() == 0));
    // The dead client never cleared its flag.
    assert!(client.is_client_connected());
    scheduler.stop();
}

#[test]
fn kernel_stats_observer_counts_requests() {
    let transport = LocalTransport::new();
    let stats = Arc::new(KernelStats::new());
    let scheduler = Scheduler::builder()
        .with_config(fast_config())
        .with_observer(stats.clone())
        .build();
    let client = accept(&scheduler, &transport, "/stats");

    for frame in ["matmul|1|pytorch", "matmul|2|pytorch", "softmax|3|pytorch", "bogus"] {
        assert!(client.request_queue().try_send(frame.as_bytes()));
    }
    let mut out = Message::new();
    for _ in 0..3 {
        assert!(client.response_queue().receive_blocking(&mut out, Some(WAIT)));
    }

    assert_eq!(
        stats.totals(),
        vec![("matmul".to_owned(), 2), ("softmax".to_owned(), 1)]
    );
    scheduler.stop();
}

/// Records dropped responses and the summary of every finished session.
#[derive(Default)]
struct Recorder {
    dropped: AtomicU64,
    ended: Mutex<Vec<SessionSummary>>,
}

impl SessionObserver for Recorder {
    fn response_dropped(&self, _session: &SessionInfo, _request_id: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    fn session_ended(&self, _session: &SessionInfo, summary: &SessionSummary) {
        self.ended.lock().push(summary.clone());
    }
}

#[test]
fn response_send_timeout_is_not_fatal() {
    let transport = LocalTransport::new();
    let recorder = Arc::new(Recorder::default());
    let scheduler = Scheduler::builder()
        .with_config(fast_config().with_send_timeout(Duration::from_millis(20)))
        .with_observer(recorder.clone())
        .build();
    let client = accept(&scheduler, &transport, "/full");

    // One more request than the response ring can hold, never popped.
    let capacity = RingBuffer::capacity() - 1;
    for i in 0..=capacity {
        assert!(client
            .request_queue()
            .send_blocking(format!("k|{i}|pytorch").as_bytes(), Some(WAIT)));
    }
    assert!(eventually(|| recorder.dropped.load(Ordering::SeqCst) == 1));
    assert!(client.is_server_ready());

    let mut out = Message::new();
    for i in 0..capacity {
        assert!(client.response_queue().try_receive(&mut out));
        assert_eq!(out.as_str(), Some(format!("{i}|1|OK\n").as_str()));
    }
    assert!(client.response_queue().is_empty());

    assert_eq!(
        round_trip(&*client, "matmul|after|pytorch").as_deref(),
        Some("after|1|OK\n")
    );
    scheduler.stop();

    let ended = recorder.ended.lock();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].send_timeouts, 1);
    assert_eq!(ended[0].received, capacity as u64 + 2);
    assert_eq!(ended[0].ended_by, SessionEnd::Shutdown);
}

#[test]
fn handler_waits_with_configured_spin_policy() {
    const STEP: Duration = Duration::from_millis(300);
    let transport = LocalTransport::new();
    let scheduler = Scheduler::builder()
        .with_config(
            fast_config()
                .with_recv_timeout(Duration::from_millis(500))
                .with_spin(SpinPolicy::Sleep(STEP)),
        )
        .build();
    let client = accept(&scheduler, &transport, "/sleepy");
    std::thread::sleep(Duration::from_millis(30));

    // The handler found the ring empty and is inside its sleep step.
    let sent = Instant::now();
    assert!(client.request_queue().try_send(b"matmul|slow|pytorch"));
    let mut out = Message::new();
    assert!(client.response_queue().receive_blocking(&mut out, Some(WAIT)));
    let elapsed = sent.elapsed();

    assert_eq!(out, "slow|1|OK\n");
    assert!(elapsed >= STEP / 2, "answered after {elapsed:?}");
    scheduler.stop();
}
