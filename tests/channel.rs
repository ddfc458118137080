use ksched_ipc::Channel::{ChannelData, MappedChannel};
use ksched_ipc::Core::{create_heap_memory, IpcError, Naming, SpinPolicy};
use ksched_ipc::SPSC::Message;
use ksched_ipc::Transport::{
    Channel, ClientIdentity, LocalTransport, Role, ShmTransport, TransportFactory,
};
use std::mem::size_of;
use std::time::Duration;

#[test]
fn both_ends_share_both_directions() {
    let transport = LocalTransport::new();
    let client = transport.create_channel("/ks_pytorch_local_1", true).unwrap();
    let server = transport.create_channel("/ks_pytorch_local_1", false).unwrap();
    assert_eq!(client.role(), Role::Client);
    assert_eq!(server.role(), Role::Server);

    let mut out = Message::new();
    assert!(client.request_queue().try_send(b"matmul|1|pytorch"));
    assert!(server.request_queue().try_receive(&mut out));
    assert_eq!(out, "matmul|1|pytorch");

    assert!(server
        .response_queue()
        .send_blocking(b"1|1|OK\n", Some(Duration::from_millis(10))));
    assert!(client
        .response_queue()
        .receive_blocking(&mut out, Some(Duration::from_millis(10))));
    assert_eq!(out, "1|1|OK\n");
    assert!(client.response_queue().is_empty());
}

#[test]
fn flags_are_visible_to_the_peer() {
    let transport = LocalTransport::new();
    let client = transport.create_channel("/flags", true).unwrap();
    let server = transport.create_channel("/flags", false).unwrap();

    assert!(!server.is_client_connected());
    assert!(!client.is_server_ready());

    client.set_client_connected(true);
    server.set_server_ready(true);
    assert!(server.is_client_connected());
    assert!(client.is_server_ready());
}

#[test]
fn opening_a_missing_channel_fails() {
    let transport = LocalTransport::new();
    let err = transport.create_channel("/nobody", false).unwrap_err();
    assert!(matches!(err, IpcError::Open { .. }));
}

#[test]
fn last_end_to_drop_removes_the_name() {
    let transport = LocalTransport::new();
    let client = transport.create_channel("/teardown", true).unwrap();
    let server = transport.create_channel("/teardown", false).unwrap();
    client.set_client_connected(true);
    server.set_server_ready(true);

    drop(server);
    assert!(transport.contains("/teardown"));
    assert!(!client.is_server_ready());

    drop(client);
    assert!(!transport.contains("/teardown"));
}

#[test]
fn simultaneous_drops_remove_the_name() {
    let transport = LocalTransport::new();
    for i in 0..2000 {
        let name = format!("/race-{i}");
        let client = transport.create_channel(&name, true).unwrap();
        let server = transport.create_channel(&name, false).unwrap();
        client.set_client_connected(true);
        server.set_server_ready(true);

        let barrier = std::sync::Barrier::new(2);
        crossbeam_utils::thread::scope(|s| {
            for end in [client, server] {
                let barrier = &barrier;
                s.spawn(move |_| {
                    barrier.wait();
                    drop(end);
                });
            }
        })
        .unwrap();
        assert!(!transport.contains(&name), "{name} outlived both ends");
    }
}

#[test]
fn abandoned_client_channel_is_removed() {
    let transport = LocalTransport::new();
    let client = transport.create_channel("/abandoned", true).unwrap();
    client.set_client_connected(true);
    // No scheduler ever took it over.
    drop(client);
    assert!(!transport.contains("/abandoned"));
}

#[test]
fn identity_binding() {
    let transport = LocalTransport::new();
    let _client = transport.create_channel("/id", true).unwrap();
    let mut server = transport.create_channel("/id", false).unwrap();
    assert_eq!(server.client_pid(), 0);

    server.bind_identity(ClientIdentity {
        client_type: "sglang".into(),
        unique_id: "worker-3".into(),
        pid: std::process::id() as i64,
    });
    assert_eq!(server.client_type(), "sglang");
    assert_eq!(server.unique_id(), "worker-3");
    assert_eq!(server.client_pid(), std::process::id() as i64);
    assert_eq!(server.name(), "/id");
}

#[test]
fn init_resets_rings_and_flags() {
    let memory = create_heap_memory(size_of::<ChannelData>()).unwrap();
    let channel = MappedChannel::create("/init", Box::new(memory), Role::Client, SpinPolicy::Spin).unwrap();
    channel.set_client_connected(true);
    channel.set_server_ready(true);
    assert!(channel.request_queue().try_send(b"a"));
    assert!(channel.response_queue().try_send(b"b"));

    channel.init();
    assert!(channel.request_queue().is_empty());
    assert!(channel.response_queue().is_empty());
    assert!(!channel.is_client_connected());
    assert!(!channel.is_server_ready());
    println!("{:?}", channel);
}

#[test]
fn attach_rejects_short_or_uninitialized_memory() {
    let short = create_heap_memory(4096).unwrap();
    let err = MappedChannel::attach("/short", Box::new(short), Role::Server, SpinPolicy::Spin).unwrap_err();
    assert!(matches!(err, IpcError::TooSmall { actual: 4096, .. }));

    let blank = create_heap_memory(size_of::<ChannelData>()).unwrap();
    let err = MappedChannel::attach("/blank", Box::new(blank), Role::Server, SpinPolicy::Spin).unwrap_err();
    assert!(matches!(err, IpcError::NotInitialized { found: 0, .. }));
}

#[cfg(target_os = "linux")]
#[test]
fn shm_channel_round_trip_and_cleanup() {
    let naming = Naming::new(&format!("chantest{}_{}", std::process::id(), fastrand::u32(..)));
    let transport = ShmTransport::new(naming.clone());
    let name = naming.channel_name(ksched_ipc::ClientType::PyTorch, 1, "rt");
    let path = format!("/dev/shm/{}", name.trim_start_matches('/'));

    let client = transport.create_channel(&name, true).unwrap();
    let server = transport.create_channel(&name, false).unwrap();
    client.set_client_connected(true);
    server.set_server_ready(true);

    let mut out = Message::new();
    assert!(client.request_queue().try_send(b"conv2d|7|pytorch|rt"));
    assert!(server.request_queue().try_receive(&mut out));
    assert_eq!(out, "conv2d|7|pytorch|rt");

    drop(client);
    assert!(std::path::Path::new(&path).exists());
    drop(server);
    assert!(!std::path::Path::new(&path).exists());
}

#[cfg(target_os = "linux")]
#[test]
fn shm_destroy_channel_removes_segment() {
    let naming = Naming::new(&format!("chantest{}_{}", std::process::id(), fastrand::u32(..)));
    let name = naming.channel_name(ksched_ipc::ClientType::SGLang, 2, "");
    let transport = ShmTransport::new(naming);
    let _client = transport.create_channel(&name, true).unwrap();
    transport.destroy_channel(&name).unwrap();
    assert!(transport.create_channel(&name, false).is_err());
}
