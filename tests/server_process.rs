// Runs the ksched-server binary as a separate process and talks to it over
// shared memory.
//
//   cargo test --test server_process -- --nocapture

#![cfg(target_os = "linux")]

use ksched_ipc::Core::Naming;
use ksched_ipc::{ClientBuilder, ShmTransport, TransportFactory};
use serial_test::serial;
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn spawn_server(user: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_ksched-server"))
        .env("KSCHED_USER", user)
        .env("KSCHED_SPIN", "yield")
        .env("RUST_LOG", "warn")
        .spawn()
        .expect("failed to start ksched-server")
}

fn signal(child: &Child, signal: libc::c_int) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, signal);
    }
}

fn interrupt(child: &Child) {
    signal(child, libc::SIGINT);
}

#[test]
#[serial]
fn server_answers_and_shuts_down_on_sigint() {
    let user = format!("proctest{}", std::process::id());
    let naming = Naming::new(&user);
    let registry_path = format!("/dev/shm/{}", naming.registry_name().trim_start_matches('/'));

    let mut server = spawn_server(&user);
    assert!(
        wait_for(Duration::from_secs(10), || Path::new(&registry_path).exists()),
        "registry never appeared at {registry_path}"
    );

    let transport = ShmTransport::new(naming);
    let mut client = ClientBuilder::new()
        .with_unique_id("proc")
        .with_connect_timeout(Duration::from_secs(5))
        .connect(&transport)
        .unwrap();
    let response = client.request_with_id("matmul", "req-1", Duration::from_secs(5)).unwrap();
    assert_eq!(response.encode(), "req-1|1|OK\n");
    client.disconnect();

    interrupt(&server);
    let status = server.wait().unwrap();
    assert!(status.success(), "server exited with {status}");
    assert!(!Path::new(&registry_path).exists());
    assert!(transport.create_registry(false).is_err());
}

#[test]
#[serial]
fn client_survives_server_restart() {
    let user = format!("restart{}", std::process::id());
    let naming = Naming::new(&user);
    let transport = ShmTransport::new(naming.clone());
    let registry_path = format!("/dev/shm/{}", naming.registry_name().trim_start_matches('/'));

    for round in 0..2 {
        let mut server = spawn_server(&user);
        assert!(wait_for(Duration::from_secs(10), || Path::new(&registry_path).exists()));

        let mut client = ClientBuilder::new()
            .with_unique_id(format!("r{round}"))
            .with_connect_timeout(Duration::from_secs(5))
            .connect(&transport)
            .unwrap();
        assert!(client.request("softmax", Duration::from_secs(5)).unwrap().allowed);

        interrupt(&server);
        assert!(server.wait().unwrap().success());
        // The scheduler end went away with the server.
        assert!(!client.is_connected());
        drop(client);
    }
}

#[test]
#[serial]
fn sigterm_shuts_down_cleanly() {
    let user = format!("termtest{}", std::process::id());
    let naming = Naming::new(&user);
    let registry_path = format!("/dev/shm/{}", naming.registry_name().trim_start_matches('/'));

    let mut server = spawn_server(&user);
    assert!(wait_for(Duration::from_secs(10), || Path::new(&registry_path).exists()));

    let transport = ShmTransport::new(naming);
    let mut client = ClientBuilder::new()
        .with_unique_id("term")
        .with_connect_timeout(Duration::from_secs(5))
        .connect(&transport)
        .unwrap();
    assert!(client.request("matmul", Duration::from_secs(5)).unwrap().allowed);

    signal(&server, libc::SIGTERM);
    let status = server.wait().unwrap();
    assert!(status.success(), "server exited with {status}");
    assert!(!client.is_connected());
    assert!(!Path::new(&registry_path).exists());
}
