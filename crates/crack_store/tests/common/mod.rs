//! Shared helpers for integration tests: port picking, process spawning, and
//! readiness waits for a small local cluster.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Timeout for process startup and port readiness.
pub const READY_TIMEOUT: Duration = Duration::from_secs(20);

/// Wrapper around a spawned cluster process, killed on drop.
pub struct ClusterProcess {
    pub child: Child,
    name: &'static str,
}

impl ClusterProcess {
    /// Panic if the process has already exited.
    pub fn assert_running(&mut self) {
        if let Ok(Some(status)) = self.child.try_wait() {
            panic!("{} exited early with status {status}", self.name);
        }
    }
}

impl Drop for ClusterProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Reserve a free localhost port by binding port 0.
pub fn pick_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Spawn a coordinator process listening on `port`.
pub fn spawn_coordinator(port: u16) -> ClusterProcess {
    let child = Command::new(env!("CARGO_BIN_EXE_coordinator"))
        .args(["--port", &port.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coordinator");
    ClusterProcess {
        child,
        name: "coordinator",
    }
}

/// Spawn a storage node that registers with the given coordinator.
pub fn spawn_storage_node(port: u16, coordinator_port: u16, heartbeat_secs: u64) -> ClusterProcess {
    let child = Command::new(env!("CARGO_BIN_EXE_storage_node"))
        .args([
            "--port",
            &port.to_string(),
            "--coordinator",
            &format!("127.0.0.1:{coordinator_port}"),
            "--heartbeat",
            &heartbeat_secs.to_string(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn storage node");
    ClusterProcess {
        child,
        name: "storage_node",
    }
}

/// Spawn a storage node that runs without a coordinator.
pub fn spawn_standalone_node(port: u16) -> ClusterProcess {
    let child = Command::new(env!("CARGO_BIN_EXE_storage_node"))
        .args(["--port", &port.to_string(), "--standalone"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn standalone storage node");
    ClusterProcess {
        child,
        name: "storage_node",
    }
}

/// Block until something is listening on `addr` or the timeout elapses.
pub fn wait_for_listener(addr: SocketAddr) {
    let deadline = Instant::now() + READY_TIMEOUT;
    while Instant::now() < deadline {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("timeout waiting for listener on {addr}");
}
