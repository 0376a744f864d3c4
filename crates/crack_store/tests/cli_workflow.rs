//! Drives the `client` binary end-to-end against a live cluster: status,
//! file load, query, and benchmark.

mod common;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::Command;
use std::time::{Duration, Instant};

use common::{pick_free_port, spawn_coordinator, spawn_storage_node, wait_for_listener};

/// Run the client binary and return (exit ok, stdout).
fn run_client(coordinator_port: u16, args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_client"))
        .arg("--coordinator")
        .arg(format!("127.0.0.1:{coordinator_port}"))
        .args(args)
        .output()
        .expect("run client");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

#[test]
fn client_cli_load_query_benchmark() {
    let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let coord_port = pick_free_port().expect("port");

    let mut coordinator = spawn_coordinator(coord_port);
    wait_for_listener(SocketAddr::new(ip, coord_port));

    let node_port_1 = pick_free_port().expect("port");
    let node_port_2 = pick_free_port().expect("port");
    let mut node1 = spawn_storage_node(node_port_1, coord_port, 1);
    let mut node2 = spawn_storage_node(node_port_2, coord_port, 1);
    wait_for_listener(SocketAddr::new(ip, node_port_1));
    wait_for_listener(SocketAddr::new(ip, node_port_2));

    // Wait until status reports both nodes healthy.
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let (ok, stdout) = run_client(coord_port, &["status"]);
        if ok && stdout.contains("Healthy nodes: 2") {
            break;
        }
        assert!(Instant::now() < deadline, "cluster did not become healthy");
        coordinator.assert_running();
        node1.assert_running();
        node2.assert_running();
        std::thread::sleep(Duration::from_millis(200));
    }

    // Write 0..1000 as raw little-endian int32 and load it.
    let dir = tempfile::tempdir().expect("tempdir");
    let data_path = dir.path().join("prices.data");
    let mut bytes = Vec::with_capacity(1000 * 4);
    for value in 0..1000i32 {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    std::fs::write(&data_path, bytes).expect("write data file");

    let (ok, stdout) = run_client(
        coord_port,
        &["load", "prices", data_path.to_str().expect("utf8 path")],
    );
    assert!(ok, "load failed: {stdout}");
    assert!(stdout.contains("Read 1000 integers"));
    assert!(stdout.contains("Load complete"));

    // 250 of the 1000 values fall in [250, 500).
    let (ok, stdout) = run_client(coord_port, &["query", "prices", "250", "500"]);
    assert!(ok, "query failed: {stdout}");
    assert!(stdout.contains("Total count: 250"), "stdout: {stdout}");
    assert!(stdout.contains("Nodes queried: 2"), "stdout: {stdout}");

    let (ok, stdout) = run_client(coord_port, &["benchmark", "prices", "100", "300", "3"]);
    assert!(ok, "benchmark failed: {stdout}");
    assert!(stdout.contains("Iteration 0: count=200"), "stdout: {stdout}");
    assert!(stdout.contains("Iteration 2: count=200"), "stdout: {stdout}");

    // Querying a missing column must exit nonzero.
    let (ok, _) = run_client(coord_port, &["query", "nope", "0", "10"]);
    assert!(!ok);
}
