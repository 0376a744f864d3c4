// CrackStore storage node binary entry point.
//
// This file wires the cracking engines to the gRPC column service, registers
// the node with the coordinator, and drives the heartbeat loop until a
// shutdown signal arrives.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

include!(concat!(env!("OUT_DIR"), "/volo_gen.rs"));

pub mod engine;
mod rpc_service;

use engine::CrackingEngine;
use rpc_service::StorageRpcService;

/// Deadline for the initial RegisterNode call.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for a single heartbeat round-trip.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

/// CLI options for running a storage node.
#[derive(Parser, Debug)]
#[command(name = "storage_node")]
#[command(about = "CrackStore storage node", long_about = None)]
pub struct NodeArgs {
    /// Port to listen on.
    #[arg(long, default_value_t = 50051)]
    port: u16,

    /// Coordinator address (host:port).
    #[arg(long, default_value = "127.0.0.1:50050")]
    coordinator: String,

    /// Node identifier; defaults to `node-<port>` until the coordinator
    /// assigns one.
    #[arg(long)]
    node_id: Option<String>,

    /// Heartbeat interval in seconds.
    #[arg(long, default_value_t = 5)]
    heartbeat: u64,

    /// Run without a coordinator.
    #[arg(long, default_value_t = false)]
    standalone: bool,
}

/// Shared state serialized behind one node-wide lock.
///
/// The engines mutate in place on every query, so a single mutex over the
/// whole column map keeps loads, queries, and inspection mutually exclusive.
pub struct NodeState {
    pub node_id: String,
    pub columns: tokio::sync::Mutex<HashMap<String, CrackingEngine>>,
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the node.
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = NodeArgs::parse();
    run_node(args).await
}

/// Run a storage node until SIGINT or SIGTERM.
pub async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    run_node_with_shutdown(args, shutdown_signal()).await
}

/// Run a storage node until `shutdown` resolves.
pub async fn run_node_with_shutdown<F>(args: NodeArgs, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = Result<(), std::io::Error>> + Send,
{
    let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    let mut node_id = args
        .node_id
        .clone()
        .unwrap_or_else(|| format!("node-{}", args.port));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut heartbeat_task = None;

    if !args.standalone {
        let coordinator_addr: SocketAddr = args
            .coordinator
            .parse()
            .with_context(|| format!("invalid coordinator address: {}", args.coordinator))?;
        let client = volo_gen::crack_store::rpc::CoordinatorServiceClientBuilder::new(
            "crack_store.rpc.CoordinatorService",
        )
        .address(volo::net::Address::from(coordinator_addr))
        .build();

        match register_with_coordinator(&client, args.port).await {
            Ok(assigned) => {
                if !assigned.is_empty() {
                    node_id = assigned;
                }
                tracing::info!(
                    node_id = %node_id,
                    coordinator = %coordinator_addr,
                    "registered with coordinator"
                );
                heartbeat_task = Some(tokio::spawn(heartbeat_loop(
                    client,
                    node_id.clone(),
                    Duration::from_secs(args.heartbeat.max(1)),
                    shutdown_rx.clone(),
                )));
            }
            Err(err) => {
                // The node still serves direct traffic without a coordinator.
                tracing::warn!(
                    error = %err,
                    "could not register with coordinator, continuing standalone"
                );
            }
        }
    }

    let state = Arc::new(NodeState {
        node_id: node_id.clone(),
        columns: tokio::sync::Mutex::new(HashMap::new()),
    });

    tokio::spawn({
        let service = StorageRpcService {
            state: state.clone(),
        };
        async move {
            let svc = volo_gen::crack_store::rpc::StorageServiceServer::new(service);
            let svc = volo_grpc::server::ServiceBuilder::new(svc).build::<
                volo_gen::crack_store::rpc::StorageServiceRequestRecv,
                volo_gen::crack_store::rpc::StorageServiceResponseSend,
            >();
            let result = volo_grpc::server::Server::new()
                .add_service(svc)
                .run(volo::net::Address::from(listen_addr))
                .await;
            if let Err(err) = result {
                // Log server failures without crashing the node task.
                tracing::error!(error = ?err, "gRPC server failed");
            }
        }
    });

    tracing::info!(node_id = %node_id, listen = %listen_addr, "storage node started");

    shutdown.await?;
    tracing::info!("shutting down");

    // Stop the heartbeat loop and wait for it before exiting.
    let _ = shutdown_tx.send(true);
    if let Some(task) = heartbeat_task {
        let _ = task.await;
    }
    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Register this node and return the coordinator-assigned id.
async fn register_with_coordinator(
    client: &volo_gen::crack_store::rpc::CoordinatorServiceClient,
    port: u16,
) -> anyhow::Result<String> {
    let request = volo_gen::crack_store::rpc::RegisterNodeRequest {
        address: "127.0.0.1".into(),
        port: i32::from(port),
    };

    let response = tokio::time::timeout(REGISTER_TIMEOUT, client.register_node(request))
        .await
        .map_err(|_| anyhow::anyhow!("register_node rpc timed out"))?
        .map_err(|err| anyhow::anyhow!("register_node rpc failed: {err}"))?
        .into_inner();

    if !response.success {
        anyhow::bail!("coordinator rejected registration: {}", response.message);
    }
    Ok(response.assigned_node_id.to_string())
}

/// Send a heartbeat every `interval` until shutdown; failures are logged and
/// the node keeps serving.
async fn heartbeat_loop(
    client: volo_gen::crack_store::rpc::CoordinatorServiceClient,
    node_id: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; consume it so the loop sleeps first.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!("heartbeat loop stopped");
                return;
            }
        }

        let request = volo_gen::crack_store::rpc::HeartbeatRequest {
            node_id: node_id.clone().into(),
        };
        match tokio::time::timeout(HEARTBEAT_TIMEOUT, client.heartbeat(request)).await {
            Ok(Ok(response)) => {
                if !response.into_inner().acknowledged {
                    tracing::warn!(node_id = %node_id, "heartbeat not acknowledged");
                }
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "heartbeat failed"),
            Err(_) => tracing::warn!("heartbeat timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_args_defaults() {
        let args = NodeArgs::try_parse_from(["storage_node"]).unwrap();
        assert_eq!(args.port, 50051);
        assert_eq!(args.coordinator, "127.0.0.1:50050");
        assert_eq!(args.heartbeat, 5);
        assert!(args.node_id.is_none());
        assert!(!args.standalone);
    }

    #[test]
    fn node_args_overrides() {
        let args = NodeArgs::try_parse_from([
            "storage_node",
            "--port",
            "50099",
            "--coordinator",
            "10.0.0.5:50050",
            "--node-id",
            "edge-1",
            "--heartbeat",
            "1",
            "--standalone",
        ])
        .unwrap();
        assert_eq!(args.port, 50099);
        assert_eq!(args.coordinator, "10.0.0.5:50050");
        assert_eq!(args.node_id.as_deref(), Some("edge-1"));
        assert_eq!(args.heartbeat, 1);
        assert!(args.standalone);
    }
}
