// CrackStore coordinator binary entry point.
//
// Maintains the registry of storage nodes, fans range queries out to the
// healthy ones, aggregates their counts, and reports cluster status.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::Mutex;

include!(concat!(env!("OUT_DIR"), "/volo_gen.rs"));

use volo_gen::crack_store::rpc;

/// Deadline for one per-node range query during fan-out.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for best-effort node info calls while building cluster status.
const NODE_INFO_TIMEOUT: Duration = Duration::from_secs(2);

/// CLI options for running the coordinator.
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "CrackStore cluster coordinator", long_about = None)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 50050)]
    port: u16,
}

/// One registered storage node and its outbound RPC channel.
struct NodeEntry {
    address: String,
    port: i32,
    is_healthy: bool,
    last_heartbeat: Instant,
    client: rpc::StorageServiceClient,
}

/// Registry of known nodes. One lock covers registry reads and fan-out RPCs,
/// which totally orders distributed queries at the assumed scale.
struct Registry {
    nodes: BTreeMap<String, NodeEntry>,
    next_node_id: u64,
}

/// gRPC service implementation backed by the shared registry.
#[derive(Clone)]
struct CoordinatorRpcService {
    registry: Arc<Mutex<Registry>>,
}

impl rpc::CoordinatorService for CoordinatorRpcService {
    /// Record a node, open its outbound channel, and assign it an id.
    async fn register_node(
        &self,
        req: volo_grpc::Request<rpc::RegisterNodeRequest>,
    ) -> Result<volo_grpc::Response<rpc::RegisterNodeResponse>, volo_grpc::Status> {
        let req = req.into_inner();

        let target: SocketAddr = match format!("{}:{}", req.address, req.port).parse() {
            Ok(addr) => addr,
            Err(_) => {
                return Ok(volo_grpc::Response::new(rpc::RegisterNodeResponse {
                    success: false,
                    assigned_node_id: "".into(),
                    message: format!("unresolvable node address: {}:{}", req.address, req.port)
                        .into(),
                }));
            }
        };

        let client = rpc::StorageServiceClientBuilder::new("crack_store.rpc.StorageService")
            .address(volo::net::Address::from(target))
            .build();

        let mut registry = self.registry.lock().await;
        let node_id = format!("node-{}", registry.next_node_id);
        registry.next_node_id += 1;
        registry.nodes.insert(
            node_id.clone(),
            NodeEntry {
                address: req.address.to_string(),
                port: req.port,
                is_healthy: true,
                last_heartbeat: Instant::now(),
                client,
            },
        );
        tracing::info!(
            node_id = %node_id,
            target = %target,
            total = registry.nodes.len(),
            "node registered"
        );

        Ok(volo_grpc::Response::new(rpc::RegisterNodeResponse {
            success: true,
            assigned_node_id: node_id.into(),
            message: "registered".into(),
        }))
    }

    /// Refresh a node's liveness timestamp; heartbeats also restore health.
    async fn heartbeat(
        &self,
        req: volo_grpc::Request<rpc::HeartbeatRequest>,
    ) -> Result<volo_grpc::Response<rpc::HeartbeatResponse>, volo_grpc::Status> {
        let req = req.into_inner();
        let mut registry = self.registry.lock().await;

        let acknowledged = match registry.nodes.get_mut(req.node_id.as_str()) {
            Some(node) => {
                node.last_heartbeat = Instant::now();
                node.is_healthy = true;
                true
            }
            None => false,
        };

        Ok(volo_grpc::Response::new(rpc::HeartbeatResponse {
            acknowledged,
        }))
    }

    /// Advisory load planning: report the healthy nodes a client should use.
    async fn load_data(
        &self,
        req: volo_grpc::Request<rpc::DistributedLoadRequest>,
    ) -> Result<volo_grpc::Response<rpc::DistributedLoadResponse>, volo_grpc::Status> {
        let req = req.into_inner();
        let registry = self.registry.lock().await;

        let healthy: Vec<&String> = registry
            .nodes
            .iter()
            .filter(|(_, node)| node.is_healthy)
            .map(|(id, _)| id)
            .collect();

        tracing::info!(column = %req.column_name, nodes = healthy.len(), "load data request");

        if healthy.is_empty() {
            return Ok(volo_grpc::Response::new(rpc::DistributedLoadResponse {
                success: false,
                nodes_used: 0,
                node_ids: Vec::new(),
                message: "No healthy nodes available".into(),
            }));
        }

        Ok(volo_grpc::Response::new(rpc::DistributedLoadResponse {
            success: true,
            nodes_used: healthy.len() as i32,
            node_ids: healthy.iter().map(|id| (*id).clone().into()).collect(),
            message: format!("Ready to load data to {} nodes", healthy.len()).into(),
        }))
    }

    /// Fan the query out to every healthy node and sum the counts.
    ///
    /// Transport failures and deadlines mark the node unhealthy and exclude
    /// it; an application-level failure (unknown column) excludes the node
    /// from the aggregate but leaves its health alone.
    async fn range_query(
        &self,
        req: volo_grpc::Request<rpc::DistributedRangeQueryRequest>,
    ) -> Result<volo_grpc::Response<rpc::DistributedRangeQueryResponse>, volo_grpc::Status> {
        let req = req.into_inner();
        let start = Instant::now();

        let mut registry = self.registry.lock().await;
        tracing::info!(
            column = %req.column_name,
            low = req.low,
            high = req.high,
            "distributed range query"
        );

        let targets: Vec<String> = registry
            .nodes
            .iter()
            .filter(|(_, node)| node.is_healthy)
            .map(|(id, _)| id.clone())
            .collect();

        let mut total_count: i64 = 0;
        let mut node_results = Vec::new();

        for node_id in targets {
            let Some(client) = registry.nodes.get(&node_id).map(|n| n.client.clone()) else {
                continue;
            };
            let request = rpc::RangeQueryRequest {
                column_name: req.column_name.clone(),
                low: req.low,
                high: req.high,
            };

            match tokio::time::timeout(QUERY_TIMEOUT, client.range_query(request)).await {
                Ok(Ok(response)) => {
                    let response = response.into_inner();
                    if response.success {
                        total_count += i64::from(response.count);
                        tracing::info!(
                            node_id = %node_id,
                            count = response.count,
                            "node result"
                        );
                        node_results.push(rpc::NodeQueryResult {
                            node_id: node_id.clone().into(),
                            count: response.count,
                            stats: response.stats,
                        });
                    } else {
                        tracing::warn!(
                            node_id = %node_id,
                            error = %response.error_message,
                            "node reported query failure"
                        );
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(node_id = %node_id, error = %err, "node query failed");
                    if let Some(node) = registry.nodes.get_mut(&node_id) {
                        node.is_healthy = false;
                    }
                }
                Err(_) => {
                    tracing::warn!(node_id = %node_id, "node query timed out");
                    if let Some(node) = registry.nodes.get_mut(&node_id) {
                        node.is_healthy = false;
                    }
                }
            }
        }

        let total_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let nodes_queried = node_results.len() as i32;
        let success = nodes_queried > 0;

        tracing::info!(
            total_count,
            nodes_queried,
            total_time_ms,
            "distributed query complete"
        );

        Ok(volo_grpc::Response::new(rpc::DistributedRangeQueryResponse {
            total_count: i32::try_from(total_count).unwrap_or(i32::MAX),
            nodes_queried,
            total_time_ms,
            success,
            node_results,
            error_message: if success { "".into() } else { "No nodes responded".into() },
        }))
    }

    /// Snapshot every known node with its heartbeat age and column names.
    async fn get_cluster_status(
        &self,
        _req: volo_grpc::Request<rpc::ClusterStatusRequest>,
    ) -> Result<volo_grpc::Response<rpc::ClusterStatusResponse>, volo_grpc::Status> {
        let registry = self.registry.lock().await;
        let now = Instant::now();

        let mut nodes = Vec::new();
        let mut healthy_nodes = 0;

        for (node_id, node) in registry.nodes.iter() {
            let mut columns = Vec::new();
            if node.is_healthy {
                healthy_nodes += 1;
                // Best-effort column listing; status must not flip health.
                let info = tokio::time::timeout(
                    NODE_INFO_TIMEOUT,
                    node.client.get_node_info(rpc::NodeInfoRequest {}),
                )
                .await;
                if let Ok(Ok(info)) = info {
                    columns = info.into_inner().columns;
                }
            }

            let heartbeat_age = now.saturating_duration_since(node.last_heartbeat);
            nodes.push(rpc::NodeStatus {
                node_id: node_id.clone().into(),
                address: node.address.clone().into(),
                port: node.port,
                is_healthy: node.is_healthy,
                last_heartbeat_ms: heartbeat_age
                    .as_millis()
                    .min(i64::MAX as u128) as i64,
                columns,
            });
        }

        Ok(volo_grpc::Response::new(rpc::ClusterStatusResponse {
            total_nodes: nodes.len() as i32,
            healthy_nodes,
            nodes,
        }))
    }
}

#[tokio::main]
/// Parse CLI args, initialize logging, and serve until shutdown.
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

    let args = Args::parse();
    let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);

    let service = CoordinatorRpcService {
        registry: Arc::new(Mutex::new(Registry {
            nodes: BTreeMap::new(),
            next_node_id: 1,
        })),
    };

    tokio::spawn(async move {
        let svc = rpc::CoordinatorServiceServer::new(service);
        let svc = volo_grpc::server::ServiceBuilder::new(svc).build::<
            rpc::CoordinatorServiceRequestRecv,
            rpc::CoordinatorServiceResponseSend,
        >();
        let result = volo_grpc::server::Server::new()
            .add_service(svc)
            .run(volo::net::Address::from(listen_addr))
            .await;
        if let Err(err) = result {
            // Log server failures without crashing the coordinator task.
            tracing::error!(error = ?err, "gRPC server failed");
        }
    });

    tracing::info!(listen = %listen_addr, "coordinator started");

    shutdown_signal().await?;
    tracing::info!("shutting down");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_args_default_port() {
        let args = Args::try_parse_from(["coordinator"]).unwrap();
        assert_eq!(args.port, 50050);
    }

    #[test]
    fn coordinator_args_port_override() {
        let args = Args::try_parse_from(["coordinator", "--port", "50060"]).unwrap();
        assert_eq!(args.port, 50060);
    }
}
