// CrackStore command-line client.
//
// Talks to the coordinator for status, queries, and benchmarks; column loads
// go straight to the storage nodes, sharded round-robin across the healthy
// set reported by the coordinator.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

include!(concat!(env!("OUT_DIR"), "/volo_gen.rs"));

use volo_gen::crack_store::rpc;

/// Deadline for a distributed query round-trip.
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for one per-node column load.
const LOAD_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for cluster status calls.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Client for a CrackStore cluster", long_about = None)]
struct Args {
    /// Coordinator address (host:port).
    #[arg(long, default_value = "127.0.0.1:50050")]
    coordinator: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print cluster membership and health.
    Status,
    /// Load a raw little-endian int32 file into the cluster.
    Load { column: String, file: PathBuf },
    /// Run one distributed range-count query over [low, high).
    Query { column: String, low: i32, high: i32 },
    /// Repeat a query to watch tuples-touched drop as the column cracks.
    Benchmark {
        column: String,
        low: i32,
        high: i32,
        iterations: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Usage problems exit 1 like every other client failure; help and
            // version output keep clap's success exit.
            if err.use_stderr() {
                let _ = err.print();
                std::process::exit(1);
            }
            err.exit();
        }
    };

    let coordinator_addr: SocketAddr = args
        .coordinator
        .parse()
        .with_context(|| format!("invalid coordinator address: {}", args.coordinator))?;
    let coordinator =
        rpc::CoordinatorServiceClientBuilder::new("crack_store.rpc.CoordinatorService")
            .address(volo::net::Address::from(coordinator_addr))
            .build();

    match args.command {
        Command::Status => show_status(&coordinator).await,
        Command::Load { column, file } => load_column(&coordinator, &column, &file).await,
        Command::Query { column, low, high } => run_query(&coordinator, &column, low, high).await,
        Command::Benchmark {
            column,
            low,
            high,
            iterations,
        } => run_benchmark(&coordinator, &column, low, high, iterations).await,
    }
}

/// Fetch the cluster snapshot from the coordinator.
async fn fetch_status(
    coordinator: &rpc::CoordinatorServiceClient,
) -> anyhow::Result<rpc::ClusterStatusResponse> {
    tokio::time::timeout(
        STATUS_TIMEOUT,
        coordinator.get_cluster_status(rpc::ClusterStatusRequest {}),
    )
    .await
    .map_err(|_| anyhow::anyhow!("cluster status rpc timed out"))?
    .map_err(|err| anyhow::anyhow!("cluster status rpc failed: {err}"))
    .map(|response| response.into_inner())
}

async fn show_status(coordinator: &rpc::CoordinatorServiceClient) -> anyhow::Result<()> {
    let status = fetch_status(coordinator).await?;

    println!("=== Cluster Status ===");
    println!("Total nodes: {}", status.total_nodes);
    println!("Healthy nodes: {}", status.healthy_nodes);
    for node in &status.nodes {
        let health = if node.is_healthy { "HEALTHY" } else { "UNHEALTHY" };
        let columns = if node.columns.is_empty() {
            "-".to_string()
        } else {
            node.columns
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "  {} [{}:{}] {} (last heartbeat: {}ms ago, columns: {})",
            node.node_id, node.address, node.port, health, node.last_heartbeat_ms, columns
        );
    }
    Ok(())
}

/// Decode a raw file of little-endian 32-bit signed integers.
fn decode_column_file(bytes: &[u8]) -> anyhow::Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        bail!("file size {} is not a multiple of 4 bytes", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Split `total` values over `nodes` shards: node `i` receives
/// `total / nodes` values plus one when `i < total % nodes`.
fn shard_sizes(total: usize, nodes: usize) -> Vec<usize> {
    let base = total / nodes;
    let remainder = total % nodes;
    (0..nodes).map(|i| base + usize::from(i < remainder)).collect()
}

async fn load_column(
    coordinator: &rpc::CoordinatorServiceClient,
    column: &str,
    file: &Path,
) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let values = decode_column_file(&bytes)?;
    println!(
        "Read {} integers from {}",
        values.len(),
        file.display()
    );

    let status = fetch_status(coordinator).await?;
    let mut nodes = Vec::new();
    for node in &status.nodes {
        if !node.is_healthy {
            continue;
        }
        let target: SocketAddr = format!("{}:{}", node.address, node.port)
            .parse()
            .with_context(|| format!("unresolvable node address for {}", node.node_id))?;
        let client = rpc::StorageServiceClientBuilder::new("crack_store.rpc.StorageService")
            .address(volo::net::Address::from(target))
            .build();
        nodes.push((node.node_id.to_string(), client));
    }
    if nodes.is_empty() {
        bail!("no healthy nodes available");
    }

    println!("Distributing to {} nodes...", nodes.len());

    let sizes = shard_sizes(values.len(), nodes.len());
    let mut offset = 0;
    for ((node_id, client), size) in nodes.iter().zip(sizes) {
        if size == 0 {
            println!("  {node_id}: skipped (more nodes than values)");
            continue;
        }
        let shard = values[offset..offset + size].to_vec();
        offset += size;

        let request = rpc::LoadColumnRequest {
            column_name: column.to_string().into(),
            data: shard,
        };
        let response = tokio::time::timeout(LOAD_TIMEOUT, client.load_column(request))
            .await
            .map_err(|_| anyhow::anyhow!("load timed out for {node_id}"))?
            .map_err(|err| anyhow::anyhow!("load rpc failed for {node_id}: {err}"))?
            .into_inner();

        if !response.success {
            bail!("{node_id}: load failed");
        }
        println!("  {}: loaded {} rows", node_id, response.rows_loaded);
    }

    println!("Load complete");
    Ok(())
}

async fn run_query(
    coordinator: &rpc::CoordinatorServiceClient,
    column: &str,
    low: i32,
    high: i32,
) -> anyhow::Result<()> {
    println!("Executing range query [{low}, {high}) on column '{column}'");

    let request = rpc::DistributedRangeQueryRequest {
        column_name: column.to_string().into(),
        low,
        high,
        return_values: false,
    };

    let start = Instant::now();
    let response = tokio::time::timeout(QUERY_TIMEOUT, coordinator.range_query(request))
        .await
        .map_err(|_| anyhow::anyhow!("query timed out"))?
        .map_err(|err| anyhow::anyhow!("query rpc failed: {err}"))?
        .into_inner();
    let client_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    if !response.success {
        bail!("query failed: {}", response.error_message);
    }

    println!("=== Query Results ===");
    println!("Total count: {}", response.total_count);
    println!("Nodes queried: {}", response.nodes_queried);
    println!("Server time: {:.3} ms", response.total_time_ms);
    println!("Client time: {client_time_ms:.3} ms");
    println!("Per-node results:");
    for result in &response.node_results {
        match &result.stats {
            Some(stats) => println!(
                "  {}: count={}, touched={}, cracks={}, time={:.3}ms",
                result.node_id,
                result.count,
                stats.tuples_touched,
                stats.cracks_used,
                stats.query_time_ms
            ),
            None => println!("  {}: count={}", result.node_id, result.count),
        }
    }
    Ok(())
}

async fn run_benchmark(
    coordinator: &rpc::CoordinatorServiceClient,
    column: &str,
    low: i32,
    high: i32,
    iterations: u32,
) -> anyhow::Result<()> {
    println!("=== Benchmark ===");
    println!("Query: [{low}, {high}) x {iterations} iterations");

    for iteration in 0..iterations {
        let request = rpc::DistributedRangeQueryRequest {
            column_name: column.to_string().into(),
            low,
            high,
            return_values: false,
        };

        let start = Instant::now();
        let response = tokio::time::timeout(QUERY_TIMEOUT, coordinator.range_query(request))
            .await
            .map_err(|_| anyhow::anyhow!("iteration {iteration} timed out"))?
            .map_err(|err| anyhow::anyhow!("iteration {iteration} rpc failed: {err}"))?
            .into_inner();
        let time_ms = start.elapsed().as_secs_f64() * 1000.0;

        if !response.success {
            bail!("iteration {iteration} failed: {}", response.error_message);
        }

        let touched: i64 = response
            .node_results
            .iter()
            .filter_map(|r| r.stats.as_ref())
            .map(|s| s.tuples_touched)
            .sum();
        let cracks: i64 = response
            .node_results
            .iter()
            .filter_map(|r| r.stats.as_ref())
            .map(|s| i64::from(s.cracks_used))
            .sum();

        println!(
            "Iteration {iteration}: count={}, touched={touched}, cracks={cracks}, time={time_ms:.3}ms",
            response.total_count
        );
    }

    println!("(tuples touched should drop after the first iteration)");
    Ok(())
}
