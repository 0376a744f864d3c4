//! gRPC handlers for the storage node's column service.
//!
//! Every handler serializes behind the node-wide column lock: the cracking
//! engine mutates in place on each query, so loads, queries, and inspection
//! are mutually exclusive.

use std::sync::Arc;

use crate::engine::CrackingEngine;
use crate::volo_gen::crack_store::rpc;
use crate::NodeState;

/// gRPC service implementation backed by a shared `NodeState`.
#[derive(Clone)]
pub struct StorageRpcService {
    pub state: Arc<NodeState>,
}

impl rpc::StorageService for StorageRpcService {
    /// Replace (or create) the named column from the request payload.
    ///
    /// The new engine is built before the old one is dropped, so a failed
    /// load never disturbs the column being replaced.
    async fn load_column(
        &self,
        req: volo_grpc::Request<rpc::LoadColumnRequest>,
    ) -> Result<volo_grpc::Response<rpc::LoadColumnResponse>, volo_grpc::Status> {
        let req = req.into_inner();
        let node_id = self.state.node_id.clone();

        if req.data.is_empty() {
            return Ok(volo_grpc::Response::new(rpc::LoadColumnResponse {
                success: false,
                rows_loaded: 0,
                node_id: node_id.into(),
            }));
        }

        let engine = CrackingEngine::new(&req.data);
        let rows = engine.size();

        let mut columns = self.state.columns.lock().await;
        columns.insert(req.column_name.to_string(), engine);
        tracing::info!(column = %req.column_name, rows, "column loaded");

        Ok(volo_grpc::Response::new(rpc::LoadColumnResponse {
            success: true,
            rows_loaded: rows as i32,
            node_id: node_id.into(),
        }))
    }

    /// Count values in `[low, high)` on the named column.
    async fn range_query(
        &self,
        req: volo_grpc::Request<rpc::RangeQueryRequest>,
    ) -> Result<volo_grpc::Response<rpc::RangeQueryResponse>, volo_grpc::Status> {
        let req = req.into_inner();
        let node_id = self.state.node_id.clone();

        let mut columns = self.state.columns.lock().await;
        let Some(engine) = columns.get_mut(req.column_name.as_str()) else {
            return Ok(volo_grpc::Response::new(rpc::RangeQueryResponse {
                success: false,
                count: 0,
                node_id: node_id.into(),
                stats: None,
                error_message: format!("column not found: {}", req.column_name).into(),
            }));
        };

        let count = engine.range_query(req.low, req.high);
        let stats = engine.stats();
        let cracks = engine.crack_count();

        tracing::info!(
            column = %req.column_name,
            low = req.low,
            high = req.high,
            count,
            touched = stats.last_tuples_touched,
            cracks,
            "range query"
        );

        Ok(volo_grpc::Response::new(rpc::RangeQueryResponse {
            success: true,
            count: count as i32,
            node_id: node_id.into(),
            stats: Some(rpc::QueryStats {
                tuples_touched: stats.last_tuples_touched as i64,
                cracks_used: cracks as i32,
                query_time_ms: stats.last_query_time_ms,
            }),
            error_message: "".into(),
        }))
    }

    /// Per-column sizes and crack counts plus node-wide totals.
    async fn get_node_info(
        &self,
        _req: volo_grpc::Request<rpc::NodeInfoRequest>,
    ) -> Result<volo_grpc::Response<rpc::NodeInfoResponse>, volo_grpc::Status> {
        let columns = self.state.columns.lock().await;

        let mut names: Vec<String> = columns.keys().cloned().collect();
        names.sort();

        let total_rows: i64 = columns.values().map(|e| e.size() as i64).sum();
        let total_cracks: i64 = columns.values().map(|e| e.crack_count() as i64).sum();

        Ok(volo_grpc::Response::new(rpc::NodeInfoResponse {
            node_id: self.state.node_id.clone().into(),
            is_healthy: true,
            columns: names.into_iter().map(Into::into).collect(),
            total_rows,
            total_cracks: total_cracks.min(i64::from(i32::MAX)) as i32,
        }))
    }

    async fn health_check(
        &self,
        _req: volo_grpc::Request<rpc::Empty>,
    ) -> Result<volo_grpc::Response<rpc::StatusResponse>, volo_grpc::Status> {
        Ok(volo_grpc::Response::new(rpc::StatusResponse {
            success: true,
            message: "OK".into(),
        }))
    }
}
