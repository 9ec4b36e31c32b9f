//! Read-only tree query endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use mirror::tree::TreeStats;
use mirror::{Node, TreeSnapshot};

use crate::server::error::ApiError;
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub(crate) struct NodeQuery {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchResponse {
    pub query: String,
    pub results: Vec<Node>,
}

pub(crate) async fn tree(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<TreeSnapshot>, ApiError> {
    Ok(Json(state.tree.serialize_tree()?))
}

pub(crate) async fn node(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(state.tree.get_by_path(&query.path)?))
}

pub(crate) async fn search(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let results = state.tree.search(&query.q)?;
    Ok(Json(SearchResponse {
        query: query.q,
        results,
    }))
}

pub(crate) async fn stats(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let tree: TreeStats = state.tree.stats();
    let ledger = state.ledger.stats();
    Json(serde_json::json!({
        "tree": tree,
        "history": ledger,
        "subscribers": {
            "monitor": state.monitor_hub.len(),
            "filesystem": state.filesystem_hub.len(),
        },
    }))
}
