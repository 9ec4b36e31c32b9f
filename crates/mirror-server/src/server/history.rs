//! History and current-state query endpoints.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use mirror::ledger::{IndexEntry, LedgerEntry, LedgerQuery};
use mirror::ChangeKind;

use crate::server::error::ApiError;
use crate::server::ServerState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HistoryParams {
    pub path: Option<PathBuf>,
    /// RFC 3339, inclusive.
    pub start: Option<String>,
    /// RFC 3339, inclusive.
    pub end: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HistoryResponse {
    pub total: usize,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StateParams {
    pub path: PathBuf,
}

fn parse_timestamp(label: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| ApiError::bad_request(format!("invalid {label} timestamp: {error}")))
}

impl HistoryParams {
    fn into_query(self) -> Result<LedgerQuery, ApiError> {
        let start = self
            .start
            .as_deref()
            .map(|value| parse_timestamp("start", value))
            .transpose()?;
        let end = self
            .end
            .as_deref()
            .map(|value| parse_timestamp("end", value))
            .transpose()?;
        let kind = self
            .kind
            .as_deref()
            .map(|value| {
                ChangeKind::parse(value)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown change kind {value:?}")))
            })
            .transpose()?;
        Ok(LedgerQuery {
            path: self.path,
            start,
            end,
            kind,
        })
    }
}

pub(crate) async fn history(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let entries = state.ledger.query(&params.into_query()?);
    Ok(Json(HistoryResponse {
        total: entries.len(),
        entries,
    }))
}

pub(crate) async fn current_state(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<StateParams>,
) -> Result<Json<IndexEntry>, ApiError> {
    Ok(Json(state.ledger.current_state(&params.path)?))
}
