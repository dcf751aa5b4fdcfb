use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use skale_common::IndexerError;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiResult;
use crate::indexer::{Indexer, LatestOutcome, ScrapeLatestRequest, ScrapeLatestResponse};
use crate::scraper::ScrapeReport;
use crate::sync::SyncSummary;

#[derive(Debug, Serialize)]
pub struct ScrapeSummary {
    pub from: u64,
    pub to: u64,
    pub logs: usize,
    pub processed: usize,
    pub errors: Vec<LogError>,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct LogError {
    pub block_height: u64,
    pub log_index: u64,
    pub tx_hash: String,
    pub error: String,
}

impl From<&ScrapeReport> for ScrapeSummary {
    fn from(report: &ScrapeReport) -> Self {
        Self {
            from: report.from,
            to: report.to,
            logs: report.total,
            processed: report.processed(),
            errors: report
                .errors()
                .map(|(output, error)| LogError {
                    block_height: output.block_height,
                    log_index: output.log_index,
                    tx_hash: format!("{:?}", output.tx_hash),
                    error: error.to_string(),
                })
                .collect(),
            cancelled: report.cancelled,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    pub version: Option<String>,
    pub block_height: Option<u64>,
}

fn block_param(params: &HashMap<String, String>, name: &str) -> Result<u64, IndexerError> {
    let raw = params
        .get(name)
        .ok_or_else(|| IndexerError::InvalidParameter(format!("missing {}", name)))?;
    raw.trim()
        .parse()
        .map_err(|_| IndexerError::InvalidParameter(format!("{} must be a decimal block number, got {}", name, raw)))
}

/// POST /scrape?from=N&to=M - Scrape one block range
pub async fn scrape_range(
    State(indexer): State<Arc<Indexer>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<ScrapeSummary>> {
    let from = block_param(&params, "from")?;
    let to = block_param(&params, "to")?;
    let report = indexer.scrape_range(from, to).await?;
    Ok(Json(ScrapeSummary::from(&report)))
}

/// POST /scrape/latest - Catch up from `last_height` to the head.
/// Answers 202 while another catch-up is running.
pub async fn scrape_latest(
    State(indexer): State<Arc<Indexer>>,
    Json(request): Json<ScrapeLatestRequest>,
) -> ApiResult<(StatusCode, Json<ScrapeLatestResponse>)> {
    match indexer.scrape_latest(&request).await? {
        LatestOutcome::Completed(response) => Ok((StatusCode::OK, Json(response))),
        LatestOutcome::Processing(response) => Ok((StatusCode::ACCEPTED, Json(response))),
    }
}

/// POST /sync - Epoch synchronisation at a block (the head by default)
pub async fn sync(
    State(indexer): State<Arc<Indexer>>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<Json<SyncSummary>> {
    let summary = indexer
        .sync(request.version.as_deref(), request.block_height)
        .await?;
    Ok(Json(summary))
}
