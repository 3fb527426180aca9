use super::AppState;
use super::types::{HolderEntry, HoldersQuery, PaginatedHolders, format_percentage};
use crate::repository::{Database, HolderRepository};
use crate::sync::SyncError;
use anyhow::Result;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(error: anyhow::Error) -> Self {
        error!("Request failed: {error:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{error:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "statusCode": self.status.as_u16(),
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub async fn get_holders(
    State(state): State<AppState>,
    Query(query): Query<HoldersQuery>,
) -> Result<Json<PaginatedHolders>, ApiError> {
    query.validate().map_err(ApiError::bad_request)?;

    let db = state.db.clone();
    let page = tokio::task::spawn_blocking(move || holders_page(&db, &query))
        .await
        .map_err(|e| ApiError::internal(e.into()))?
        .map_err(ApiError::internal)?;

    Ok(Json(page))
}

pub async fn trigger_sync(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.engine.run_pass().await {
        Ok(summary) => Ok(Json(json!({
            "message": "Sync completed successfully",
            "fromBlock": summary.from_block,
            "toBlock": summary.to_block,
            "transfers": summary.transfers,
        }))
        .into_response()),
        Err(SyncError::Conflict) => Err(ApiError::conflict("Sync already in progress")),
        Err(SyncError::Failed(error)) => Err(ApiError::internal(error)),
    }
}

pub async fn sync_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "syncing": state.gate.is_syncing() }))
}

/// Assembles one page of the holder set with percentage-of-supply for each
/// entry. Reads are not coordinated with a concurrent commit beyond sqlite's
/// own transaction isolation; a page observed mid-pass is simply the last
/// committed snapshot.
fn holders_page(db: &Database, query: &HoldersQuery) -> Result<PaginatedHolders> {
    let conn = db.lock();
    let repo = HolderRepository::new(&conn);

    let total = repo.count()?;
    let total_supply = repo.total_supply()?;

    let (order_by, direction) = query.storage_order();
    let offset = (query.page - 1) * query.limit;
    let holders = repo.page(order_by, direction, query.limit, offset)?;

    let data = holders
        .into_iter()
        .map(|holder| HolderEntry {
            address: format!("{:?}", holder.address),
            balance: holder.balance.to_string(),
            percentage: format_percentage(holder.balance, total_supply),
        })
        .collect();

    let total_pages = total.div_ceil(query.limit);

    Ok(PaginatedHolders {
        data,
        total,
        page: query.page,
        limit: query.limit,
        total_pages,
        has_next_page: query.page < total_pages,
        has_previous_page: query.page > 1,
    })
}
