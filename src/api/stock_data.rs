// src/api/stock_data.rs
use super::{respond, with_state, AppState};
use crate::auth::with_user;
use crate::error::ApiError;
use crate::importer::ImportJob;
use crate::models::{normalize_symbol, SearchQuery};
use crate::sp500::sp500_symbols;
use log::{error, info};
use serde_json::json;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let secret = state.jwt_secret.clone();

    let search = warp::path!("stock-data")
        .and(warp::get())
        .and(warp::query::<SearchQuery>())
        .and(with_state(state.clone()))
        .and_then(search_handler);

    let import = warp::path!("stock-data" / "import-sp500")
        .and(warp::post())
        .and(with_user(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(import_sp500_handler);

    let by_symbol = warp::path!("stock-data" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(by_symbol_handler);

    let update = warp::path!("stock-data" / String / "update")
        .and(warp::put())
        .and(with_user(secret))
        .and(with_state(state))
        .and_then(update_handler);

    search.or(import).or(by_symbol).or(update)
}

async fn search_handler(query: SearchQuery, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut stocks = state.repo.list_stocks().await?;
    if let Some(needle) = needle {
        stocks.retain(|s| {
            s.symbol.to_lowercase().contains(&needle) || s.name.to_lowercase().contains(&needle)
        });
    }
    stocks.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(warp::reply::json(&stocks))
}

async fn by_symbol_handler(symbol: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let stock = state
        .repo
        .find_stock_by_symbol(&normalize_symbol(&symbol))
        .await?
        .ok_or_else(|| ApiError::NotFound("Stock data not found".to_string()))?;
    Ok(warp::reply::json(&stock))
}

async fn import_sp500_handler(user_id: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let (pending, skipped) = state.importer.pending_symbols(&sp500_symbols()).await?;
    if pending.is_empty() {
        return Ok(respond(
            StatusCode::OK,
            &json!({
                "message": "All S&P 500 stocks are already imported",
                "data": { "pending": 0, "skipped": skipped },
            }),
        ));
    }

    let count = pending.len();
    let job = ImportJob {
        symbols: pending,
        owner: user_id.clone(),
    };
    if let Err(e) = state.jobs.send(job).await {
        error!("Import worker is not running: {}", e);
        return Err(ApiError::Unavailable("Import worker is not running".to_string()).into());
    }

    info!("Queued S&P 500 import of {} symbols for {}", count, user_id);
    Ok(respond(
        StatusCode::ACCEPTED,
        &json!({
            "message": "S&P 500 stocks import queued",
            "data": { "pending": count, "skipped": skipped },
        }),
    ))
}

async fn update_handler(
    symbol: String,
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let stock = state
        .importer
        .refresh_symbol(&symbol)
        .await
        .map_err(ApiError::from)?;
    info!("Stock data for {} refreshed by {}", stock.symbol, user_id);
    Ok(respond(
        StatusCode::OK,
        &json!({ "message": "Stock data updated successfully", "stock": stock }),
    ))
}
