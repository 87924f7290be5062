// src/api/stocks.rs
use super::{json_body, require_id, respond, with_direction, with_state, AppState};
use crate::auth::{with_caller, with_user, Caller};
use crate::error::ApiError;
use crate::models::{non_blank, normalize_symbol, NewStock, Stock, StockChanges};
use crate::votes::VoteDirection;
use chrono::Utc;
use log::info;
use serde_json::json;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let secret = state.jwt_secret.clone();

    let list = warp::path!("stocks")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_stocks_handler);

    let by_symbol = warp::path!("stocks" / "symbol" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_stock_by_symbol_handler);

    let get = warp::path!("stocks" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_stock_handler);

    let create = warp::path!("stocks")
        .and(warp::post())
        .and(with_user(secret.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_stock_handler);

    let update = warp::path!("stocks" / String)
        .and(warp::put())
        .and(with_user(secret.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_stock_handler);

    let delete = warp::path!("stocks" / String)
        .and(warp::delete())
        .and(with_user(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_stock_handler);

    let like = warp::path!("stocks" / String / "like")
        .and(warp::post())
        .and(with_direction(VoteDirection::Like))
        .and(with_caller(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(vote_stock_handler);

    let dislike = warp::path!("stocks" / String / "dislike")
        .and(warp::post())
        .and(with_direction(VoteDirection::Dislike))
        .and(with_caller(secret))
        .and(with_state(state))
        .and_then(vote_stock_handler);

    list.or(by_symbol)
        .or(get)
        .or(create)
        .or(update)
        .or(delete)
        .or(like)
        .or(dislike)
}

async fn load_stock(state: &AppState, id: &str) -> Result<Stock, ApiError> {
    require_id(id, "stock")?;
    state
        .repo
        .find_stock(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Stock not found".to_string()))
}

fn check_price(price: Option<f64>) -> Result<Option<f64>, ApiError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(ApiError::Validation(
            "Current price must be a non-negative number".to_string(),
        )),
        other => Ok(other),
    }
}

async fn list_stocks_handler(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let stocks = state.repo.list_stocks().await?;
    Ok(warp::reply::json(&stocks))
}

async fn get_stock_handler(id: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let stock = load_stock(&state, &id).await?;
    Ok(warp::reply::json(&stock))
}

async fn get_stock_by_symbol_handler(
    symbol: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let stock = state
        .repo
        .find_stock_by_symbol(&normalize_symbol(&symbol))
        .await?
        .ok_or_else(|| ApiError::NotFound("Stock not found".to_string()))?;
    Ok(warp::reply::json(&stock))
}

async fn create_stock_handler(
    user_id: String,
    body: NewStock,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = non_blank(body.symbol.as_deref())
        .ok_or_else(|| ApiError::Validation("Stock symbol is required".to_string()))?;
    let name = non_blank(body.name.as_deref())
        .ok_or_else(|| ApiError::Validation("Stock name is required".to_string()))?;
    let current_price = check_price(body.current_price)?;

    let mut stock = Stock::new(&symbol, &name, &user_id);
    if state.repo.find_stock_by_symbol(&stock.symbol).await?.is_some() {
        return Err(ApiError::Validation("Stock with this symbol already exists".to_string()).into());
    }
    stock.description = non_blank(body.description.as_deref());
    stock.current_price = current_price;

    state.repo.save_stock(&stock).await?;
    info!("Stock {} created by {}", stock.symbol, user_id);
    Ok(respond(
        StatusCode::CREATED,
        &json!({ "message": "Stock created successfully", "stock": stock }),
    ))
}

async fn update_stock_handler(
    id: String,
    user_id: String,
    changes: StockChanges,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let mut stock = load_stock(&state, &id).await?;
    if !stock.is_owned_by(&user_id) {
        return Err(ApiError::Forbidden("Not authorized to update this stock".to_string()).into());
    }

    if let Some(symbol) = non_blank(changes.symbol.as_deref()).map(|s| normalize_symbol(&s)) {
        if symbol != stock.symbol {
            if state.repo.find_stock_by_symbol(&symbol).await?.is_some() {
                return Err(
                    ApiError::Validation("Stock with this symbol already exists".to_string()).into(),
                );
            }
            stock.symbol = symbol;
        }
    }
    if let Some(name) = non_blank(changes.name.as_deref()) {
        stock.name = name;
    }
    if let Some(description) = non_blank(changes.description.as_deref()) {
        stock.description = Some(description);
    }
    if let Some(price) = check_price(changes.current_price)? {
        stock.current_price = Some(price);
    }
    stock.updated_at = Utc::now();

    state.repo.save_stock(&stock).await?;
    info!("Stock {} updated by {}", stock.symbol, user_id);
    Ok(respond(
        StatusCode::OK,
        &json!({ "message": "Stock updated successfully", "stock": stock }),
    ))
}

async fn delete_stock_handler(
    id: String,
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let stock = load_stock(&state, &id).await?;
    if !stock.is_owned_by(&user_id) {
        return Err(ApiError::Forbidden("Not authorized to delete this stock".to_string()).into());
    }

    let removed = state.repo.delete_comments_for_stock(&stock.id).await?;
    state.repo.delete_stock(&stock.id).await?;
    info!(
        "Stock {} deleted by {} along with {} comments",
        stock.symbol, user_id, removed
    );
    Ok(respond(
        StatusCode::OK,
        &json!({ "message": "Stock deleted successfully", "data": { "deletedComments": removed } }),
    ))
}

async fn vote_stock_handler(
    id: String,
    direction: VoteDirection,
    caller: Caller,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let mut stock = load_stock(&state, &id).await?;
    let tally = stock
        .votes
        .apply(&caller.actor(), direction)
        .map_err(|e| ApiError::already_voted("stock", e))?;
    state.repo.save_stock_votes(&stock).await?;

    Ok(respond(
        StatusCode::OK,
        &json!({
            "message": format!("Stock {} successfully", direction.past_tense()),
            "likes": tally.likes,
            "dislikes": tally.dislikes,
        }),
    ))
}
