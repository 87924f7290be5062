// src/api/mod.rs
use crate::db::Repository;
use crate::error::{handle_rejection, ApiError};
use crate::importer::{ImportJob, Importer};
use crate::votes::VoteDirection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

mod comments;
mod stock_data;
mod stocks;

/// Everything a request handler may touch.
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub importer: Arc<Importer>,
    pub jobs: mpsc::Sender<ImportJob>,
    pub jwt_secret: Arc<String>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    stocks::routes(state.clone())
        .or(comments::routes(state.clone()))
        .or(stock_data::routes(state))
        .recover(handle_rejection)
        .with(warp::log("stock_forum::api"))
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_direction(
    direction: VoteDirection,
) -> impl Filter<Extract = (VoteDirection,), Error = Infallible> + Clone {
    warp::any().map(move || direction)
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(1024 * 16).and(warp::body::json())
}

fn respond<T: Serialize>(status: StatusCode, body: &T) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn require_id(id: &str, what: &str) -> Result<(), ApiError> {
    if crate::models::is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("Invalid {} ID format", what)))
    }
}

#[cfg(test)]
mod tests;
