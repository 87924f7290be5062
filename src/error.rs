// src/error.rs
use crate::db::DbError;
use crate::importer::ImportError;
use crate::quotes::QuoteError;
use crate::votes::{AlreadyVoted, VoteDirection};
use log::error;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("You already {} this {}", .direction.past_tense(), .entity)]
    AlreadyVoted {
        entity: &'static str,
        direction: VoteDirection,
    },

    #[error("{0}")]
    Unavailable(String),

    #[error("Failed to fetch stock data from API")]
    Upstream(#[source] QuoteError),

    #[error("Server error")]
    Database(#[from] DbError),
}

impl ApiError {
    pub fn already_voted(entity: &'static str, AlreadyVoted(direction): AlreadyVoted) -> Self {
        ApiError::AlreadyVoted { entity, direction }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::AlreadyVoted { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Upstream(e) => e.to_string(),
            ApiError::Database(e) => e.to_string(),
            other => other
                .status()
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Quote(e) => ApiError::Upstream(e),
            ImportError::Database(e) => ApiError::Database(e),
            ImportError::UnknownSymbol(_) => ApiError::NotFound("Stock data not found".to_string()),
        }
    }
}

impl Reject for ApiError {}

impl From<DbError> for Rejection {
    fn from(err: DbError) -> Self {
        warp::reject::custom(ApiError::from(err))
    }
}

fn error_reply(status: StatusCode, message: &str, detail: &str) -> warp::reply::Response {
    let body = json!({ "message": message, "error": detail });
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Turns every rejection into a `{ message, error }` JSON body.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if let Some(api_error) = err.find::<ApiError>() {
        let status = api_error.status();
        if status.is_server_error() {
            error!("{}: {}", api_error, api_error.detail());
        }
        return Ok(error_reply(
            status,
            &api_error.to_string(),
            &api_error.detail(),
        ));
    }

    if err.is_not_found() {
        return Ok(error_reply(
            StatusCode::NOT_FOUND,
            "Route not found",
            "Not Found",
        ));
    }

    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Malformed request body",
            &e.to_string(),
        ));
    }

    if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Missing request header",
            &e.to_string(),
        ));
    }

    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(error_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
            "Payload Too Large",
        ));
    }

    if err.find::<warp::reject::LengthRequired>().is_some() {
        return Ok(error_reply(
            StatusCode::LENGTH_REQUIRED,
            "Request body needs a Content-Length header",
            "Length Required",
        ));
    }

    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            "Method Not Allowed",
        ));
    }

    error!("Unhandled rejection: {:?}", err);
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Server error",
        "Internal Server Error",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_vote_message() {
        let err = ApiError::already_voted("comment", AlreadyVoted(VoteDirection::Dislike));
        assert_eq!(err.to_string(), "You already disliked this comment");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn custom_rejection_becomes_json() {
        let rejection = warp::reject::custom(ApiError::Forbidden(
            "Not authorized to delete this stock".to_string(),
        ));
        let response = handle_rejection(rejection).await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
