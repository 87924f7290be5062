// src/auth.rs
use crate::error::ApiError;
use crate::votes::Actor;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::{Filter, Rejection};

const TOKEN_TTL_SECS: i64 = 60 * 60 * 24;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Identity of the caller for one request.
///
/// `session` is always present so a registered user can still post
/// anonymously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    pub session: String,
}

impl Caller {
    pub fn actor(&self) -> Actor {
        match &self.user_id {
            Some(id) => Actor::Registered(id.clone()),
            None => Actor::Anonymous(self.session.clone()),
        }
    }
}

pub fn create_token(user_id: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now().timestamp() + TOKEN_TTL_SECS) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<String, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))
}

fn bearer(header: &str) -> Result<&str, ApiError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Malformed authorization header".to_string()))
}

fn resolve_caller(
    secret: &str,
    authorization: Option<String>,
    session: Option<String>,
    remote: Option<SocketAddr>,
) -> Result<Caller, ApiError> {
    let user_id = match authorization {
        Some(header) => Some(verify_token(bearer(&header)?, secret)?),
        None => None,
    };
    let session = session
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| format!("anonymous_{}", Utc::now().timestamp_millis()));
    Ok(Caller { user_id, session })
}

/// Extracts the caller; an absent token means anonymous, a bad one is 401.
pub fn with_caller(
    secret: Arc<String>,
) -> impl Filter<Extract = (Caller,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("x-session-id"))
        .and(warp::addr::remote())
        .and_then(
            move |authorization: Option<String>,
                  session: Option<String>,
                  remote: Option<SocketAddr>| {
                let secret = secret.clone();
                async move {
                    resolve_caller(&secret, authorization, session, remote)
                        .map_err(warp::reject::custom)
                }
            },
        )
}

/// Like [`with_caller`] but requires a registered user and yields its id.
pub fn with_user(
    secret: Arc<String>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    with_caller(secret).and_then(|caller: Caller| async move {
        caller.user_id.ok_or_else(|| {
            warp::reject::custom(ApiError::Unauthorized(
                "Authentication required".to_string(),
            ))
        })
    })
}
