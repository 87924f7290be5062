// src/api/comments.rs
use super::{json_body, require_id, respond, with_direction, with_state, AppState};
use crate::auth::{with_caller, with_user, Caller};
use crate::error::ApiError;
use crate::models::{new_id, non_blank, Comment, CommentChanges, NewComment};
use crate::thread::build_comment_tree;
use crate::votes::{VoteDirection, VoteLedger};
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

    let for_stock = warp::path!("comments" / "stock" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(stock_comments_handler);

    let create = warp::path!("comments")
        .and(warp::post())
        .and(with_caller(secret.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(create_comment_handler);

    let update = warp::path!("comments" / String)
        .and(warp::put())
        .and(with_user(secret.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(update_comment_handler);

    let delete = warp::path!("comments" / String)
        .and(warp::delete())
        .and(with_user(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_comment_handler);

    let like = warp::path!("comments" / String / "like")
        .and(warp::post())
        .and(with_direction(VoteDirection::Like))
        .and(with_caller(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(vote_comment_handler);

    let dislike = warp::path!("comments" / String / "dislike")
        .and(warp::post())
        .and(with_direction(VoteDirection::Dislike))
        .and(with_caller(secret))
        .and(with_state(state))
        .and_then(vote_comment_handler);

    for_stock
        .or(create)
        .or(update)
        .or(delete)
        .or(like)
        .or(dislike)
}

async fn load_comment(state: &AppState, id: &str) -> Result<Comment, ApiError> {
    require_id(id, "comment")?;
    state
        .repo
        .find_comment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))
}

async fn stock_comments_handler(
    stock_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    require_id(&stock_id, "stock")?;
    if state.repo.find_stock(&stock_id).await?.is_none() {
        return Err(ApiError::NotFound("Stock not found".to_string()).into());
    }
    let comments = state.repo.comments_for_stock(&stock_id).await?;
    Ok(warp::reply::json(&build_comment_tree(comments)))
}

async fn create_comment_handler(
    caller: Caller,
    body: NewComment,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let content = non_blank(body.content.as_deref())
        .ok_or_else(|| ApiError::Validation("Comment content is required".to_string()))?;
    let stock_id = body
        .stock_id
        .ok_or_else(|| ApiError::Validation("Stock ID is required".to_string()))?;
    require_id(&stock_id, "stock")?;
    if state.repo.find_stock(&stock_id).await?.is_none() {
        return Err(ApiError::NotFound("Stock not found".to_string()).into());
    }

    if let Some(parent_id) = &body.parent_comment_id {
        require_id(parent_id, "parent comment")?;
        let parent = state
            .repo
            .find_comment(parent_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Parent comment not found".to_string()))?;
        if parent.stock_id != stock_id {
            return Err(ApiError::Validation(
                "Parent comment does not belong to this stock".to_string(),
            )
            .into());
        }
    }

    let is_anonymous = body.is_anonymous || caller.user_id.is_none();
    let now = Utc::now();
    let comment = Comment {
        id: new_id(),
        stock_id,
        parent_comment: body.parent_comment_id,
        content,
        is_anonymous,
        author: if is_anonymous { None } else { caller.user_id.clone() },
        anonymous_author_id: if is_anonymous { Some(caller.session.clone()) } else { None },
        votes: VoteLedger::default(),
        created_at: now,
        updated_at: now,
    };

    state.repo.save_comment(&comment).await?;
    info!(
        "Comment {} created on stock {} (anonymous: {})",
        comment.id, comment.stock_id, comment.is_anonymous
    );
    Ok(respond(
        StatusCode::CREATED,
        &json!({ "message": "Comment created successfully", "comment": comment }),
    ))
}

async fn update_comment_handler(
    id: String,
    user_id: String,
    changes: CommentChanges,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let content = non_blank(changes.content.as_deref())
        .ok_or_else(|| ApiError::Validation("Comment content is required".to_string()))?;
    let mut comment = load_comment(&state, &id).await?;
    if !comment.is_authored_by(&user_id) {
        return Err(ApiError::Forbidden("Not authorized to update this comment".to_string()).into());
    }

    comment.content = content;
    comment.updated_at = Utc::now();
    state.repo.save_comment(&comment).await?;
    info!("Comment {} updated by {}", comment.id, user_id);
    Ok(respond(
        StatusCode::OK,
        &json!({ "message": "Comment updated successfully", "comment": comment }),
    ))
}

async fn delete_comment_handler(
    id: String,
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let comment = load_comment(&state, &id).await?;
    if !comment.is_authored_by(&user_id) {
        return Err(ApiError::Forbidden("Not authorized to delete this comment".to_string()).into());
    }

    // Only a top-level comment takes its direct replies with it.
    let replies = if comment.is_reply() {
        0
    } else {
        state.repo.delete_replies(&comment.id).await?
    };
    state.repo.delete_comment(&comment.id).await?;
    info!(
        "Comment {} deleted by {} along with {} replies",
        comment.id, user_id, replies
    );
    Ok(respond(
        StatusCode::OK,
        &json!({ "message": "Comment deleted successfully", "data": { "deletedReplies": replies } }),
    ))
}

async fn vote_comment_handler(
    id: String,
    direction: VoteDirection,
    caller: Caller,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let mut comment = load_comment(&state, &id).await?;
    let tally = comment
        .votes
        .apply(&caller.actor(), direction)
        .map_err(|e| ApiError::already_voted("comment", e))?;
    state.repo.save_comment_votes(&comment).await?;

    Ok(respond(
        StatusCode::OK,
        &json!({
            "message": format!("Comment {} successfully", direction.past_tense()),
            "likes": tally.likes,
            "dislikes": tally.dislikes,
        }),
    ))
}
