use super::*;
use crate::auth::create_token;
use crate::config::ImportSettings;
use crate::db::MemoryRepository;
use crate::models::{Comment, Stock};
use crate::quotes::{Quote, QuoteError, QuoteProvider};
use crate::sp500::sp500_symbols;
use crate::votes::VoteLedger;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use warp::test::RequestBuilder;

const SECRET: &str = "api-test-secret";

struct StaticQuotes;

#[async_trait]
impl QuoteProvider for StaticQuotes {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        if symbol == "DOWN" {
            return Err(QuoteError::Api {
                code: 500,
                message: "upstream down".to_string(),
            });
        }
        Ok(Quote {
            name: format!("{} Inc", symbol),
            exchange: Some("NASDAQ".to_string()),
            currency: Some("USD".to_string()),
            close: 190.0,
            previous_close: Some(188.0),
            percent_change: Some(1.06),
        })
    }
}

struct Harness {
    state: Arc<AppState>,
    repo: Arc<MemoryRepository>,
    jobs: mpsc::Receiver<ImportJob>,
}

impl Harness {
    fn new() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let importer = Arc::new(Importer::new(
            Arc::new(StaticQuotes),
            repo.clone(),
            ImportSettings::default(),
        ));
        let (tx, rx) = mpsc::channel(4);
        let state = Arc::new(AppState {
            repo: repo.clone(),
            importer,
            jobs: tx,
            jwt_secret: Arc::new(SECRET.to_string()),
        });
        Harness {
            state,
            repo,
            jobs: rx,
        }
    }

    async fn call(&self, request: RequestBuilder) -> (StatusCode, Value) {
        let response = request.reply(&routes(self.state.clone())).await;
        let body = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
        (response.status(), body)
    }

    async fn seed_stock(&self, symbol: &str, name: &str, owner: &str) -> Stock {
        let stock = Stock::new(symbol, name, owner);
        self.repo.save_stock(&stock).await.unwrap();
        stock
    }

    async fn seed_comment(&self, stock: &Stock, parent: Option<&Comment>, author: &str) -> Comment {
        let now = Utc::now();
        let comment = Comment {
            id: crate::models::new_id(),
            stock_id: stock.id.clone(),
            parent_comment: parent.map(|p| p.id.clone()),
            content: format!("posted by {}", author),
            is_anonymous: false,
            author: Some(author.to_string()),
            anonymous_author_id: None,
            votes: VoteLedger::default(),
            created_at: now,
            updated_at: now,
        };
        self.repo.save_comment(&comment).await.unwrap();
        comment
    }
}

fn bearer(user_id: &str) -> String {
    format!("Bearer {}", create_token(user_id, SECRET).unwrap())
}

fn post(path: &str) -> RequestBuilder {
    warp::test::request().method("POST").path(path)
}

#[tokio::test]
async fn creating_a_stock_requires_login_and_a_unique_symbol() {
    let h = Harness::new();
    let body = json!({ "symbol": "aapl", "name": "Apple Inc.", "currentPrice": 190.5 });

    let (status, reply) = h.call(post("/stocks").json(&body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["message"], "Authentication required");

    let (status, reply) = h
        .call(post("/stocks").header("authorization", bearer("alice")).json(&body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["message"], "Stock created successfully");
    assert_eq!(reply["stock"]["symbol"], "AAPL");
    assert_eq!(reply["stock"]["createdBy"], "alice");
    assert_eq!(reply["stock"]["likes"], 0);

    let (status, reply) = h
        .call(post("/stocks").header("authorization", bearer("bob")).json(&body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Stock with this symbol already exists");
}

#[tokio::test]
async fn bad_ids_and_unknown_routes() {
    let h = Harness::new();

    let (status, reply) = h.call(warp::test::request().path("/stocks/not-an-id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Invalid stock ID format");

    let missing = format!("/stocks/{}", crate::models::new_id());
    let (status, reply) = h.call(warp::test::request().path(&missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(reply["message"], "Stock not found");

    let (status, reply) = h.call(warp::test::request().path("/portfolio")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(reply["message"], "Route not found");
}

#[tokio::test]
async fn a_caller_can_switch_a_vote_but_not_repeat_it() {
    let h = Harness::new();
    let stock = h.seed_stock("TSLA", "Tesla", "alice").await;
    let like = format!("/stocks/{}/like", stock.id);
    let dislike = format!("/stocks/{}/dislike", stock.id);

    let (status, reply) = h.call(post(&like).header("x-session-id", "s-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["message"], "Stock liked successfully");
    assert_eq!((reply["likes"].clone(), reply["dislikes"].clone()), (json!(1), json!(0)));

    let (_, reply) = h.call(post(&dislike).header("x-session-id", "s-1")).await;
    assert_eq!((reply["likes"].clone(), reply["dislikes"].clone()), (json!(0), json!(1)));

    let (status, reply) = h.call(post(&dislike).header("x-session-id", "s-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "You already disliked this stock");

    // A registered user with the same identifier is a different voter.
    let (status, reply) = h
        .call(post(&like).header("authorization", bearer("s-1")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((reply["likes"].clone(), reply["dislikes"].clone()), (json!(1), json!(1)));

    let stored = h.repo.find_stock(&stock.id).await.unwrap().unwrap();
    assert_eq!(stored.votes.tally().likes, 1);
}

#[tokio::test]
async fn only_the_owner_changes_a_stock_and_delete_takes_its_comments() {
    let h = Harness::new();
    let stock = h.seed_stock("NFLX", "Netflix", "alice").await;
    let top = h.seed_comment(&stock, None, "bob").await;
    h.seed_comment(&stock, Some(&top), "carol").await;
    let path = format!("/stocks/{}", stock.id);

    let (status, reply) = h
        .call(
            warp::test::request()
                .method("PUT")
                .path(&path)
                .header("authorization", bearer("mallory"))
                .json(&json!({ "name": "Hijacked" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(reply["message"], "Not authorized to update this stock");

    let (status, reply) = h
        .call(
            warp::test::request()
                .method("PUT")
                .path(&path)
                .header("authorization", bearer("alice"))
                .json(&json!({ "description": "Streaming", "currentPrice": 612.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["stock"]["description"], "Streaming");
    assert_eq!(reply["stock"]["name"], "Netflix");

    let (status, reply) = h
        .call(
            warp::test::request()
                .method("DELETE")
                .path(&path)
                .header("authorization", bearer("alice")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["data"]["deletedComments"], 2);
    assert!(h.repo.find_stock(&stock.id).await.unwrap().is_none());
    assert!(h.repo.comments_for_stock(&stock.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn comments_come_back_as_a_tree() {
    let h = Harness::new();
    let stock = h.seed_stock("AMZN", "Amazon", "alice").await;

    let (status, reply) = h
        .call(
            post("/comments")
                .header("authorization", bearer("bob"))
                .json(&json!({ "content": "Long AMZN", "stockId": stock.id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["comment"]["author"], "bob");
    assert_eq!(reply["comment"]["isAnonymous"], false);
    let top_id = reply["comment"]["id"].as_str().unwrap().to_string();

    let (status, reply) = h
        .call(
            post("/comments")
                .header("x-session-id", "visitor")
                .json(&json!({
                    "content": "Why?",
                    "stockId": stock.id,
                    "parentCommentId": top_id,
                })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["comment"]["isAnonymous"], true);
    assert_eq!(reply["comment"]["author"], Value::Null);
    assert!(reply["comment"].get("anonymousAuthorId").is_none());

    let (status, reply) = h
        .call(
            post("/comments")
                .header("authorization", bearer("carol"))
                .json(&json!({ "content": "Quiet take", "stockId": stock.id, "isAnonymous": true })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["comment"]["author"], Value::Null);

    let path = format!("/comments/stock/{}", stock.id);
    let (status, tree) = h.call(warp::test::request().path(&path)).await;
    assert_eq!(status, StatusCode::OK);
    let roots = tree.as_array().unwrap();
    assert_eq!(roots.len(), 2);
    let top = roots.iter().find(|n| n["id"] == top_id.as_str()).unwrap();
    assert_eq!(top["replies"].as_array().unwrap().len(), 1);
    assert_eq!(top["replies"][0]["content"], "Why?");
}

#[tokio::test]
async fn comment_input_is_validated() {
    let h = Harness::new();
    let aapl = h.seed_stock("AAPL", "Apple", "alice").await;
    let msft = h.seed_stock("MSFT", "Microsoft", "alice").await;
    let foreign = h.seed_comment(&msft, None, "bob").await;

    let (status, reply) = h
        .call(post("/comments").json(&json!({ "content": "   ", "stockId": aapl.id })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Comment content is required");

    let (status, reply) = h
        .call(post("/comments").json(&json!({ "content": "hi" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Stock ID is required");

    let (status, reply) = h
        .call(post("/comments").json(&json!({
            "content": "hi",
            "stockId": aapl.id,
            "parentCommentId": foreign.id,
        })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Parent comment does not belong to this stock");

    let (status, reply) = h
        .call(post("/comments").json(&json!({
            "content": "hi",
            "stockId": aapl.id,
            "parentCommentId": crate::models::new_id(),
        })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(reply["message"], "Parent comment not found");
}

#[tokio::test]
async fn deleting_a_top_level_comment_removes_only_its_replies() {
    let h = Harness::new();
    let stock = h.seed_stock("GOOG", "Alphabet", "alice").await;
    let first = h.seed_comment(&stock, None, "bob").await;
    let reply = h.seed_comment(&stock, Some(&first), "carol").await;
    let second = h.seed_comment(&stock, None, "dave").await;

    let (status, body) = h
        .call(
            warp::test::request()
                .method("DELETE")
                .path(&format!("/comments/{}", reply.id))
                .header("authorization", bearer("bob")),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Not authorized to delete this comment");

    let (status, body) = h
        .call(
            warp::test::request()
                .method("DELETE")
                .path(&format!("/comments/{}", first.id))
                .header("authorization", bearer("bob")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deletedReplies"], 1);

    let left = h.repo.comments_for_stock(&stock.id).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, second.id);
}

#[tokio::test]
async fn deleting_a_reply_leaves_its_siblings_and_parent() {
    let h = Harness::new();
    let stock = h.seed_stock("ORCL", "Oracle", "alice").await;
    let top = h.seed_comment(&stock, None, "bob").await;
    let first = h.seed_comment(&stock, Some(&top), "carol").await;
    let second = h.seed_comment(&stock, Some(&top), "dave").await;

    let (status, body) = h
        .call(
            warp::test::request()
                .method("DELETE")
                .path(&format!("/comments/{}", first.id))
                .header("authorization", bearer("carol")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Comment deleted successfully");
    assert_eq!(body["data"]["deletedReplies"], 0);

    assert!(h.repo.find_comment(&first.id).await.unwrap().is_none());
    assert!(h.repo.find_comment(&top.id).await.unwrap().is_some());
    assert!(h.repo.find_comment(&second.id).await.unwrap().is_some());

    let path = format!("/comments/stock/{}", stock.id);
    let (_, tree) = h.call(warp::test::request().path(&path)).await;
    assert_eq!(tree.as_array().unwrap().len(), 1);
    assert_eq!(tree[0]["replies"].as_array().unwrap().len(), 1);
    assert_eq!(tree[0]["replies"][0]["id"], second.id.as_str());
}

#[tokio::test]
async fn json_body_without_length_is_rejected_with_411() {
    let h = Harness::new();

    // No body means no Content-Length, as with a chunked upload.
    let request = post("/comments").header("content-type", "application/json");
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::LENGTH_REQUIRED);
    assert_eq!(body["error"], "Length Required");
}
