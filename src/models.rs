// src/models.rs
use crate::votes::VoteLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub description: Option<String>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub current_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub percent_change: Option<f64>,
    #[serde(flatten)]
    pub votes: VoteLedger,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub price_updated_at: Option<DateTime<Utc>>,
}

impl Stock {
    pub fn new(symbol: &str, name: &str, created_by: &str) -> Self {
        let now = Utc::now();
        Stock {
            id: new_id(),
            symbol: normalize_symbol(symbol),
            name: name.trim().to_string(),
            description: None,
            exchange: None,
            currency: None,
            current_price: None,
            previous_close: None,
            percent_change: None,
            votes: VoteLedger::default(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            price_updated_at: None,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(rename = "stock")]
    pub stock_id: String,
    pub parent_comment: Option<String>,
    pub content: String,
    pub is_anonymous: bool,
    pub author: Option<String>,
    #[serde(skip)]
    pub anonymous_author_id: Option<String>,
    #[serde(flatten)]
    pub votes: VoteLedger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_comment.is_some()
    }

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStock {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub current_price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChanges {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub current_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub content: Option<String>,
    pub stock_id: Option<String>,
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommentChanges {
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn is_valid_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Returns the trimmed text, or `None` when nothing but whitespace is left.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
