// src/db/mod.rs
use crate::models::{Comment, Stock};
use async_trait::async_trait;
use scylla::transport::errors::{NewSessionError, QueryError};
use thiserror::Error;

pub mod cql;
pub mod memory;

pub use self::cql::ScyllaRepository;
pub use self::memory::MemoryRepository;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to connect to ScyllaDB: {0}")]
    Connect(#[from] NewSessionError),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("malformed row: {0}")]
    Decode(String),
}

/// Storage for stocks and their comments.
///
/// The vote and price writers only touch their own columns so a price
/// refresh never overwrites a concurrent vote.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_stocks(&self) -> Result<Vec<Stock>, DbError>;
    async fn find_stock(&self, id: &str) -> Result<Option<Stock>, DbError>;
    async fn find_stock_by_symbol(&self, symbol: &str) -> Result<Option<Stock>, DbError>;
    async fn list_symbols(&self) -> Result<Vec<String>, DbError>;
    async fn save_stock(&self, stock: &Stock) -> Result<(), DbError>;
    async fn save_stock_votes(&self, stock: &Stock) -> Result<(), DbError>;
    async fn save_stock_price(&self, stock: &Stock) -> Result<(), DbError>;
    async fn delete_stock(&self, id: &str) -> Result<(), DbError>;

    async fn list_comments(&self) -> Result<Vec<Comment>, DbError>;
    async fn comments_for_stock(&self, stock_id: &str) -> Result<Vec<Comment>, DbError>;
    async fn find_comment(&self, id: &str) -> Result<Option<Comment>, DbError>;
    async fn save_comment(&self, comment: &Comment) -> Result<(), DbError>;
    async fn save_comment_votes(&self, comment: &Comment) -> Result<(), DbError>;
    async fn delete_comment(&self, id: &str) -> Result<(), DbError>;
    /// Deletes the direct replies of `parent_id`, returning how many went.
    async fn delete_replies(&self, parent_id: &str) -> Result<usize, DbError>;
    async fn delete_comments_for_stock(&self, stock_id: &str) -> Result<usize, DbError>;
    async fn delete_all_comments(&self) -> Result<usize, DbError>;
}
