// src/db/memory.rs
use super::{DbError, Repository};
use crate::models::{Comment, Stock};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local storage for `serve --in-memory` and tests.
#[derive(Default)]
pub struct MemoryRepository {
    stocks: RwLock<HashMap<String, Stock>>,
    comments: RwLock<HashMap<String, Comment>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_stocks(&self) -> Result<Vec<Stock>, DbError> {
        let mut stocks: Vec<Stock> = self.stocks.read().await.values().cloned().collect();
        stocks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stocks)
    }

    async fn find_stock(&self, id: &str) -> Result<Option<Stock>, DbError> {
        Ok(self.stocks.read().await.get(id).cloned())
    }

    async fn find_stock_by_symbol(&self, symbol: &str) -> Result<Option<Stock>, DbError> {
        Ok(self
            .stocks
            .read()
            .await
            .values()
            .find(|s| s.symbol == symbol)
            .cloned())
    }

    async fn list_symbols(&self) -> Result<Vec<String>, DbError> {
        let mut symbols: Vec<String> = self
            .stocks
            .read()
            .await
            .values()
            .map(|s| s.symbol.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn save_stock(&self, stock: &Stock) -> Result<(), DbError> {
        self.stocks
            .write()
            .await
            .insert(stock.id.clone(), stock.clone());
        Ok(())
    }

    async fn save_stock_votes(&self, stock: &Stock) -> Result<(), DbError> {
        if let Some(stored) = self.stocks.write().await.get_mut(&stock.id) {
            stored.votes = stock.votes.clone();
        }
        Ok(())
    }

    async fn save_stock_price(&self, stock: &Stock) -> Result<(), DbError> {
        if let Some(stored) = self.stocks.write().await.get_mut(&stock.id) {
            stored.current_price = stock.current_price;
            stored.previous_close = stock.previous_close;
            stored.percent_change = stock.percent_change;
            stored.price_updated_at = stock.price_updated_at;
            stored.updated_at = stock.updated_at;
        }
        Ok(())
    }

    async fn delete_stock(&self, id: &str) -> Result<(), DbError> {
        self.stocks.write().await.remove(id);
        Ok(())
    }

    async fn list_comments(&self) -> Result<Vec<Comment>, DbError> {
        let mut comments: Vec<Comment> = self.comments.read().await.values().cloned().collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }

    async fn comments_for_stock(&self, stock_id: &str) -> Result<Vec<Comment>, DbError> {
        Ok(self
            .comments
            .read()
            .await
            .values()
            .filter(|c| c.stock_id == stock_id)
            .cloned()
            .collect())
    }

    async fn find_comment(&self, id: &str) -> Result<Option<Comment>, DbError> {
        Ok(self.comments.read().await.get(id).cloned())
    }

    async fn save_comment(&self, comment: &Comment) -> Result<(), DbError> {
        self.comments
            .write()
            .await
            .insert(comment.id.clone(), comment.clone());
        Ok(())
    }

    async fn save_comment_votes(&self, comment: &Comment) -> Result<(), DbError> {
        if let Some(stored) = self.comments.write().await.get_mut(&comment.id) {
            stored.votes = comment.votes.clone();
        }
        Ok(())
    }

    async fn delete_comment(&self, id: &str) -> Result<(), DbError> {
        self.comments.write().await.remove(id);
        Ok(())
    }

    async fn delete_replies(&self, parent_id: &str) -> Result<usize, DbError> {
        let mut comments = self.comments.write().await;
        let before = comments.len();
        comments.retain(|_, c| c.parent_comment.as_deref() != Some(parent_id));
        Ok(before - comments.len())
    }

    async fn delete_comments_for_stock(&self, stock_id: &str) -> Result<usize, DbError> {
        let mut comments = self.comments.write().await;
        let before = comments.len();
        comments.retain(|_, c| c.stock_id != stock_id);
        Ok(before - comments.len())
    }

    async fn delete_all_comments(&self) -> Result<usize, DbError> {
        let mut comments = self.comments.write().await;
        let removed = comments.len();
        comments.clear();
        Ok(removed)
    }
}
