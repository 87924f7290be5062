// src/db/cql.rs
use super::{DbError, Repository};
use crate::models::{Comment, Stock};
use crate::votes::VoteLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{Session, SessionBuilder};
use std::collections::BTreeSet;

const STOCK_COLUMNS: &str = "id, symbol, name, description, exchange, currency, current_price, \
     previous_close, percent_change, likes, dislikes, liked_by, disliked_by, liked_by_anonymous, \
     disliked_by_anonymous, created_by, created_at, updated_at, price_updated_at";

const COMMENT_COLUMNS: &str = "id, stock_id, parent_id, content, is_anonymous, author_id, \
     anonymous_author_id, likes, dislikes, liked_by, disliked_by, liked_by_anonymous, \
     disliked_by_anonymous, created_at, updated_at";

pub async fn init(node: &str) -> Result<Session, DbError> {
    let session = SessionBuilder::new().known_node(node).build().await?;

    session.query("CREATE KEYSPACE IF NOT EXISTS stock_forum WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await?;
    session.query("CREATE TABLE IF NOT EXISTS stock_forum.stocks (id TEXT PRIMARY KEY, symbol TEXT, name TEXT, description TEXT, exchange TEXT, currency TEXT, current_price DOUBLE, previous_close DOUBLE, percent_change DOUBLE, likes INT, dislikes INT, liked_by SET<TEXT>, disliked_by SET<TEXT>, liked_by_anonymous SET<TEXT>, disliked_by_anonymous SET<TEXT>, created_by TEXT, created_at TIMESTAMP, updated_at TIMESTAMP, price_updated_at TIMESTAMP)", &[]).await?;
    session.query("CREATE INDEX IF NOT EXISTS stocks_symbol_idx ON stock_forum.stocks (symbol)", &[]).await?;
    session.query("CREATE TABLE IF NOT EXISTS stock_forum.comments (id TEXT PRIMARY KEY, stock_id TEXT, parent_id TEXT, content TEXT, is_anonymous BOOLEAN, author_id TEXT, anonymous_author_id TEXT, likes INT, dislikes INT, liked_by SET<TEXT>, disliked_by SET<TEXT>, liked_by_anonymous SET<TEXT>, disliked_by_anonymous SET<TEXT>, created_at TIMESTAMP, updated_at TIMESTAMP)", &[]).await?;
    session.query("CREATE INDEX IF NOT EXISTS comments_stock_idx ON stock_forum.comments (stock_id)", &[]).await?;
    session.query("CREATE INDEX IF NOT EXISTS comments_parent_idx ON stock_forum.comments (parent_id)", &[]).await?;

    info!("Successfully connected to ScyllaDB at {}.", node);
    Ok(session)
}

pub struct ScyllaRepository {
    session: Session,
}

impl ScyllaRepository {
    pub async fn connect(node: &str) -> Result<Self, DbError> {
        Ok(ScyllaRepository {
            session: init(node).await?,
        })
    }

    async fn select_stocks(&self, cql: &str, key: Option<&str>) -> Result<Vec<Stock>, DbError> {
        let result = match key {
            Some(key) => self.session.query(cql, (key,)).await?,
            None => self.session.query(cql, &[]).await?,
        };
        result
            .rows
            .unwrap_or_default()
            .iter()
            .map(stock_from_row)
            .collect()
    }

    async fn select_comments(&self, cql: &str, key: Option<&str>) -> Result<Vec<Comment>, DbError> {
        let result = match key {
            Some(key) => self.session.query(cql, (key,)).await?,
            None => self.session.query(cql, &[]).await?,
        };
        result
            .rows
            .unwrap_or_default()
            .iter()
            .map(comment_from_row)
            .collect()
    }

    async fn select_ids(&self, cql: &str, key: &str) -> Result<Vec<String>, DbError> {
        let rows = self.session.query(cql, (key,)).await?.rows.unwrap_or_default();
        Ok(rows.iter().filter_map(|row| text(row, 0)).collect())
    }
}

fn column(row: &Row, idx: usize) -> Option<&CqlValue> {
    row.columns.get(idx).and_then(|value| value.as_ref())
}

fn text(row: &Row, idx: usize) -> Option<String> {
    match column(row, idx)? {
        CqlValue::Text(s) | CqlValue::Ascii(s) => Some(s.clone()),
        _ => None,
    }
}

fn required_text(row: &Row, idx: usize, name: &str) -> Result<String, DbError> {
    text(row, idx).ok_or_else(|| {
        error!("Missing {} in row: {:?}", name, row.columns);
        DbError::Decode(format!("missing {}", name))
    })
}

fn double(row: &Row, idx: usize) -> Option<f64> {
    match column(row, idx)? {
        CqlValue::Double(v) => Some(*v),
        _ => None,
    }
}

fn counter(row: &Row, idx: usize) -> u32 {
    match column(row, idx) {
        Some(CqlValue::Int(v)) => (*v).max(0) as u32,
        Some(CqlValue::BigInt(v)) => (*v).max(0) as u32,
        _ => 0,
    }
}

fn boolean(row: &Row, idx: usize) -> bool {
    matches!(column(row, idx), Some(CqlValue::Boolean(true)))
}

fn text_set(row: &Row, idx: usize) -> BTreeSet<String> {
    match column(row, idx) {
        Some(CqlValue::Set(items)) | Some(CqlValue::List(items)) => items
            .iter()
            .filter_map(|item| match item {
                CqlValue::Text(s) | CqlValue::Ascii(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn timestamp(row: &Row, idx: usize) -> Option<DateTime<Utc>> {
    match column(row, idx)? {
        CqlValue::Timestamp(ts) => DateTime::<Utc>::from_timestamp_millis(ts.num_milliseconds()),
        _ => None,
    }
}

fn ledger(row: &Row, start: usize) -> VoteLedger {
    VoteLedger {
        likes: counter(row, start),
        dislikes: counter(row, start + 1),
        liked_by: text_set(row, start + 2),
        disliked_by: text_set(row, start + 3),
        liked_by_anonymous: text_set(row, start + 4),
        disliked_by_anonymous: text_set(row, start + 5),
    }
}

fn stock_from_row(row: &Row) -> Result<Stock, DbError> {
    Ok(Stock {
        id: required_text(row, 0, "stock id")?,
        symbol: required_text(row, 1, "symbol")?,
        name: text(row, 2).unwrap_or_default(),
        description: text(row, 3),
        exchange: text(row, 4),
        currency: text(row, 5),
        current_price: double(row, 6),
        previous_close: double(row, 7),
        percent_change: double(row, 8),
        votes: ledger(row, 9),
        created_by: text(row, 15).unwrap_or_default(),
        created_at: timestamp(row, 16).unwrap_or_default(),
        updated_at: timestamp(row, 17).unwrap_or_default(),
        price_updated_at: timestamp(row, 18),
    })
}

fn comment_from_row(row: &Row) -> Result<Comment, DbError> {
    Ok(Comment {
        id: required_text(row, 0, "comment id")?,
        stock_id: required_text(row, 1, "stock id")?,
        parent_comment: text(row, 2),
        content: text(row, 3).unwrap_or_default(),
        is_anonymous: boolean(row, 4),
        author: text(row, 5),
        anonymous_author_id: text(row, 6),
        votes: ledger(row, 7),
        created_at: timestamp(row, 13).unwrap_or_default(),
        updated_at: timestamp(row, 14).unwrap_or_default(),
    })
}

fn members(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

fn millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl Repository for ScyllaRepository {
    async fn list_stocks(&self) -> Result<Vec<Stock>, DbError> {
        let cql = format!("SELECT {} FROM stock_forum.stocks", STOCK_COLUMNS);
        let mut stocks = self.select_stocks(&cql, None).await?;
        stocks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stocks)
    }

    async fn find_stock(&self, id: &str) -> Result<Option<Stock>, DbError> {
        let cql = format!("SELECT {} FROM stock_forum.stocks WHERE id = ?", STOCK_COLUMNS);
        Ok(self.select_stocks(&cql, Some(id)).await?.into_iter().next())
    }

    async fn find_stock_by_symbol(&self, symbol: &str) -> Result<Option<Stock>, DbError> {
        let cql = format!(
            "SELECT {} FROM stock_forum.stocks WHERE symbol = ?",
            STOCK_COLUMNS
        );
        Ok(self.select_stocks(&cql, Some(symbol)).await?.into_iter().next())
    }

    async fn list_symbols(&self) -> Result<Vec<String>, DbError> {
        let rows = self
            .session
            .query("SELECT symbol FROM stock_forum.stocks", &[])
            .await?
            .rows
            .unwrap_or_default();
        let mut symbols: Vec<String> = rows.iter().filter_map(|row| text(row, 0)).collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn save_stock(&self, stock: &Stock) -> Result<(), DbError> {
        self.session
            .query(
                "INSERT INTO stock_forum.stocks (id, symbol, name, description, exchange, currency, current_price, previous_close, percent_change, created_by, created_at, updated_at, price_updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    stock.id.as_str(),
                    stock.symbol.as_str(),
                    stock.name.as_str(),
                    stock.description.as_deref(),
                    stock.exchange.as_deref(),
                    stock.currency.as_deref(),
                    stock.current_price,
                    stock.previous_close,
                    stock.percent_change,
                    stock.created_by.as_str(),
                    millis(&stock.created_at),
                    millis(&stock.updated_at),
                    stock.price_updated_at.as_ref().map(millis),
                ),
            )
            .await?;
        self.save_stock_votes(stock).await
    }

    async fn save_stock_votes(&self, stock: &Stock) -> Result<(), DbError> {
        let votes = &stock.votes;
        self.session
            .query(
                "UPDATE stock_forum.stocks SET likes = ?, dislikes = ?, liked_by = ?, disliked_by = ?, liked_by_anonymous = ?, disliked_by_anonymous = ? WHERE id = ?",
                (
                    votes.likes as i32,
                    votes.dislikes as i32,
                    members(&votes.liked_by),
                    members(&votes.disliked_by),
                    members(&votes.liked_by_anonymous),
                    members(&votes.disliked_by_anonymous),
                    stock.id.as_str(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn save_stock_price(&self, stock: &Stock) -> Result<(), DbError> {
        self.session
            .query(
                "UPDATE stock_forum.stocks SET current_price = ?, previous_close = ?, percent_change = ?, price_updated_at = ?, updated_at = ? WHERE id = ?",
                (
                    stock.current_price,
                    stock.previous_close,
                    stock.percent_change,
                    stock.price_updated_at.as_ref().map(millis),
                    millis(&stock.updated_at),
                    stock.id.as_str(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn delete_stock(&self, id: &str) -> Result<(), DbError> {
        self.session
            .query("DELETE FROM stock_forum.stocks WHERE id = ?", (id,))
            .await?;
        Ok(())
    }

    async fn list_comments(&self) -> Result<Vec<Comment>, DbError> {
        let cql = format!("SELECT {} FROM stock_forum.comments", COMMENT_COLUMNS);
        let mut comments = self.select_comments(&cql, None).await?;
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }

    async fn comments_for_stock(&self, stock_id: &str) -> Result<Vec<Comment>, DbError> {
        let cql = format!(
            "SELECT {} FROM stock_forum.comments WHERE stock_id = ?",
            COMMENT_COLUMNS
        );
        self.select_comments(&cql, Some(stock_id)).await
    }

    async fn find_comment(&self, id: &str) -> Result<Option<Comment>, DbError> {
        let cql = format!(
            "SELECT {} FROM stock_forum.comments WHERE id = ?",
            COMMENT_COLUMNS
        );
        Ok(self.select_comments(&cql, Some(id)).await?.into_iter().next())
    }

    async fn save_comment(&self, comment: &Comment) -> Result<(), DbError> {
        self.session
            .query(
                "INSERT INTO stock_forum.comments (id, stock_id, parent_id, content, is_anonymous, author_id, anonymous_author_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    comment.id.as_str(),
                    comment.stock_id.as_str(),
                    comment.parent_comment.as_deref(),
                    comment.content.as_str(),
                    comment.is_anonymous,
                    comment.author.as_deref(),
                    comment.anonymous_author_id.as_deref(),
                    millis(&comment.created_at),
                    millis(&comment.updated_at),
                ),
            )
            .await?;
        self.save_comment_votes(comment).await
    }

    async fn save_comment_votes(&self, comment: &Comment) -> Result<(), DbError> {
        let votes = &comment.votes;
        self.session
            .query(
                "UPDATE stock_forum.comments SET likes = ?, dislikes = ?, liked_by = ?, disliked_by = ?, liked_by_anonymous = ?, disliked_by_anonymous = ? WHERE id = ?",
                (
                    votes.likes as i32,
                    votes.dislikes as i32,
                    members(&votes.liked_by),
                    members(&votes.disliked_by),
                    members(&votes.liked_by_anonymous),
                    members(&votes.disliked_by_anonymous),
                    comment.id.as_str(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn delete_comment(&self, id: &str) -> Result<(), DbError> {
        self.session
            .query("DELETE FROM stock_forum.comments WHERE id = ?", (id,))
            .await?;
        Ok(())
    }

    async fn delete_replies(&self, parent_id: &str) -> Result<usize, DbError> {
        let ids = self
            .select_ids("SELECT id FROM stock_forum.comments WHERE parent_id = ?", parent_id)
            .await?;
        for id in &ids {
            self.delete_comment(id).await?;
        }
        Ok(ids.len())
    }

    async fn delete_comments_for_stock(&self, stock_id: &str) -> Result<usize, DbError> {
        let ids = self
            .select_ids("SELECT id FROM stock_forum.comments WHERE stock_id = ?", stock_id)
            .await?;
        for id in &ids {
            self.delete_comment(id).await?;
        }
        info!("Deleted {} comments for stock {}", ids.len(), stock_id);
        Ok(ids.len())
    }

    async fn delete_all_comments(&self) -> Result<usize, DbError> {
        let rows = self
            .session
            .query("SELECT id FROM stock_forum.comments", &[])
            .await?
            .rows
            .unwrap_or_default();
        self.session
            .query("TRUNCATE stock_forum.comments", &[])
            .await?;
        Ok(rows.len())
    }
}
