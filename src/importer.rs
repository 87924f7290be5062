// src/importer.rs
use crate::config::ImportSettings;
use crate::db::{DbError, Repository};
use crate::models::{normalize_symbol, Stock};
use crate::quotes::{Quote, QuoteError, QuoteProvider};
use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("stock {0} not found")]
    UnknownSymbol(String),
}

/// A queued request to import symbols on behalf of `owner`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportJob {
    pub symbols: Vec<String>,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Imported,
    Updated,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFailure {
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub failures: Vec<SymbolFailure>,
}

impl ImportReport {
    fn record(&mut self, outcomes: Vec<(String, Outcome)>) {
        for (symbol, outcome) in outcomes {
            match outcome {
                Outcome::Imported => self.imported_count += 1,
                Outcome::Updated => self.updated_count += 1,
                Outcome::Skipped => self.skipped_count += 1,
                Outcome::Failed(reason) => {
                    self.error_count += 1;
                    self.failures.push(SymbolFailure { symbol, reason });
                }
            }
        }
    }
}

fn stock_from_quote(symbol: &str, quote: &Quote, owner: &str) -> Stock {
    let mut stock = Stock::new(symbol, &quote.name, owner);
    stock.description = Some(format!(
        "{} is traded on {} in {}.",
        quote.name,
        quote.exchange.as_deref().unwrap_or("the stock market"),
        quote.currency.as_deref().unwrap_or("USD"),
    ));
    stock.exchange = quote.exchange.clone();
    stock.currency = quote.currency.clone();
    stock.current_price = Some(quote.close);
    stock.previous_close = quote.previous_close;
    stock.percent_change = Some(quote.percent_change.unwrap_or(0.0));
    stock.price_updated_at = Some(stock.created_at);
    stock
}

fn apply_quote(stock: &mut Stock, quote: &Quote) {
    let now = Utc::now();
    stock.current_price = Some(quote.close);
    if quote.previous_close.is_some() {
        stock.previous_close = quote.previous_close;
    }
    if quote.percent_change.is_some() {
        stock.percent_change = quote.percent_change;
    }
    stock.price_updated_at = Some(now);
    stock.updated_at = now;
}

/// Pulls quotes in fixed-size batches with a fixed pause between batches.
pub struct Importer {
    provider: Arc<dyn QuoteProvider>,
    repo: Arc<dyn Repository>,
    settings: ImportSettings,
}

impl Importer {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        repo: Arc<dyn Repository>,
        settings: ImportSettings,
    ) -> Self {
        Importer {
            provider,
            repo,
            settings,
        }
    }

    /// Splits `symbols` into the ones not stored yet and a count of the rest.
    pub async fn pending_symbols(&self, symbols: &[String]) -> Result<(Vec<String>, usize), DbError> {
        let existing = self.repo.list_symbols().await?;
        let mut pending = Vec::new();
        let mut skipped = 0;
        for symbol in symbols.iter().map(|s| normalize_symbol(s)) {
            if existing.binary_search(&symbol).is_ok() || pending.contains(&symbol) {
                skipped += 1;
            } else {
                pending.push(symbol);
            }
        }
        Ok((pending, skipped))
    }

    pub async fn import_symbols(&self, symbols: &[String], owner: &str) -> Result<ImportReport, DbError> {
        let (pending, skipped) = self.pending_symbols(symbols).await?;
        let mut report = ImportReport {
            skipped_count: skipped,
            ..ImportReport::default()
        };
        if pending.is_empty() {
            info!("All {} symbols are already imported", symbols.len());
            return Ok(report);
        }

        info!(
            "Importing {} symbols ({} already present)",
            pending.len(),
            skipped
        );
        let outcomes = self
            .run_batches(&pending, |symbol| self.import_one(symbol, owner))
            .await;
        report.record(outcomes);
        info!(
            "Import finished: {} imported, {} skipped, {} errors",
            report.imported_count, report.skipped_count, report.error_count
        );
        Ok(report)
    }

    pub async fn refresh_all(&self) -> Result<ImportReport, DbError> {
        let symbols = self.repo.list_symbols().await?;
        Ok(self.refresh_prices(symbols).await)
    }

    pub async fn refresh_prices(&self, mut symbols: Vec<String>) -> ImportReport {
        info!("Found {} stock symbols to update.", symbols.len());
        if symbols.len() > self.settings.daily_limit {
            warn!(
                "{} symbols exceed the daily limit of {}; only the first {} will be refreshed",
                symbols.len(),
                self.settings.daily_limit,
                self.settings.daily_limit
            );
            symbols.truncate(self.settings.daily_limit);
        }

        let outcomes = self
            .run_batches(&symbols, |symbol| async move {
                match self.refresh_one(symbol, true).await {
                    Ok(_) => Outcome::Updated,
                    Err(e) => {
                        error!("Error updating data for {}: {}", symbol, e);
                        Outcome::Failed(e.to_string())
                    }
                }
            })
            .await;

        let mut report = ImportReport::default();
        report.record(outcomes);
        info!(
            "Price update finished: {} updated, {} errors",
            report.updated_count, report.error_count
        );
        report
    }

    /// Refreshes one symbol right away, without the rate-limit back-off.
    pub async fn refresh_symbol(&self, symbol: &str) -> Result<Stock, ImportError> {
        self.refresh_one(&normalize_symbol(symbol), false).await
    }

    async fn run_batches<'a, F, Fut>(&self, symbols: &'a [String], process: F) -> Vec<(String, Outcome)>
    where
        F: Fn(&'a str) -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let batch_size = self.settings.batch_size.max(1);
        let total = (symbols.len() + batch_size - 1) / batch_size;
        let mut outcomes = Vec::with_capacity(symbols.len());

        for (i, batch) in symbols.chunks(batch_size).enumerate() {
            info!(
                "Processing batch {}/{} with {} symbols...",
                i + 1,
                total,
                batch.len()
            );
            let results = join_all(batch.iter().map(|symbol| process(symbol.as_str()))).await;
            let succeeded = results
                .iter()
                .filter(|o| !matches!(o, Outcome::Failed(_)))
                .count();
            info!(
                "Batch {} complete: {}/{} succeeded.",
                i + 1,
                succeeded,
                batch.len()
            );
            outcomes.extend(batch.iter().cloned().zip(results));

            if i + 1 < total {
                info!(
                    "Waiting for rate limit ({} seconds)...",
                    self.settings.batch_delay.as_secs()
                );
                time::sleep(self.settings.batch_delay).await;
            }
        }
        outcomes
    }

    async fn fetch(&self, symbol: &str, backoff: bool) -> Result<Quote, QuoteError> {
        match self.provider.fetch_quote(symbol).await {
            Err(QuoteError::RateLimited(message)) if backoff => {
                warn!(
                    "Rate limit hit for {}, waiting {} seconds: {}",
                    symbol,
                    self.settings.rate_limit_backoff.as_secs(),
                    message
                );
                time::sleep(self.settings.rate_limit_backoff).await;
                Err(QuoteError::RateLimited(message))
            }
            other => other,
        }
    }

    async fn import_one(&self, symbol: &str, owner: &str) -> Outcome {
        match self.try_import(symbol, owner).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error importing {}: {}", symbol, e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn try_import(&self, symbol: &str, owner: &str) -> Result<Outcome, ImportError> {
        if self.repo.find_stock_by_symbol(symbol).await?.is_some() {
            return Ok(Outcome::Skipped);
        }
        let quote = self.fetch(symbol, true).await?;
        let stock = stock_from_quote(symbol, &quote, owner);
        self.repo.save_stock(&stock).await?;
        info!("Imported {} at {}", stock.symbol, quote.close);
        Ok(Outcome::Imported)
    }

    async fn refresh_one(&self, symbol: &str, backoff: bool) -> Result<Stock, ImportError> {
        let mut stock = self
            .repo
            .find_stock_by_symbol(symbol)
            .await?
            .ok_or_else(|| ImportError::UnknownSymbol(symbol.to_string()))?;
        let quote = self.fetch(symbol, backoff).await?;
        apply_quote(&mut stock, &quote);
        self.repo.save_stock_price(&stock).await?;
        info!("{}: updated to {}", symbol, quote.close);
        Ok(stock)
    }
}

/// Runs queued import jobs one after another.
pub async fn worker(importer: Arc<Importer>, mut rx: mpsc::Receiver<ImportJob>) {
    while let Some(job) = rx.recv().await {
        match importer.import_symbols(&job.symbols, &job.owner).await {
            Ok(report) => info!(
                "Import job for {} finished: {} imported, {} errors",
                job.owner, report.imported_count, report.error_count
            ),
            Err(e) => error!("Import job for {} failed: {}", job.owner, e),
        }
    }
}

/// Refreshes every stored symbol each `every`, starting one period from now.
pub async fn refresh_loop(importer: Arc<Importer>, every: Duration) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = importer.refresh_all().await {
            error!("Scheduled price refresh failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct ScriptedProvider {
        calls: Mutex<Vec<(String, Instant)>>,
        rate_limited: HashSet<String>,
        missing_change: HashSet<String>,
    }

    impl ScriptedProvider {
        fn new(rate_limited: &[&str]) -> Self {
            ScriptedProvider {
                calls: Mutex::new(Vec::new()),
                rate_limited: rate_limited.iter().map(|s| s.to_string()).collect(),
                missing_change: HashSet::new(),
            }
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }

        fn called(&self) -> Vec<String> {
            self.calls().into_iter().map(|(s, _)| s).collect()
        }
    }

    #[async_trait]
    impl QuoteProvider for ScriptedProvider {
        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), Instant::now()));
            if self.rate_limited.contains(symbol) {
                return Err(QuoteError::RateLimited("429".to_string()));
            }
            Ok(Quote {
                name: format!("{} Corp", symbol),
                exchange: Some("NYSE".to_string()),
                currency: Some("USD".to_string()),
                close: 101.0,
                previous_close: Some(100.0),
                percent_change: if self.missing_change.contains(symbol) {
                    None
                } else {
                    Some(1.0)
                },
            })
        }
    }

    fn settings(batch_size: usize) -> ImportSettings {
        ImportSettings {
            batch_size,
            batch_delay: Duration::from_secs(60),
            rate_limit_backoff: Duration::from_secs(60),
            daily_limit: 800,
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn importer(
        provider: Arc<ScriptedProvider>,
        repo: Arc<MemoryRepository>,
        settings: ImportSettings,
    ) -> Importer {
        Importer::new(provider, repo, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn batches_wait_between_them_and_survive_rate_limits() {
        let provider = Arc::new(ScriptedProvider::new(&["Y"]));
        let repo = Arc::new(MemoryRepository::new());
        let importer = importer(provider.clone(), repo.clone(), settings(2));

        let started = Instant::now();
        let report = importer
            .import_symbols(&symbols(&["X", "Y", "Z"]), "admin")
            .await
            .unwrap();

        assert_eq!(report.imported_count, 2);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.failures[0].symbol, "Y");

        let calls = provider.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1, started);
        assert_eq!(calls[1].1, started);
        assert_eq!(calls[2].0, "Z");
        // Y's back-off holds the first batch, then the inter-batch delay runs.
        assert_eq!(calls[2].1 - started, Duration::from_secs(120));

        let z = repo.find_stock_by_symbol("Z").await.unwrap().unwrap();
        assert_eq!(z.created_by, "admin");
        assert_eq!(
            z.description.as_deref(),
            Some("Z Corp is traded on NYSE in USD.")
        );
        assert!(repo.find_stock_by_symbol("Y").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn no_delay_after_the_last_batch() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let repo = Arc::new(MemoryRepository::new());
        let importer = importer(provider, repo, settings(2));

        let started = Instant::now();
        importer
            .import_symbols(&symbols(&["A", "B", "C", "D"]), "admin")
            .await
            .unwrap();
        assert_eq!(Instant::now() - started, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn existing_symbols_are_skipped_without_fetching() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let repo = Arc::new(MemoryRepository::new());
        repo.save_stock(&Stock::new("X", "Existing", "someone"))
            .await
            .unwrap();
        let importer = importer(provider.clone(), repo.clone(), settings(8));

        let report = importer
            .import_symbols(&symbols(&["x", "Y", "Y"]), "admin")
            .await
            .unwrap();

        assert_eq!(report.imported_count, 1);
        assert_eq!(report.skipped_count, 2);
        assert_eq!(provider.called(), vec!["Y".to_string()]);
        let x = repo.find_stock_by_symbol("X").await.unwrap().unwrap();
        assert_eq!(x.name, "Existing");
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_updates_prices_and_keeps_votes() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let repo = Arc::new(MemoryRepository::new());
        let mut stock = Stock::new("AAA", "Triple A", "owner");
        stock.votes.likes = 4;
        stock.percent_change = Some(-3.0);
        repo.save_stock(&stock).await.unwrap();
        let importer = importer(provider, repo.clone(), settings(8));

        let report = importer.refresh_all().await.unwrap();
        assert_eq!(report.updated_count, 1);

        let stored = repo.find_stock(&stock.id).await.unwrap().unwrap();
        assert_eq!(stored.current_price, Some(101.0));
        assert_eq!(stored.percent_change, Some(1.0));
        assert_eq!(stored.votes.likes, 4);
        assert!(stored.price_updated_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_old_change_when_quote_has_none() {
        let mut provider = ScriptedProvider::new(&[]);
        provider.missing_change.insert("AAA".to_string());
        let repo = Arc::new(MemoryRepository::new());
        let mut stock = Stock::new("AAA", "Triple A", "owner");
        stock.percent_change = Some(-3.0);
        repo.save_stock(&stock).await.unwrap();
        let importer = importer(Arc::new(provider), repo, settings(8));

        let refreshed = importer.refresh_symbol("aaa").await.unwrap();
        assert_eq!(refreshed.current_price, Some(101.0));
        assert_eq!(refreshed.percent_change, Some(-3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_respects_daily_limit_and_unknown_symbols() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let repo = Arc::new(MemoryRepository::new());
        let mut limited = settings(8);
        limited.daily_limit = 2;
        let importer = importer(provider.clone(), repo, limited);

        let report = importer
            .refresh_prices(symbols(&["A", "B", "C"]))
            .await;
        assert_eq!(report.error_count, 2);
        assert!(provider.called().is_empty());

        let err = importer.refresh_symbol("NOPE").await.unwrap_err();
        assert!(matches!(err, ImportError::UnknownSymbol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn single_refresh_does_not_back_off() {
        let provider = Arc::new(ScriptedProvider::new(&["AAA"]));
        let repo = Arc::new(MemoryRepository::new());
        repo.save_stock(&Stock::new("AAA", "Triple A", "owner"))
            .await
            .unwrap();
        let importer = importer(provider, repo, settings(8));

        let started = Instant::now();
        let err = importer.refresh_symbol("AAA").await.unwrap_err();
        assert!(matches!(err, ImportError::Quote(QuoteError::RateLimited(_))));
        assert_eq!(Instant::now(), started);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_drains_queued_jobs() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let repo = Arc::new(MemoryRepository::new());
        let importer = Arc::new(importer(provider, repo.clone(), settings(8)));
        let (tx, rx) = mpsc::channel(4);

        tx.send(ImportJob {
            symbols: symbols(&["MMM", "AOS"]),
            owner: "admin".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        worker(importer, rx).await;

        assert_eq!(repo.list_symbols().await.unwrap(), symbols(&["AOS", "MMM"]));
    }
}
