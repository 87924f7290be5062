// src/quotes.rs
use async_trait::async_trait;
use log::info;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

const BASE_URL: &str = "https://api.twelvedata.com/quote";

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limit reached: {0}")]
    RateLimited(String),

    #[error("quote API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("invalid quote: {0}")]
    Invalid(String),
}

/// Latest quote for one symbol, already parsed into numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub name: String,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub close: f64,
    pub previous_close: Option<f64>,
    pub percent_change: Option<f64>,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError>;
}

// Twelve Data returns every number as a string and reports errors in-band.
#[derive(Debug, Deserialize)]
struct TwelveDataQuote {
    symbol: Option<String>,
    name: Option<String>,
    exchange: Option<String>,
    currency: Option<String>,
    close: Option<String>,
    previous_close: Option<String>,
    percent_change: Option<String>,
    status: Option<String>,
    code: Option<u16>,
    message: Option<String>,
}

fn number(field: &Option<String>) -> Option<f64> {
    field
        .as_deref()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl TwelveDataQuote {
    fn into_quote(self, requested: &str) -> Result<Quote, QuoteError> {
        if self.status.as_deref() == Some("error") {
            let message = self
                .message
                .unwrap_or_else(|| "API error".to_string());
            return match self.code {
                Some(429) => Err(QuoteError::RateLimited(message)),
                code => Err(QuoteError::Api {
                    code: code.unwrap_or(400),
                    message,
                }),
            };
        }

        let close = number(&self.close)
            .ok_or_else(|| QuoteError::Invalid(format!("no close price for {}", requested)))?;
        let previous_close = number(&self.previous_close);
        let percent_change = number(&self.percent_change).or_else(|| {
            previous_close
                .filter(|prev| *prev != 0.0)
                .map(|prev| round2((close - prev) / prev * 100.0))
        });
        let name = self
            .name
            .or(self.symbol)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| requested.to_string());

        Ok(Quote {
            name,
            exchange: self.exchange,
            currency: self.currency,
            close,
            previous_close,
            percent_change,
        })
    }
}

/// Client for the Twelve Data `/quote` endpoint.
pub struct TwelveDataClient {
    client: Client,
    api_key: Arc<String>,
    base_url: String,
}

impl TwelveDataClient {
    pub fn new(client: Client, api_key: Arc<String>) -> Self {
        TwelveDataClient {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl QuoteProvider for TwelveDataClient {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        info!("Fetching quote for {}", symbol);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("symbol", symbol), ("apikey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteError::RateLimited(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return Err(QuoteError::Api {
                code: status.as_u16(),
                message,
            });
        }

        response.json::<TwelveDataQuote>().await?.into_quote(symbol)
    }
}
