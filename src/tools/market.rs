//! Market data provider and stock tools
//!
//! Same shape as the calendar side: an HTTP provider behind the
//! `MarketDataProvider` seam, wrapped by tools that render plain text for the
//! model. Multi-ticker requests fan out in parallel.

use crate::error::AssistantError;
use crate::schema::{ParamSchema, ToolSpec};
use crate::tools::{require_str, require_str_list, Tool};
use crate::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const VALID_PERIODS: [&str; 7] = ["1d", "5d", "1mo", "3mo", "6mo", "1y", "5y"];

/// Current quote for one ticker
#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    pub name: String,
    pub price: f64,
    pub previous_close: f64,
    pub day_low: f64,
    pub day_high: f64,
    pub volume: u64,
}

/// One bar of price history
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryBar {
    pub date: String,
    pub open: f64,
    pub close: f64,
    pub volume: u64,
}

/// Company fundamentals
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyInfo {
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub market_cap: u64,
    pub pe_ratio: Option<f64>,
    pub week52_low: f64,
    pub week52_high: f64,
    #[serde(default)]
    pub summary: String,
}

/// External market data service
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quote(&self, ticker: &str) -> Result<Quote>;
    async fn history(&self, ticker: &str, period: &str) -> Result<Vec<HistoryBar>>;
    async fn company(&self, ticker: &str) -> Result<CompanyInfo>;
}

//
// ================= HTTP Client =================
//

pub struct MarketHttpClient {
    client: Client,
    base_url: String,
}

impl MarketHttpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AssistantError::Provider(format!("Market client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AssistantError::Provider(format!("Market API request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AssistantError::Provider(format!("Invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(AssistantError::Provider(format!(
                "Market API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl MarketDataProvider for MarketHttpClient {
    async fn quote(&self, ticker: &str) -> Result<Quote> {
        let body = self
            .post_json("/api/v1/quote", &json!({ "ticker": ticker }))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn history(&self, ticker: &str, period: &str) -> Result<Vec<HistoryBar>> {
        let body = self
            .post_json(
                "/api/v1/history",
                &json!({ "ticker": ticker, "period": period }),
            )
            .await?;
        let bars = body.get("bars").cloned().unwrap_or(Value::Array(vec![]));
        Ok(serde_json::from_value(bars)?)
    }

    async fn company(&self, ticker: &str) -> Result<CompanyInfo> {
        let body = self
            .post_json("/api/v1/company", &json!({ "ticker": ticker }))
            .await?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Stand-in when no market data endpoint is configured
pub struct UnconfiguredMarket;

#[async_trait]
impl MarketDataProvider for UnconfiguredMarket {
    async fn quote(&self, _ticker: &str) -> Result<Quote> {
        Err(unconfigured())
    }

    async fn history(&self, _ticker: &str, _period: &str) -> Result<Vec<HistoryBar>> {
        Err(unconfigured())
    }

    async fn company(&self, _ticker: &str) -> Result<CompanyInfo> {
        Err(unconfigured())
    }
}

fn unconfigured() -> AssistantError {
    AssistantError::Provider("MARKET_API_BASE_URL is not configured".to_string())
}

//
// ================= Tools =================
//

pub struct StockPriceTool {
    provider: Arc<dyn MarketDataProvider>,
}

impl StockPriceTool {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for StockPriceTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_stock_price",
            "Get current price and daily market data for one or more stock tickers. \
             All tickers are fetched in parallel.",
            Some(ParamSchema::object(
                vec![(
                    "tickers",
                    ParamSchema::array(
                        "Ticker symbols to quote",
                        ParamSchema::string("Ticker symbol, e.g. AAPL"),
                    ),
                )],
                vec!["tickers"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let tickers = require_str_list(args, "tickers")?;

        let fetches = tickers.iter().map(|ticker| async move {
            let quote = self.provider.quote(ticker).await?;
            let change = quote.price - quote.previous_close;
            Ok::<String, AssistantError>(format!(
                "{} ({})\nPrice: {} ({:+.2})\nDay Range: {} - {}\nVolume: {}",
                quote.name, ticker, quote.price, change, quote.day_low, quote.day_high, quote.volume
            ))
        });

        let blocks = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        Ok(blocks.join("\n\n---\n\n"))
    }
}

pub struct PriceHistoryTool {
    provider: Arc<dyn MarketDataProvider>,
}

impl PriceHistoryTool {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for PriceHistoryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_price_history",
            "Get historical price data for a ticker. period: 1d, 5d, 1mo, 3mo, 6mo, 1y, 5y.",
            Some(ParamSchema::object(
                vec![
                    ("ticker", ParamSchema::string("Ticker symbol")),
                    (
                        "period",
                        ParamSchema::string("History period: 1d, 5d, 1mo, 3mo, 6mo, 1y, 5y"),
                    ),
                ],
                vec!["ticker"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let ticker = require_str(args, "ticker")?;
        let period = args
            .get("period")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .unwrap_or("1mo");

        if !VALID_PERIODS.contains(&period) {
            return Err(AssistantError::InvalidToolInput(format!(
                "invalid period '{}', expected one of {}",
                period,
                VALID_PERIODS.join(", ")
            )));
        }

        let bars = self.provider.history(ticker, period).await?;
        if bars.is_empty() {
            return Ok(format!("No history found for {}", ticker));
        }

        let lines: Vec<String> = bars
            .iter()
            .map(|bar| {
                format!(
                    "{}: Open={:.2} Close={:.2} Vol={}",
                    bar.date, bar.open, bar.close, bar.volume
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

pub struct CompanyInfoTool {
    provider: Arc<dyn MarketDataProvider>,
}

impl CompanyInfoTool {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for CompanyInfoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_company_info",
            "Get company fundamentals (sector, market cap, P/E, description) for one \
             or more tickers. All tickers are fetched in parallel.",
            Some(ParamSchema::object(
                vec![(
                    "tickers",
                    ParamSchema::array(
                        "Ticker symbols to look up",
                        ParamSchema::string("Ticker symbol, e.g. AAPL"),
                    ),
                )],
                vec!["tickers"],
            )),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let tickers = require_str_list(args, "tickers")?;

        let fetches = tickers.iter().map(|ticker| async move {
            let info = self.provider.company(ticker).await?;
            let mut summary = info.summary;
            if summary.len() > 300 {
                summary.truncate(300);
                summary.push_str("...");
            }
            Ok::<String, AssistantError>(format!(
                "Name: {}\nSector: {}\nIndustry: {}\nMarket Cap: {}\nP/E Ratio: {}\n\
                 52w Range: {} - {}\nAbout: {}",
                info.name,
                info.sector,
                info.industry,
                info.market_cap,
                info.pe_ratio
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                info.week52_low,
                info.week52_high,
                summary
            ))
        });

        let blocks = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        Ok(blocks.join("\n\n---\n\n"))
    }
}
