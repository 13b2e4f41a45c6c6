//! Venue REST adapter (Bitget-style mix contracts).
//!
//! Thin collaborator behind the `ExchangeClient` trait: signed requests,
//! envelope unwrapping, and string-to-number parsing. The engine never
//! sees this module's wire structs.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::domain::PositionSide;
use crate::error::{QuorumError, Result};

use super::signing::{ApiCredentials, HmacSigner};
use super::traits::ExchangeClient;
use super::types::{
    AiLogAck, AiLogEntry, AssetBalance, Candle, DepthSnapshot, FundingRate, OrderAck,
    OrderRecord, PositionInfo, Ticker,
};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";

/// REST envelope: `code == "00000"` is success
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_data(self) -> Result<T> {
        if self.code != "00000" {
            return Err(QuorumError::Exchange {
                code: self.code,
                msg: self.msg,
            });
        }
        self.data.ok_or_else(|| QuorumError::Exchange {
            code: "empty".to_string(),
            msg: "response carried no data".to_string(),
        })
    }
}

fn parse_f64(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| QuorumError::Validation(format!("unparseable {}: \"{}\"", field, raw)))
}

fn parse_dec(raw: &str, field: &str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .map_err(|_| QuorumError::Validation(format!("unparseable {}: \"{}\"", field, raw)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    last_pr: String,
    #[serde(default)]
    bid_pr: Option<String>,
    #[serde(default)]
    ask_pr: Option<String>,
    #[serde(default)]
    base_volume: Option<String>,
    #[serde(default)]
    change24h: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    #[serde(default)]
    bids: Vec<(String, String)>,
    #[serde(default)]
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFunding {
    funding_rate: String,
    #[serde(default)]
    next_funding_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    margin_coin: String,
    account_equity: String,
    #[serde(default)]
    available: Option<String>,
    #[serde(default)]
    locked: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    hold_side: String,
    total: String,
    open_price_avg: String,
    #[serde(default)]
    unrealized_pl: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: String,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    price_avg: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    c_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderAck {
    order_id: String,
    #[serde(default)]
    client_oid: Option<String>,
}

/// Signed REST client for the venue's mix-contract API
pub struct BitgetClient {
    http: Client,
    base_url: String,
    signer: Option<HmacSigner>,
    dry_run: bool,
}

impl BitgetClient {
    pub fn new(config: &ExchangeConfig, dry_run: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let signer = if config.api_key.is_empty() {
            None
        } else {
            Some(HmacSigner::new(ApiCredentials::new(
                config.api_key.clone(),
                config.api_secret.clone(),
                config.passphrase.clone(),
            )))
        };

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            signer,
            dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn signer(&self) -> Result<&HmacSigner> {
        self.signer
            .as_ref()
            .ok_or_else(|| QuorumError::Validation("private endpoint requires credentials".into()))
    }

    async fn get_public<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(url = %url, "exchange GET");
        let response: ApiResponse<T> = self.http.get(&url).send().await?.json().await?;
        response.into_data()
    }

    async fn get_signed<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let headers = self.signer()?.build_headers(
            Utc::now().timestamp_millis(),
            "GET",
            path_and_query,
            None,
        )?;
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(url = %url, "exchange signed GET");
        let response: ApiResponse<T> = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await?
            .json()
            .await?;
        response.into_data()
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let body_str = body.to_string();
        let headers = self.signer()?.build_headers(
            Utc::now().timestamp_millis(),
            "POST",
            path,
            Some(&body_str),
        )?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "exchange signed POST");
        let response: ApiResponse<T> = self
            .http
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?
            .json()
            .await?;
        response.into_data()
    }
}

#[async_trait]
impl ExchangeClient for BitgetClient {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let rows: Vec<RawTicker> = self
            .get_public(&format!(
                "/api/v2/mix/market/ticker?productType={}&symbol={}",
                PRODUCT_TYPE, symbol
            ))
            .await?;
        let raw = rows
            .into_iter()
            .next()
            .ok_or_else(|| QuorumError::MarketDataUnavailable(format!("no ticker for {}", symbol)))?;

        Ok(Ticker {
            symbol: raw.symbol,
            last_price: parse_f64(&raw.last_pr, "lastPr")?,
            bid: raw.bid_pr.as_deref().and_then(|v| v.parse().ok()),
            ask: raw.ask_pr.as_deref().and_then(|v| v.parse().ok()),
            volume_24h: raw.base_volume.as_deref().and_then(|v| v.parse().ok()),
            change_24h: raw.change24h.as_deref().and_then(|v| v.parse().ok()),
        })
    }

    async fn get_depth(&self, symbol: &str) -> Result<DepthSnapshot> {
        let raw: RawDepth = self
            .get_public(&format!(
                "/api/v2/mix/market/merge-depth?productType={}&symbol={}&limit=20",
                PRODUCT_TYPE, symbol
            ))
            .await?;

        let parse_side = |rows: Vec<(String, String)>| -> Vec<(f64, f64)> {
            rows.into_iter()
                .filter_map(|(p, q)| Some((p.parse().ok()?, q.parse().ok()?)))
                .collect()
        };

        Ok(DepthSnapshot {
            bids: parse_side(raw.bids),
            asks: parse_side(raw.asks),
        })
    }

    async fn get_candles(
        &self,
        symbol: &str,
        granularity: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_public(&format!(
                "/api/v2/mix/market/candles?productType={}&symbol={}&granularity={}&limit={}",
                PRODUCT_TYPE, symbol, granularity, limit
            ))
            .await?;
        Ok(rows.iter().filter_map(|row| Candle::from_row(row)).collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        let rows: Vec<RawFunding> = self
            .get_public(&format!(
                "/api/v2/mix/market/current-fund-rate?productType={}&symbol={}",
                PRODUCT_TYPE, symbol
            ))
            .await?;
        let raw = rows.into_iter().next().ok_or_else(|| {
            QuorumError::MarketDataUnavailable(format!("no funding rate for {}", symbol))
        })?;

        Ok(FundingRate {
            funding_rate: parse_f64(&raw.funding_rate, "fundingRate")?,
            next_funding_time: raw.next_funding_time.as_deref().and_then(|v| v.parse().ok()),
        })
    }

    async fn get_assets(&self) -> Result<Vec<AssetBalance>> {
        let rows: Vec<RawAccount> = self
            .get_signed(&format!(
                "/api/v2/mix/account/accounts?productType={}",
                PRODUCT_TYPE
            ))
            .await?;

        rows.into_iter()
            .map(|raw| {
                Ok(AssetBalance {
                    coin_name: raw.margin_coin,
                    equity: parse_dec(&raw.account_equity, "accountEquity")?,
                    available: raw
                        .available
                        .as_deref()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(Decimal::ZERO),
                    frozen: raw.locked.as_deref().and_then(|v| v.parse().ok()),
                })
            })
            .collect()
    }

    async fn get_positions(&self) -> Result<Vec<PositionInfo>> {
        let rows: Vec<RawPosition> = self
            .get_signed(&format!(
                "/api/v2/mix/position/all-position?productType={}&marginCoin={}",
                PRODUCT_TYPE, MARGIN_COIN
            ))
            .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for raw in rows {
            let hold_side = match raw.hold_side.as_str() {
                "long" => PositionSide::Long,
                "short" => PositionSide::Short,
                other => {
                    warn!(symbol = %raw.symbol, side = other, "skipping position with unknown side");
                    continue;
                }
            };
            positions.push(PositionInfo {
                symbol: raw.symbol,
                hold_side,
                total: parse_dec(&raw.total, "total")?,
                average_open_price: parse_dec(&raw.open_price_avg, "openPriceAvg")?,
                unrealized_pl: raw
                    .unrealized_pl
                    .as_deref()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(Decimal::ZERO),
            });
        }
        Ok(positions)
    }

    async fn get_order_history(&self, symbol: &str) -> Result<Vec<OrderRecord>> {
        let rows: Vec<RawOrder> = self
            .get_signed(&format!(
                "/api/v2/mix/order/orders-history?productType={}&symbol={}",
                PRODUCT_TYPE, symbol
            ))
            .await?;

        Ok(rows
            .into_iter()
            .map(|raw| OrderRecord {
                order_id: raw.order_id,
                side: raw.side,
                size: raw.size.as_deref().and_then(|v| v.parse().ok()),
                price_avg: raw.price_avg.as_deref().and_then(|v| v.parse().ok()),
                state: raw.state,
                c_time: raw.c_time.as_deref().and_then(|v| v.parse().ok()),
            })
            .collect())
    }

    async fn place_order(&self, symbol: &str, side_code: u8, size: Decimal) -> Result<OrderAck> {
        if !(1..=4).contains(&side_code) {
            return Err(QuorumError::Validation(format!(
                "invalid side code {}",
                side_code
            )));
        }
        if size <= Decimal::ZERO {
            return Err(QuorumError::Validation(format!(
                "order size must be positive, got {}",
                size
            )));
        }

        if self.dry_run {
            debug!(symbol, side_code, %size, "dry-run order suppressed");
            return Ok(OrderAck {
                order_id: format!("dry-{}", Utc::now().timestamp_millis()),
                client_oid: None,
            });
        }

        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "marginMode": "crossed",
            "side": side_code,
            "orderType": "market",
            "size": size.to_string(),
        });

        let raw: RawOrderAck = self
            .post_signed("/api/v2/mix/order/place-order", &body)
            .await?;

        Ok(OrderAck {
            order_id: raw.order_id,
            client_oid: raw.client_oid,
        })
    }

    async fn upload_ai_log(&self, entry: &AiLogEntry) -> Result<AiLogAck> {
        let body = json!({
            "stage": entry.stage,
            "model": entry.model,
            "input": entry.input,
            "output": entry.output,
            "explanation": entry.explanation,
        });

        if self.signer.is_none() || self.dry_run {
            return Ok(AiLogAck {
                code: "00000".to_string(),
                msg: "skipped".to_string(),
                data: None,
            });
        }

        let body_str = body.to_string();
        let path = "/api/v1/ai/upload-log";
        let headers =
            self.signer()?
                .build_headers(Utc::now().timestamp_millis(), "POST", path, Some(&body_str))?;
        let url = format!("{}{}", self.base_url, path);

        let ack: AiLogAck = self
            .http
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?
            .json()
            .await?;
        Ok(ack)
    }
}
