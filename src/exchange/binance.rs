//! Binance USDⓈ-M futures REST connector.
//!
//! Usable on either leg of the hedge. Maker orders are GTC limits priced at
//! market ± spread; taker and market orders are MARKET orders sized from the
//! current price. Order ids handed to the engine are `SYMBOL:orderId` so status
//! queries can be routed without extra state.

use super::traits::{MakerVenue, TakerVenue};
use super::types::*;
use crate::config::{TradingConfig, VenueConfig};
use crate::utils::decimal::{round_down_to_precision, safe_div};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

#[derive(Debug, Clone, Deserialize)]
struct TickerPrice {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    status: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    avg_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    cum_quote: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Signed REST client for one Binance futures account.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    quote_asset: String,
    quantity_precision: HashMap<String, u32>,
    price_precision: u32,
    applied_leverage: Mutex<HashMap<String, u32>>,
}

impl BinanceClient {
    /// Create a client for one venue leg.
    pub fn new(venue: &VenueConfig, trading: &TradingConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = match &venue.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if venue.testnet => FUTURES_TESTNET_URL.to_string(),
            None => FUTURES_BASE_URL.to_string(),
        };

        Ok(Self {
            http,
            api_key: venue.api_key.clone(),
            secret_key: venue.secret_key.clone(),
            base_url,
            quote_asset: trading.quote_asset.clone(),
            quantity_precision: trading
                .instruments
                .iter()
                .map(|i| (i.symbol.clone(), i.quantity_precision))
                .collect(),
            price_precision: trading.price_precision,
            applied_leverage: Mutex::new(HashMap::new()),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| anyhow!("Invalid secret key: {}", e))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn timestamp() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn venue_symbol(&self, symbol: &str) -> String {
        format!("{}{}", symbol, self.quote_asset)
    }

    fn quantity_for(&self, symbol: &str, notional: Decimal, price: Decimal) -> Result<Decimal> {
        let precision = self.quantity_precision.get(symbol).copied().unwrap_or(3);
        let quantity = round_down_to_precision(safe_div(notional, price), precision);
        anyhow::ensure!(
            quantity > Decimal::ZERO,
            "notional {} is below the minimum quantity for {}",
            notional,
            symbol
        );
        Ok(quantity)
    }

    fn encode_order_id(response: &OrderResponse) -> String {
        format!("{}:{}", response.symbol, response.order_id)
    }

    fn decode_order_id(order_id: &str) -> Result<(&str, &str)> {
        order_id
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed order id {}", order_id))
    }

    fn map_status(status: &str) -> Result<OrderStatus> {
        match status {
            "NEW" => Ok(OrderStatus::Pending),
            "PARTIALLY_FILLED" => Ok(OrderStatus::Partial),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" | "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Cancelled),
            other => bail!("Unknown order status {}", other),
        }
    }

    fn signed_url(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let mut query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if !query_string.is_empty() {
            query_string.push('&');
        }
        query_string.push_str(&format!("timestamp={}", Self::timestamp()));

        let signature = self.sign(&query_string)?;
        Ok(format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        ))
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", what))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
                bail!("{} failed: {} ({})", what, err.msg, err.code);
            }
            bail!("{} failed with HTTP {}: {}", what, status, body);
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse {} response", what))
    }

    /// Get the latest traded price.
    #[instrument(skip(self))]
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!(
            "{}/fapi/v1/ticker/price?symbol={}",
            self.base_url,
            self.venue_symbol(symbol)
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker price")?;

        let ticker: TickerPrice = Self::parse(response, "ticker price").await?;
        Ok(ticker.price)
    }

    /// Set leverage for a symbol once per process.
    #[instrument(skip(self))]
    pub async fn ensure_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        if self.applied_leverage.lock().get(symbol) == Some(&leverage) {
            return Ok(());
        }

        let url = self.signed_url(
            "/fapi/v1/leverage",
            &[
                ("symbol", self.venue_symbol(symbol)),
                ("leverage", leverage.to_string()),
            ],
        )?;

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to set leverage")?;
        let _: serde_json::Value = Self::parse(response, "set leverage").await?;

        self.applied_leverage.lock().insert(symbol.to_string(), leverage);
        info!(%symbol, leverage, "Leverage set");
        Ok(())
    }

    async fn submit_order(&self, params: &[(&str, String)]) -> Result<OrderResponse> {
        let url = self.signed_url("/fapi/v1/order", params)?;
        debug!(?params, "Placing futures order");

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to place order")?;

        Self::parse(response, "place order").await
    }

    async fn market(&self, symbol: &str, side: OrderSide, notional: Decimal) -> Result<Fill> {
        let reference = self.get_price(symbol).await?;
        let quantity = self.quantity_for(symbol, notional, reference)?;

        let response = self
            .submit_order(&[
                ("symbol", self.venue_symbol(symbol)),
                ("side", side.as_str().to_string()),
                ("type", "MARKET".to_string()),
                ("quantity", quantity.to_string()),
            ])
            .await?;

        let price = response
            .avg_price
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(reference);

        info!(
            order_id = response.order_id,
            %symbol,
            %side,
            %quantity,
            %price,
            "Market order executed"
        );

        Ok(Fill {
            order_id: Self::encode_order_id(&response),
            price,
        })
    }

    async fn limit(
        &self,
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> Result<MakerOrderAck> {
        let market = self.get_price(symbol).await?;
        let offset = spread_percent / dec!(100);
        let price = match side {
            OrderSide::Buy => market * (Decimal::ONE - offset),
            OrderSide::Sell => market * (Decimal::ONE + offset),
        }
        .round_dp(self.price_precision);
        let quantity = self.quantity_for(symbol, notional, price)?;

        let response = self
            .submit_order(&[
                ("symbol", self.venue_symbol(symbol)),
                ("side", side.as_str().to_string()),
                ("type", "LIMIT".to_string()),
                ("timeInForce", "GTC".to_string()),
                ("quantity", quantity.to_string()),
                ("price", price.to_string()),
            ])
            .await?;

        info!(
            order_id = response.order_id,
            %symbol,
            %side,
            %quantity,
            %price,
            "Limit order placed"
        );

        Ok(MakerOrderAck {
            order_id: Self::encode_order_id(&response),
            price,
        })
    }

    /// Query an order by the id returned from placement.
    #[instrument(skip(self))]
    pub async fn query_order(&self, order_id: &str) -> Result<OrderState> {
        let (venue_symbol, id) = Self::decode_order_id(order_id)?;
        let url = self.signed_url(
            "/fapi/v1/order",
            &[("symbol", venue_symbol.to_string()), ("orderId", id.to_string())],
        )?;

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to query order")?;

        let order: OrderResponse = Self::parse(response, "query order").await?;
        Ok(OrderState {
            status: Self::map_status(&order.status)?,
            filled_size: order.cum_quote.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl TakerVenue for BinanceClient {
    async fn place_taker_long(&self, symbol: &str, notional: Decimal, leverage: u32) -> Result<Fill> {
        self.ensure_leverage(symbol, leverage).await?;
        self.market(symbol, OrderSide::Buy, notional).await
    }

    async fn place_taker_short(&self, symbol: &str, notional: Decimal, leverage: u32) -> Result<Fill> {
        self.ensure_leverage(symbol, leverage).await?;
        self.market(symbol, OrderSide::Sell, notional).await
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState> {
        self.query_order(order_id).await
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        self.get_price(symbol).await
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, notional: Decimal) -> Result<String> {
        Ok(self.market(symbol, side, notional).await?.order_id)
    }
}

#[async_trait]
impl MakerVenue for BinanceClient {
    async fn place_maker_long(
        &self,
        symbol: &str,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> Result<MakerOrderAck> {
        self.limit(symbol, OrderSide::Buy, notional, spread_percent).await
    }

    async fn place_maker_short(
        &self,
        symbol: &str,
        notional: Decimal,
        spread_percent: Decimal,
    ) -> Result<MakerOrderAck> {
        self.limit(symbol, OrderSide::Sell, notional, spread_percent).await
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState> {
        self.query_order(order_id).await
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        self.get_price(symbol).await
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, notional: Decimal) -> Result<String> {
        Ok(self.market(symbol, side, notional).await?.order_id)
    }
}
