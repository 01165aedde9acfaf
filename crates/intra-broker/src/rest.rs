//! REST transport implementing `BrokerClient`.
//!
//! Thin JSON-over-HTTP client. Authentication is a bearer key injected
//! per request; token refresh and the rest of the broker's auth
//! choreography live outside this crate.

use crate::client::BrokerClient;
use crate::error::{BrokerError, BrokerResult};
use crate::message::WireQuote;
use async_trait::async_trait;
use chrono::NaiveDate;
use intra_core::{
    AccountBalance, DailyBar, InstrumentId, OrderAck, OrderBook, OrderId, OrderRequest, OrderType,
    Price, QuoteSnapshot,
};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// REST transport configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `https://openapi.broker.example:9443`.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Account number for order and balance endpoints.
    pub account_no: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// `BrokerClient` over HTTP.
pub struct RestBroker {
    client: Client,
    config: RestConfig,
}

impl RestBroker {
    pub fn new(config: RestConfig) -> BrokerResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BrokerError::HttpClient(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn map_send_error(e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::Timeout
        } else {
            BrokerError::Transport(e.to_string())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> BrokerResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))
    }

    fn status_error(status: StatusCode, body: String) -> BrokerError {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            BrokerError::Transport(format!("HTTP {status}: {body}"))
        } else {
            BrokerError::Rejected(format!("HTTP {status}: {body}"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct DailyBarResponse {
    date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    close: Decimal,
    volume: u64,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::str")]
    available_cash: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    total_equity: Decimal,
}

#[derive(Debug, Serialize)]
struct SubmitOrderBody<'a> {
    account_no: &'a str,
    cloid: &'a str,
    code: &'a str,
    side: &'a str,
    qty: u64,
    order_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrderResponse {
    order_id: String,
}

#[async_trait]
impl BrokerClient for RestBroker {
    async fn get_quote(&self, instrument: &InstrumentId) -> BrokerResult<QuoteSnapshot> {
        let wire: WireQuote = self
            .get_json(&format!("/v1/quotes/{}", instrument.as_str()))
            .await?;
        wire.into_snapshot()
    }

    async fn get_daily_history(
        &self,
        instrument: &InstrumentId,
        days: u32,
    ) -> BrokerResult<Vec<DailyBar>> {
        let bars: Vec<DailyBarResponse> = self
            .get_json(&format!(
                "/v1/quotes/{}/daily?days={days}",
                instrument.as_str()
            ))
            .await?;
        Ok(bars
            .into_iter()
            .map(|b| DailyBar {
                date: b.date,
                open: Price::new(b.open),
                high: Price::new(b.high),
                low: Price::new(b.low),
                close: Price::new(b.close),
                volume: b.volume,
            })
            .collect())
    }

    async fn get_order_book(&self, instrument: &InstrumentId) -> BrokerResult<OrderBook> {
        let wire: crate::message::WireBook = self
            .get_json(&format!("/v1/quotes/{}/book", instrument.as_str()))
            .await?;
        wire.into_order_book()
    }

    async fn get_balance(&self) -> BrokerResult<AccountBalance> {
        let balance: BalanceResponse = self
            .get_json(&format!("/v1/accounts/{}/balance", self.config.account_no))
            .await?;
        Ok(AccountBalance {
            available_cash: balance.available_cash,
            total_equity: balance.total_equity,
        })
    }

    async fn submit_order(&self, request: &OrderRequest) -> BrokerResult<OrderAck> {
        let body = SubmitOrderBody {
            account_no: &self.config.account_no,
            cloid: request.cloid.as_str(),
            code: request.instrument.as_str(),
            side: match request.side {
                intra_core::OrderSide::Buy => "buy",
                intra_core::OrderSide::Sell => "sell",
            },
            qty: request.qty.inner(),
            order_type: match request.kind {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
            },
            price: request.limit_price.map(|p| p.inner().to_string()),
        };

        debug!(
            cloid = %request.cloid,
            instrument = %request.instrument,
            side = %request.side,
            kind = %request.kind,
            "submitting order"
        );

        let response = self
            .client
            .post(self.url("/v1/orders"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "order submission failed");
            return Err(Self::status_error(status, body));
        }

        let ack: SubmitOrderResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        Ok(OrderAck {
            order_id: OrderId::new(ack.order_id),
        })
    }

    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/orders/{}", order_id.as_str())))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_classification() {
        let transient = RestBroker::status_error(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(transient.is_transient());

        let throttled = RestBroker::status_error(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(throttled.is_transient());

        let rejected = RestBroker::status_error(StatusCode::BAD_REQUEST, "bad qty".into());
        assert!(!rejected.is_transient());
        assert!(matches!(rejected, BrokerError::Rejected(_)));
    }

    #[test]
    fn test_order_body_omits_price_for_market() {
        let body = SubmitOrderBody {
            account_no: "12345678",
            cloid: "intra_1_abc",
            code: "005930",
            side: "sell",
            qty: 10,
            order_type: "market",
            price: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("price"));
    }
}
