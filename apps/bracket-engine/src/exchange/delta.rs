//! Delta Exchange REST adapter.
//!
//! Authenticated client for a Delta-Exchange-style derivatives REST API.
//! Every request is signed with
//! `hex(HMAC-SHA256(secret, method + timestamp + path + query + body))` and
//! carries `api-key` / `timestamp` / `signature` headers.
//!
//! The adapter maps HTTP outcomes onto the [`ExchangeError`] taxonomy and
//! deliberately carries no retry loop of its own; retry policy belongs to
//! the engine's scheduler, which classifies the returned errors.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::models::{OrderSide, Position};

use super::adapter::ExchangeAdapter;
use super::types::{ExchangeError, ExchangeOrderStatus, OrderAck, OrderRequest, OrderType};

type HmacSha256 = Hmac<Sha256>;

/// API credentials for Delta Exchange.
///
/// Passed explicitly into the adapter constructor; the engine never reads
/// credentials from ambient state.
#[derive(Debug, Clone)]
pub struct DeltaCredentials {
    /// API key.
    pub api_key: String,
    /// API secret used for request signing.
    pub api_secret: String,
}

impl DeltaCredentials {
    /// Create a credential pair.
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

/// REST adapter for Delta Exchange.
#[derive(Debug, Clone)]
pub struct DeltaExchangeAdapter {
    client: Client,
    base_url: String,
    credentials: DeltaCredentials,
}

impl DeltaExchangeAdapter {
    /// Create a new adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are empty or the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: DeltaCredentials,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(ExchangeError::AuthenticationFailed);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Sign a request per the venue's scheme:
    /// `hex(HMAC-SHA256(secret, method + timestamp + path + query + body))`
    /// where `query` includes its leading `?` when present.
    fn sign(secret: &str, method: &str, timestamp: &str, path: &str, query: &str, body: &str) -> String {
        let message = format!("{method}{timestamp}{path}{query}{body}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<String>,
    ) -> Result<T, ExchangeError> {
        self.send_opt(method, path, query, body).await?.ok_or_else(|| {
            ExchangeError::InvalidResponse("missing result in success response".to_string())
        })
    }

    /// Like [`Self::send`], but tolerates a `null` result (e.g. no open
    /// position for the symbol).
    async fn send_opt<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<String>,
    ) -> Result<Option<T>, ExchangeError> {
        let timestamp = Utc::now().timestamp().to_string();
        let query_part = query.map_or_else(String::new, |q| format!("?{q}"));
        let body_part = body.as_deref().unwrap_or("");
        let signature = Self::sign(
            &self.credentials.api_secret,
            method.as_str(),
            &timestamp,
            path,
            &query_part,
            body_part,
        );

        let url = format!("{}{path}{query_part}", self.base_url);
        let mut request = self
            .client
            .request(method, &url)
            .header("api-key", &self.credentials.api_key)
            .header("timestamp", &timestamp)
            .header("signature", signature)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            request = request.body(b);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if status.is_success() {
            let envelope: DeltaEnvelope<T> = serde_json::from_str(&text)
                .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
            if envelope.success {
                Ok(envelope.result)
            } else {
                let error = envelope.error.unwrap_or_default();
                Err(ExchangeError::Rejected {
                    code: error.code,
                    message: error.context.to_string(),
                })
            }
        } else {
            Err(Self::map_error(status, retry_after, &text))
        }
    }

    /// Map a non-2xx response onto the error taxonomy.
    fn map_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ExchangeError {
        let error = serde_json::from_str::<DeltaEnvelope<serde_json::Value>>(body)
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ExchangeError::AuthenticationFailed
            }
            StatusCode::NOT_FOUND => ExchangeError::OrderNotFound(error.code),
            StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimited {
                retry_after_secs: retry_after,
            },
            s if s.is_client_error() => ExchangeError::Rejected {
                code: error.code,
                message: error.context.to_string(),
            },
            s => ExchangeError::ServerError {
                status: s.as_u16(),
                message: if error.code.is_empty() {
                    body.to_string()
                } else {
                    error.code
                },
            },
        }
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for DeltaExchangeAdapter {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let payload = DeltaOrderPayload::from_request(request);
        let body = serde_json::to_string(&payload)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        let order: DeltaOrder = self
            .send(Method::POST, "/v2/orders", None, Some(body))
            .await?;

        tracing::debug!(
            order_id = order.id,
            state = %order.state,
            symbol = %request.symbol,
            "Order placed"
        );

        Ok(OrderAck {
            order_id: order.id.to_string(),
            status: order.status(),
        })
    }

    async fn get_order_status(
        &self,
        order_id: &str,
    ) -> Result<ExchangeOrderStatus, ExchangeError> {
        let path = format!("/v2/orders/{order_id}");
        let order: DeltaOrder = self.send(Method::GET, &path, None, None).await?;
        Ok(order.status())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, ExchangeError> {
        let query = format!("product_symbol={symbol}");
        let position: Option<DeltaPosition> = self
            .send_opt(Method::GET, "/v2/positions", Some(&query), None)
            .await?;

        Ok(position.and_then(|p| p.into_position(symbol)))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let path = format!("/v2/orders/{order_id}");
        let _: Option<serde_json::Value> = self.send_opt(Method::DELETE, &path, None, None).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "delta"
    }

    async fn health_check(&self) -> Result<(), ExchangeError> {
        let _: Option<serde_json::Value> = self
            .send_opt(Method::GET, "/v2/wallet/balances", None, None)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Standard response envelope: `{"success": bool, "result": ..., "error": ...}`.
#[derive(Debug, Deserialize)]
struct DeltaEnvelope<T> {
    success: bool,
    result: Option<T>,
    error: Option<DeltaApiError>,
}

#[derive(Debug, Deserialize, Default)]
struct DeltaApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    context: serde_json::Value,
}

/// Order submission payload in the venue's format. Trigger orders are limit
/// orders with a stop price and `stop_order_type` set; prices travel as
/// strings.
#[derive(Debug, serde::Serialize)]
struct DeltaOrderPayload<'a> {
    product_symbol: &'a str,
    size: String,
    side: &'static str,
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_order_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_trigger_method: Option<&'static str>,
    time_in_force: &'static str,
    reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_order_id: Option<&'a str>,
}

impl<'a> DeltaOrderPayload<'a> {
    fn from_request(request: &'a OrderRequest) -> Self {
        let (order_type, stop_order_type, stop_trigger_method) = match request.order_type {
            OrderType::Market => ("market_order", None, None),
            OrderType::Limit => ("limit_order", None, None),
            OrderType::StopTrigger => {
                ("limit_order", Some("stop_loss_order"), Some("last_traded_price"))
            }
        };

        Self {
            product_symbol: &request.symbol,
            size: request.size.normalize().to_string(),
            side: request.side.as_str(),
            order_type,
            limit_price: request.limit_price.map(|p| p.normalize().to_string()),
            stop_price: request.stop_price.map(|p| p.normalize().to_string()),
            stop_order_type,
            stop_trigger_method,
            time_in_force: "gtc",
            reduce_only: request.reduce_only,
            client_order_id: request.client_order_id.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeltaOrder {
    id: u64,
    state: String,
    #[serde(default)]
    size: Option<Decimal>,
    #[serde(default)]
    unfilled_size: Option<Decimal>,
}

impl DeltaOrder {
    fn status(&self) -> ExchangeOrderStatus {
        match self.state.as_str() {
            "closed" => ExchangeOrderStatus::Filled,
            "cancelled" => ExchangeOrderStatus::Cancelled,
            _ => match (self.size, self.unfilled_size) {
                (Some(size), Some(unfilled)) if unfilled < size && !unfilled.is_zero() => {
                    ExchangeOrderStatus::PartiallyFilled
                }
                _ => ExchangeOrderStatus::Open,
            },
        }
    }
}

/// Position payload: size is signed (positive long, negative short).
#[derive(Debug, Deserialize)]
struct DeltaPosition {
    #[serde(default)]
    size: Decimal,
    #[serde(default)]
    entry_price: Option<Decimal>,
    #[serde(default)]
    liquidation_price: Option<Decimal>,
}

impl DeltaPosition {
    fn into_position(self, symbol: &str) -> Option<Position> {
        if self.size.is_zero() {
            return None;
        }
        let side = if self.size.is_sign_negative() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        Some(Position {
            symbol: symbol.to_string(),
            side,
            size: self.size.abs(),
            entry_price: self.entry_price.unwrap_or_default(),
            liquidation_price: self.liquidation_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> DeltaExchangeAdapter {
        DeltaExchangeAdapter::new(
            base_url,
            DeltaCredentials::new("test-key", "test-secret"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_signature_vectors() {
        // Precomputed with an independent HMAC-SHA256 implementation.
        assert_eq!(
            DeltaExchangeAdapter::sign(
                "test-secret",
                "GET",
                "1700000000",
                "/v2/positions",
                "?product_symbol=BTCUSD",
                "",
            ),
            "be6d3278b2d2c4caa0a6e828c03ddc9f1e9a4c93e03fdcc4b70e69cc703852b6"
        );
        assert_eq!(
            DeltaExchangeAdapter::sign(
                "test-secret",
                "POST",
                "1700000000",
                "/v2/orders",
                "",
                "{\"size\":\"1\"}",
            ),
            "ae44bdbdd71c349c691924c9cc126bb00de8ca4fae10f48e7ec4058ed12fc6cb"
        );
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let result = DeltaExchangeAdapter::new(
            "https://example.test",
            DeltaCredentials::new("", ""),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(ExchangeError::AuthenticationFailed)));
    }

    #[test]
    fn test_trigger_payload_shape() {
        let request = OrderRequest::reduce_only_trigger(
            "BTCUSD".to_string(),
            OrderSide::Sell,
            dec!(6),
            dec!(101000),
        );
        let payload = DeltaOrderPayload::from_request(&request);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["order_type"], "limit_order");
        assert_eq!(value["stop_order_type"], "stop_loss_order");
        assert_eq!(value["stop_trigger_method"], "last_traded_price");
        assert_eq!(value["stop_price"], "101000");
        assert_eq!(value["limit_price"], "101000");
        assert_eq!(value["reduce_only"], true);
        assert_eq!(value["time_in_force"], "gtc");
    }

    #[tokio::test]
    async fn test_place_order_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .and(header_exists("api-key"))
            .and(header_exists("signature"))
            .and(header_exists("timestamp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {"id": 4242, "state": "open", "size": 3, "unfilled_size": 3}
            })))
            .mount(&server)
            .await;

        let ack = adapter(&server.uri())
            .place_order(&OrderRequest::limit(
                "BTCUSD".to_string(),
                OrderSide::Buy,
                dec!(3),
                dec!(103890),
            ))
            .await
            .unwrap();

        assert_eq!(ack.order_id, "4242");
        assert_eq!(ack.status, ExchangeOrderStatus::Open);
    }

    #[tokio::test]
    async fn test_rejection_maps_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": {"code": "invalid_tick_size"}
            })))
            .mount(&server)
            .await;

        let err = adapter(&server.uri())
            .place_order(&OrderRequest::market(
                "BTCUSD".to_string(),
                OrderSide::Buy,
                dec!(1),
            ))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExchangeError::Rejected { ref code, .. } if code == "invalid_tick_size"
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "3")
                    .set_body_json(json!({"success": false, "error": {"code": "rate_limit"}})),
            )
            .mount(&server)
            .await;

        let err = adapter(&server.uri())
            .get_position("BTCUSD")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExchangeError::RateLimited {
                retry_after_secs: Some(3)
            }
        ));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = adapter(&server.uri())
            .get_position("BTCUSD")
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::ServerError { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_flat_position_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .and(query_param("product_symbol", "BTCUSD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {"size": 0}
            })))
            .mount(&server)
            .await;

        let position = adapter(&server.uri()).get_position("BTCUSD").await.unwrap();
        assert!(position.is_none());
    }

    #[tokio::test]
    async fn test_short_position_maps_to_sell_side() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {"size": -4, "entry_price": "103890", "liquidation_price": "110000"}
            })))
            .mount(&server)
            .await;

        let position = adapter(&server.uri())
            .get_position("BTCUSD")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(position.side, OrderSide::Sell);
        assert_eq!(position.size, dec!(4));
        assert_eq!(position.entry_price, dec!(103890));
    }
}
