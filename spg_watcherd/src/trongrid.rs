//! TronGrid-backed chain client.
//!
//! Answers the engine's two questions over TronGrid's public API: which TRC-20 transfers an
//! account has received, and how deep a transaction is buried. 429 responses surface as
//! `RateLimited` with the advertised `Retry-After`, so the engine's backoff honors upstream
//! throttling instead of hammering it.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, RETRY_AFTER},
    Client,
    Response,
    StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use storefront_payment_engine::{helpers::TokenAddress, ChainClient, ChainClientError, ObservedTransfer};

use crate::{config::TronGridConfig, errors::WatcherdError};

#[derive(Clone)]
pub struct TronGridClient {
    config: TronGridConfig,
    client: Arc<Client>,
}

impl TronGridClient {
    pub fn new(config: TronGridConfig) -> Result<Self, WatcherdError> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let val = HeaderValue::from_str(key).map_err(|e| WatcherdError::InitializeError(e.to_string()))?;
            headers.insert("TRON-PRO-API-KEY", val);
        }
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| WatcherdError::InitializeError(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ChainClientError> {
        let url = self.url(path);
        trace!("⛓️ GET {url}");
        let response =
            self.client.get(url).query(params).send().await.map_err(|e| ChainClientError::Network(e.to_string()))?;
        read_response(response).await
    }

    async fn post_query<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ChainClientError> {
        let url = self.url(path);
        trace!("⛓️ POST {url}");
        let response =
            self.client.post(url).json(body).send().await.map_err(|e| ChainClientError::Network(e.to_string()))?;
        read_response(response).await
    }
}

/// Status dispatch shared by every TronGrid call. 429 and 5xx are transient; any other non-2xx
/// is a permanent, unusable answer.
async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, ChainClientError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after =
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()).and_then(|s| s.parse::<u64>().ok());
        debug!("⛓️ TronGrid rate limit hit. Retry-After: {retry_after:?}");
        return Err(ChainClientError::RateLimited { retry_after });
    }
    if status.is_server_error() {
        return Err(ChainClientError::Network(format!("TronGrid returned {status}")));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ChainClientError::InvalidResponse(format!("{status}: {message}")));
    }
    response.json::<T>().await.map_err(|e| ChainClientError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ChainClient for TronGridClient {
    async fn transfers_to(
        &self,
        address: &TokenAddress,
        since: DateTime<Utc>,
    ) -> Result<Vec<ObservedTransfer>, ChainClientError> {
        let path = format!("/v1/accounts/{}/transactions/trc20", address.as_base58());
        let params = [
            ("only_to", "true".to_string()),
            ("only_confirmed", "true".to_string()),
            ("min_timestamp", since.timestamp_millis().to_string()),
            ("limit", "200".to_string()),
        ];
        let page: Trc20Page = self.get_query(&path, &params).await?;
        if !page.success {
            return Err(ChainClientError::InvalidResponse("TronGrid reported an unsuccessful query".into()));
        }
        let mut result = Vec::with_capacity(page.data.len());
        for event in page.data {
            // The feed carries approvals and mint events too
            if event.event_type != "Transfer" {
                continue;
            }
            result.push(event.into_observed()?);
        }
        debug!("⛓️ {} transfers to {address} since {since}", result.len());
        Ok(result)
    }

    async fn confirmations(&self, txid: &str) -> Result<u64, ChainClientError> {
        let body = serde_json::json!({ "value": txid });
        let info: TransactionInfo = self.post_query("/wallet/gettransactioninfobyid", &body).await?;
        // TronGrid answers an unknown txid with an empty object
        let Some(included) = info.block_number else {
            return Err(ChainClientError::TxNotFound(txid.to_string()));
        };
        let now: NowBlock = self.post_query("/wallet/getnowblock", &serde_json::json!({})).await?;
        let tip = now.block_header.raw_data.number;
        let confirmations = (tip - included + 1).max(0) as u64;
        trace!("⛓️ Transaction {txid} is in block {included} at tip {tip}: {confirmations} confirmations");
        Ok(confirmations)
    }
}

//----------------------------------   TronGrid wire format   ----------------------------------

#[derive(Debug, Deserialize)]
struct Trc20Page {
    #[serde(default)]
    data: Vec<Trc20Event>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct Trc20Event {
    transaction_id: String,
    token_info: TokenInfo,
    block_timestamp: i64,
    from: String,
    to: String,
    #[serde(rename = "type")]
    event_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    address: String,
}

impl Trc20Event {
    fn into_observed(self) -> Result<ObservedTransfer, ChainClientError> {
        let raw_amount = self
            .value
            .parse::<u64>()
            .map_err(|e| ChainClientError::InvalidResponse(format!("Bad transfer value {}: {e}", self.value)))?;
        let block_time = DateTime::from_timestamp_millis(self.block_timestamp).ok_or_else(|| {
            ChainClientError::InvalidResponse(format!("Bad block timestamp {}", self.block_timestamp))
        })?;
        Ok(ObservedTransfer {
            txid: self.transaction_id,
            sender: self.from,
            recipient: self.to,
            contract: self.token_info.address,
            raw_amount,
            block_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    #[serde(rename = "blockNumber")]
    block_number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NowBlock {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: RawBlockData,
}

#[derive(Debug, Deserialize)]
struct RawBlockData {
    number: i64,
}
