//! JSON-RPC ledger client.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::{Address, CallRequest, Receipt, TxHash};
use super::{classify_rpc_error, LedgerClient, LedgerError, LedgerErrorKind, LedgerResult};

pub struct RpcLedger {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<String>,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> LedgerResult<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::trace!("rpc -> {}", method);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LedgerError::new(
                LedgerErrorKind::Transport,
                format!("{} returned HTTP {}", method, response.status()),
            ));
        }

        let body: RpcResponse = response.json().await?;

        if let Some(err) = body.error {
            let mut message = format!("{} (code {})", err.message, err.code);
            if let Some(data) = err.data {
                message.push_str(&format!(": {}", data));
            }
            return Err(classify_rpc_error(&message));
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn request_quantity(&self, method: &str, params: Value) -> LedgerResult<u128> {
        let value = self.request(method, params).await?;
        parse_quantity(&value)
    }
}

/// Count at `pending`, so transactions still in the pool are not reused.
fn transaction_count_params(address: &Address) -> Value {
    json!([address.to_checksum(), "pending"])
}

fn call_object(request: &CallRequest) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(from) = request.from {
        obj.insert("from".into(), json!(from.to_checksum()));
    }
    obj.insert("to".into(), json!(request.to.to_checksum()));
    obj.insert("data".into(), json!(format!("0x{}", hex::encode(&request.data))));
    if let Some(nonce) = request.nonce {
        obj.insert("nonce".into(), json!(format!("0x{:x}", nonce)));
    }
    if let Some(gas_price) = request.gas_price {
        obj.insert("gasPrice".into(), json!(format!("0x{:x}", gas_price)));
    }
    Value::Object(obj)
}

fn parse_quantity(value: &Value) -> LedgerResult<u128> {
    let s = value.as_str().ok_or_else(|| {
        LedgerError::new(LedgerErrorKind::Decode, format!("expected hex quantity, got {}", value))
    })?;
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| {
        LedgerError::new(LedgerErrorKind::Decode, format!("bad quantity '{}': {}", s, e))
    })
}

fn parse_u64(value: &Value) -> LedgerResult<u64> {
    let q = parse_quantity(value)?;
    u64::try_from(q).map_err(|_| {
        LedgerError::new(LedgerErrorKind::Decode, format!("quantity {} overflows u64", q))
    })
}

fn parse_bytes(value: &Value) -> LedgerResult<Vec<u8>> {
    let s = value.as_str().ok_or_else(|| {
        LedgerError::new(LedgerErrorKind::Decode, format!("expected hex data, got {}", value))
    })?;
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| LedgerError::new(LedgerErrorKind::Decode, format!("bad hex data: {}", e)))
}

fn parse_receipt(value: Value) -> LedgerResult<Option<Receipt>> {
    if value.is_null() {
        return Ok(None);
    }
    let raw: RawReceipt = serde_json::from_value(value)
        .map_err(|e| LedgerError::new(LedgerErrorKind::Decode, e.to_string()))?;

    let transaction_hash = TxHash::from_hex(&raw.transaction_hash).ok_or_else(|| {
        LedgerError::new(
            LedgerErrorKind::Decode,
            format!("bad transaction hash '{}'", raw.transaction_hash),
        )
    })?;
    let block_number = match raw.block_number {
        Some(b) => Some(parse_u64(&Value::String(b))?),
        None => None,
    };
    let success = match raw.status {
        Some(s) => parse_quantity(&Value::String(s))? == 1,
        None => true,
    };
    let contract_address = raw
        .contract_address
        .and_then(|a| a.parse::<Address>().ok());

    Ok(Some(Receipt {
        transaction_hash,
        block_number,
        success,
        contract_address,
    }))
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn chain_id(&self) -> LedgerResult<u64> {
        let value = self.request("eth_chainId", json!([])).await?;
        parse_u64(&value)
    }

    async fn transaction_count(&self, address: &Address) -> LedgerResult<u64> {
        let value = self
            .request("eth_getTransactionCount", transaction_count_params(address))
            .await?;
        parse_u64(&value)
    }

    async fn gas_price(&self) -> LedgerResult<u128> {
        self.request_quantity("eth_gasPrice", json!([])).await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> LedgerResult<u64> {
        let value = self
            .request("eth_estimateGas", json!([call_object(request)]))
            .await?;
        parse_u64(&value)
    }

    async fn call(&self, request: &CallRequest) -> LedgerResult<Vec<u8>> {
        let value = self
            .request("eth_call", json!([call_object(request), "latest"]))
            .await?;
        parse_bytes(&value)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> LedgerResult<TxHash> {
        let value = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let s = value.as_str().unwrap_or_default();
        TxHash::from_hex(s).ok_or_else(|| {
            LedgerError::new(LedgerErrorKind::Decode, format!("bad transaction hash {}", value))
        })
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<Receipt>> {
        let value = self
            .request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        parse_receipt(value)
    }
}
