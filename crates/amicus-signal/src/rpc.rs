//! Minimal JSON-RPC 2.0 client for a `signal-cli` daemon running in
//! `--json-rpc` mode behind an HTTP bridge (the URL in
//! `SignalConfig::rpc_url`).
//!
//! Every call is a single POST with a `{"jsonrpc":"2.0","method":...}`
//! body; the daemon replies with a single JSON object, never a stream —
//! long-polling for inbound messages is handled by calling `receive`
//! repeatedly (see `adapter::run`).

use std::sync::atomic::{AtomicI64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SignalError;

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicI64,
}

impl RpcClient {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            next_id: AtomicI64::new(1),
        }
    }

    /// Invoke `method` with `params`, returning the decoded `result` field.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, SignalError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = resp.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(SignalError::Rpc { code, message });
        }

        let result = resp.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| SignalError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_assigns_monotonic_ids() {
        let client = RpcClient::new("http://127.0.0.1:8080/api/v1/rpc".to_string());
        let a = client.next_id.fetch_add(1, Ordering::Relaxed);
        let b = client.next_id.fetch_add(1, Ordering::Relaxed);
        assert!(b > a);
    }
}
