use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::oracle::Oracle;
use crate::types::{OracleKind, OracleResponse};

/// Deterministic test double: returns queued responses in order, recording
/// every call it received. Used in place of `HttpOracle` in integration
/// tests that need to control the oracle's answer without a live endpoint.
pub struct StubOracle {
    responses: Mutex<Vec<Option<serde_json::Value>>>,
    calls: Mutex<Vec<(String, OracleKind, String)>>,
}

impl StubOracle {
    /// Responses are consumed front-to-back; `None` simulates exhausted
    /// retries. If the queue runs out, subsequent calls also return `None`.
    pub fn new(responses: Vec<Option<serde_json::Value>>) -> Self {
        Self { responses: Mutex::new(responses), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<(String, OracleKind, String)> {
        self.calls.lock().expect("stub oracle mutex poisoned").clone()
    }
}

#[async_trait]
impl Oracle for StubOracle {
    async fn call_json(&self, prompt: &str, kind: OracleKind, symbol: &str) -> Option<OracleResponse> {
        self.calls.lock().expect("stub oracle mutex poisoned").push((
            prompt.to_string(),
            kind,
            symbol.to_string(),
        ));
        let mut responses = self.responses.lock().expect("stub oracle mutex poisoned");
        if responses.is_empty() {
            return None;
        }
        let next = responses.remove(0);
        next.map(|value| OracleResponse { id: Uuid::new_v4().to_string(), latency_ms: 0, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn returns_queued_responses_in_order_then_none() {
        let stub = StubOracle::new(vec![Some(json!({"confluence_score": 80})), None]);
        let first = stub.call_json("p", OracleKind::EntryScore, "XAUUSD").await;
        assert!(first.is_some());
        let second = stub.call_json("p", OracleKind::EntryScore, "XAUUSD").await;
        assert!(second.is_none());
        let third = stub.call_json("p", OracleKind::EntryScore, "XAUUSD").await;
        assert!(third.is_none());
        assert_eq!(stub.calls().len(), 3);
    }
}
