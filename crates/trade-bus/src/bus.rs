use async_trait::async_trait;
use dashmap::DashMap;

use crate::message::BusMessage;

#[async_trait]
pub trait OutputBus: Send + Sync {
    /// Publish-only (§4.10): a failed send is never retried, since retrying
    /// could duplicate a side effect downstream. Failures are still counted.
    async fn publish(&self, message: BusMessage);
}

/// Per-(symbol, kind) failure counters, surfaced via metrics (§4.10).
#[derive(Default)]
pub struct FailureCounters {
    counts: DashMap<(String, &'static str), u64>,
}

impl FailureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, symbol: &str, kind: &'static str) {
        *self.counts.entry((symbol.to_string(), kind)).or_insert(0) += 1;
    }

    pub fn get(&self, symbol: &str, kind: &'static str) -> u64 {
        self.counts.get(&(symbol.to_string(), kind)).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<(String, &'static str, u64)> {
        self.counts.iter().map(|e| (e.key().0.clone(), e.key().1, *e.value())).collect()
    }
}

/// reqwest-backed bus that POSTs each message to a configured endpoint,
/// following the same client/send-and-log shape as
/// `trading-agent::discord_notifier::DiscordNotifier::send_message`.
pub struct HttpOutputBus {
    client: reqwest::Client,
    endpoint: String,
    failures: FailureCounters,
}

impl HttpOutputBus {
    pub fn new(endpoint: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint, failures: FailureCounters::new() }
    }

    pub fn failures(&self) -> &FailureCounters {
        &self.failures
    }
}

#[async_trait]
impl OutputBus for HttpOutputBus {
    async fn publish(&self, message: BusMessage) {
        let symbol = message.symbol().to_string();
        let kind = message.kind();

        if self.endpoint.is_empty() {
            tracing::debug!(symbol, kind, "output bus endpoint not configured, skipping publish");
            return;
        }

        let result = self.client.post(&self.endpoint).json(&message).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(symbol, kind, "published bus message");
            }
            Ok(response) => {
                tracing::warn!(symbol, kind, status = %response.status(), "bus publish returned error status");
                self.failures.record(&symbol, kind);
            }
            Err(err) => {
                tracing::warn!(symbol, kind, error = %err, "bus publish failed");
                self.failures.record(&symbol, kind);
            }
        }
    }
}

/// In-memory test double: messages are appended to a channel that tests can
/// drain, instead of being sent over HTTP.
pub struct ChannelOutputBus {
    sender: tokio::sync::mpsc::UnboundedSender<BusMessage>,
}

impl ChannelOutputBus {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<BusMessage>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl OutputBus for ChannelOutputBus {
    async fn publish(&self, message: BusMessage) {
        // A closed receiver just means the test stopped listening; there is
        // no downstream to retry into, matching §4.10's publish-only model.
        let _ = self.sender.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TrailMode;

    fn sample_close(symbol: &str) -> BusMessage {
        BusMessage::Close {
            symbol: symbol.to_string(),
            reason: "test".to_string(),
            trail_mode: TrailMode::Normal,
            tp_mode: TrailMode::Normal,
        }
    }

    #[tokio::test]
    async fn channel_bus_delivers_published_messages() {
        let (bus, mut rx) = ChannelOutputBus::new();
        bus.publish(sample_close("XAUUSD")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.symbol(), "XAUUSD");
    }

    #[tokio::test]
    async fn http_bus_with_no_endpoint_records_no_failure() {
        let bus = HttpOutputBus::new(String::new());
        bus.publish(sample_close("XAUUSD")).await;
        assert_eq!(bus.failures().get("XAUUSD", "CLOSE"), 0);
    }

    #[test]
    fn failure_counters_are_scoped_per_symbol_and_kind() {
        let counters = FailureCounters::new();
        counters.record("XAUUSD", "ORDER");
        counters.record("XAUUSD", "ORDER");
        counters.record("EURUSD", "ORDER");
        assert_eq!(counters.get("XAUUSD", "ORDER"), 2);
        assert_eq!(counters.get("EURUSD", "ORDER"), 1);
        assert_eq!(counters.get("XAUUSD", "CLOSE"), 0);
    }
}
