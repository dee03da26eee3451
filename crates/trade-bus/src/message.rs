use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrailMode {
    Wide,
    Normal,
    Tight,
}

pub type TpMode = TrailMode;

/// Outbound messages to the execution process, tagged by `type` (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusMessage {
    #[serde(rename = "ORDER")]
    Order {
        action: OrderAction,
        symbol: String,
        atr: f64,
        sweep_extreme: f64,
        multiplier: f64,
        reason: String,
        ai_confidence: i64,
        ai_reason: String,
    },
    #[serde(rename = "CLOSE")]
    Close {
        symbol: String,
        reason: String,
        trail_mode: TrailMode,
        tp_mode: TpMode,
    },
    #[serde(rename = "HOLD")]
    Hold {
        symbol: String,
        reason: String,
        trail_mode: TrailMode,
        tp_mode: TpMode,
    },
}

impl BusMessage {
    pub fn symbol(&self) -> &str {
        match self {
            BusMessage::Order { symbol, .. } => symbol,
            BusMessage::Close { symbol, .. } => symbol,
            BusMessage::Hold { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::Order { .. } => "ORDER",
            BusMessage::Close { .. } => "CLOSE",
            BusMessage::Hold { .. } => "HOLD",
        }
    }
}

pub const REASON_WEEKEND_DISCRETIONARY_CLOSE: &str = "weekend_discretionary_close";
pub const REASON_MARKET_GUARD_CLOSE: &str = "market_guard_close";
pub const REASON_AI_FALLBACK_HOLD: &str = "ai_fallback_hold";
pub const REASON_AI_FALLBACK_CLOSE: &str = "ai_fallback_close";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_serializes_with_uppercase_discriminator_and_action() {
        let msg = BusMessage::Order {
            action: OrderAction::Buy,
            symbol: "XAUUSD".to_string(),
            atr: 1.2,
            sweep_extreme: 2000.0,
            multiplier: 1.0,
            reason: "entry".to_string(),
            ai_confidence: 80,
            ai_reason: "aligned".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ORDER");
        assert_eq!(json["action"], "BUY");
    }

    #[test]
    fn close_and_hold_share_trail_tp_mode_shape() {
        let msg = BusMessage::Close {
            symbol: "XAUUSD".to_string(),
            reason: REASON_MARKET_GUARD_CLOSE.to_string(),
            trail_mode: TrailMode::Tight,
            tp_mode: TrailMode::Normal,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["trail_mode"], "TIGHT");
        assert_eq!(json["tp_mode"], "NORMAL");
    }
}
