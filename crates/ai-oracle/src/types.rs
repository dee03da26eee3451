use serde::{Deserialize, Serialize};

/// Which prompt family a call belongs to (§4.9). Entry scoring and
/// management close/hold decisions use the same adapter with different
/// prompt shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleKind {
    EntryScore,
    CloseHold,
}

impl OracleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleKind::EntryScore => "entry_score",
            OracleKind::CloseHold => "close_hold",
        }
    }
}

/// A successful oracle response: the parsed JSON object plus the
/// out-of-band audit fields (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleResponse {
    pub id: String,
    pub latency_ms: u64,
    pub value: serde_json::Value,
}

/// Validated entry-scoring payload (§4.7.4): `confluence_score` in
/// [1,100], `lot_multiplier` in [0.5,2.0].
#[derive(Debug, Clone, Copy)]
pub struct EntryScore {
    pub confluence_score: f64,
    pub lot_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct ParseError(pub String);

impl EntryScore {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ParseError> {
        let confluence_score = value
            .get("confluence_score")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ParseError("missing confluence_score".to_string()))?;
        let lot_multiplier = value
            .get("lot_multiplier")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ParseError("missing lot_multiplier".to_string()))?;
        if !(1.0..=100.0).contains(&confluence_score) {
            return Err(ParseError(format!("confluence_score {confluence_score} out of range")));
        }
        if !(0.5..=2.0).contains(&lot_multiplier) {
            return Err(ParseError(format!("lot_multiplier {lot_multiplier} out of range")));
        }
        Ok(Self { confluence_score, lot_multiplier })
    }
}

/// Validated close/hold payload (§4.8.2): `confidence` in [0,100] plus a
/// free-text reason. The close/hold call itself is a threshold comparison
/// against `confidence` in `management_engine`, not a field the model sets.
#[derive(Debug, Clone)]
pub struct CloseHoldDecision {
    pub confidence: f64,
    pub reason: String,
}

impl CloseHoldDecision {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ParseError> {
        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ParseError("missing confidence".to_string()))?;
        if !(0.0..=100.0).contains(&confidence) {
            return Err(ParseError(format!("confidence {confidence} out of range")));
        }
        let reason = value.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string();
        Ok(Self { confidence, reason })
    }
}
