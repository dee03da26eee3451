use serde::Serialize;

/// The full response-code taxonomy (§7). Every code maps to an HTTP status
/// and a literal human-readable message so the execution process can branch
/// on status alone without parsing prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    InvalidTrigger,
    InvalidData,
    BlockedNoSpread,
    BlockedHeartbeat,
    BlockedMarketGuard,
    EntryLocked,
    TriggerAlreadyProcessed,
    BlockedSpread,
    BlockedSpreadVsAtr,
    LrrBlockedEv,
    LrrBlockedSpreadSpike,
    LrrBlockedDist,
    LrrBlockedPanicVol,
    BlockedCooldown,
    BlockedPriceDrift,
    SkipNetSideUnknown,
    SkipPositionOpen,
    SkipAddonLimit,
    AiThrottled,
    BlockedAiNoScore,
    BlockedAiScore,
    BlockedAddonAi,
    OrderSendFailed,
}

impl Outcome {
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::InvalidTrigger => "invalid_trigger",
            Outcome::InvalidData => "invalid_data",
            Outcome::BlockedNoSpread => "blocked_no_spread",
            Outcome::BlockedHeartbeat => "blocked_heartbeat",
            Outcome::BlockedMarketGuard => "blocked_market_guard",
            Outcome::EntryLocked => "entry_locked",
            Outcome::TriggerAlreadyProcessed => "trigger_already_processed",
            Outcome::BlockedSpread => "blocked_spread",
            Outcome::BlockedSpreadVsAtr => "blocked_spread_vs_atr",
            Outcome::LrrBlockedEv => "lrr_blocked_ev",
            Outcome::LrrBlockedSpreadSpike => "lrr_blocked_spread_spike",
            Outcome::LrrBlockedDist => "lrr_blocked_dist",
            Outcome::LrrBlockedPanicVol => "lrr_blocked_panic_vol",
            Outcome::BlockedCooldown => "blocked_cooldown",
            Outcome::BlockedPriceDrift => "blocked_price_drift",
            Outcome::SkipNetSideUnknown => "skip_net_side_unknown",
            Outcome::SkipPositionOpen => "skip_position_open",
            Outcome::SkipAddonLimit => "skip_addon_limit",
            Outcome::AiThrottled => "ai_throttled",
            Outcome::BlockedAiNoScore => "blocked_ai_no_score",
            Outcome::BlockedAiScore => "blocked_ai_score",
            Outcome::BlockedAddonAi => "blocked_addon_ai",
            Outcome::OrderSendFailed => "order_send_failed",
        }
    }

    /// HTTP status for this outcome (§6.1): 200 for accepted/benign-skip
    /// paths, 400 for malformed input, 401/403 for auth, 429 for throttling,
    /// 503 when the engine itself refuses to act (frozen/locked).
    pub fn http_status(&self) -> u16 {
        match self {
            Outcome::Ok
            | Outcome::SkipNetSideUnknown
            | Outcome::SkipPositionOpen
            | Outcome::SkipAddonLimit
            | Outcome::TriggerAlreadyProcessed
            | Outcome::BlockedSpread
            | Outcome::BlockedSpreadVsAtr
            | Outcome::LrrBlockedEv
            | Outcome::LrrBlockedSpreadSpike
            | Outcome::LrrBlockedDist
            | Outcome::LrrBlockedPanicVol
            | Outcome::BlockedCooldown
            | Outcome::BlockedPriceDrift
            | Outcome::BlockedAiNoScore
            | Outcome::BlockedAiScore
            | Outcome::BlockedAddonAi
            | Outcome::BlockedNoSpread => 200,
            Outcome::InvalidTrigger | Outcome::InvalidData => 400,
            Outcome::AiThrottled => 429,
            Outcome::EntryLocked | Outcome::BlockedHeartbeat | Outcome::BlockedMarketGuard => 503,
            Outcome::OrderSendFailed => 502,
        }
    }

    /// Literal response string the execution process matches on (§6.1/§7).
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::InvalidTrigger => "Invalid trigger",
            Outcome::InvalidData => "Invalid data",
            Outcome::BlockedNoSpread => "Blocked: no spread",
            Outcome::BlockedHeartbeat => "Frozen by heartbeat",
            Outcome::BlockedMarketGuard => "Blocked by market guard",
            Outcome::EntryLocked => "Entry locked",
            Outcome::TriggerAlreadyProcessed => "Duplicate",
            Outcome::BlockedSpread => "Blocked: spread",
            Outcome::BlockedSpreadVsAtr => "Blocked: spread vs ATR",
            Outcome::LrrBlockedEv => "Blocked: EV too low",
            Outcome::LrrBlockedSpreadSpike => "Blocked: spread spike",
            Outcome::LrrBlockedDist => "Blocked: distance too small",
            Outcome::LrrBlockedPanicVol => "Blocked: panic volatility",
            Outcome::BlockedCooldown => "Blocked: cooldown",
            Outcome::BlockedPriceDrift => "Blocked: price drift",
            Outcome::SkipNetSideUnknown => "Skipped: side unknown",
            Outcome::SkipPositionOpen => "Skipped: position open",
            Outcome::SkipAddonLimit => "Skipped: add-on limit",
            Outcome::AiThrottled => "AI throttled",
            Outcome::BlockedAiNoScore => "Blocked: AI unavailable",
            Outcome::BlockedAiScore => "Blocked: AI score too low",
            Outcome::BlockedAddonAi => "Blocked: add-on AI score too low",
            Outcome::OrderSendFailed => "Order send failed",
        }
    }

    pub fn is_blocking(&self) -> bool {
        !matches!(self, Outcome::Ok)
    }
}

/// The engine's response body shape (§6.1): code, message, and whatever
/// context the caller attached (entry deferred until, pending state, etc.).
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeResponse {
    pub outcome: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl From<Outcome> for OutcomeResponse {
    fn from(outcome: Outcome) -> Self {
        Self { outcome: outcome.code(), message: outcome.message(), detail: None }
    }
}

impl OutcomeResponse {
    pub fn with_detail(outcome: Outcome, detail: serde_json::Value) -> Self {
        Self { outcome: outcome.code(), message: outcome.message(), detail: Some(detail) }
    }
}
