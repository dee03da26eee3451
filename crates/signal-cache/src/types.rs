use serde::{Deserialize, Serialize};

/// Canonical trade side. Absence of a side (context-only signals) is
/// represented as `None` rather than a third enum variant, matching the
/// spec's `side ∈ {"buy","sell",""}` where `""` means "no side".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Context,
    EntryTrigger,
    Structure,
    TrendFilter,
}

impl SignalType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "context" => Some(SignalType::Context),
            "entry_trigger" => Some(SignalType::EntryTrigger),
            "structure" => Some(SignalType::Structure),
            "trend_filter" => Some(SignalType::TrendFilter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Context => "context",
            SignalType::EntryTrigger => "entry_trigger",
            SignalType::Structure => "structure",
            SignalType::TrendFilter => "trend_filter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmed {
    BarClose,
    Intrabar,
}

impl Confirmed {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bar_close" => Some(Confirmed::BarClose),
            "intrabar" => Some(Confirmed::Intrabar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confirmed::BarClose => "bar_close",
            Confirmed::Intrabar => "intrabar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Normal,
    Strong,
}

impl Strength {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "normal" => Some(Strength::Normal),
            "strong" => Some(Strength::Strong),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Normal => "normal",
            Strength::Strong => "strong",
        }
    }
}

/// Canonical source names recognized by the normalizer. `Other` preserves
/// whatever string arrived unmapped, matching the spec's "unknown preserved
/// as-is" rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    QTrend,
    QTrendStrong,
    Zones,
    Fvg,
    Osgfc,
    Lorentzian,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::QTrend => "Q-Trend",
            Source::QTrendStrong => "Q-Trend Strong",
            Source::Zones => "Zones",
            Source::Fvg => "FVG",
            Source::Osgfc => "OSGFC",
            Source::Lorentzian => "Lorentzian",
            Source::Other(s) => s.as_str(),
        }
    }

    pub fn is_qtrend_family(&self) -> bool {
        matches!(self, Source::QTrend | Source::QTrendStrong)
    }
}

/// An immutable, normalized trading signal. `signal_time` is set exactly
/// once at construction and never overwritten by later normalization
/// passes — see `Signal::new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub source: Source,
    pub side: Option<Side>,
    pub signal_type: Option<SignalType>,
    pub event: String,
    pub confirmed: Option<Confirmed>,
    pub strength: Option<Strength>,
    pub tf: String,
    pub price: Option<f64>,
    pub signal_time: i64,
    pub receive_time: i64,
}

impl Signal {
    /// The dedupe key used by the signal cache (§4.2): symbol, source,
    /// event, signal_type, confirmed, side, and the floor of signal_time
    /// (falling back to receive_time when signal_time was itself derived
    /// from receive_time — the normalizer guarantees `signal_time` is
    /// always populated, so this is simply `signal_time`).
    pub fn dedupe_key(&self) -> (String, String, String, String, String, String, i64) {
        (
            self.symbol.clone(),
            self.source.as_str().to_string(),
            self.event.clone(),
            self.signal_type.map(|t| t.as_str().to_string()).unwrap_or_default(),
            self.confirmed.map(|c| c.as_str().to_string()).unwrap_or_default(),
            self.side.map(|s| s.as_str().to_string()).unwrap_or_default(),
            self.signal_time,
        )
    }

    pub fn is_touch_event(&self) -> bool {
        let e = self.event.as_str();
        e.contains("touch")
            || e.contains("retrace")
            || e.contains("bounce")
            || matches!(e, "zone_retrace_touch" | "zone_touch")
    }

    pub fn is_zone_presence_event(&self) -> bool {
        matches!(
            self.event.as_str(),
            "new_zone_confirmed" | "zone_confirmed" | "new_zone" | "zone_created" | "zone_breakout"
        )
    }
}
