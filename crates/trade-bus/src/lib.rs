pub mod bus;
pub mod message;

pub use bus::{ChannelOutputBus, FailureCounters, HttpOutputBus, OutputBus};
pub use message::{
    BusMessage, OrderAction, TpMode, TrailMode, REASON_AI_FALLBACK_CLOSE, REASON_AI_FALLBACK_HOLD,
    REASON_MARKET_GUARD_CLOSE, REASON_WEEKEND_DISCRETIONARY_CLOSE,
};
