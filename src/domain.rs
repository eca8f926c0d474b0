// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

/// Price scale: 2 decimals (px * 100), same as the rest of the bot.
pub const PX_SCALE: i64 = 100;

pub fn px_to_ticks(px: f64) -> i64 { (px * PX_SCALE as f64).round() as i64 }

pub fn fmt_ticks(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let abs = ticks.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / PX_SCALE as u64, abs % PX_SCALE as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "BUY", Side::Sell => "SELL" } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    #[serde(rename = "STP")] Stop,
    #[serde(rename = "LMT")] Limit,
    #[serde(rename = "MKT")] Market,
}

/// Tradable symbol + routing venue + settlement currency. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument { pub symbol: String, pub exchange: String, pub currency: String }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdTick { pub ts_ns: i128, pub symbol: String, pub last_px: i64 }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub trigger_px: i64,
    pub qty: i64,
}

/// Everything the broker can tell us, delivered on one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerEvent {
    Ready { next_order_id: i64 },
    OpenOrder { symbol: String, side: Side, kind: OrderKind, order_id: i64, qty: i64, trigger_px: i64 },
    OpenOrderEnd,
    Position { symbol: String, qty: i64 },
    PositionEnd,
    Fill { order_id: i64, px: i64, qty: i64 },
    MarketTick { px: i64, ts_ns: i128 },
    Error { req_id: i64, code: i32, message: String },
}

impl BrokerEvent {
    pub fn label(&self) -> &'static str {
        match self {
            BrokerEvent::Ready { .. } => "ready",
            BrokerEvent::OpenOrder { .. } => "open_order",
            BrokerEvent::OpenOrderEnd => "open_order_end",
            BrokerEvent::Position { .. } => "position",
            BrokerEvent::PositionEnd => "position_end",
            BrokerEvent::Fill { .. } => "fill",
            BrokerEvent::MarketTick { .. } => "tick",
            BrokerEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEventKind { Placed, PartialFill, Executed }

/// One line of the trade ledger (JSONL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: String,
    pub order_id: i64,
    pub kind: LedgerEventKind,
    pub side: Side,
    pub order_kind: OrderKind,
    /// trigger price for Placed, execution price for fills
    pub price: i64,
    pub qty: i64,
    pub filled_total: i64,
    pub loss: Option<i64>,
    pub running_loss: i64,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_format_with_two_decimals() {
        assert_eq!(px_to_ticks(10.2), 1020);
        assert_eq!(px_to_ticks(9.5), 950);
        assert_eq!(fmt_ticks(5000), "50.00");
        assert_eq!(fmt_ticks(-1205), "-12.05");
        assert_eq!(fmt_ticks(7), "0.07");
    }

    #[test]
    fn order_kind_serializes_as_broker_code() {
        assert_eq!(serde_json::to_string(&OrderKind::Stop).unwrap(), "\"STP\"");
        assert_eq!(Side::Sell.as_str(), "SELL");
    }
}
