// ===============================
// src/notify.rs
// ===============================
//
// Mirror ledger ke webhook (Discord-style `{"content": ...}`).
// Hanya Placed & Executed yang dikirim; gagal kirim cukup di-log.
//
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{fmt_ticks, LedgerEventKind, LedgerRecord};

pub fn summary(rec: &LedgerRecord) -> Option<String> {
    let head = match rec.kind {
        LedgerEventKind::Placed => format!(
            "Placed {} stop #{} qty {} @ trigger {}",
            rec.side.as_str(), rec.order_id, rec.qty, fmt_ticks(rec.price)
        ),
        LedgerEventKind::Executed => format!(
            "{} #{} completed @ {} (filled {})",
            rec.side.as_str(), rec.order_id, fmt_ticks(rec.price), rec.filled_total
        ),
        LedgerEventKind::PartialFill => return None,
    };
    Some(match rec.loss {
        Some(loss) => format!("{head}. Loss: {}. Running loss: {}", fmt_ticks(loss), fmt_ticks(rec.running_loss)),
        None => head,
    })
}

pub async fn run(mut rx: mpsc::Receiver<LedgerRecord>, url: String) {
    info!("notifier: started");
    let http = reqwest::Client::new();
    while let Some(rec) = rx.recv().await {
        let Some(content) = summary(&rec) else { continue };
        match http.post(&url).json(&json!({ "content": content })).send().await {
            Ok(rsp) if rsp.status().is_success() => {}
            Ok(rsp) => warn!(code = %rsp.status(), order_id = rec.order_id, "notifier: webhook rejected"),
            Err(e) => warn!(?e, order_id = rec.order_id, "notifier: webhook send failed"),
        }
    }
    info!("notifier: channel closed, stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, Side};

    fn rec(kind: LedgerEventKind, side: Side, loss: Option<i64>) -> LedgerRecord {
        LedgerRecord {
            ts: String::new(),
            order_id: 12,
            kind,
            side,
            order_kind: OrderKind::Stop,
            price: 950,
            qty: 100,
            filled_total: 100,
            loss,
            running_loss: 5000,
            note: String::new(),
        }
    }

    #[test]
    fn executed_sell_mentions_loss() {
        let text = summary(&rec(LedgerEventKind::Executed, Side::Sell, Some(5000))).unwrap();
        assert_eq!(text, "SELL #12 completed @ 9.50 (filled 100). Loss: 50.00. Running loss: 50.00");
    }

    #[test]
    fn partial_fills_are_not_mirrored() {
        assert!(summary(&rec(LedgerEventKind::PartialFill, Side::Buy, None)).is_none());
        assert!(summary(&rec(LedgerEventKind::Placed, Side::Buy, None)).unwrap().starts_with("Placed BUY"));
    }
}
