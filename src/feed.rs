// ===============================
// src/feed.rs
// ===============================
//
// Market data untuk paper venue:
// - run_mock : random-walk last price (~10 ticks/s)
//
// Harga dalam ticks (2 desimal, px * 100). Tick hanya informatif untuk state
// machine; paper venue memakainya untuk memicu stop order.
//

use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio::{sync::broadcast, time::sleep};

use crate::domain::MdTick;
use crate::metrics::TICKS;

const MIN_PX: i64 = 1;
const MAX_STEP: i64 = 5;

pub fn next_px(px: i64, step: i64) -> i64 { (px + step).max(MIN_PX) }

/// Generator market data mock (random walk) ~10 ticks/s
pub async fn run_mock(md_tx: broadcast::Sender<MdTick>, symbol: String, start_px: i64) {
    let mut px = start_px.max(MIN_PX);
    loop {
        // jangan simpan ThreadRng melewati .await
        let step = rand::thread_rng().gen_range(-MAX_STEP..=MAX_STEP);
        px = next_px(px, step);
        let tick = MdTick {
            ts_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128,
            symbol: symbol.clone(),
            last_px: px,
        };
        if md_tx.send(tick).is_err() {
            tracing::debug!("feed: no subscribers");
        }
        TICKS.inc();
        sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_never_goes_below_one_tick() {
        assert_eq!(next_px(3, -5), MIN_PX);
        assert_eq!(next_px(1000, 5), 1005);
    }

    #[tokio::test]
    async fn mock_feed_publishes_ticks_for_symbol() {
        let (tx, mut rx) = broadcast::channel(16);
        let task = tokio::spawn(run_mock(tx, "TSLA".into(), 1000));
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.symbol, "TSLA");
        assert!((1000 - MAX_STEP..=1000 + MAX_STEP).contains(&tick.last_px));
        task.abort();
    }
}
