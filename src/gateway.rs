// ===============================
// src/gateway.rs
// ===============================
//
// Broker seam:
// - OrderGateway      : outbound submission used by the state machine (non-blocking)
// - ChannelGateway    : OrderGateway over an unbounded mpsc to the venue task
// - run_paper         : paper venue. Emits Ready + snapshots, rests stop orders,
//                       triggers them from the mock feed and fills in two pieces.
//
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::domain::{BrokerEvent, MdTick, Side, StopOrder};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("order channel closed (order_id={0})")]
    Closed(i64),
}

pub trait OrderGateway {
    fn submit_order(&mut self, order: &StopOrder) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone)]
pub struct ChannelGateway { tx: mpsc::UnboundedSender<StopOrder> }

impl ChannelGateway {
    pub fn new(tx: mpsc::UnboundedSender<StopOrder>) -> Self { Self { tx } }
}

impl OrderGateway for ChannelGateway {
    fn submit_order(&mut self, order: &StopOrder) -> Result<(), GatewayError> {
        self.tx.send(order.clone()).map_err(|_| GatewayError::Closed(order.order_id))
    }
}

#[derive(Debug, Clone)]
pub struct PaperCfg {
    pub symbol: String,
    pub seed_order_id: i64,
    pub position: i64,
}

#[derive(Debug)]
struct Resting { order: StopOrder, remaining: i64, triggered: bool }

impl Resting {
    fn is_triggered_by(&self, px: i64) -> bool {
        match self.order.side {
            Side::Buy => px >= self.order.trigger_px,
            Side::Sell => px <= self.order.trigger_px,
        }
    }

    /// First fill after trigger takes half (rounded up), the next tick takes the rest.
    fn next_fill_qty(&self) -> i64 {
        if self.triggered { self.remaining } else { self.remaining - self.remaining / 2 }
    }
}

/// Apply one price to the resting book; returns the fills it produced.
fn match_tick(book: &mut Vec<Resting>, px: i64) -> Vec<BrokerEvent> {
    let mut fills = Vec::new();
    for r in book.iter_mut() {
        if !r.triggered && !r.is_triggered_by(px) {
            continue;
        }
        let qty = r.next_fill_qty();
        r.triggered = true;
        r.remaining -= qty;
        fills.push(BrokerEvent::Fill { order_id: r.order.order_id, px, qty });
    }
    book.retain(|r| r.remaining > 0);
    fills
}

pub async fn run_paper(
    cfg: PaperCfg,
    mut order_rx: mpsc::UnboundedReceiver<StopOrder>,
    mut md_rx: broadcast::Receiver<MdTick>,
    event_tx: mpsc::Sender<BrokerEvent>,
) {
    info!(symbol = %cfg.symbol, seed = cfg.seed_order_id, position = cfg.position, "paper venue: started");

    let handshake = [
        BrokerEvent::Ready { next_order_id: cfg.seed_order_id },
        BrokerEvent::OpenOrderEnd,
        BrokerEvent::Position { symbol: cfg.symbol.clone(), qty: cfg.position },
        BrokerEvent::PositionEnd,
    ];
    for ev in handshake {
        if event_tx.send(ev).await.is_err() {
            warn!("paper venue: event channel closed during handshake");
            return;
        }
    }

    let mut book: Vec<Resting> = Vec::new();
    loop {
        tokio::select! {
            maybe_order = order_rx.recv() => {
                let Some(order) = maybe_order else {
                    info!("paper venue: order channel closed, stopped");
                    return;
                };
                debug!(order_id = order.order_id, side = order.side.as_str(), trigger = order.trigger_px, qty = order.qty, "paper venue: order resting");
                book.push(Resting { remaining: order.qty, order, triggered: false });
            }
            md = md_rx.recv() => {
                let md = match md {
                    Ok(md) => md,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "paper venue: feed lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("paper venue: feed closed, stopped");
                        return;
                    }
                };
                let mut out = vec![BrokerEvent::MarketTick { px: md.last_px, ts_ns: md.ts_ns }];
                out.extend(match_tick(&mut book, md.last_px));
                for ev in out {
                    if event_tx.send(ev).await.is_err() {
                        info!("paper venue: event channel closed, stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderKind;

    fn stop(order_id: i64, side: Side, trigger_px: i64, qty: i64) -> StopOrder {
        StopOrder { order_id, symbol: "TSLA".into(), side, kind: OrderKind::Stop, trigger_px, qty }
    }

    fn resting(order: StopOrder) -> Resting {
        Resting { remaining: order.qty, order, triggered: false }
    }

    #[test]
    fn buy_stop_triggers_at_or_above_and_fills_in_two_pieces() {
        let mut book = vec![resting(stop(1, Side::Buy, 1050, 101))];

        assert!(match_tick(&mut book, 1049).is_empty());

        let fills = match_tick(&mut book, 1050);
        assert_eq!(fills, vec![BrokerEvent::Fill { order_id: 1, px: 1050, qty: 51 }]);
        assert_eq!(book.len(), 1);

        // sudah ter-trigger: isi sisa walau harga turun lagi
        let fills = match_tick(&mut book, 1040);
        assert_eq!(fills, vec![BrokerEvent::Fill { order_id: 1, px: 1040, qty: 50 }]);
        assert!(book.is_empty());
    }

    #[test]
    fn sell_stop_triggers_at_or_below() {
        let mut book = vec![resting(stop(2, Side::Sell, 950, 1))];
        assert!(match_tick(&mut book, 951).is_empty());
        let fills = match_tick(&mut book, 949);
        assert_eq!(fills, vec![BrokerEvent::Fill { order_id: 2, px: 949, qty: 1 }]);
        assert!(book.is_empty());
    }

    #[test]
    fn channel_gateway_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut gw = ChannelGateway::new(tx);
        assert_eq!(gw.submit_order(&stop(3, Side::Buy, 1050, 10)), Ok(()));
        drop(rx);
        assert_eq!(gw.submit_order(&stop(4, Side::Buy, 1050, 10)), Err(GatewayError::Closed(4)));
    }

    #[tokio::test]
    async fn paper_venue_sends_handshake_then_ticks_and_fills() {
        let (order_tx, order_rx) = mpsc::unbounded_channel();
        let (md_tx, md_rx) = broadcast::channel(16);
        let (ev_tx, mut ev_rx) = mpsc::channel(64);
        let cfg = PaperCfg { symbol: "TSLA".into(), seed_order_id: 7, position: 40 };
        let task = tokio::spawn(run_paper(cfg, order_rx, md_rx, ev_tx));

        assert_eq!(ev_rx.recv().await, Some(BrokerEvent::Ready { next_order_id: 7 }));
        assert_eq!(ev_rx.recv().await, Some(BrokerEvent::OpenOrderEnd));
        assert_eq!(ev_rx.recv().await, Some(BrokerEvent::Position { symbol: "TSLA".into(), qty: 40 }));
        assert_eq!(ev_rx.recv().await, Some(BrokerEvent::PositionEnd));

        order_tx.send(stop(7, Side::Sell, 950, 40)).unwrap();
        // beri kesempatan venue menerima order sebelum tick
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        md_tx.send(MdTick { ts_ns: 1, symbol: "TSLA".into(), last_px: 940 }).unwrap();
        assert_eq!(ev_rx.recv().await, Some(BrokerEvent::MarketTick { px: 940, ts_ns: 1 }));
        assert_eq!(ev_rx.recv().await, Some(BrokerEvent::Fill { order_id: 7, px: 940, qty: 20 }));

        task.abort();
    }
}
