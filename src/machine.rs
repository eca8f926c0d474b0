// ===============================
// src/machine.rs (position & order state machine)
// ===============================
//
// Satu-satunya pemilik state trading. Semua BrokerEvent masuk lewat
// `FlipMachine::handle`, dan `run` adalah satu-satunya konsumen channel
// event, jadi handler selalu berjalan satu per satu tanpa lock.
//
// Invariant:
// - paling banyak satu ActiveOrder; place_buy/place_sell no-op selama masih ada
// - fill_tracker hanya berisi entry untuk ActiveOrder
// - evaluasi awal (rekonsiliasi) terjadi tepat sekali, setelah Ready,
//   OpenOrderEnd dan PositionEnd semuanya diterima (urutan bebas)
//
use ahash::AHashMap as HashMap;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::TradingConfig;
use crate::domain::{fmt_ticks, BrokerEvent, LedgerEventKind, LedgerRecord, OrderKind, Side, StopOrder};
use crate::gateway::OrderGateway;
use crate::metrics::{ACTIVE_ORDER, BROKER_ERRORS, EVENTS_IGNORED, FILLS, HELD_QTY, ORDERS_PLACED, ORDER_SUBMIT_ERRORS, RUNNING_LOSS};
use crate::recorder::LedgerSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// belum ada order id dari broker
    Uninitialized,
    AwaitingReconciliation,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    PartiallyHeld(i64),
    FullyHeld,
}

impl PositionState {
    pub fn derive(held_qty: i64, order_qty: i64) -> Self {
        if held_qty >= order_qty {
            PositionState::FullyHeld
        } else if held_qty <= 0 {
            PositionState::Flat
        } else {
            PositionState::PartiallyHeld(held_qty)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessFlags {
    pub open_orders_loaded: bool,
    pub positions_loaded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossLedger {
    /// harga eksekusi BUY terakhir (bukan VWAP)
    pub last_buy_px: Option<i64>,
    /// sum((buy - sell) * qty) atas semua SELL fill, dalam ticks; negatif = profit
    pub running_loss: i64,
}

pub struct FlipMachine<G: OrderGateway, L: LedgerSink> {
    cfg: TradingConfig,
    gateway: G,
    ledger: L,
    next_order_id: Option<i64>,
    flags: ReadinessFlags,
    reconciled: bool,
    held_qty: i64,
    position: Option<PositionState>,
    active: Option<StopOrder>,
    fill_tracker: HashMap<i64, i64>,
    loss: LossLedger,
}

impl<G: OrderGateway, L: LedgerSink> FlipMachine<G, L> {
    pub fn new(cfg: TradingConfig, gateway: G, ledger: L) -> Self {
        Self {
            cfg,
            gateway,
            ledger,
            next_order_id: None,
            flags: ReadinessFlags::default(),
            reconciled: false,
            held_qty: 0,
            position: None,
            active: None,
            fill_tracker: HashMap::new(),
            loss: LossLedger::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        match (self.next_order_id, self.reconciled) {
            (_, true) => Phase::Running,
            (Some(_), false) => Phase::AwaitingReconciliation,
            (None, false) => Phase::Uninitialized,
        }
    }

    /// None sampai rekonsiliasi selesai.
    pub fn position(&self) -> Option<PositionState> { self.position }
    pub fn held_qty(&self) -> i64 { self.held_qty }
    pub fn active_order(&self) -> Option<&StopOrder> { self.active.as_ref() }
    pub fn filled_qty(&self, order_id: i64) -> Option<i64> { self.fill_tracker.get(&order_id).copied() }
    pub fn loss(&self) -> LossLedger { self.loss }
    pub fn flags(&self) -> ReadinessFlags { self.flags }
    pub fn gateway(&self) -> &G { &self.gateway }
    pub fn ledger(&self) -> &L { &self.ledger }

    pub fn handle(&mut self, ev: BrokerEvent) {
        match ev {
            BrokerEvent::Ready { next_order_id } => self.on_ready(next_order_id),
            BrokerEvent::OpenOrder { symbol, side, kind, order_id, qty, trigger_px } => {
                self.on_open_order(StopOrder { order_id, symbol, side, kind, trigger_px, qty })
            }
            BrokerEvent::OpenOrderEnd => {
                self.flags.open_orders_loaded = true;
                info!("open orders loaded");
                self.reconcile_if_ready();
            }
            BrokerEvent::Position { symbol, qty } => self.on_position(&symbol, qty),
            BrokerEvent::PositionEnd => {
                self.flags.positions_loaded = true;
                info!("positions loaded");
                self.reconcile_if_ready();
            }
            BrokerEvent::Fill { order_id, px, qty } => self.on_fill(order_id, px, qty),
            BrokerEvent::MarketTick { px, ts_ns } => debug!(px = %fmt_ticks(px), %ts_ns, "tick"),
            BrokerEvent::Error { req_id, code, message } => {
                BROKER_ERRORS.inc();
                error!(req_id, code, %message, "broker error");
            }
        }
    }

    fn on_ready(&mut self, seed: i64) {
        // reconnect bisa kirim seed lagi; jangan mundur
        let next = self.next_order_id.map_or(seed, |cur| cur.max(seed));
        self.next_order_id = Some(next);
        info!(next_order_id = next, "next valid order id");
        self.reconcile_if_ready();
    }

    fn on_open_order(&mut self, order: StopOrder) {
        if order.symbol != self.cfg.instrument.symbol || order.kind != OrderKind::Stop {
            EVENTS_IGNORED.with_label_values(&["open_order"]).inc();
            debug!(symbol = %order.symbol, kind = ?order.kind, order_id = order.order_id, "open order ignored");
            return;
        }
        // setelah rekonsiliasi hanya refresh order aktif yang sama; order yang
        // sedang terisi tidak boleh diganti
        match &self.active {
            Some(prev) if prev.order_id != order.order_id => {
                if self.reconciled || !self.fill_tracker.is_empty() {
                    EVENTS_IGNORED.with_label_values(&["open_order"]).inc();
                    warn!(active = prev.order_id, other = order.order_id, "open order ignored, another order is active");
                    return;
                }
                warn!(prev = prev.order_id, new = order.order_id, "replacing adopted open order");
            }
            None if self.reconciled => {
                EVENTS_IGNORED.with_label_values(&["open_order"]).inc();
                warn!(order_id = order.order_id, "open order after reconciliation ignored");
                return;
            }
            _ => {}
        }
        info!(order_id = order.order_id, side = order.side.as_str(), qty = order.qty, trigger = %fmt_ticks(order.trigger_px), "found open order");
        self.active = Some(order);
        ACTIVE_ORDER.set(1);
    }

    fn on_position(&mut self, symbol: &str, qty: i64) {
        if symbol != self.cfg.instrument.symbol {
            EVENTS_IGNORED.with_label_values(&["position"]).inc();
            debug!(%symbol, qty, "position ignored");
            return;
        }
        // short tidak dikelola
        self.held_qty = qty.max(0);
        HELD_QTY.set(self.held_qty);
        info!(%symbol, qty, held_qty = self.held_qty, "existing position");
    }

    fn reconcile_if_ready(&mut self) {
        if self.reconciled
            || !self.flags.open_orders_loaded
            || !self.flags.positions_loaded
            || self.next_order_id.is_none()
        {
            return;
        }
        self.reconciled = true;

        let state = PositionState::derive(self.held_qty, self.cfg.order_qty);
        self.position = Some(state);
        info!(held_qty = self.held_qty, ?state, "initialization complete");

        if let Some(o) = &self.active {
            info!(order_id = o.order_id, side = o.side.as_str(), "existing order detected; no initial order placed");
            return;
        }
        match state {
            PositionState::FullyHeld => self.place_sell(None),
            PositionState::Flat => self.place_buy(),
            PositionState::PartiallyHeld(held) => self.place_sell(Some(held)),
        }
    }

    pub fn place_buy(&mut self) {
        self.place(Side::Buy, self.cfg.upper_bound, self.cfg.order_qty);
    }

    /// `qty` override hanya dipakai saat posisi parsial ditemukan di startup.
    pub fn place_sell(&mut self, qty: Option<i64>) {
        self.place(Side::Sell, self.cfg.lower_bound, qty.unwrap_or(self.cfg.order_qty));
    }

    fn place(&mut self, side: Side, trigger_px: i64, qty: i64) {
        if let Some(o) = &self.active {
            debug!(order_id = o.order_id, side = side.as_str(), "placement skipped, order already active");
            return;
        }
        let Some(order_id) = self.next_order_id else {
            warn!(side = side.as_str(), "placement skipped, no order id from broker yet");
            return;
        };
        self.next_order_id = Some(order_id + 1);

        let order = StopOrder {
            order_id,
            symbol: self.cfg.instrument.symbol.clone(),
            side,
            kind: OrderKind::Stop,
            trigger_px,
            qty,
        };
        if let Err(e) = self.gateway.submit_order(&order) {
            ORDER_SUBMIT_ERRORS.inc();
            error!(?e, order_id, "order submission failed");
        }
        ORDERS_PLACED.with_label_values(&[side.as_str()]).inc();
        ACTIVE_ORDER.set(1);
        info!(order_id, side = side.as_str(), qty, trigger = %fmt_ticks(trigger_px), "placed stop order");

        self.emit(LedgerRecord {
            ts: Utc::now().to_rfc3339(),
            order_id,
            kind: LedgerEventKind::Placed,
            side,
            order_kind: OrderKind::Stop,
            price: trigger_px,
            qty,
            filled_total: 0,
            loss: None,
            running_loss: self.loss.running_loss,
            note: format!("Stop {} order placed.", side.as_str()),
        });
        self.active = Some(order);
    }

    fn on_fill(&mut self, order_id: i64, px: i64, qty: i64) {
        let Some(active) = self.active.clone().filter(|o| o.order_id == order_id) else {
            EVENTS_IGNORED.with_label_values(&["fill"]).inc();
            debug!(order_id, "fill for unknown order ignored");
            return;
        };
        if qty <= 0 {
            EVENTS_IGNORED.with_label_values(&["fill"]).inc();
            warn!(order_id, qty, "non-positive fill ignored");
            return;
        }

        let filled_total = {
            let total = self.fill_tracker.entry(order_id).or_insert(0);
            *total += qty;
            *total
        };
        let complete = filled_total >= active.qty;
        FILLS.with_label_values(&[active.side.as_str()]).inc();

        let loss = match active.side {
            Side::Buy => {
                self.loss.last_buy_px = Some(px);
                self.held_qty += qty;
                None
            }
            Side::Sell => {
                let loss = self.loss.last_buy_px.map_or(0, |buy| (buy - px) * qty);
                self.loss.running_loss += loss;
                self.held_qty = (self.held_qty - qty).max(0);
                RUNNING_LOSS.set(self.loss.running_loss);
                Some(loss)
            }
        };
        HELD_QTY.set(self.held_qty);

        let note = match loss {
            Some(l) => format!(
                "{} fill at {}. Total {}/{}. Loss: {}. Running loss: {}",
                active.side.as_str(), fmt_ticks(px), filled_total, active.qty, fmt_ticks(l), fmt_ticks(self.loss.running_loss)
            ),
            None => format!("{} fill at {}. Total {}/{}", active.side.as_str(), fmt_ticks(px), filled_total, active.qty),
        };
        if complete {
            info!(order_id, side = active.side.as_str(), px = %fmt_ticks(px), filled_total, running_loss = %fmt_ticks(self.loss.running_loss), "order fully filled");
        } else {
            info!(order_id, side = active.side.as_str(), px = %fmt_ticks(px), qty, filled_total, requested = active.qty, "partial fill");
        }
        self.emit(LedgerRecord {
            ts: Utc::now().to_rfc3339(),
            order_id,
            kind: if complete { LedgerEventKind::Executed } else { LedgerEventKind::PartialFill },
            side: active.side,
            order_kind: active.kind,
            price: px,
            qty,
            filled_total,
            loss,
            running_loss: self.loss.running_loss,
            note,
        });

        if !complete {
            return;
        }
        self.active = None;
        self.fill_tracker.remove(&order_id);
        ACTIVE_ORDER.set(0);
        match active.side {
            Side::Buy => {
                self.position = Some(PositionState::FullyHeld);
                self.place_sell(None);
            }
            Side::Sell => {
                self.position = Some(PositionState::Flat);
                self.place_buy();
            }
        }
    }

    fn emit(&mut self, rec: LedgerRecord) {
        if let Err(e) = self.ledger.record(rec) {
            warn!(?e, "ledger record dropped");
        }
    }
}

/// Event loop: satu-satunya konsumen event broker. Mengembalikan machine saat stream ditutup.
pub async fn run<G: OrderGateway, L: LedgerSink>(
    mut rx: mpsc::Receiver<BrokerEvent>,
    mut machine: FlipMachine<G, L>,
) -> FlipMachine<G, L> {
    info!(symbol = %machine.cfg.instrument.symbol, "state machine: started");
    while let Some(ev) = rx.recv().await {
        debug!(kind = ev.label(), "event");
        machine.handle(ev);
    }
    info!(running_loss = %fmt_ticks(machine.loss.running_loss), "state machine: event stream closed");
    machine
}
