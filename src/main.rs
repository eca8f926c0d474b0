// ===============================
// src/main.rs
// ===============================
/*
 cd /home/kukuhtw/rust/stop_flip_bot

 cargo run --release -- --stock-symbol TSLA --upper 10.50 --lower 9.50 --buy-qty 100

 # state yang aktif
curl -s localhost:9898/metrics | egrep '^(position_held_qty|active_order|running_loss)'

*/
/*
=============================================================================
Project : stop_flip_bot — single-instrument stop-order flipping client
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Holds at most one stop order for one instrument, alternating BUY
          at the upper trigger and SELL at the lower trigger, reconciles
          against the broker's open orders/positions on startup, aggregates
          partial fills, tracks running loss, exposes Prometheus metrics and
          records JSONL trade events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod notify;           // optional webhook mirror of the ledger
mod feed;
mod gateway;          // OrderGateway + paper venue
mod machine;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::domain::{fmt_ticks, px_to_ticks, BrokerEvent, LedgerRecord, MdTick, StopOrder};
use crate::gateway::{ChannelGateway, PaperCfg};
use crate::machine::FlipMachine;
use crate::recorder::{ChannelLedger, NoopLedger};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load & validate config (fatal sebelum koneksi apapun) ----
    let (args, cfg) = match config::load() {
        Ok(v) => v,
        Err(e) => {
            error!(%e, "invalid configuration");
            std::process::exit(2);
        }
    };

    info!(
        symbol = %cfg.instrument.symbol,
        exchange = %cfg.instrument.exchange,
        currency = %cfg.instrument.currency,
        upper = %fmt_ticks(cfg.upper_bound),
        lower = %fmt_ticks(cfg.lower_bound),
        buy_qty = cfg.order_qty,
        record_file = %args.record_file,
        notify = args.notify_webhook_url.is_some(),
        "trading bot configuration"
    );

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(args.metrics_port);
    crate::metrics::CONFIG_SYMBOL
        .with_label_values(&[&cfg.instrument.symbol])
        .set(1);

    // ---- Buses ----
    let (md_tx, md_rx) = broadcast::channel::<MdTick>(1024);
    let (order_tx, order_rx) = mpsc::unbounded_channel::<StopOrder>();
    let (event_tx, event_rx) = mpsc::channel::<BrokerEvent>(4096);
    let (ledger_tx, ledger_rx) = mpsc::channel::<LedgerRecord>(1024);

    // ---- Ledger: recorder (+ optional notifier); RECORD_FILE="" = tanpa recorder ----
    let record_enabled = args.recorder_enabled();
    if args.notify_without_recorder() {
        warn!("NOTIFY_WEBHOOK_URL is set but RECORD_FILE is empty; notifications are disabled");
    }
    let recorder_task = record_enabled.then(|| {
        let notify_tx = args.notify_webhook_url.clone().map(|url| {
            let (tx, rx) = mpsc::channel::<LedgerRecord>(256);
            tokio::spawn(notify::run(rx, url));
            tx
        });
        tokio::spawn(recorder::run(ledger_rx, args.record_file.clone(), notify_tx))
    });

    // ---- Paper venue + feed ----
    let start_px = args
        .paper_start_px
        .map(px_to_ticks)
        .unwrap_or((cfg.upper_bound + cfg.lower_bound) / 2);
    tokio::spawn(feed::run_mock(md_tx, cfg.instrument.symbol.clone(), start_px));
    tokio::spawn(gateway::run_paper(
        PaperCfg {
            symbol: cfg.instrument.symbol.clone(),
            seed_order_id: args.paper_seed_order_id,
            position: args.paper_position,
        },
        order_rx,
        md_rx,
        event_tx,
    ));

    // ---- State machine (satu-satunya konsumen event) ----
    let gw = ChannelGateway::new(order_tx);
    let mut machine_task = if record_enabled {
        let m = FlipMachine::new(cfg, gw, ChannelLedger::new(ledger_tx));
        tokio::spawn(async move { machine::run(event_rx, m).await.loss() })
    } else {
        let m = FlipMachine::new(cfg, gw, NoopLedger);
        tokio::spawn(async move { machine::run(event_rx, m).await.loss() })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c caught, exiting");
            // abort = drop machine = tutup ledger sender, recorder lalu flush & berhenti
            machine_task.abort();
            let _ = (&mut machine_task).await;
        }
        res = &mut machine_task => {
            match res {
                Ok(loss) => info!(running_loss = %fmt_ticks(loss.running_loss), "event stream ended"),
                Err(e) => error!(?e, "state machine task failed"),
            }
        }
    }

    if let Some(task) = recorder_task {
        if let Err(e) = task.await {
            error!(?e, "recorder task failed");
        }
    }
}
