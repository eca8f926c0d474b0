// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Order / fill flow --------
pub static ORDERS_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_placed_total", "stop orders placed (label: side)"), &["side"]).unwrap()
});

pub static ORDER_SUBMIT_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("order_submit_errors_total", "orders the gateway could not accept").unwrap()
});

pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("fills_total", "execution fills applied (label: side)"), &["side"]).unwrap()
});

pub static EVENTS_IGNORED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("events_ignored_total", "broker events filtered out (label: kind)"),
        &["kind"],
    )
    .unwrap()
});

pub static BROKER_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("broker_errors_total", "error events reported by the broker").unwrap());

pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "market data ticks").unwrap());

pub static LEDGER_DROPPED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ledger_dropped_total", "ledger records dropped (queue full/closed)").unwrap());

// -------- Position & PnL --------
pub static HELD_QTY: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("position_held_qty", "shares held").unwrap());

pub static ACTIVE_ORDER: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("active_order", "1 if a stop order is outstanding").unwrap());

pub static RUNNING_LOSS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("running_loss", "cumulative realized loss (ticks)").unwrap());

// ---- Config visibility ----
pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_symbol", "configured symbol (label: symbol)"), &["symbol"]).unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(ORDERS_PLACED.clone())),
        REGISTRY.register(Box::new(ORDER_SUBMIT_ERRORS.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(EVENTS_IGNORED.clone())),
        REGISTRY.register(Box::new(BROKER_ERRORS.clone())),
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(LEDGER_DROPPED.clone())),
        REGISTRY.register(Box::new(HELD_QTY.clone())),
        REGISTRY.register(Box::new(ACTIVE_ORDER.clone())),
        REGISTRY.register(Box::new(RUNNING_LOSS.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(?e, %addr, "metrics bind failed, exporter disabled");
                return;
            }
        };
        tracing::info!(%addr, "metrics listening (/ and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_output_contains_registered_families() {
        init();
        RUNNING_LOSS.set(5000);
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("running_loss"));
    }
}
