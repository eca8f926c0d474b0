// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : stop_flip_bot — single-instrument stop-order flipping client
Module  : config.rs
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
use clap::Parser;
use dotenvy::dotenv;
use thiserror::Error;

use crate::domain::{fmt_ticks, px_to_ticks, Instrument};

/// CLI flags, each with an ENV fallback (so `.env` works too).
#[derive(Parser, Clone, Debug)]
#[command(name = "stop_flip_bot", about = "Run the stop-order flipping bot.")]
pub struct Args {
    /// Ticker symbol (e.g. TSLA, AAPL)
    #[arg(long = "stock-symbol", env = "SYMBOL")]
    pub symbol: String,
    /// Trigger price for the BUY stop order
    #[arg(long, env = "UPPER")]
    pub upper: f64,
    /// Trigger price for the SELL stop order
    #[arg(long, env = "LOWER")]
    pub lower: f64,
    /// Shares per full cycle
    #[arg(long = "buy-qty", env = "BUY_QTY")]
    pub buy_qty: i64,

    #[arg(long, env = "EXCHANGE", default_value = "SMART")]
    pub exchange: String,
    #[arg(long, env = "CURRENCY", default_value = "USD")]
    pub currency: String,

    // files/metrics
    #[arg(long, env = "RECORD_FILE", default_value = "logs/trades.jsonl")]
    pub record_file: String,
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    pub notify_webhook_url: Option<String>,

    // paper venue
    #[arg(long, env = "PAPER_START_PX")]
    pub paper_start_px: Option<f64>,
    #[arg(long, env = "PAPER_SEED_ORDER_ID", default_value_t = 1)]
    pub paper_seed_order_id: i64,
    #[arg(long, env = "PAPER_POSITION", default_value_t = 0)]
    pub paper_position: i64,
}

impl Args {
    /// RECORD_FILE="" mematikan recorder.
    pub fn recorder_enabled(&self) -> bool { !self.record_file.trim().is_empty() }

    /// Webhook hanya di-feed oleh recorder; tanpa recorder notifikasi tidak terkirim.
    pub fn notify_without_recorder(&self) -> bool {
        self.notify_webhook_url.is_some() && !self.recorder_enabled()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("upper threshold ({upper}) must be greater than lower threshold ({lower}); prices are rounded to 2 decimals")]
    Bounds { upper: String, lower: String },
    #[error("buy quantity must be positive, got {0}")]
    Quantity(i64),
    #[error("symbol must not be empty")]
    Symbol,
}

/// Validated trading parameters. Prices in ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradingConfig {
    pub instrument: Instrument,
    pub upper_bound: i64,
    pub lower_bound: i64,
    pub order_qty: i64,
}

impl TradingConfig {
    pub fn new(instrument: Instrument, upper_bound: i64, lower_bound: i64, order_qty: i64) -> Result<Self, ConfigError> {
        if instrument.symbol.trim().is_empty() {
            return Err(ConfigError::Symbol);
        }
        if upper_bound <= lower_bound {
            return Err(ConfigError::Bounds { upper: fmt_ticks(upper_bound), lower: fmt_ticks(lower_bound) });
        }
        if order_qty <= 0 {
            return Err(ConfigError::Quantity(order_qty));
        }
        Ok(Self { instrument, upper_bound, lower_bound, order_qty })
    }

    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let instrument = Instrument {
            symbol: args.symbol.trim().to_ascii_uppercase(),
            exchange: args.exchange.clone(),
            currency: args.currency.clone(),
        };
        Self::new(instrument, px_to_ticks(args.upper), px_to_ticks(args.lower), args.buy_qty)
    }
}

pub fn load() -> Result<(Args, TradingConfig), ConfigError> {
    // Pastikan .env dibaca sebelum clap membaca ENV
    let _ = dotenv();
    let args = Args::parse();
    let cfg = TradingConfig::from_args(&args)?;
    Ok((args, cfg))
}
