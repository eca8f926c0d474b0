// ===============================
// src/recorder.rs
// ===============================
//
// Trade ledger: sink untuk LedgerRecord dari state machine.
// - LedgerSink::record tidak pernah blocking (best-effort, boleh drop).
// - ChannelLedger: bounded mpsc + try_send, record di-drop kalau penuh.
// - run(): tulis tiap record sebagai satu baris JSON (append).
// - Flush periodik tiap 1s dan/atau tiap FLUSH_EVERY_N_RECORDS.
// - Otomatis membuat parent directory; jika tulis gagal, reopen dan lanjut.
// - Optional: teruskan record ke notifier (webhook).
//
use std::path::Path;
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::LedgerRecord;
use crate::metrics::LEDGER_DROPPED;

const FLUSH_EVERY_N_RECORDS: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("ledger queue full")]
    Full,
    #[error("ledger queue closed")]
    Closed,
}

/// Where the state machine sends trade events. Must not block.
pub trait LedgerSink {
    fn record(&mut self, rec: LedgerRecord) -> Result<(), SinkError>;
}

/// Sink for running without a recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLedger;

impl LedgerSink for NoopLedger {
    fn record(&mut self, _rec: LedgerRecord) -> Result<(), SinkError> { Ok(()) }
}

#[derive(Debug, Clone)]
pub struct ChannelLedger { tx: mpsc::Sender<LedgerRecord> }

impl ChannelLedger {
    pub fn new(tx: mpsc::Sender<LedgerRecord>) -> Self { Self { tx } }
}

impl LedgerSink for ChannelLedger {
    fn record(&mut self, rec: LedgerRecord) -> Result<(), SinkError> {
        self.tx.try_send(rec).map_err(|e| {
            LEDGER_DROPPED.inc();
            match e {
                mpsc::error::TrySendError::Full(_) => SinkError::Full,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            }
        })
    }
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(
    mut rx: mpsc::Receiver<LedgerRecord>,
    path: String,
    notify_tx: Option<mpsc::Sender<LedgerRecord>>,
) {
    info!(%path, "recorder: started");
    let mut writer = match open_writer(&path).await {
        Ok(w) => Some(w),
        Err(e) => {
            // tetap drain channel supaya sender tidak penuh; trading tidak terganggu
            error!(?e, %path, "recorder: open failed, records will not be persisted");
            None
        }
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_rec = rx.recv() => {
                let Some(rec) = maybe_rec else {
                    if let Some(w) = writer.as_mut() { let _ = w.flush().await; }
                    info!("recorder: channel closed, stopped");
                    break;
                };

                if let Some(ntx) = &notify_tx {
                    if ntx.try_send(rec.clone()).is_err() {
                        warn!(order_id = rec.order_id, "recorder: notifier queue full, skip");
                    }
                }

                let line = match serde_json::to_string(&rec) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip record");
                        continue;
                    }
                };

                let res = match writer.as_mut() {
                    Some(w) => write_line(w, &line).await,
                    None => continue,
                };
                if let Err(e) = res {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(mut fresh) => {
                            if let Err(e2) = write_line(&mut fresh, &line).await {
                                error!(?e2, "recorder: write failed again after reopen, drop record");
                            }
                            writer = Some(fresh);
                        }
                        Err(e2) => error!(?e2, "recorder: reopen failed, drop record"),
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_RECORDS {
                    if let Some(w) = writer.as_mut() { let _ = w.flush().await; }
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                if let Some(w) = writer.as_mut() { let _ = w.flush().await; }
                since_last_flush = 0;
            }
        }
    }
}
