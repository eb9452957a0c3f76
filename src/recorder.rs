// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder untuk event engine:
// - Setiap Event (order update, position update, catatan) jadi satu baris JSON.
// - BufWriter + flush tiap 1s atau tiap 1000 event.
// - Parent directory dibuat otomatis.
// - Kalau tulis gagal, file dibuka ulang sekali lalu lanjut.
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` agar aktif (lihat main.rs).
//
use std::io;
use std::path::Path;

use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Drain `rx` into `path` until every sender is dropped.
pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) -> io::Result<()> {
    let mut writer = open_writer(&path).await?;
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    writer.flush().await?;
                    info!("recorder: channel closed, stopped");
                    return Ok(());
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    warn!(?e, "recorder: write failed, reopening");
                    writer = open_writer(&path).await?;
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    writer.flush().await?;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                if since_last_flush > 0 {
                    writer.flush().await?;
                    since_last_flush = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let dir = std::env::temp_dir().join(format!("order_engine_rec_{}", std::process::id()));
        let path = dir.join("nested").join("events.jsonl");
        let path_str = path.to_string_lossy().to_string();

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path_str.clone()));
        tx.send(Event::Note("boot".into())).await.expect("send");
        tx.send(Event::Note("shutdown".into())).await.expect("send");
        drop(tx);
        task.await.expect("join").expect("recorder ok");

        let body = tokio::fs::read_to_string(&path).await.expect("read back");
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["type"], "note");
        assert_eq!(first["data"], "boot");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
