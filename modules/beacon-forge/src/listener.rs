//! The pipe listener.
//!
//! One local-socket bind shared by N accept tasks, so a reconnecting Edge
//! always finds an instance listening even while another instance is mid
//! connection. Connections are line-oriented: one JSON record per line,
//! empty lines skipped, malformed lines logged and skipped. Decoded records
//! are `try_send`-ed onto the bounded enrichment channel — when it is full
//! the record is dropped rather than ever blocking the pipe.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beacon_common::{CaptureRecord, Result, ShutdownSignal};

const REACCEPT_DELAY: Duration = Duration::from_millis(200);

pub struct PipeListener {
    socket_path: PathBuf,
    instances: usize,
    tx: mpsc::Sender<CaptureRecord>,
    shutdown: ShutdownSignal,
}

impl PipeListener {
    pub fn new(
        socket_path: PathBuf,
        instances: usize,
        tx: mpsc::Sender<CaptureRecord>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            socket_path,
            instances: instances.max(1),
            tx,
            shutdown,
        }
    }

    /// Bind the socket and spawn the accept tasks. Returns once bound.
    pub fn spawn(self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A previous run may have left the socket file behind.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = Arc::new(UnixListener::bind(&self.socket_path)?);
        info!(path = %self.socket_path.display(), instances = self.instances, "Pipe listening");

        for instance in 0..self.instances {
            let listener = listener.clone();
            let tx = self.tx.clone();
            let mut shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let stream = tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => stream,
                            Err(e) => {
                                warn!(instance, error = %e, "Accept failed");
                                tokio::time::sleep(REACCEPT_DELAY).await;
                                continue;
                            }
                        },
                        _ = shutdown.recv() => break,
                    };

                    debug!(instance, "Pipe connection accepted");
                    handle_connection(stream, &tx, &mut shutdown).await;
                    debug!(instance, "Pipe connection closed");
                    tokio::time::sleep(REACCEPT_DELAY).await;
                }
            });
        }
        Ok(())
    }
}

/// Read one connection to EOF. Never blocks on the enrichment channel.
async fn handle_connection(
    stream: UnixStream,
    tx: &mpsc::Sender<CaptureRecord>,
    shutdown: &mut ShutdownSignal,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.recv() => return,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "Pipe read error");
                return;
            }
        };
        dispatch_line(&line, tx);
    }
}

/// Decode one line and push it at the enrichment channel.
pub fn dispatch_line(line: &str, tx: &mpsc::Sender<CaptureRecord>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let record = match CaptureRecord::from_line(line) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "Malformed record on pipe, skipping");
            return;
        }
    };
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(record) {
        warn!("Enrichment channel full, dropping record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::Shutdown;
    use chrono::Utc;
    use tokio::io::AsyncWriteExt;

    fn line(n: u32) -> String {
        CaptureRecord {
            company: "co".into(),
            pixel: format!("px{n}"),
            ip: "1.2.3.4".into(),
            path: "/co/px_SMART.GIF".into(),
            query: "sw=1".into(),
            headers: "{}".into(),
            ua: String::new(),
            referer: String::new(),
            received_at: Utc::now(),
        }
        .to_line()
        .unwrap()
    }

    #[tokio::test]
    async fn records_and_garbage_on_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("pipe.sock");
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown, signal) = Shutdown::new();

        PipeListener::new(socket_path.clone(), 2, tx, signal)
            .spawn()
            .unwrap();

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        let payload = format!("{}\n\nnot json at all\n{}\n", line(1), line(2));
        client.write_all(payload.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.pixel, "px1");
        assert_eq!(second.pixel, "px2");

        shutdown.trigger();
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        dispatch_line(&line(1), &tx);
        dispatch_line(&line(2), &tx);

        assert_eq!(rx.recv().await.unwrap().pixel, "px1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn edge_reconnect_is_accepted_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("pipe.sock");
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown, signal) = Shutdown::new();

        PipeListener::new(socket_path.clone(), 4, tx, signal)
            .spawn()
            .unwrap();

        for n in 0..3 {
            let mut client = UnixStream::connect(&socket_path).await.unwrap();
            client
                .write_all(format!("{}\n", line(n)).as_bytes())
                .await
                .unwrap();
            client.shutdown().await.unwrap();
            assert_eq!(rx.recv().await.unwrap().pixel, format!("px{n}"));
        }

        shutdown.trigger();
    }
}
