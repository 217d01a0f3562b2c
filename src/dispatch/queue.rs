//! Inbound queue consumer and dead-letter sinks

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::retry::DispatchState;
use super::worker::{Dispatched, Dispatcher};
use super::DispatchError;
use crate::models::{DeadLetter, InboundRequest};

/// Destination for requests that could not be processed
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: DeadLetter) -> Result<(), DispatchError>;
}

/// Keeps dead letters in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryDeadLetters {
    letters: parking_lot::Mutex<Vec<DeadLetter>>,
}

#[cfg(test)]
impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn send(&self, letter: DeadLetter) -> Result<(), DispatchError> {
        self.letters.lock().push(letter);
        Ok(())
    }
}

/// Appends dead letters to a file, one JSON document per line
pub struct JsonLinesDeadLetters {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesDeadLetters {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every letter written so far; a missing file holds none
    pub fn read_all(path: &Path) -> Result<Vec<DeadLetter>, DispatchError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut letters = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            letters.push(serde_json::from_str(&line)?);
        }
        Ok(letters)
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetters {
    async fn send(&self, letter: DeadLetter) -> Result<(), DispatchError> {
        let mut line = serde_json::to_string(&letter)?;
        line.push('\n');
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("Dead letter appended to {}", self.path.display());
        Ok(())
    }
}

/// Tally of one consumer session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: usize,
    pub succeeded: usize,
    pub dead_lettered: usize,
    pub abandoned: usize,
    pub suites_completed: usize,
    pub suites_failed: usize,
}

impl ConsumerStats {
    fn record(&mut self, state: &DispatchState) {
        match state {
            DispatchState::Succeeded { .. } => self.succeeded += 1,
            DispatchState::DeadLettered { .. } => self.dead_lettered += 1,
            _ => self.abandoned += 1,
        }
    }
}

/// Consume raw JSON messages until the channel closes.
///
/// Suite executions run in the background and are awaited before returning.
pub async fn consume(dispatcher: Arc<Dispatcher>, mut rx: mpsc::Receiver<String>) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    let mut suites = Vec::new();

    while let Some(message) = rx.recv().await {
        let message = message.trim();
        if message.is_empty() {
            continue;
        }
        stats.received += 1;

        match serde_json::from_str::<InboundRequest>(message) {
            Ok(request) => match dispatcher.dispatch(request).await {
                Dispatched::Finished(state) => stats.record(&state),
                Dispatched::Spawned(handle) => suites.push(handle),
                Dispatched::Dropped(reason) => {
                    debug!("Request dropped: {}", reason);
                    stats.abandoned += 1;
                }
            },
            Err(e) => {
                warn!("Malformed request: {}", e);
                let payload = serde_json::from_str::<Value>(message)
                    .unwrap_or_else(|_| Value::String(message.to_string()));
                dispatcher
                    .dead_letter(DeadLetter::new(payload, format!("Malformed request: {e}"), 0))
                    .await;
                stats.dead_lettered += 1;
            }
        }
    }

    if !suites.is_empty() {
        info!("Waiting for {} suite execution(s) to finish", suites.len());
    }
    for outcome in join_all(suites).await {
        match outcome {
            Ok(Ok(_)) => stats.suites_completed += 1,
            Ok(Err(_)) => stats.suites_failed += 1,
            Err(e) => {
                warn!("Suite task aborted: {}", e);
                stats.suites_failed += 1;
            }
        }
    }

    info!(
        "Consumer finished: {} received, {} succeeded, {} dead-lettered, {} suites completed",
        stats.received, stats.succeeded, stats.dead_lettered, stats.suites_completed
    );
    stats
}

/// Forward each line of `reader` to the consumer channel
pub async fn feed_lines<R>(reader: R, tx: mpsc::Sender<String>) -> Result<usize, DispatchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0;
    while let Some(line) = lines.next_line().await? {
        if tx.send(line).await.is_err() {
            warn!("Consumer stopped; {} message(s) forwarded", sent);
            break;
        }
        sent += 1;
    }
    Ok(sent)
}
