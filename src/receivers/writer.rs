//! Blocking file writers shared by the file-backed receivers.
//!
//! Every write and flush runs on tokio's blocking pool so a slow disk
//! never stalls the async workers driving extraction and fan-out.

use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use log::error;

/// A writer that is `Some` until the receiver is closed.
pub struct SharedWriter<W> {
    slot: Arc<Mutex<Option<W>>>,
}

impl<W: Send + 'static> SharedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Runs `write` against the open writer on the blocking pool.
    ///
    /// Fails with "receiver closed" once `finish` has run.
    pub async fn with<F>(&self, write: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut W) -> anyhow::Result<()> + Send + 'static,
    {
        let slot = self.slot.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().map_err(|_| anyhow!("writer lock poisoned"))?;
            let writer = guard.as_mut().ok_or_else(|| anyhow!("receiver closed"))?;
            write(writer)
        })
        .await
        .context("writer task failed")?
    }

    /// Takes the writer out and runs `finish` on it. Later calls are no-ops.
    pub async fn finish<F>(&self, name: &str, finish: F)
    where
        F: FnOnce(W) -> std::io::Result<()> + Send + 'static,
    {
        let taken = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(writer) = taken else {
            return;
        };

        match tokio::task::spawn_blocking(move || finish(writer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[{name}] close failed: {e}"),
            Err(e) => error!("[{name}] close task failed: {e}"),
        }
    }
}
