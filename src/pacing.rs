//! Presentation pacing.
//!
//! Fragments are queued as they arrive and drained by a single task that
//! feeds the reassembler one character at a time, sleeping between
//! characters for a delay that shrinks as the backlog grows.

use crate::config::PacingConfig;
use crate::present::PresentEvent;
use crate::reassemble::{Reassembler, Segment};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacedItem {
    /// Raw token text.
    Fragment(String),
    /// One-shot auxiliary caption, shown whole in queue order.
    Caption(String),
}

/// Handle to a running drain task.
pub struct PacingQueue {
    tx: mpsc::UnboundedSender<PacedItem>,
    purge: CancellationToken,
    handle: JoinHandle<Reassembler>,
}

impl PacingQueue {
    /// Start the drain task. Cancelling `purge` discards whatever is still
    /// queued; the reassembler's held text is flushed either way.
    pub fn spawn(
        reassembler: Reassembler,
        events: mpsc::UnboundedSender<PresentEvent>,
        config: PacingConfig,
        purge: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(rx, reassembler, events, config, purge.clone()));
        Self { tx, purge, handle }
    }

    pub fn push(&self, item: PacedItem) {
        if self.tx.send(item).is_err() {
            debug!("Pacing queue already closed, item dropped");
        }
    }

    /// Discard queued items and stop after the current character.
    pub fn purge(&self) {
        self.purge.cancel();
    }

    /// Close the queue and wait for the drain task to finish.
    pub async fn finish(self) -> Result<Reassembler, JoinError> {
        drop(self.tx);
        self.handle.await
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<PacedItem>,
    mut reassembler: Reassembler,
    events: mpsc::UnboundedSender<PresentEvent>,
    config: PacingConfig,
    purge: CancellationToken,
) -> Reassembler {
    let mut out = Vec::new();

    'drain: loop {
        // Re-check the queue before parking so late arrivals restart the loop.
        let item = match rx.try_recv() {
            Ok(item) => item,
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {
                tokio::select! {
                    biased;
                    () = purge.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                }
            }
        };

        match item {
            PacedItem::Caption(caption) => send(&events, PresentEvent::Caption(caption)),
            PacedItem::Fragment(fragment) => {
                for c in fragment.chars() {
                    let delay = config.delay_for(rx.len());
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            () = purge.cancelled() => break 'drain,
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else if purge.is_cancelled() {
                        break 'drain;
                    }
                    reassembler.push_char(c, &mut out);
                    forward(&events, &mut out);
                }
            }
        }
    }

    if purge.is_cancelled() {
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        debug!(dropped, "Pacing queue purged");
    }

    reassembler.finish(&mut out);
    forward(&events, &mut out);
    reassembler
}

fn forward(events: &mpsc::UnboundedSender<PresentEvent>, out: &mut Vec<Segment>) {
    for segment in out.drain(..) {
        send(events, PresentEvent::Segment(segment));
    }
}

fn send(events: &mpsc::UnboundedSender<PresentEvent>, event: PresentEvent) {
    if events.send(event).is_err() {
        debug!("Presentation channel closed");
    }
}
