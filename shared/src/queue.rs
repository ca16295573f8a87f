//! Non-blocking hand-off between network tasks and the simulation loop.
//!
//! Any number of producers (one per receive task or connection) push; a
//! single consumer pops. Popping never blocks and no lock is held by the
//! consumer between pops, so letters pushed while a tick is being simulated
//! are simply visible on the next poll. Order is FIFO per producer.

use crate::error::QueueClosed;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct TransportQueue;

impl TransportQueue {
    /// Creates an unbounded queue.
    pub fn unbounded<T>() -> (QueueProducer<T>, QueueConsumer<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            QueueProducer {
                tx,
                depth: Arc::clone(&depth),
            },
            QueueConsumer { rx, depth },
        )
    }
}

#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<T> QueueProducer<T> {
    /// Enqueues an item. Fails only when the consumer has been dropped.
    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        // Count first so a racing pop can never see the item before the count.
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueClosed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> QueueConsumer<T> {
    /// Pops the oldest item, or `None` if nothing is queued right now.
    pub fn try_pop(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Some(item)
            }
            Err(_) => None,
        }
    }

    /// Waits for the next item. Returns `None` once every producer is gone
    /// and the queue is drained. Only the I/O side awaits; the simulation
    /// loop uses [`QueueConsumer::try_pop`].
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every buffered item, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.try_pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}
