//! Batching of locally generated operations.
//!
//! Operations accumulate in a current batch that is flushed on a fixed
//! cadence or as soon as it reaches the size limit. A batch that cannot
//! be sent is retried on the next flush tick, in order, and only discarded
//! once its retries are exhausted. While the channel is down batches are
//! held instead of sent, so an outage does not use up their retries. Sent
//! batches stay pending until every operation in them has been echoed back
//! by the server.

use crate::operation::Operation;
use crate::protocol::{ClientMessage, WireOperation};
use crate::transport::{Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type BatchId = Uuid;

/// Destination of flushed batches.
pub trait OperationSink {
    fn send_batch(&mut self, id: BatchId, operations: &[Operation]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> OperationSink for T {
    fn send_batch(&mut self, id: BatchId, operations: &[Operation]) -> Result<(), TransportError> {
        let message = ClientMessage::Batch {
            batch_id: id,
            operations: operations.iter().map(WireOperation::from).collect(),
        };
        self.send(&message)
    }
}

#[derive(Debug, Clone)]
pub struct PendingBatch {
    pub id: BatchId,
    pub operations: Vec<Operation>,
    /// Failed send attempts so far.
    pub attempts: u32,
    pub next_attempt_at: Instant,
}

impl PendingBatch {
    fn first_sequence(&self) -> u64 {
        self.operations.first().map_or(0, |op| op.client_sequence)
    }
}

/// What a flush did.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Sent { id: BatchId, count: usize },
    Retrying { id: BatchId, attempts: u32, delay: Duration },
    /// Retries exhausted; these operations will never reach the server.
    Discarded { id: BatchId, operations: Vec<Operation> },
}

#[derive(Debug, Clone)]
pub struct BatcherSettings {
    pub flush_interval: Duration,
    pub max_batch_size: usize,
    pub max_retries: u32,
}

impl From<&crate::config::BoardConfig> for BatcherSettings {
    fn from(config: &crate::config::BoardConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            max_batch_size: config.max_batch_size,
            max_retries: config.max_send_retries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationBatcher {
    settings: BatcherSettings,
    current: Vec<Operation>,
    /// Batches whose send failed, oldest first.
    retry_queue: VecDeque<PendingBatch>,
    /// Sent batches awaiting their echoes.
    in_flight: HashMap<BatchId, PendingBatch>,
    next_sequence: u64,
    last_flush: Option<Instant>,
}

impl OperationBatcher {
    pub fn new(settings: BatcherSettings) -> Self {
        Self {
            settings,
            current: Vec::new(),
            retry_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            next_sequence: 0,
            last_flush: None,
        }
    }

    /// Next local sequence number: above both our own counter and the
    /// highest sequence seen from the channel.
    pub fn next_sequence(&mut self, last_seen: u64) -> u64 {
        self.next_sequence = self.next_sequence.max(last_seen) + 1;
        self.next_sequence
    }

    /// Queue a sequenced operation. Returns `true` once the batch is full
    /// and should be flushed without waiting for the next tick.
    pub fn add_operation(&mut self, op: Operation) -> bool {
        self.current.push(op);
        self.current.len() >= self.settings.max_batch_size
    }

    /// Whether a flush has work to do at `now`.
    pub fn should_flush(&self, now: Instant) -> bool {
        let retry_due = self.retry_queue.front().is_some_and(|b| b.next_attempt_at <= now);
        let current_due = !self.current.is_empty()
            && (self.current.len() >= self.settings.max_batch_size
                || self
                    .last_flush
                    .is_none_or(|last| now.duration_since(last) >= self.settings.flush_interval));
        retry_due || current_due
    }

    /// Send due retries, then the current batch.
    pub fn flush<S: OperationSink + ?Sized>(&mut self, now: Instant, sink: &mut S) -> Vec<BatchEvent> {
        let mut events = Vec::new();
        self.last_flush = Some(now);

        while let Some(front) = self.retry_queue.front() {
            if front.next_attempt_at > now {
                break;
            }
            let Some(mut batch) = self.retry_queue.pop_front() else {
                break;
            };
            match sink.send_batch(batch.id, &batch.operations) {
                Ok(()) => {
                    events.push(BatchEvent::Sent {
                        id: batch.id,
                        count: batch.operations.len(),
                    });
                    self.in_flight.insert(batch.id, batch);
                }
                Err(e) => {
                    log::debug!("retry of batch {} failed: {e}", batch.id);
                    match self.schedule_retry(&mut batch, now) {
                        event @ BatchEvent::Discarded { .. } => events.push(event),
                        event => {
                            events.push(event);
                            self.retry_queue.push_front(batch);
                            break;
                        }
                    }
                }
            }
        }

        if self.current.is_empty() {
            return events;
        }
        let mut batch = PendingBatch {
            id: Uuid::new_v4(),
            operations: std::mem::take(&mut self.current),
            attempts: 0,
            next_attempt_at: now,
        };
        if !self.retry_queue.is_empty() {
            // Older batches are still waiting; keep order.
            self.retry_queue.push_back(batch);
            return events;
        }
        match sink.send_batch(batch.id, &batch.operations) {
            Ok(()) => {
                log::debug!("flushed batch {} with {} operations", batch.id, batch.operations.len());
                events.push(BatchEvent::Sent {
                    id: batch.id,
                    count: batch.operations.len(),
                });
                self.in_flight.insert(batch.id, batch);
            }
            Err(e) => {
                log::debug!("send of batch {} failed: {e}", batch.id);
                match self.schedule_retry(&mut batch, now) {
                    event @ BatchEvent::Discarded { .. } => events.push(event),
                    event => {
                        events.push(event);
                        self.retry_queue.push_back(batch);
                    }
                }
            }
        }
        events
    }

    /// Count a failed attempt; either schedule the next one or give up.
    fn schedule_retry(&self, batch: &mut PendingBatch, now: Instant) -> BatchEvent {
        batch.attempts += 1;
        if batch.attempts > self.settings.max_retries {
            log::warn!(
                "discarding batch {} with {} operations after {} failed sends",
                batch.id,
                batch.operations.len(),
                batch.attempts
            );
            return BatchEvent::Discarded {
                id: batch.id,
                operations: std::mem::take(&mut batch.operations),
            };
        }
        let delay = self.settings.flush_interval;
        batch.next_attempt_at = now + delay;
        BatchEvent::Retrying {
            id: batch.id,
            attempts: batch.attempts,
            delay,
        }
    }

    /// Seal the current batch into the retry queue without sending it.
    /// Used while the channel is down; no attempt is charged.
    pub fn hold(&mut self, now: Instant) {
        self.last_flush = Some(now);
        if self.current.is_empty() {
            return;
        }
        let batch = PendingBatch {
            id: Uuid::new_v4(),
            operations: std::mem::take(&mut self.current),
            attempts: 0,
            next_attempt_at: now,
        };
        log::debug!("holding batch {} with {} operations", batch.id, batch.operations.len());
        self.retry_queue.push_back(batch);
    }

    /// Make every queued batch due at `now`, e.g. once the channel is back.
    pub fn resume(&mut self, now: Instant) {
        for batch in self.retry_queue.iter_mut() {
            batch.next_attempt_at = now;
        }
    }

    /// Give up on everything not yet sent, oldest first. Used once the
    /// channel will not come back.
    pub fn discard_queued(&mut self, now: Instant) -> Vec<BatchEvent> {
        self.hold(now);
        self.retry_queue
            .drain(..)
            .map(|batch| {
                log::warn!(
                    "discarding batch {} with {} operations, channel is gone",
                    batch.id,
                    batch.operations.len()
                );
                BatchEvent::Discarded {
                    id: batch.id,
                    operations: batch.operations,
                }
            })
            .collect()
    }

    /// Retire an echoed operation. Returns the batch id once that batch
    /// has no unconfirmed operations left.
    pub fn confirm_operation(&mut self, client_sequence: u64) -> Option<BatchId> {
        let id = self
            .in_flight
            .values()
            .find(|b| b.operations.iter().any(|op| op.client_sequence == client_sequence))
            .map(|b| b.id);
        if let Some(id) = id {
            let batch = self.in_flight.get_mut(&id)?;
            batch.operations.retain(|op| op.client_sequence != client_sequence);
            if batch.operations.is_empty() {
                self.in_flight.remove(&id);
                log::debug!("batch {id} fully confirmed");
                return Some(id);
            }
            return None;
        }
        // Echo of a batch whose send was reported as failed.
        self.remove_unsent(client_sequence);
        None
    }

    /// Drop one operation that has not been sent yet. Sent operations
    /// cannot be recalled.
    pub fn cancel_operation(&mut self, client_sequence: u64) -> bool {
        self.remove_unsent(client_sequence).is_some()
    }

    fn remove_unsent(&mut self, client_sequence: u64) -> Option<Operation> {
        if let Some(pos) = self.current.iter().position(|op| op.client_sequence == client_sequence) {
            return Some(self.current.remove(pos));
        }
        for batch in self.retry_queue.iter_mut() {
            if let Some(pos) = batch.operations.iter().position(|op| op.client_sequence == client_sequence) {
                let op = batch.operations.remove(pos);
                self.retry_queue.retain(|b| !b.operations.is_empty());
                return Some(op);
            }
        }
        None
    }

    /// Swap an unsent operation for an adjusted copy with the same sequence.
    pub fn replace_unsent(&mut self, replacement: Operation) -> bool {
        let seq = replacement.client_sequence;
        let slot = self
            .current
            .iter_mut()
            .chain(self.retry_queue.iter_mut().flat_map(|b| b.operations.iter_mut()))
            .find(|op| op.client_sequence == seq);
        match slot {
            Some(op) => {
                *op = replacement;
                true
            }
            None => false,
        }
    }

    /// Whether an operation is still waiting to be sent.
    pub fn is_unsent(&self, client_sequence: u64) -> bool {
        self.current
            .iter()
            .chain(self.retry_queue.iter().flat_map(|b| b.operations.iter()))
            .any(|op| op.client_sequence == client_sequence)
    }

    /// Move sent-but-unconfirmed batches back in front of the retry queue,
    /// e.g. after the channel dropped. The server ignores duplicates.
    pub fn requeue_in_flight(&mut self, now: Instant) {
        let mut batches: Vec<PendingBatch> = self.in_flight.drain().map(|(_, b)| b).collect();
        if batches.is_empty() {
            return;
        }
        batches.sort_by_key(PendingBatch::first_sequence);
        log::info!("requeueing {} unconfirmed batches", batches.len());
        for mut batch in batches.into_iter().rev() {
            batch.next_attempt_at = now;
            self.retry_queue.push_front(batch);
        }
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn retry_len(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing queued, waiting or unconfirmed.
    pub fn is_idle(&self) -> bool {
        self.current.is_empty() && self.retry_queue.is_empty() && self.in_flight.is_empty()
    }
}
