//! Bounded cross-domain event queues.
//!
//! Two independent FIFOs bridge the control and audio contexts: inbound
//! (control -> audio) and outbound (audio -> control). Both are bounded
//! crossbeam channels; `push` is a `try_send` that never blocks, so the
//! real-time side cannot stall on a slow consumer. Entries are consumed
//! exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::EngineError;
use crate::message::{Message, MidiEvent};

/// Payload of one queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A message addressed to a named channel.
    Channel {
        /// Target channel name.
        name: String,
        /// The message itself.
        message: Message,
    },
    /// A MIDI event.
    Midi(MidiEvent),
    /// A line emitted by a `print` object (outbound only).
    Print(String),
    /// A caught block evaluation fault (outbound only).
    Fault {
        /// Index of the faulted block.
        block: u64,
        /// What went wrong.
        reason: String,
    },
}

/// A timestamped event crossing the domain boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Logical sample time the event belongs to.
    pub time: u64,
    /// Event payload.
    pub payload: EventPayload,
}

/// Creates a connected bounded sender/receiver pair.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx, held: None },
    )
}

/// Producer half. Cloneable; every push is non-blocking.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<QueueEntry>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Enqueues an entry, failing fast with [`EngineError::QueueFull`].
    pub fn push(&self, entry: QueueEntry) -> Result<(), EngineError> {
        match self.tx.try_send(entry) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                Err(EngineError::QueueFull)
            }
        }
    }

    /// Enqueues an entry, silently counting it as dropped when full.
    ///
    /// The audio context uses this for outbound traffic; it must not block
    /// and must not allocate a log line per dropped event.
    pub fn push_or_drop(&self, entry: QueueEntry) -> bool {
        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total entries dropped by [`push_or_drop`](Self::push_or_drop).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Entries currently queued.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer half. Single-consumer; holds a one-entry peek slot so a drain
/// can stop at a logical-time boundary without losing the entry that lies
/// beyond it (the channel itself has no peek).
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<QueueEntry>,
    held: Option<QueueEntry>,
}

impl EventReceiver {
    fn next(&mut self) -> Option<QueueEntry> {
        if let Some(entry) = self.held.take() {
            return Some(entry);
        }
        self.rx.try_recv().ok()
    }

    /// Drains entries with `time < end`, in arrival order, into `f`.
    ///
    /// The first entry at or beyond `end` is held back for the next drain.
    /// Arrival order is stable for equal timestamps.
    pub fn drain_due(&mut self, end: u64, mut f: impl FnMut(QueueEntry)) {
        while let Some(entry) = self.next() {
            if entry.time >= end {
                self.held = Some(entry);
                return;
            }
            f(entry);
        }
    }

    /// Drains every queued entry in arrival order into `f`.
    pub fn drain_all(&mut self, mut f: impl FnMut(QueueEntry)) {
        while let Some(entry) = self.next() {
            f(entry);
        }
    }

    /// Entries currently queued, including a held-back entry.
    pub fn len(&self) -> usize {
        self.rx.len() + usize::from(self.held.is_some())
    }

    /// True when nothing is queued or held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
