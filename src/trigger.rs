//! Debounced click gate.
//!
//! Raw pointer events arrive on the platform's event-delivery thread. The gate
//! turns them into [`ScanSignal`]s, collapsing clicks that land inside the
//! refractory window of the last accepted one. It never blocks: the only
//! shared state is one atomic timestamp, and accepted signals are offered to a
//! single-slot channel without waiting.

use crate::types::{ClickKind, ScanSignal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Stored in the timestamp cell before the first accepted click
const NO_EVENT: u64 = u64::MAX;

/// Debounce gate between the event source and the scan worker
pub struct TriggerGate {
    /// Nanoseconds of the last accepted event, or `NO_EVENT`
    last_event_nanos: AtomicU64,
    refractory: Duration,
    signal_tx: Option<mpsc::Sender<ScanSignal>>,
}

impl TriggerGate {
    /// Create a gate that only filters, without a worker channel
    pub fn new(refractory: Duration) -> Self {
        Self {
            last_event_nanos: AtomicU64::new(NO_EVENT),
            refractory,
            signal_tx: None,
        }
    }

    /// Create a gate feeding a single-slot channel.
    ///
    /// The receiver goes to the scan worker. If a signal is still waiting in
    /// the slot, newer signals are dropped rather than queued.
    pub fn with_channel(refractory: Duration) -> (Self, mpsc::Receiver<ScanSignal>) {
        let (tx, rx) = mpsc::channel(1);
        let gate = Self {
            signal_tx: Some(tx),
            ..Self::new(refractory)
        };
        (gate, rx)
    }

    pub fn refractory(&self) -> Duration {
        self.refractory
    }

    /// Handle a raw platform event.
    ///
    /// `event_type` is the platform's event type code; anything other than a
    /// primary or secondary button press is ignored.
    pub fn on_raw_click(&self, event_type: u32, timestamp: Duration) -> Option<ScanSignal> {
        let kind = match ClickKind::from_event_type(event_type) {
            Some(kind) => kind,
            None => {
                trace!("Ignoring event type {}", event_type);
                return None;
            }
        };
        self.on_click(kind, timestamp)
    }

    /// Handle an already-classified click
    pub fn on_click(&self, kind: ClickKind, timestamp: Duration) -> Option<ScanSignal> {
        if !self.try_accept(timestamp) {
            trace!("Click at {:?} inside refractory window, discarded", timestamp);
            return None;
        }

        let signal = ScanSignal { kind, timestamp };
        debug!("{:?} click accepted at {:?}", kind, timestamp);

        if let Some(tx) = &self.signal_tx {
            if tx.try_send(signal).is_err() {
                debug!("Scan already pending, dropping signal");
            }
        }

        Some(signal)
    }

    /// Check-and-update of the debounce timestamp as one atomic step
    fn try_accept(&self, timestamp: Duration) -> bool {
        let now = u64::try_from(timestamp.as_nanos()).unwrap_or(NO_EVENT - 1);
        let refractory = u64::try_from(self.refractory.as_nanos()).unwrap_or(u64::MAX);

        let mut last = self.last_event_nanos.load(Ordering::Acquire);
        loop {
            // Out-of-order timestamps saturate to zero and are discarded.
            if last != NO_EVENT && now.saturating_sub(last) <= refractory {
                return false;
            }
            match self.last_event_nanos.compare_exchange_weak(
                last,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => last = current,
            }
        }
    }
}
