//! Staleness gate: drop results produced for a tick that is no longer current.
//!
//! Every handler that consumes a tagged asynchronous result goes through a
//! `Gate`, including the "nothing found" and error paths. The comparison
//! happens when the result is drained, never when it was produced.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::tick::{Tick, TickReader};

/// What happened to a gated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Applied,
    Dropped,
}

#[derive(Clone)]
pub struct Gate {
    ticks: TickReader,
    dropped: Arc<AtomicU64>,
}

impl Gate {
    pub fn new(ticks: TickReader) -> Self {
        Self {
            ticks,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether a result tagged with `tick` may still be applied.
    pub fn admits(&self, tick: Tick) -> bool {
        tick == self.ticks.current()
    }

    /// Run `handler(payload)` if `tick` is current; otherwise discard the payload.
    pub fn call<P>(&self, tick: Tick, payload: P, handler: impl FnOnce(P)) -> Verdict {
        let current = self.ticks.current();
        if tick != current {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("gate: dropped result for tick {tick} (current {current})");
            return Verdict::Dropped;
        }
        handler(payload);
        Verdict::Applied
    }

    /// Number of results discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Wrap `handler` so it receives `(payload, tick)` and only runs for the current tick.
///
/// The tick is read at call time, not when the wrapper is built.
pub fn gated<P>(gate: &Gate, mut handler: impl FnMut(P)) -> impl FnMut(P, Tick) -> Verdict {
    let gate = gate.clone();
    move |payload, tick| gate.call(tick, payload, &mut handler)
}
