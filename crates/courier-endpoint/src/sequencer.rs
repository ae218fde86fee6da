//! Per-endpoint call ordering.
//!
//! Like the number machine at a deli counter: every call takes a ticket
//! when it arrives, and an ordered endpoint serves ticket `n` only after
//! ticket `n - 1` has finished. Calls may be picked up by different worker
//! threads in any order and still run in arrival order.
//!
//! A ticket dropped without being served is skipped, so a caller that
//! gives up never blocks the ones behind it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

#[derive(Debug, Default)]
struct Counter {
    /// The ticket allowed to run now.
    serving: u64,
    /// Tickets ahead of `serving` whose holders went away.
    abandoned: BTreeSet<u64>,
}

impl Counter {
    /// Moves past `number` and any abandoned tickets right behind it.
    fn finish(&mut self, number: u64) {
        if self.serving != number {
            return;
        }
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

/// Ticket issuer and "now serving" counter for one endpoint.
#[derive(Debug)]
pub(crate) struct Sequencer {
    next: AtomicU64,
    counter: watch::Sender<Counter>,
}

impl Sequencer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(0),
            counter: watch::Sender::new(Counter::default()),
        })
    }

    fn take(self: &Arc<Self>) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    async fn wait_turn(&self, number: u64) {
        let mut rx = self.counter.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|c| c.serving >= number).await;
    }

    fn finish(&self, number: u64) {
        self.counter.send_modify(|c| c.finish(number));
    }

    fn abandon(&self, number: u64) {
        self.counter.send_modify(|c| {
            if c.serving == number {
                c.finish(number);
            } else if number > c.serving {
                c.abandoned.insert(number);
            }
        });
    }

    #[cfg(test)]
    fn serving(&self) -> u64 {
        self.counter.borrow().serving
    }
}

// ---------------------------------------------------------------------------
// Ticket / Turn
// ---------------------------------------------------------------------------

/// A place in an endpoint's queue.
///
/// Taken from [`LocalEndpointRegistry::take_ticket`](crate::LocalEndpointRegistry::take_ticket)
/// at the moment a call arrives and handed back to
/// [`LocalEndpointRegistry::invoke_local`](crate::LocalEndpointRegistry::invoke_local).
/// Tickets for unordered endpoints carry no place and never wait.
#[derive(Debug)]
pub struct Ticket {
    slot: Option<(Arc<Sequencer>, u64)>,
}

impl Ticket {
    pub(crate) fn ordered(sequencer: &Arc<Sequencer>) -> Self {
        let number = sequencer.take();
        Self {
            slot: Some((Arc::clone(sequencer), number)),
        }
    }

    pub(crate) fn unordered() -> Self {
        Self { slot: None }
    }

    /// The ticket number, if the endpoint is ordered.
    pub fn number(&self) -> Option<u64> {
        self.slot.as_ref().map(|(_, n)| *n)
    }

    /// Waits until every earlier ticket has finished or been abandoned.
    ///
    /// If the returned future is dropped while waiting, the ticket is
    /// abandoned.
    pub(crate) async fn into_turn(mut self) -> Turn {
        let mut turn = Turn {
            slot: self.slot.take(),
            started: false,
        };
        if let Some((sequencer, number)) = &turn.slot {
            sequencer.wait_turn(*number).await;
        }
        turn.started = true;
        turn
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some((sequencer, number)) = self.slot.take() {
            tracing::trace!(ticket = number, "ticket abandoned before use");
            sequencer.abandon(number);
        }
    }
}

/// Proof that it is this ticket's turn. Dropping it lets the next one run.
#[derive(Debug)]
pub(crate) struct Turn {
    slot: Option<(Arc<Sequencer>, u64)>,
    started: bool,
}

impl Drop for Turn {
    fn drop(&mut self) {
        if let Some((sequencer, number)) = self.slot.take() {
            if self.started {
                sequencer.finish(number);
            } else {
                sequencer.abandon(number);
            }
        }
    }
}
