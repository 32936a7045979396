//! Fixed-cadence flush scheduling: tick, drain, commit.

use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{trace, warn};

use crate::sink::StateSink;

use super::buffer::CoalescingBuffer;

/// Drives the periodic drain-and-commit cycle.
///
/// The scheduler owns no task of its own; `tick` is polled from the
/// pipeline's single select loop so a drain always runs in the same
/// synchronous turn as the tick that triggered it.
pub struct FlushScheduler {
    timer: Option<Interval>,
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self { timer: None }
    }

    /// Begin the repeating timer. Re-entrant starts while a timer is live
    /// are a no-op; the running cadence is kept.
    pub fn start_periodic(&mut self, period: Duration) {
        if self.timer.is_some() {
            trace!("Flush timer already running, start ignored");
            return;
        }
        // first tick fires one full period after start, not immediately
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
    }

    /// Cancel the timer. Idempotent.
    pub fn stop_periodic(&mut self) {
        self.timer = None;
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Resolves on the next timer tick; pends forever while stopped, so it
    /// composes into a `tokio::select!` arm without a guard.
    pub async fn tick(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// One drain-and-commit cycle: everything buffered since the last drain
    /// goes to the sink, one batch per non-empty kind. An empty buffer
    /// commits nothing at all. Returns the number of entries committed.
    ///
    /// A sink error is logged and the batch dropped; the buffer has already
    /// been drained and this design deliberately carries no re-queue.
    pub fn flush_once(buffer: &mut CoalescingBuffer, sink: &mut dyn StateSink) -> usize {
        if buffer.is_empty() {
            return 0;
        }

        let mut committed = 0;
        for (kind, payloads) in buffer.drain_all() {
            let count = payloads.len();
            if let Err(e) = sink.commit_batch(kind, payloads) {
                warn!("Sink rejected {} batch of {} entries: {}", kind, count, e);
                continue;
            }
            committed += count;
        }
        if committed > 0 {
            trace!("Flushed {} coalesced updates", committed);
        }
        committed
    }
}

impl Default for FlushScheduler {
    fn default() -> Self {
        Self::new()
    }
}
