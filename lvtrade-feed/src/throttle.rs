//! Rate limiting of live candle updates.
//!
//! Every inbound candle lands in a single pending cell. A recurring check applies the cell
//! to the [`HistoryBuffer`] at most once per `min_gap`, bounding chart updates to a handful
//! per second however fast the feed ticks.

use crate::history::{Bar, HistoryBuffer, MergeOutcome};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Flush timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushConfig {
    /// How often the pending cell is checked.
    pub check_interval: Duration,
    /// Minimum time between two flushes.
    pub min_gap: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(150),
            min_gap: Duration::from_millis(100),
        }
    }
}

impl FlushConfig {
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_min_gap(mut self, gap: Duration) -> Self {
        self.min_gap = gap;
        self
    }
}

/// Single slot buffer between the feed and the [`HistoryBuffer`].
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    config: FlushConfig,
    pending: Option<Bar>,
    last_flush: Option<Instant>,
}

impl FlushScheduler {
    pub fn new(config: FlushConfig) -> Self {
        Self {
            config,
            pending: None,
            last_flush: None,
        }
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    pub fn pending(&self) -> Option<&Bar> {
        self.pending.as_ref()
    }

    /// Record a display space bar already aligned to the active bucket.
    ///
    /// Returns the outcome of any mutation applied immediately: the very first bar of an
    /// empty history (so the chart never starts blank), or the previous pending bar when
    /// `bar` opens a newer bucket (so a rollover is never lost).
    pub fn on_tick(
        &mut self,
        bar: Bar,
        history: &mut HistoryBuffer,
        now: Instant,
    ) -> Option<MergeOutcome> {
        if history.is_empty() && self.pending.is_none() {
            self.last_flush = Some(now);
            return Some(history.merge_or_append(bar));
        }

        match self.pending {
            None => {
                self.pending = Some(bar);
                None
            }
            Some(pending) if bar.time == pending.time => {
                self.pending = Some(pending.merged(&bar));
                None
            }
            Some(pending) if bar.time > pending.time => {
                self.pending = Some(bar);
                self.last_flush = Some(now);
                Some(history.merge_or_append(pending))
            }
            Some(pending) => {
                debug!(
                    bar_time = bar.time,
                    pending_time = pending.time,
                    "dropping tick older than pending bar"
                );
                None
            }
        }
    }

    /// Apply the pending cell if one exists and `min_gap` elapsed since the last flush.
    pub fn flush_due(&mut self, history: &mut HistoryBuffer, now: Instant) -> Option<MergeOutcome> {
        if let Some(last_flush) = self.last_flush {
            if now.saturating_duration_since(last_flush) < self.config.min_gap {
                return None;
            }
        }

        let pending = self.pending.take()?;
        self.last_flush = Some(now);
        Some(history.merge_or_append(pending))
    }

    /// Forget the pending cell and flush timing (timeframe switch, full reload).
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_flush = None;
    }
}

impl Default for FlushScheduler {
    fn default() -> Self {
        Self::new(FlushConfig::default())
    }
}
