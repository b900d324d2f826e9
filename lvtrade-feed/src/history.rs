//! Bounded in-memory price history.
//!
//! The [`HistoryBuffer`] is the single owner of the chart's bar sequence. It is always
//! sorted ascending by bucket start with at most one [`Bar`] per bucket. The rendering
//! layer only ever receives copies via [`HistoryBuffer::snapshot`].

use crate::error::PrependError;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Maximum bars retained by appends.
pub const HISTORY_CAP: usize = 600;

/// A single OHLC bar in display space.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    /// Bucket start (unix seconds).
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    /// Bar where every price is `price`.
    pub fn flat(time: i64, price: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold a later update of the same bucket into this bar. `open` is kept.
    pub fn merged(&self, update: &Bar) -> Bar {
        Bar {
            time: self.time,
            open: self.open,
            high: self.high.max(update.high),
            low: self.low.min(update.low),
            close: update.close,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }

    /// Validate OHLC integrity.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|price| price.is_finite())
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
    }
}

/// What [`HistoryBuffer::merge_or_append`] did with a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Folded into the last bar (same bucket).
    Merged,
    /// Appended as a new last bar.
    Appended,
    /// Appended, and the oldest bar was evicted to respect the cap.
    Evicted,
    /// Older than the last bar - rejected to keep the buffer ordered.
    Dropped,
}

impl MergeOutcome {
    /// Whether the buffer changed.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, MergeOutcome::Dropped)
    }
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    bars: VecDeque<Bar>,
    cap: usize,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_cap(HISTORY_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            bars: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn oldest(&self) -> Option<&Bar> {
        self.bars.front()
    }

    /// Owned copy of the current bars, oldest first.
    pub fn snapshot(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }

    /// Merge a bar for the current bucket, or append a bar for a newer bucket.
    ///
    /// Appends evict the single oldest bar once the cap is exceeded. Bars older than the
    /// last bucket are dropped, never inserted out of order.
    pub fn merge_or_append(&mut self, bar: Bar) -> MergeOutcome {
        let Some(last) = self.bars.back_mut() else {
            self.bars.push_back(bar);
            return MergeOutcome::Appended;
        };

        if bar.time == last.time {
            *last = last.merged(&bar);
            MergeOutcome::Merged
        } else if bar.time > last.time {
            self.bars.push_back(bar);
            if self.bars.len() > self.cap {
                self.bars.pop_front();
                MergeOutcome::Evicted
            } else {
                MergeOutcome::Appended
            }
        } else {
            debug!(
                bar_time = bar.time,
                last_time = last.time,
                "dropping out-of-order bar"
            );
            MergeOutcome::Dropped
        }
    }

    /// Replace the entire buffer (initial load, timeframe change, bulk reload).
    ///
    /// Input is sorted and de-duplicated (latest bar of a bucket wins); only the newest
    /// `cap` bars are kept.
    pub fn replace_all(&mut self, bars: impl IntoIterator<Item = Bar>) {
        let mut bars = bars
            .into_iter()
            .sorted_by_key(|bar| bar.time)
            .coalesce(|prev, next| {
                if prev.time == next.time {
                    Ok(next)
                } else {
                    Err((prev, next))
                }
            })
            .collect::<VecDeque<_>>();

        let excess = bars.len().saturating_sub(self.cap);
        bars.drain(..excess);
        self.bars = bars;
    }

    /// Prepend strictly older, internally ascending bars (history pagination).
    ///
    /// A violation is logged and rejected, leaving the buffer untouched. Prepends are not
    /// capped so the user's paged-back history is kept.
    pub fn prepend(&mut self, older: Vec<Bar>) -> Result<usize, PrependError> {
        if let Some(index) = older
            .iter()
            .tuple_windows()
            .position(|(prev, next)| prev.time >= next.time)
        {
            let error = PrependError::Unordered { index: index + 1 };
            warn!(%error, "rejecting history prepend");
            return Err(error);
        }

        if let (Some(newest), Some(oldest)) = (older.last(), self.bars.front()) {
            if newest.time >= oldest.time {
                let error = PrependError::Overlap {
                    newest: newest.time,
                    oldest: oldest.time,
                };
                warn!(%error, "rejecting history prepend");
                return Err(error);
            }
        }

        let count = older.len();
        for bar in older.into_iter().rev() {
            self.bars.push_front(bar);
        }
        Ok(count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_strictly_ascending(buffer: &HistoryBuffer) -> bool {
        buffer
            .iter()
            .tuple_windows()
            .all(|(prev, next)| prev.time < next.time)
    }

    #[test]
    fn test_merge_or_append() {
        struct TestCase {
            input: Bar,
            expected_outcome: MergeOutcome,
            expected_last: Bar,
            expected_len: usize,
        }

        let mut buffer = HistoryBuffer::new();
        buffer.replace_all(vec![Bar::flat(0, 10.0), Bar {
            time: 60,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
        }]);

        let tests = vec![
            TestCase {
                // TC0: same bucket merges, open unchanged
                input: Bar {
                    time: 60,
                    open: 99.0,
                    high: 12.0,
                    low: 9.5,
                    close: 11.5,
                },
                expected_outcome: MergeOutcome::Merged,
                expected_last: Bar {
                    time: 60,
                    open: 10.0,
                    high: 12.0,
                    low: 9.0,
                    close: 11.5,
                },
                expected_len: 2,
            },
            TestCase {
                // TC1: newer bucket appends
                input: Bar::flat(120, 11.0),
                expected_outcome: MergeOutcome::Appended,
                expected_last: Bar::flat(120, 11.0),
                expected_len: 3,
            },
            TestCase {
                // TC2: older bucket is dropped
                input: Bar::flat(60, 1.0),
                expected_outcome: MergeOutcome::Dropped,
                expected_last: Bar::flat(120, 11.0),
                expected_len: 3,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let outcome = buffer.merge_or_append(test.input);
            assert_eq!(outcome, test.expected_outcome, "TC{} failed", index);
            assert_eq!(buffer.last(), Some(&test.expected_last), "TC{} failed", index);
            assert_eq!(buffer.len(), test.expected_len, "TC{} failed", index);
        }
    }

    #[test]
    fn test_merge_into_empty_appends() {
        let mut buffer = HistoryBuffer::new();
        assert_eq!(buffer.merge_or_append(Bar::flat(60, 1.0)), MergeOutcome::Appended);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let mut buffer = HistoryBuffer::new();
        buffer.replace_all((0..HISTORY_CAP as i64).map(|i| Bar::flat(i * 60, i as f64)));
        assert_eq!(buffer.len(), 600);

        let outcome = buffer.merge_or_append(Bar::flat(600 * 60, 600.0));

        assert_eq!(outcome, MergeOutcome::Evicted);
        assert_eq!(buffer.len(), 600);
        assert_eq!(buffer.oldest().map(|bar| bar.time), Some(60));
        assert_eq!(buffer.last().map(|bar| bar.time), Some(600 * 60));
    }

    #[test]
    fn test_append_sequence_respects_invariants() {
        let mut buffer = HistoryBuffer::with_cap(50);

        // Mix of same-bucket merges, new buckets and stale buckets
        for step in 0..500_i64 {
            let time = (step / 3) * 60 - if step % 7 == 0 { 180 } else { 0 };
            buffer.merge_or_append(Bar::flat(time, step as f64));
            assert!(buffer.len() <= 50);
            assert!(is_strictly_ascending(&buffer));
        }
    }

    #[test]
    fn test_ticks_within_bucket_track_extremes() {
        let mut buffer = HistoryBuffer::new();
        let ticks = [
            (100.0, 101.0, 99.5, 100.5),
            (100.5, 103.0, 100.0, 102.0),
            (102.0, 102.5, 98.0, 99.0),
            (99.0, 100.0, 98.5, 99.8),
        ];

        for (open, high, low, close) in ticks {
            buffer.merge_or_append(Bar {
                time: 300,
                open,
                high,
                low,
                close,
            });
        }

        assert_eq!(buffer.len(), 1);
        let bar = buffer.last().copied().unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 103.0);
        assert_eq!(bar.low, 98.0);
        assert_eq!(bar.close, 99.8);
    }

    #[test]
    fn test_replace_all_sorts_dedups_and_caps() {
        let mut buffer = HistoryBuffer::with_cap(3);
        buffer.replace_all(vec![
            Bar::flat(240, 4.0),
            Bar::flat(0, 0.0),
            Bar::flat(120, 2.0),
            Bar::flat(60, 1.0),
            Bar::flat(120, 2.5),
        ]);

        let times = buffer.iter().map(|bar| bar.time).collect::<Vec<_>>();
        assert_eq!(times, vec![60, 120, 240]);
        assert_eq!(buffer.snapshot()[1].close, 2.5);
    }

    #[test]
    fn test_prepend() {
        struct TestCase {
            input: Vec<Bar>,
            expected: Result<usize, PrependError>,
            expected_oldest: i64,
        }

        let mut buffer = HistoryBuffer::new();
        buffer.replace_all(vec![Bar::flat(600, 1.0), Bar::flat(660, 1.0)]);

        let tests = vec![
            TestCase {
                // TC0: unordered input rejected
                input: vec![Bar::flat(480, 1.0), Bar::flat(420, 1.0)],
                expected: Err(PrependError::Unordered { index: 1 }),
                expected_oldest: 600,
            },
            TestCase {
                // TC1: overlapping input rejected
                input: vec![Bar::flat(540, 1.0), Bar::flat(600, 1.0)],
                expected: Err(PrependError::Overlap {
                    newest: 600,
                    oldest: 600,
                }),
                expected_oldest: 600,
            },
            TestCase {
                // TC2: strictly older input accepted
                input: vec![Bar::flat(480, 1.0), Bar::flat(540, 1.0)],
                expected: Ok(2),
                expected_oldest: 480,
            },
            TestCase {
                // TC3: empty input is a no-op
                input: vec![],
                expected: Ok(0),
                expected_oldest: 480,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = buffer.prepend(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(
                buffer.oldest().map(|bar| bar.time),
                Some(test.expected_oldest),
                "TC{} failed",
                index
            );
            assert!(is_strictly_ascending(&buffer), "TC{} failed", index);
        }
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_prepend_may_exceed_cap() {
        let mut buffer = HistoryBuffer::with_cap(2);
        buffer.replace_all(vec![Bar::flat(120, 1.0), Bar::flat(180, 1.0)]);

        assert_eq!(buffer.prepend(vec![Bar::flat(0, 1.0), Bar::flat(60, 1.0)]), Ok(2));
        assert_eq!(buffer.len(), 4);

        // Appends past the cap evict a single bar, keeping the paged-back window stable
        buffer.merge_or_append(Bar::flat(240, 1.0));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.oldest().map(|bar| bar.time), Some(60));
    }

    #[test]
    fn test_bar_validity() {
        assert!(Bar::flat(0, 1.0).is_valid());
        assert!(!Bar {
            time: 0,
            open: 1.0,
            high: 0.5,
            low: 0.4,
            close: 0.6,
        }
        .is_valid());
        assert!(!Bar::flat(0, f64::NAN).is_valid());
    }
}
