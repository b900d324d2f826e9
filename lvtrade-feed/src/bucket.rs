//! Timestamp bucketing for the selected chart granularity.
//!
//! Bucket boundaries are aligned to the epoch (eg/ 5m buckets start on minutes divisible
//! by 5) and derived from the bar's source timestamp, never the wall clock.

use crate::history::Bar;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chart granularities offered by the product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 minute
    #[default]
    M1,
    /// 5 minutes
    M5,
    /// 10 minutes
    M10,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
}

impl Timeframe {
    /// All supported timeframes, shortest first.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M10,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
        ]
    }

    /// Parse a timeframe label. Unknown labels default to [`Timeframe::M1`] (60s).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "1m" => Timeframe::M1,
            "5m" => Timeframe::M5,
            "10m" => Timeframe::M10,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            _ => Timeframe::M1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
        }
    }

    /// Width of one bucket in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M10 => 10 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 3600,
        }
    }

    /// Start of the bucket `timestamp` (seconds) falls in.
    pub fn bucket_start(&self, timestamp: i64) -> i64 {
        bucket_start(timestamp, self.seconds())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `timestamp - (timestamp mod granularity)`, flooring for negative timestamps.
#[inline]
pub fn bucket_start(timestamp: i64, granularity_seconds: i64) -> i64 {
    if granularity_seconds <= 0 {
        return timestamp;
    }
    timestamp - timestamp.rem_euclid(granularity_seconds)
}

/// Re-aggregate bars into `timeframe` buckets.
///
/// Input need not be sorted. Within a bucket the first open, max high, min low and last
/// close win, so the output is strictly ascending with one bar per bucket.
pub fn fold_into_buckets(bars: impl IntoIterator<Item = Bar>, timeframe: Timeframe) -> Vec<Bar> {
    bars.into_iter()
        .sorted_by_key(|bar| bar.time)
        .map(|bar| Bar {
            time: timeframe.bucket_start(bar.time),
            ..bar
        })
        .coalesce(|acc, next| {
            if acc.time == next.time {
                Ok(acc.merged(&next))
            } else {
                Err((acc, next))
            }
        })
        .collect()
}
