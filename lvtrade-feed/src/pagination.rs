//! Lazy loading of older history while the user scrolls back.
//!
//! The [`PaginationController`] watches the chart's visible [`LogicalRange`]. Once the
//! user scrolls towards older bars near the left edge it debounces, asks a
//! [`HistoryFetcher`] for the page before the oldest loaded bar, prepends the result and
//! shifts the visible range so the bars on screen stay put.

use crate::{
    bucket::Timeframe,
    chart::{ChartSurface, LogicalRange},
    error::{FeedError, FetchError},
    history::{Bar, HistoryBuffer},
    instrument::InstrumentId,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default number of bars requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 300;

/// Pagination timing and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaginationConfig {
    /// Range notifications are ignored for this long after (re)initialisation.
    pub settle: Duration,
    /// Qualifying notifications within this window collapse into one fetch.
    pub debounce: Duration,
    /// Fetch only when the visible range starts below this logical index.
    pub edge_threshold: f64,
    pub page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            debounce: Duration::from_millis(300),
            edge_threshold: 10.0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PaginationConfig {
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_edge_threshold(mut self, threshold: f64) -> Self {
        self.edge_threshold = threshold;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Request for a page of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub instrument: InstrumentId,
    pub timeframe: Timeframe,
    /// Only bars strictly older than this bucket start. `None` requests the latest bars.
    pub before: Option<i64>,
    pub limit: usize,
}

/// Source of historical bars.
///
/// Bars are returned in raw (api) price space, in any order.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    async fn fetch(&self, request: HistoryRequest) -> Result<Vec<Bar>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct PaginationController {
    config: PaginationConfig,
    settle_until: Instant,
    last_from: Option<f64>,
    deadline: Option<Instant>,
    in_flight: bool,
    has_more: bool,
}

impl PaginationController {
    pub fn new(config: PaginationConfig, now: Instant) -> Self {
        Self {
            config,
            settle_until: now + config.settle,
            last_from: None,
            deadline: None,
            in_flight: false,
            has_more: true,
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// When the armed debounce fires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Forget all pagination state and start a new settle window.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(self.config, now);
    }

    /// Handle a visible range notification. Returns `true` if it (re)armed the debounce.
    pub fn on_range_change(&mut self, range: LogicalRange, now: Instant) -> bool {
        let previous = self.last_from.replace(range.from);

        if now < self.settle_until {
            return false;
        }

        let scrolling_back = previous.is_some_and(|previous| range.from < previous);
        if scrolling_back
            && range.from < self.config.edge_threshold
            && !self.in_flight
            && self.has_more
        {
            self.deadline = Some(now + self.config.debounce);
            true
        } else {
            false
        }
    }

    /// Fire the debounce if its deadline passed.
    ///
    /// Returns the `before` timestamp to fetch (the oldest loaded bucket) and marks a fetch
    /// in flight.
    pub fn poll_due(&mut self, now: Instant, oldest: Option<i64>) -> Option<i64> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.deadline = None,
            _ => return None,
        }
        self.begin(oldest)
    }

    /// Start a fetch right away, bypassing the scroll heuristics.
    pub fn request_now(&mut self, oldest: Option<i64>) -> Option<i64> {
        self.deadline = None;
        self.begin(oldest)
    }

    fn begin(&mut self, oldest: Option<i64>) -> Option<i64> {
        if self.in_flight || !self.has_more {
            return None;
        }
        let before = oldest?;
        self.in_flight = true;
        debug!(before, "requesting older history");
        Some(before)
    }

    /// Apply a finished fetch. `older` must already be in display space and bucketed.
    ///
    /// The in flight flag is cleared whatever the outcome. A failed fetch leaves
    /// `has_more` untouched so the next scroll retries; an empty page clears it. On
    /// success the visible range is shifted right by the number of prepended bars.
    pub fn complete<Chart>(
        &mut self,
        result: Result<Vec<Bar>, FetchError>,
        history: &mut HistoryBuffer,
        chart: &mut Chart,
    ) -> Result<usize, FeedError>
    where
        Chart: ChartSurface + ?Sized,
    {
        self.in_flight = false;
        let older = result?;

        if older.is_empty() {
            info!("history exhausted, pagination disabled");
            self.has_more = false;
            return Ok(0);
        }

        // Rejections are logged by the buffer
        let Ok(count) = history.prepend(older) else {
            return Ok(0);
        };

        let range = chart.visible_range();
        chart.set_series(&history.snapshot());
        if let Some(range) = range {
            chart.set_visible_range(range.shifted(count));
        }
        Ok(count)
    }
}
