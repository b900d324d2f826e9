//! Seam to the external charting widget.

use crate::{error::ChartError, history::{Bar, HistoryBuffer}};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Visible span of the chart over the bar sequence, as fractional bar indices.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LogicalRange {
    pub from: f64,
    pub to: f64,
}

impl LogicalRange {
    pub fn new(from: f64, to: f64) -> Self {
        Self { from, to }
    }

    /// Range moved right by `bars` on both ends.
    pub fn shifted(&self, bars: usize) -> Self {
        Self {
            from: self.from + bars as f64,
            to: self.to + bars as f64,
        }
    }
}

/// Rendering capability consumed by a feed session.
///
/// Implementations receive copies of the history, never a live handle.
pub trait ChartSurface: Send {
    /// Replace the full series.
    fn set_series(&mut self, bars: &[Bar]);

    /// Update (or append) the newest bar. May be rejected, eg/ for a stale timestamp.
    fn update_last_bar(&mut self, bar: &Bar) -> Result<(), ChartError>;

    fn visible_range(&self) -> Option<LogicalRange>;

    fn set_visible_range(&mut self, range: LogicalRange);
}

impl<T> ChartSurface for Box<T>
where
    T: ChartSurface + ?Sized,
{
    fn set_series(&mut self, bars: &[Bar]) {
        (**self).set_series(bars)
    }

    fn update_last_bar(&mut self, bar: &Bar) -> Result<(), ChartError> {
        (**self).update_last_bar(bar)
    }

    fn visible_range(&self) -> Option<LogicalRange> {
        (**self).visible_range()
    }

    fn set_visible_range(&mut self, range: LogicalRange) {
        (**self).set_visible_range(range)
    }
}

/// Push the newest history bar to the chart, resynchronising the full series if the
/// incremental update is rejected. Returns `true` if a resync happened.
pub fn render_last_bar<Chart>(chart: &mut Chart, history: &HistoryBuffer) -> bool
where
    Chart: ChartSurface + ?Sized,
{
    let Some(last) = history.last() else {
        return false;
    };

    match chart.update_last_bar(last) {
        Ok(()) => false,
        Err(error) => {
            warn!(%error, bar_time = last.time, "chart rejected last bar, resyncing series");
            chart.set_series(&history.snapshot());
            true
        }
    }
}
