//! Routing of inbound feed messages.
//!
//! A [`FeedPipeline`] owns everything one session mutates: the [`HistoryBuffer`], the
//! flush scheduler, the pagination controller and the published quote / snapshot state.
//! It is synchronous and takes the current time explicitly, so the async session only
//! drives it from its select loop.

use crate::{
    bucket::{Timeframe, fold_into_buckets},
    chart::{ChartSurface, LogicalRange, render_last_bar},
    error::{FeedError, FetchError},
    history::{Bar, HistoryBuffer},
    instrument::{InstrumentConfig, InstrumentId},
    message::{StreamMessage, parse_message},
    normalizer::{Quote, normalize_bar, normalize_quote},
    pagination::{HistoryRequest, PaginationConfig, PaginationController},
    snapshot::SnapshotBook,
    throttle::{FlushConfig, FlushScheduler},
};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info};

/// Lifecycle of a feed connection. `Disconnected` is terminal once a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
}

/// Static inputs of a [`FeedPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub instrument: InstrumentId,
    pub instrument_config: InstrumentConfig,
    pub timeframe: Timeframe,
    /// Bars requested by a full load.
    pub history_limit: usize,
    pub flush: FlushConfig,
    pub pagination: PaginationConfig,
}

#[derive(Debug)]
pub struct FeedPipeline {
    instrument: InstrumentId,
    instrument_config: InstrumentConfig,
    timeframe: Timeframe,
    history_limit: usize,
    history: HistoryBuffer,
    flush: FlushScheduler,
    pagination: PaginationController,
    spread_multiplier: watch::Receiver<f64>,
    quote_tx: watch::Sender<Option<Quote>>,
    snapshots_tx: watch::Sender<SnapshotBook>,
}

impl FeedPipeline {
    pub fn new(config: PipelineConfig, spread_multiplier: watch::Receiver<f64>, now: Instant) -> Self {
        let (quote_tx, _) = watch::channel(None);
        let (snapshots_tx, _) = watch::channel(SnapshotBook::default());

        Self {
            instrument: config.instrument,
            instrument_config: config.instrument_config,
            timeframe: config.timeframe,
            history_limit: config.history_limit,
            history: HistoryBuffer::new(),
            flush: FlushScheduler::new(config.flush),
            pagination: PaginationController::new(config.pagination, now),
            spread_multiplier,
            quote_tx,
            snapshots_tx,
        }
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn subscribe_quote(&self) -> watch::Receiver<Option<Quote>> {
        self.quote_tx.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SnapshotBook> {
        self.snapshots_tx.subscribe()
    }

    /// Parse and route one inbound text frame. Malformed frames are dropped.
    pub fn handle_text<Chart>(&mut self, text: &str, chart: &mut Chart, now: Instant)
    where
        Chart: ChartSurface + ?Sized,
    {
        if let Some(message) = parse_message(text) {
            self.handle_message(message, chart, now);
        }
    }

    pub fn handle_message<Chart>(&mut self, message: StreamMessage, chart: &mut Chart, now: Instant)
    where
        Chart: ChartSurface + ?Sized,
    {
        match message {
            StreamMessage::Quote(raw) => {
                let multiplier = *self.spread_multiplier.borrow();
                let quote = normalize_quote(&raw, &self.instrument_config, multiplier);
                self.quote_tx.send_replace(Some(quote));
            }
            StreamMessage::Candle(raw) => self.handle_candle(&raw, chart, now),
            StreamMessage::CandleSnapshot(raw) => {
                let count = self.replace_history(raw, chart, now);
                debug!(instrument = %self.instrument, count, "applied candle snapshot");
            }
            StreamMessage::AccountSnapshots(batch) => {
                self.snapshots_tx
                    .send_if_modified(|book| book.merge(&batch) > 0);
            }
        }
    }

    fn handle_candle<Chart>(&mut self, raw: &Bar, chart: &mut Chart, now: Instant)
    where
        Chart: ChartSurface + ?Sized,
    {
        let Some(bar) = normalize_bar(raw, &self.instrument_config) else {
            debug!(instrument = %self.instrument, ?raw, "dropping candle with unusable prices");
            return;
        };

        let bar = Bar {
            time: self.timeframe.bucket_start(bar.time),
            ..bar
        };

        let applied = self.flush.on_tick(bar, &mut self.history, now);
        if applied.is_some_and(|outcome| outcome.is_mutation()) {
            render_last_bar(chart, &self.history);
        }
    }

    /// Apply the pending cell if due.
    pub fn flush_due<Chart>(&mut self, chart: &mut Chart, now: Instant)
    where
        Chart: ChartSurface + ?Sized,
    {
        let applied = self.flush.flush_due(&mut self.history, now);
        if applied.is_some_and(|outcome| outcome.is_mutation()) {
            render_last_bar(chart, &self.history);
        }
    }

    /// Request for a full load of the active timeframe.
    pub fn full_load_request(&self) -> HistoryRequest {
        HistoryRequest {
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
            before: None,
            limit: self.history_limit,
        }
    }

    /// Switch granularity. Returns the full load request for the new timeframe, or `None`
    /// if it is already active.
    ///
    /// The buffer is kept until that load completes.
    pub fn set_timeframe(&mut self, timeframe: Timeframe, now: Instant) -> Option<HistoryRequest> {
        if timeframe == self.timeframe {
            return None;
        }
        info!(instrument = %self.instrument, from = %self.timeframe, to = %timeframe, "switching timeframe");
        self.timeframe = timeframe;
        self.flush.reset();
        self.pagination.reset(now);
        Some(self.full_load_request())
    }

    /// Apply a finished full load.
    pub fn complete_full_load<Chart>(
        &mut self,
        result: Result<Vec<Bar>, FetchError>,
        chart: &mut Chart,
        now: Instant,
    ) -> Result<usize, FeedError>
    where
        Chart: ChartSurface + ?Sized,
    {
        let raw = result?;
        Ok(self.replace_history(raw, chart, now))
    }

    fn replace_history<Chart>(&mut self, raw: Vec<Bar>, chart: &mut Chart, now: Instant) -> usize
    where
        Chart: ChartSurface + ?Sized,
    {
        let bars = self.to_display(raw);
        self.history.replace_all(bars);
        self.flush.reset();
        self.pagination.reset(now);
        chart.set_series(&self.history.snapshot());
        self.history.len()
    }

    pub fn pagination_deadline(&self) -> Option<Instant> {
        self.pagination.deadline()
    }

    /// Forward a chart viewport notification to the pagination controller.
    pub fn on_visible_range(&mut self, range: LogicalRange, now: Instant) -> bool {
        self.pagination.on_range_change(range, now)
    }

    /// Page request if the pagination debounce fired.
    pub fn poll_pagination(&mut self, now: Instant) -> Option<HistoryRequest> {
        let oldest = self.history.oldest().map(|bar| bar.time);
        self.pagination
            .poll_due(now, oldest)
            .map(|before| self.page_request(before))
    }

    /// Page request for the bars before the oldest loaded one, ignoring scroll state.
    pub fn request_older(&mut self) -> Option<HistoryRequest> {
        let oldest = self.history.oldest().map(|bar| bar.time);
        self.pagination
            .request_now(oldest)
            .map(|before| self.page_request(before))
    }

    fn page_request(&self, before: i64) -> HistoryRequest {
        HistoryRequest {
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
            before: Some(before),
            limit: self.pagination.config().page_size,
        }
    }

    /// Apply a finished page fetch, preserving the viewport.
    pub fn complete_page<Chart>(
        &mut self,
        result: Result<Vec<Bar>, FetchError>,
        chart: &mut Chart,
    ) -> Result<usize, FeedError>
    where
        Chart: ChartSurface + ?Sized,
    {
        let oldest = self.history.oldest().map(|bar| bar.time);
        let result = result.map(|raw| {
            let mut bars = self.to_display(raw);
            if let Some(oldest) = oldest {
                bars.retain(|bar| bar.time < oldest);
            }
            bars
        });
        self.pagination.complete(result, &mut self.history, chart)
    }

    /// Raw bars to display space, bucketed to the active timeframe.
    fn to_display(&self, raw: Vec<Bar>) -> Vec<Bar> {
        let bars = raw
            .iter()
            .filter_map(|bar| normalize_bar(bar, &self.instrument_config))
            .collect::<Vec<_>>();
        fold_into_buckets(bars, self.timeframe)
    }
}
