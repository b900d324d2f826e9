//! Feed session lifecycle.
//!
//! A [`FeedSession`] is one tokio task owning one WebSocket connection for a
//! (credential, instrument) pair together with the [`FeedPipeline`] it drives. Every
//! timer the session uses (flush check, pagination debounce, ping) lives inside that
//! task's select loop, so closing or dropping the [`SessionHandle`] cancels all of them at
//! once.

use crate::{
    bucket::Timeframe,
    chart::{ChartSurface, LogicalRange},
    config::FeedConfig,
    consumer::{ConnectionState, FeedPipeline, PipelineConfig},
    error::{FeedError, FetchError},
    history::Bar,
    instrument::InstrumentId,
    message::ControlMessage,
    normalizer::Quote,
    pagination::{HistoryFetcher, HistoryRequest},
    snapshot::SnapshotBook,
};
use futures::{
    FutureExt, SinkExt, StreamExt,
    future::{BoxFuture, pending},
};
use smol_str::SmolStr;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Authentication token identifying the user of a feed connection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(SmolStr);

impl Credential {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(SmolStr::new(token.as_ref().trim()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Commands a [`SessionHandle`] sends to its session task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SetTimeframe(Timeframe),
    VisibleRange(LogicalRange),
    /// Load older bars now, or retry the full load if nothing is loaded yet.
    LoadHistory,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Full,
    Page,
}

type FetchOutput = (FetchKind, Result<Vec<Bar>, FetchError>);

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<FeedConfig>,
    pub fetcher: Arc<dyn HistoryFetcher>,
    /// Spread multiplier of the currently selected account.
    pub spread_multiplier: watch::Receiver<f64>,
}

impl fmt::Debug for SessionDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDeps")
            .field("config", &self.config)
            .field("spread_multiplier", &*self.spread_multiplier.borrow())
            .finish_non_exhaustive()
    }
}

pub struct FeedSession {
    url: Url,
    instrument: InstrumentId,
    config: Arc<FeedConfig>,
    fetcher: Arc<dyn HistoryFetcher>,
    pipeline: FeedPipeline,
    chart: Box<dyn ChartSurface>,
    commands: mpsc::Receiver<SessionCommand>,
    state_tx: watch::Sender<ConnectionState>,
    in_flight: Option<BoxFuture<'static, FetchOutput>>,
}

impl FeedSession {
    /// Spawn a session task for `instrument` on behalf of `credential`.
    ///
    /// Must be called from within a tokio runtime. Connection failures are reported by the
    /// task (see [`SessionHandle::close`]) and the connection state moving back to
    /// `Disconnected`.
    pub fn open(
        credential: Credential,
        instrument: InstrumentId,
        timeframe: Timeframe,
        chart: Box<dyn ChartSurface>,
        deps: SessionDeps,
    ) -> Result<SessionHandle, FeedError> {
        let url = feed_url(&deps.config.ws_url, &credential, &instrument)?;
        let config = deps.config;
        let now = Instant::now();

        let pipeline = FeedPipeline::new(
            PipelineConfig {
                instrument: instrument.clone(),
                instrument_config: config.instruments.get(&instrument),
                timeframe,
                history_limit: config.history_limit,
                flush: config.flush,
                pagination: config.pagination,
            },
            deps.spread_multiplier,
            now,
        );

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let quote = pipeline.subscribe_quote();
        let snapshots = pipeline.subscribe_snapshots();

        let session = Self {
            url,
            instrument: instrument.clone(),
            config,
            fetcher: deps.fetcher,
            pipeline,
            chart,
            commands: command_rx,
            state_tx,
            in_flight: None,
        };

        let task = tokio::spawn(session.run());

        Ok(SessionHandle {
            credential,
            instrument,
            commands: command_tx,
            quote,
            snapshots,
            state: state_rx,
            task: Some(task),
        })
    }

    async fn run(mut self) -> Result<(), FeedError> {
        self.state_tx.send_replace(ConnectionState::Connecting);
        info!(instrument = %self.instrument, url = %redacted(&self.url), "connecting feed");

        let connect = connect_async(self.url.to_string());
        tokio::pin!(connect);

        let connected = loop {
            tokio::select! {
                result = &mut connect => break result,
                command = self.commands.recv() => match command {
                    None | Some(SessionCommand::Close) => {
                        debug!(instrument = %self.instrument, "feed closed while connecting");
                        self.state_tx.send_replace(ConnectionState::Disconnected);
                        return Ok(());
                    }
                    Some(command) => self.handle_command(command, Instant::now()),
                },
            }
        };

        let socket = match connected {
            Ok((socket, _response)) => socket,
            Err(error) => {
                error!(instrument = %self.instrument, %error, "failed to connect feed");
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(FeedError::Connect {
                    instrument: self.instrument.clone(),
                    reason: error.to_string(),
                });
            }
        };

        let (mut write, mut read) = socket.split();

        let result = self.stream(&mut write, &mut read).await;

        if let Err(error) = write.close().await {
            debug!(%error, "failed to close feed socket cleanly");
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        match &result {
            Ok(()) => info!(instrument = %self.instrument, "feed session ended"),
            Err(error) => error!(instrument = %self.instrument, %error, "feed session failed"),
        }
        result
    }

    async fn stream<Write, Read>(&mut self, write: &mut Write, read: &mut Read) -> Result<(), FeedError>
    where
        Write: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        Read: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        for control in [
            ControlMessage::Subscribe {
                pair: self.instrument.clone(),
            },
            ControlMessage::AccountSnapshotsSubscribe { enabled: true },
        ] {
            let text = serde_json::to_string(&control)
                .map_err(|error| FeedError::Socket(error.to_string()))?;
            write.send(Message::text(text)).await?;
        }

        self.state_tx.send_replace(ConnectionState::Subscribed);
        info!(instrument = %self.instrument, timeframe = %self.pipeline.timeframe(), "feed subscribed");

        let request = self.pipeline.full_load_request();
        self.start_fetch(FetchKind::Full, request);

        // Zero periods would panic
        let mut flush = tokio::time::interval(self.config.flush.check_interval.max(MIN_PERIOD));
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ping_interval = self.config.ping_interval.max(MIN_PERIOD);
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

        loop {
            let pagination_deadline = self.pipeline.pagination_deadline();
            let fetch_idle = self.in_flight.is_none();

            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(SessionCommand::Close) => return Ok(()),
                    Some(command) => self.handle_command(command, Instant::now()),
                },
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.pipeline.handle_text(&text, self.chart.as_mut(), Instant::now());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(instrument = %self.instrument, ?frame, "server closed feed connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Heartbeat and binary frames
                    }
                    Some(Err(error)) => return Err(FeedError::from(error)),
                    None => return Ok(()),
                },
                _ = flush.tick() => {
                    self.pipeline.flush_due(self.chart.as_mut(), Instant::now());
                }
                _ = sleep_until_opt(pagination_deadline), if fetch_idle => {
                    if let Some(request) = self.pipeline.poll_pagination(Instant::now()) {
                        self.start_fetch(FetchKind::Page, request);
                    }
                }
                (kind, result) = poll_optional(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_fetch(kind, result);
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(vec![].into())).await?;
                }
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand, now: Instant) {
        match command {
            SessionCommand::SetTimeframe(timeframe) => {
                // Replacing the slot cancels any fetch for the previous timeframe
                if let Some(request) = self.pipeline.set_timeframe(timeframe, now) {
                    self.start_fetch(FetchKind::Full, request);
                }
            }
            SessionCommand::VisibleRange(range) => {
                self.pipeline.on_visible_range(range, now);
            }
            SessionCommand::LoadHistory => {
                if self.in_flight.is_some() {
                    debug!(instrument = %self.instrument, "history fetch already in flight");
                } else if self.pipeline.history().is_empty() {
                    let request = self.pipeline.full_load_request();
                    self.start_fetch(FetchKind::Full, request);
                } else if let Some(request) = self.pipeline.request_older() {
                    self.start_fetch(FetchKind::Page, request);
                }
            }
            SessionCommand::Close => {}
        }
    }

    fn start_fetch(&mut self, kind: FetchKind, request: HistoryRequest) {
        debug!(?kind, ?request, "starting history fetch");
        let fetcher = Arc::clone(&self.fetcher);
        self.in_flight = Some(
            async move {
                let result = fetcher.fetch(request).await;
                (kind, result)
            }
            .boxed(),
        );
    }

    fn finish_fetch(&mut self, kind: FetchKind, result: Result<Vec<Bar>, FetchError>) {
        let now = Instant::now();
        let outcome = match kind {
            FetchKind::Full => self
                .pipeline
                .complete_full_load(result, self.chart.as_mut(), now),
            FetchKind::Page => self.pipeline.complete_page(result, self.chart.as_mut()),
        };

        match outcome {
            Ok(count) => debug!(instrument = %self.instrument, ?kind, count, "history applied"),
            Err(error) => warn!(instrument = %self.instrument, ?kind, %error, "history fetch failed"),
        }
    }
}

/// Client side handle of a running [`FeedSession`].
///
/// Dropping the handle aborts the session task.
#[derive(Debug)]
pub struct SessionHandle {
    credential: Credential,
    instrument: InstrumentId,
    commands: mpsc::Sender<SessionCommand>,
    quote: watch::Receiver<Option<Quote>>,
    snapshots: watch::Receiver<SnapshotBook>,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<Result<(), FeedError>>>,
}

impl SessionHandle {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    /// Latest display quote, `None` until the first quote arrives.
    pub fn quote(&self) -> watch::Receiver<Option<Quote>> {
        self.quote.clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<SnapshotBook> {
        self.snapshots.clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    pub async fn set_timeframe(&self, timeframe: Timeframe) -> Result<(), FeedError> {
        self.send(SessionCommand::SetTimeframe(timeframe)).await
    }

    pub async fn load_history(&self) -> Result<(), FeedError> {
        self.send(SessionCommand::LoadHistory).await
    }

    /// Report the chart's visible range. Non blocking: if the session is busy the
    /// notification is dropped, the next one supersedes it anyway.
    pub fn report_visible_range(&self, range: LogicalRange) -> Result<(), FeedError> {
        match self.commands.try_send(SessionCommand::VisibleRange(range)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(instrument = %self.instrument, "dropping visible range, session busy");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(FeedError::SessionClosed),
        }
    }

    async fn send(&self, command: SessionCommand) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedError::SessionClosed)
    }

    /// Close the connection and wait for the session task to finish.
    ///
    /// Returns the error that ended the session, if any.
    pub async fn close(mut self) -> Result<(), FeedError> {
        let _ = self.commands.send(SessionCommand::Close).await;

        let Some(task) = self.task.take() else {
            return Ok(());
        };

        match task.await {
            Ok(result) => result,
            Err(error) if error.is_cancelled() => Ok(()),
            Err(error) => {
                error!(instrument = %self.instrument, %error, "feed session task panicked");
                Err(FeedError::SessionClosed)
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the single live [`SessionHandle`].
///
/// Switching to a different (credential, instrument) pair closes the current connection
/// before the next one is opened.
#[derive(Debug)]
pub struct FeedManager {
    deps: SessionDeps,
    active: Option<SessionHandle>,
}

impl FeedManager {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps, active: None }
    }

    pub fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    /// Ensure a live session for `credential` and `instrument`.
    ///
    /// The same pair keeps its connection (and `chart` is dropped); only the timeframe is
    /// forwarded. A finished session is replaced.
    pub async fn switch(
        &mut self,
        credential: Credential,
        instrument: InstrumentId,
        timeframe: Timeframe,
        chart: Box<dyn ChartSurface>,
    ) -> Result<&SessionHandle, FeedError> {
        let reuse = self.active.as_ref().is_some_and(|session| {
            session.credential() == &credential
                && session.instrument() == &instrument
                && !session.is_finished()
        });

        if reuse {
            if let Some(session) = &self.active {
                session.set_timeframe(timeframe).await?;
            }
        } else {
            self.close().await;
            info!(%instrument, %timeframe, "opening feed session");
            let session = FeedSession::open(credential, instrument, timeframe, chart, self.deps.clone())?;
            self.active = Some(session);
        }

        self.active.as_ref().ok_or(FeedError::SessionClosed)
    }

    /// Close the live session, if any. Errors that ended it are logged.
    pub async fn close(&mut self) {
        if let Some(previous) = self.active.take() {
            let instrument = previous.instrument().clone();
            if let Err(error) = previous.close().await {
                warn!(%instrument, %error, "previous feed session ended with error");
            }
        }
    }
}

/// `ws_url` with the `pair` and `token` query parameters.
pub fn feed_url(ws_url: &str, credential: &Credential, instrument: &InstrumentId) -> Result<Url, FeedError> {
    let mut url = Url::parse(ws_url).map_err(|error| FeedError::Url(format!("{ws_url}: {error}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        scheme => return Err(FeedError::Url(format!("{ws_url}: unsupported scheme {scheme}"))),
    }
    url.query_pairs_mut()
        .append_pair("pair", instrument.as_str())
        .append_pair("token", credential.expose());
    Ok(url)
}

/// `url` without its query, safe to log.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

fn poll_optional<F>(slot: &mut Option<F>) -> impl Future<Output = F::Output> + '_
where
    F: Future + Unpin,
{
    futures::future::poll_fn(move |cx| match slot.as_mut() {
        Some(future) => future.poll_unpin(cx),
        None => std::task::Poll::Pending,
    })
}
