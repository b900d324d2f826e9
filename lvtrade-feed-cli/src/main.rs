use chrono::{DateTime, Utc};
use lvtrade_feed::{
    Bar, ChartError, ChartSurface, Credential, FeedConfig, FeedManager, HttpHistoryFetcher,
    InstrumentId, LogicalRange, SessionDeps, Timeframe,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

const ENV_PAIR: &str = "LVTRADE_PAIR";
const ENV_TOKEN: &str = "LVTRADE_TOKEN";
const ENV_TIMEFRAME: &str = "LVTRADE_TIMEFRAME";
const ENV_SPREAD_MULTIPLIER: &str = "LVTRADE_SPREAD_MULTIPLIER";

/// Chart stand-in that logs what a real widget would draw.
#[derive(Debug, Default)]
struct LogChart {
    range: Option<LogicalRange>,
}

impl ChartSurface for LogChart {
    fn set_series(&mut self, bars: &[Bar]) {
        info!(
            bars = bars.len(),
            first = %bar_time(bars.first()),
            last = %bar_time(bars.last()),
            "series replaced"
        );
        self.range = Some(LogicalRange::new(0.0, bars.len() as f64));
    }

    fn update_last_bar(&mut self, bar: &Bar) -> Result<(), ChartError> {
        info!(
            time = %bar_time(Some(bar)),
            open = bar.open,
            high = bar.high,
            low = bar.low,
            close = bar.close,
            "bar"
        );
        Ok(())
    }

    fn visible_range(&self) -> Option<LogicalRange> {
        self.range
    }

    fn set_visible_range(&mut self, range: LogicalRange) {
        self.range = Some(range);
    }
}

fn bar_time(bar: Option<&Bar>) -> String {
    bar.and_then(Bar::datetime)
        .map(|time: DateTime<Utc>| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Fixed spread multiplier, 1 when unset or unparseable.
fn parse_spread_multiplier(value: Option<String>) -> f64 {
    match value.map(|value| value.parse::<f64>()) {
        None => 1.0,
        Some(Ok(multiplier)) => multiplier,
        Some(Err(error)) => {
            warn!(var = ENV_SPREAD_MULTIPLIER, %error, "ignoring unparseable spread multiplier");
            1.0
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialise INFO Tracing log subscriber
    init_logging();

    let config = FeedConfig::from_env();

    // Usage: lvtrade-feed [PAIR] [TIMEFRAME]
    let mut args = std::env::args().skip(1);
    let pair = args
        .next()
        .or_else(|| env(ENV_PAIR))
        .unwrap_or_else(|| "XAUUSD".to_string());
    let timeframe = Timeframe::from_label(
        &args
            .next()
            .or_else(|| env(ENV_TIMEFRAME))
            .unwrap_or_default(),
    );

    let Some(token) = env(ENV_TOKEN) else {
        error!("{ENV_TOKEN} must be set to an auth token");
        std::process::exit(2);
    };

    let fetcher = match HttpHistoryFetcher::new(&config.http_url) {
        Ok(fetcher) => fetcher,
        Err(error) => {
            error!(%error, "invalid history endpoint");
            std::process::exit(2);
        }
    };

    let multiplier = parse_spread_multiplier(env(ENV_SPREAD_MULTIPLIER));
    let (_multiplier_tx, spread_multiplier) = watch::channel(multiplier);

    info!(%pair, %timeframe, ws_url = %config.ws_url, "starting LvTrade feed");

    let mut manager = FeedManager::new(SessionDeps {
        config: Arc::new(config),
        fetcher: Arc::new(fetcher),
        spread_multiplier,
    });

    let session = match manager
        .switch(
            Credential::new(token),
            InstrumentId::new(pair),
            timeframe,
            Box::new(LogChart::default()),
        )
        .await
    {
        Ok(session) => session,
        Err(error) => {
            error!(%error, "failed to open feed session");
            std::process::exit(1);
        }
    };

    let mut quote = session.quote();
    let mut snapshots = session.snapshots();
    let mut state = session.connection_state();

    // Senders live in the session task, so any `changed` error means the session ended
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, closing feed");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = ?current, "connection state");
            }
            changed = quote.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(quote) = quote.borrow_and_update().clone() {
                    info!(
                        bid = %quote.bid,
                        ask = %quote.ask,
                        last = %quote.last,
                        spread = %quote.spread,
                        ts = quote.timestamp,
                        "quote"
                    );
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let book = snapshots.borrow_and_update().clone();
                for (account, snapshot) in book.iter() {
                    info!(
                        %account,
                        pl = snapshot.profit_loss,
                        open = snapshot.open_position_count,
                        equity = ?snapshot.metrics.as_ref().map(|metrics| metrics.equity),
                        "account snapshot"
                    );
                }
            }
        }
    }

    manager.close().await;
}

fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO level
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Use colored output in debug mode
        .with_ansi(cfg!(debug_assertions))
        // Install this Tracing subscriber as global default
        .init()
}
