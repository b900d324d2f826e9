//! # LvTrade Feed
//! Real-time market data ingestion and candle aggregation for the LvTrade client.
//!
//! A [`FeedSession`](session::FeedSession) holds one WebSocket connection per
//! (credential, instrument) pair and routes what arrives on it:
//! - `quote` messages are normalised for display (spread multiplier, inversion, precision)
//!   and published on a `watch` channel.
//! - `candle` messages are bucketed to the active [`Timeframe`](bucket::Timeframe),
//!   rate limited through a single pending cell and merged into a bounded
//!   [`HistoryBuffer`](history::HistoryBuffer) rendered by a
//!   [`ChartSurface`](chart::ChartSurface).
//! - `account_snapshots` batches are folded into a [`SnapshotBook`](snapshot::SnapshotBook).
//!
//! Older history is lazy loaded through a [`HistoryFetcher`](pagination::HistoryFetcher)
//! as the user scrolls back, keeping the viewport in place.

/// Timeframes and timestamp bucketing.
pub mod bucket;

/// Charting widget seam.
pub mod chart;

/// Session configuration.
pub mod config;

/// Inbound message routing.
pub mod consumer;

/// Lenient serde helpers.
pub mod de;

/// All [`Error`](std::error::Error)s generated in this crate.
pub mod error;

/// REST history fetcher.
pub mod fetch;

/// Bounded bar history.
pub mod history;

/// Instrument identifiers and display configuration.
pub mod instrument;

/// Wire protocol.
pub mod message;

/// Raw to display value conversion.
pub mod normalizer;

/// Backward history pagination.
pub mod pagination;

/// Connection lifecycle.
pub mod session;

/// Account snapshot merging.
pub mod snapshot;

/// Candle update rate limiting.
pub mod throttle;

// Re-export commonly used types for convenience
pub use bucket::Timeframe;
pub use chart::{ChartSurface, LogicalRange};
pub use config::FeedConfig;
pub use consumer::ConnectionState;
pub use error::{ChartError, FeedError, FetchError};
pub use fetch::HttpHistoryFetcher;
pub use history::{Bar, HistoryBuffer};
pub use instrument::{InstrumentConfig, InstrumentId, InstrumentRegistry};
pub use normalizer::Quote;
pub use pagination::{HistoryFetcher, HistoryRequest};
pub use session::{Credential, FeedManager, FeedSession, SessionDeps, SessionHandle};
pub use snapshot::{AccountId, AccountSnapshot, SnapshotBook};
