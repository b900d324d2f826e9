//! Wire protocol of the feed connection.
//!
//! Inbound messages carry a `type` discriminant, either wrapping the payload in `data`
//! (`{"type": "quote", "data": {..}}`, as the feed server publishes them) or inlining it
//! (`{"type": "quote", "bid": ..}`). Unknown kinds and malformed payloads parse to `None`.

use crate::{
    de::{de_lenient_f64, de_lenient_i64, de_opt_string_or_number, de_string_or_number},
    history::Bar,
    instrument::InstrumentId,
    normalizer::RawQuote,
    snapshot::AccountSnapshotUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Quote(RawQuote),
    /// Live candle update in raw (api) price space.
    Candle(Bar),
    /// Full candle history sent by the server on subscribe, raw price space.
    CandleSnapshot(Vec<Bar>),
    AccountSnapshots(Vec<AccountSnapshotUpdate>),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    inline: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(default, deserialize_with = "de_string_or_number")]
    bid: String,
    #[serde(default, deserialize_with = "de_string_or_number")]
    ask: String,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    last: Option<String>,
    #[serde(default, alias = "timestamp", deserialize_with = "de_lenient_i64")]
    ts: i64,
}

/// Candle as sent by the server: `time` in seconds, prices as numbers or decimal strings.
#[derive(Debug, Deserialize)]
pub(crate) struct CandlePayload {
    #[serde(alias = "bucketStart", deserialize_with = "de_lenient_i64")]
    time: i64,
    #[serde(deserialize_with = "de_lenient_f64")]
    open: f64,
    #[serde(deserialize_with = "de_lenient_f64")]
    high: f64,
    #[serde(deserialize_with = "de_lenient_f64")]
    low: f64,
    #[serde(deserialize_with = "de_lenient_f64")]
    close: f64,
}

impl From<CandlePayload> for Bar {
    fn from(candle: CandlePayload) -> Self {
        Bar {
            time: candle.time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandleSnapshotPayload {
    #[serde(default)]
    candles: Vec<CandlePayload>,
}

#[derive(Debug, Deserialize)]
struct AccountSnapshotsPayload {
    #[serde(default)]
    items: Vec<AccountSnapshotUpdate>,
}

/// Parse an inbound text frame.
///
/// Never fails loudly: malformed input must not halt the stream.
pub fn parse_message(text: &str) -> Option<StreamMessage> {
    let envelope = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => envelope,
        Err(error) => {
            debug!(%error, payload = %truncate(text), "dropping unparseable message");
            return None;
        }
    };

    let payload = match envelope.data {
        Some(data) => data,
        None => Value::Object(envelope.inline),
    };

    let parsed = match envelope.kind.as_str() {
        "quote" => serde_json::from_value::<QuotePayload>(payload).map(|quote| {
            StreamMessage::Quote(RawQuote {
                bid: quote.bid,
                ask: quote.ask,
                last: quote.last,
                timestamp: quote.ts,
            })
        }),
        "candle" => serde_json::from_value::<CandlePayload>(nested(payload, "candle"))
            .map(|candle| StreamMessage::Candle(Bar::from(candle))),
        "snapshot" => serde_json::from_value::<CandleSnapshotPayload>(payload).map(|snapshot| {
            StreamMessage::CandleSnapshot(snapshot.candles.into_iter().map(Bar::from).collect())
        }),
        "account_snapshots" => serde_json::from_value::<AccountSnapshotsPayload>(payload)
            .map(|snapshots| StreamMessage::AccountSnapshots(snapshots.items)),
        other => {
            debug!(kind = other, "dropping message of unknown kind");
            return None;
        }
    };

    parsed
        .inspect_err(|error| debug!(kind = %envelope.kind, %error, "dropping malformed payload"))
        .ok()
}

/// The candle stream nests its bar under `candle`, the broadcast bus does not.
fn nested(payload: Value, key: &str) -> Value {
    match payload {
        Value::Object(mut map) => match map.remove(key) {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Outbound control messages sent when a session becomes `Subscribed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Subscribe to quotes and candles of an instrument.
    Subscribe { pair: InstrumentId },
    /// Opt in (or out) of the account snapshot broadcast channel.
    AccountSnapshotsSubscribe { enabled: bool },
}
