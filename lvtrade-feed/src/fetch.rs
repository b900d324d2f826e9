//! REST implementation of the [`HistoryFetcher`] collaborator.

use crate::{
    error::{FeedError, FetchError},
    history::Bar,
    message::CandlePayload,
    pagination::{HistoryFetcher, HistoryRequest},
};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

/// Fetches candles from `GET {base}/v1/market/candles`.
#[derive(Debug, Clone)]
pub struct HttpHistoryFetcher {
    client: reqwest::Client,
    candles_url: Url,
}

impl HttpHistoryFetcher {
    pub fn new(base_url: &str) -> Result<Self, FeedError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, FeedError> {
        let mut candles_url =
            Url::parse(base_url).map_err(|error| FeedError::Url(format!("{base_url}: {error}")))?;

        candles_url
            .path_segments_mut()
            .map_err(|()| FeedError::Url(format!("{base_url}: cannot be a base url")))?
            .pop_if_empty()
            .extend(["v1", "market", "candles"]);

        Ok(Self {
            client,
            candles_url,
        })
    }

    /// Full request url for `request`.
    pub fn request_url(&self, request: &HistoryRequest) -> Url {
        let mut url = self.candles_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("pair", request.instrument.as_str())
                .append_pair("timeframe", request.timeframe.label())
                .append_pair("limit", &request.limit.to_string());
            if let Some(before) = request.before {
                query.append_pair("before", &before.to_string());
            }
        }
        url
    }
}

#[async_trait]
impl HistoryFetcher for HttpHistoryFetcher {
    async fn fetch(&self, request: HistoryRequest) -> Result<Vec<Bar>, FetchError> {
        let url = self.request_url(&request);
        debug!(%url, "fetching history");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bars = decode_candles(&body)?;

        // Servers that ignore `before` return the latest bars
        Ok(match request.before {
            Some(before) => bars.into_iter().filter(|bar| bar.time < before).collect(),
            None => bars,
        })
    }
}

/// Decode the server's candle array (raw price space).
pub fn decode_candles(body: &str) -> Result<Vec<Bar>, FetchError> {
    serde_json::from_str::<Vec<CandlePayload>>(body)
        .map(|candles| candles.into_iter().map(Bar::from).collect())
        .map_err(|error| FetchError::Decode(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bucket::Timeframe, instrument::InstrumentId};

    #[test]
    fn test_request_url() {
        struct TestCase {
            base: &'static str,
            before: Option<i64>,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: latest page
                base: "http://127.0.0.1:8080",
                before: None,
                expected: "http://127.0.0.1:8080/v1/market/candles?pair=UZS-USD&timeframe=5m&limit=300",
            },
            TestCase {
                // TC1: older page behind a path prefix
                base: "https://lvtrade.example/api/",
                before: Some(1_700_000_000),
                expected: "https://lvtrade.example/api/v1/market/candles?pair=UZS-USD&timeframe=5m&limit=300&before=1700000000",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let fetcher = HttpHistoryFetcher::new(test.base).unwrap();
            let request = HistoryRequest {
                instrument: InstrumentId::new("uzs-usd"),
                timeframe: Timeframe::M5,
                before: test.before,
                limit: 300,
            };

            let actual = fetcher.request_url(&request);
            assert_eq!(actual.as_str(), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpHistoryFetcher::new("not a url"),
            Err(FeedError::Url(_))
        ));
        assert!(matches!(
            HttpHistoryFetcher::new("mailto:ops@lvtrade.example"),
            Err(FeedError::Url(_))
        ));
    }

    #[test]
    fn test_decode_candles() {
        let bars = decode_candles(
            r#"[
                {"time": 1700000000, "open": "0.00007690000", "high": "0.00007700000", "low": "0.00007680000", "close": "0.00007695000"},
                {"time": 1700000060, "open": "0.00007695000", "high": "0.00007710000", "low": "0.00007690000", "close": "0.00007705000"}
            ]"#,
        )
        .unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, 1_700_000_000);
        assert_eq!(bars[1].high, 0.0000771);

        assert!(matches!(decode_candles(r#"{"error":"pair not supported"}"#), Err(FetchError::Decode(_))));
    }
}
