use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use common::{Candle, CandleSource, Error, InstrumentMeta, Resolution, Result};

/// REST client for the broker's read-only market-data API.
///
/// Auth is an opaque client id + access token pair sent on every request;
/// obtaining and refreshing the token happens outside this crate. A non-2xx
/// response or a non-"ok" envelope maps to a transient fetch error, while an
/// "ok" envelope with no candles is valid empty data.
pub struct BrokerClient {
    base_url: String,
    client_id: String,
    access_token: String,
    http: Client,
}

impl BrokerClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            access_token: access_token.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    async fn get(&self, path_and_query: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self
            .http
            .get(&url)
            .header(
                "Authorization",
                format!("{}:{}", self.client_id, self.access_token),
            )
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl CandleSource for BrokerClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let path = format!(
            "/data/history?symbol={}&resolution={}&date_format=0&range_from={}&range_to={}",
            symbol,
            resolution,
            from.timestamp(),
            to.timestamp()
        );
        debug!(symbol, %resolution, "Fetching candle history");
        let body = self.get(&path).await?;
        parse_history(symbol, &body)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<f64> {
        let path = format!("/data/quotes?symbols={symbol}");
        let body = self.get(&path).await?;
        parse_quote(symbol, &body)
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentMeta> {
        // The API exposes no metadata endpoint; index derivatives are
        // recognized by name, everything else trades in single units.
        let upper = symbol.to_uppercase();
        let lot_size = if upper.contains("NIFTY") {
            65
        } else if upper.contains("SENSEX") {
            20
        } else {
            1
        };
        Ok(InstrumentMeta { lot_size })
    }
}

// ─── Broker JSON parsing ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HistoryResponse {
    s: String,
    #[serde(default)]
    candles: Vec<[f64; 6]>,
}

#[derive(Deserialize)]
struct QuoteResponse {
    s: String,
    #[serde(default)]
    d: Vec<QuoteEntry>,
}

#[derive(Deserialize)]
struct QuoteEntry {
    v: QuoteValues,
}

#[derive(Deserialize)]
struct QuoteValues {
    lp: f64,
}

fn parse_history(symbol: &str, body: &str) -> Result<Vec<Candle>> {
    let resp: HistoryResponse = serde_json::from_str(body)?;
    if resp.s != "ok" {
        return Err(Error::Fetch(format!(
            "history status '{}' for {symbol}",
            resp.s
        )));
    }

    let mut candles = Vec::with_capacity(resp.candles.len());
    for row in &resp.candles {
        let time = Utc
            .timestamp_opt(row[0] as i64, 0)
            .single()
            .ok_or_else(|| Error::Fetch(format!("bad candle timestamp {} for {symbol}", row[0])))?;
        candles.push(Candle {
            time,
            open: row[1],
            high: row[2],
            low: row[3],
            close: row[4],
            volume: row[5],
        });
    }
    // Callers rely on ascending order; don't trust the wire.
    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

fn parse_quote(symbol: &str, body: &str) -> Result<f64> {
    let resp: QuoteResponse = serde_json::from_str(body)?;
    if resp.s != "ok" {
        return Err(Error::Fetch(format!(
            "quote status '{}' for {symbol}",
            resp.s
        )));
    }
    resp.d
        .first()
        .map(|entry| entry.v.lp)
        .ok_or_else(|| Error::Fetch(format!("no quote data for {symbol}")))
}
