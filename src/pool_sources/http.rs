use super::{PoolSource, PoolSourceError};
use crate::types::RawMiningRecord;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Placeholder replaced by the wallet address in the URL template.
pub const WALLET_PLACEHOLDER: &str = "{wallet}";

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

#[derive(Debug, Deserialize)]
struct PaymentsResponse {
    #[serde(default)]
    payments: Vec<Value>,
}

/// Pool exposing `GET <url>` -> `{"payments":[{"amount","time","tx"}]}` per
/// wallet. `time` is unix seconds or RFC 3339.
///
/// The request timeout applies to each wallet's request on its own, so one
/// stalled wallet only loses its own payouts.
pub struct JsonPaymentsSource {
    pool_id: String,
    url_template: String,
    client: reqwest::Client,
    max_concurrent_requests: usize,
}

impl JsonPaymentsSource {
    pub fn new(
        pool_id: impl Into<String>,
        url_template: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, PoolSourceError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            pool_id: pool_id.into(),
            url_template: url_template.into(),
            client,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        })
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max.max(1);
        self
    }

    fn url_for(&self, wallet: &str) -> String {
        if self.url_template.contains(WALLET_PLACEHOLDER) {
            self.url_template.replace(WALLET_PLACEHOLDER, wallet)
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), wallet)
        }
    }

    async fn fetch_wallet(&self, wallet: &str) -> Result<Vec<RawMiningRecord>, PoolSourceError> {
        let url = self.url_for(wallet);
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            return Err(PoolSourceError::Status(response.status().as_u16()));
        }
        let body = response.text().await.map_err(request_error)?;
        parse_payments(&self.pool_id, wallet, &body)
    }
}

fn request_error(e: reqwest::Error) -> PoolSourceError {
    if e.is_timeout() {
        PoolSourceError::Timeout
    } else {
        PoolSourceError::Http(e)
    }
}

#[async_trait]
impl PoolSource for JsonPaymentsSource {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    async fn fetch(&self, wallets: &[String]) -> Result<Vec<RawMiningRecord>, PoolSourceError> {
        let fetches: Vec<_> = wallets
            .iter()
            .map(|w| async move { (w, self.fetch_wallet(w).await) })
            .collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffered(self.max_concurrent_requests)
            .collect()
            .await;
        let mut records = Vec::new();
        let mut last_error = None;
        let mut any_ok = wallets.is_empty();
        for (wallet, result) in results {
            match result {
                Ok(mut batch) => {
                    any_ok = true;
                    records.append(&mut batch);
                }
                Err(e) => {
                    debug!(pool = %self.pool_id, wallet = %wallet, error = %e, "Wallet fetch failed");
                    last_error = Some(e);
                }
            }
        }
        // One wallet failing is not a pool outage; every wallet failing is.
        match last_error {
            Some(e) if !any_ok => Err(e),
            Some(e) => {
                warn!(pool = %self.pool_id, error = %e, "Some wallets could not be fetched");
                Ok(records)
            }
            None => {
                debug!(pool = %self.pool_id, records = records.len(), "Fetched payouts");
                Ok(records)
            }
        }
    }
}

/// Parses a payments body. Individual malformed payments are kept with their
/// missing fields unset so validation can count and report them.
pub fn parse_payments(
    pool_id: &str,
    wallet: &str,
    body: &str,
) -> Result<Vec<RawMiningRecord>, PoolSourceError> {
    let response: PaymentsResponse =
        serde_json::from_str(body).map_err(|e| PoolSourceError::Decode(e.to_string()))?;
    Ok(response
        .payments
        .iter()
        .map(|payment| RawMiningRecord {
            pool_id: Some(pool_id.to_string()),
            tx_hash: payment.get("tx").and_then(Value::as_str).map(str::to_string),
            wallet_address: Some(wallet.to_string()),
            amount_advc: payment.get("amount").and_then(decimal_from_json),
            occurred_at: payment.get("time").and_then(timestamp_from_json),
        })
        .collect())
}

fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        // Go through the textual form to avoid binary float artifacts.
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

fn timestamp_from_json(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_opt(secs, 0).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        _ => None,
    }
}

/// Local payments endpoint for tests: `GET /<wallet>` answers one 1.5 ADVC
/// payout with tx `0x<wallet>`. Wallets starting with `slow` stall first.
#[cfg(test)]
pub(crate) mod test_server {
    use chrono::Utc;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub async fn spawn(stall: Duration) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    loop {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len() {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).to_string();
                    let wallet = request
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .trim_start_matches('/')
                        .to_string();
                    if wallet.starts_with("slow") {
                        tokio::time::sleep(stall).await;
                    }
                    let body = format!(
                        r#"{{"payments":[{{"amount":"1.5","time":{},"tx":"0x{}"}}]}}"#,
                        Utc::now().timestamp(),
                        wallet
                    );
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payments() {
        let body = r#"{"payments":[
            {"amount": 1.5, "time": 1763467200, "tx": "0xaaa"},
            {"amount": "0.25", "time": "2025-11-18T12:00:00Z", "tx": "0xbbb"},
            {"time": 1763467200, "tx": "0xccc"}
        ]}"#;
        let records = parse_payments("cpu-pool", "advc1qw", body).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].amount_advc, Some(Decimal::from_str("1.5").unwrap()));
        assert_eq!(
            records[0].occurred_at,
            Some(Utc.timestamp_opt(1763467200, 0).unwrap())
        );
        assert_eq!(records[1].amount_advc, Some(Decimal::from_str("0.25").unwrap()));
        assert_eq!(records[1].occurred_at, records[0].occurred_at);
        assert_eq!(records[2].amount_advc, None);
        assert_eq!(records[2].wallet_address.as_deref(), Some("advc1qw"));
    }

    #[test]
    fn test_missing_payments_is_empty() {
        assert!(parse_payments("cpu-pool", "w", "{}").unwrap().is_empty());
        assert!(matches!(
            parse_payments("cpu-pool", "w", "<html>"),
            Err(PoolSourceError::Decode(_))
        ));
    }

    #[test]
    fn test_url_template() {
        let source = JsonPaymentsSource::new(
            "cpu-pool",
            "http://cpu-pool.com/api/worker/{wallet}",
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(source.url_for("w1"), "http://cpu-pool.com/api/worker/w1");

        let source =
            JsonPaymentsSource::new("p", "http://pool/payments/", Duration::from_secs(1)).unwrap();
        assert_eq!(source.url_for("w1"), "http://pool/payments/w1");
    }

    #[tokio::test]
    async fn test_slow_wallet_only_loses_its_own_payouts() {
        let addr = test_server::spawn(Duration::from_secs(5)).await;
        let source = JsonPaymentsSource::new(
            "cpu-pool",
            format!("http://{}/{{wallet}}", addr),
            Duration::from_millis(300),
        )
        .unwrap()
        .with_max_concurrent_requests(2);

        let started = std::time::Instant::now();
        let records = source
            .fetch(&["fast".to_string(), "slow".to_string()])
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].wallet_address.as_deref(), Some("fast"));
        assert_eq!(records[0].tx_hash.as_deref(), Some("0xfast"));

        // Every wallet stalling is a pool failure.
        let err = source
            .fetch(&["slow-a".to_string(), "slow-b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolSourceError::Timeout));
    }
}
