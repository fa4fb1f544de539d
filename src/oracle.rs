use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::domain::{PriceSample, PriceSource};

/// Price feed consumed by the strategies.
///
/// `Ok(None)` means the price is currently unavailable; callers must skip
/// the cycle without advancing their schedule.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn current_price(&self) -> Result<Option<PriceSample>>;
}

/// BTC/USD over Pyth's Hermes HTTP endpoint.
#[derive(Clone)]
pub struct HermesOracle {
    base_url: String,
    feed_id: String,
    http: Client,
}

#[derive(Deserialize)]
struct HermesResponse {
    parsed: Vec<HermesEntry>,
}

#[derive(Deserialize)]
struct HermesEntry {
    price: HermesPrice,
}

#[derive(Deserialize)]
struct HermesPrice {
    price: String,
    conf: String,
    expo: i32,
}

impl HermesOracle {
    pub fn new(base_url: String, feed_id: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            feed_id,
            http: Client::new(),
        }
    }

    async fn fetch(&self) -> Result<Option<PriceSample>> {
        let url = format!("{}/v2/updates/price/latest", self.base_url);
        let resp: HermesResponse = self
            .http
            .get(url)
            .query(&[("ids[]", self.feed_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(entry) = resp.parsed.first() else {
            return Ok(None);
        };
        let Some(price) = scale_fixed_point(&entry.price.price, entry.price.expo) else {
            return Ok(None);
        };
        let confidence = scale_fixed_point(&entry.price.conf, entry.price.expo);

        Ok(Some(PriceSample {
            price,
            confidence,
            observed_at: Utc::now(),
            source: PriceSource::Pyth,
        }))
    }
}

#[async_trait]
impl PriceOracle for HermesOracle {
    async fn current_price(&self) -> Result<Option<PriceSample>> {
        // Transport failures degrade to "no price"; the strategies treat that
        // as a skip and retry on the next tick.
        match self.fetch().await {
            Ok(sample) => Ok(sample),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "price fetch failed");
                Ok(None)
            }
        }
    }
}

/// Pyth prices are fixed-point integers with a (typically negative) exponent.
fn scale_fixed_point(raw: &str, expo: i32) -> Option<f64> {
    let value: f64 = raw.parse().ok()?;
    let scaled = value * 10f64.powi(expo);
    if scaled.is_finite() && scaled > 0.0 {
        Some(scaled)
    } else {
        None
    }
}
