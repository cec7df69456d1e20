// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! USD → IDR conversion for display amounts.
//!
//! Any failure of the live source degrades to the configured fixed rate.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::warn;

pub const DEFAULT_FALLBACK_RATE: f64 = 16_000.0;

pub struct ExchangeRates {
    source: Option<(Client, String)>,
    fallback: f64,
}

impl ExchangeRates {
    /// Always answers with `rate`.
    pub fn fixed(rate: f64) -> Self {
        Self {
            source: None,
            fallback: rate,
        }
    }

    /// Query `url` (a JSON document exposing `rates.IDR`), falling back to `fallback`.
    pub fn from_url(url: impl Into<String>, fallback: f64) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(5)).build();
        match client {
            Ok(client) => Self {
                source: Some((client, url.into())),
                fallback,
            },
            Err(e) => {
                warn!(error = %e, "Exchange rate client unavailable, using fixed rate");
                Self::fixed(fallback)
            }
        }
    }

    pub async fn usd_to_idr(&self) -> f64 {
        let Some((client, url)) = &self.source else {
            return self.fallback;
        };

        match fetch_rate(client, url).await {
            Ok(rate) => rate,
            Err(reason) => {
                warn!(reason = %reason, fallback = self.fallback, "Exchange rate unavailable, using fallback");
                self.fallback
            }
        }
    }
}

async fn fetch_rate(client: &Client, url: &str) -> Result<f64, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("invalid JSON: {e}"))?;
    parse_idr_rate(&body).ok_or_else(|| "rates.IDR missing or not positive".to_string())
}

fn parse_idr_rate(body: &Value) -> Option<f64> {
    body.pointer("/rates/IDR")
        .and_then(Value::as_f64)
        .filter(|rate| rate.is_finite() && *rate > 0.0)
}

/// Convert USD cents to whole rupiah, rounding half away from zero.
pub fn cents_to_idr(amount_usd_cents: u64, rate: f64) -> u64 {
    (amount_usd_cents as f64 * rate / 100.0).round() as u64
}
