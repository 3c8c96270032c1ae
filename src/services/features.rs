use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MlError;

/// Column order of the design matrix. The fingerprint, the scaler and the
/// persisted model all assume this exact order.
pub const FEATURE_COLS: [&str; 10] = [
    "time_numeric",
    "volume",
    "day_of_week",
    "month",
    "year",
    "day",
    "is_weekend",
    "price_rolling_mean_7",
    "price_diff",
    "volume_rolling_mean_7",
];

/// Rolling window length for the price/volume mean features.
pub const ROLLING_WINDOW: usize = 7;

lazy_static! {
    // Upstream tick timestamps arrive as e.g. "Jan 01 2024 00: +0".
    static ref UTC_OFFSET_SUFFIX: Regex = Regex::new(r" \+0$").unwrap();
    static ref TRAILING_COLON: Regex = Regex::new(r":$").unwrap();
}

const DATETIME_FORMATS: [&str; 3] = ["%b %d %Y %H", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMATS: [&str; 2] = ["%b %d %Y", "%Y-%m-%d"];

/// One raw tick after envelope extraction, before normalization.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub time: String,
    pub price: f64,
    pub volume: f64,
}

/// One row of the normalized feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub time: NaiveDateTime,
    pub time_numeric: i64,
    pub price: f64,
    pub volume: f64,
    pub day_of_week: f64,
    pub month: f64,
    pub year: f64,
    pub day: f64,
    pub is_weekend: f64,
    pub price_rolling_mean_7: f64,
    pub price_diff: f64,
    pub volume_rolling_mean_7: f64,
}

impl NormalizedRow {
    /// Feature values in [`FEATURE_COLS`] order.
    pub fn features(&self) -> [f64; 10] {
        [
            self.time_numeric as f64,
            self.volume,
            self.day_of_week,
            self.month,
            self.year,
            self.day,
            self.is_weekend,
            self.price_rolling_mean_7,
            self.price_diff,
            self.volume_rolling_mean_7,
        ]
    }
}

/// Training-time averages of the history-dependent features. Persisted next
/// to the model and broadcast over future dates at prediction time, which
/// have no real volume or rolling history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeans {
    pub volume: f64,
    pub price_rolling_mean_7: f64,
    pub price_diff: f64,
    pub volume_rolling_mean_7: f64,
}

/// Feature table sorted ascending by time, with no null cells.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    rows: Vec<NormalizedRow>,
}

impl NormalizedTable {
    pub fn rows(&self) -> &[NormalizedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Design matrix rows in [`FEATURE_COLS`] order.
    pub fn feature_rows(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.features().to_vec()).collect()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.price).collect()
    }

    pub fn times(&self) -> Vec<NaiveDateTime> {
        self.rows.iter().map(|r| r.time).collect()
    }

    pub fn feature_means(&self) -> FeatureMeans {
        let n = self.rows.len() as f64;
        if self.rows.is_empty() {
            return FeatureMeans::default();
        }
        FeatureMeans {
            volume: self.rows.iter().map(|r| r.volume).sum::<f64>() / n,
            price_rolling_mean_7: self.rows.iter().map(|r| r.price_rolling_mean_7).sum::<f64>() / n,
            price_diff: self.rows.iter().map(|r| r.price_diff).sum::<f64>() / n,
            volume_rolling_mean_7: self.rows.iter().map(|r| r.volume_rolling_mean_7).sum::<f64>()
                / n,
        }
    }
}

/// Check the raw `{"prices": [[date, price, quantity], ...]}` envelope.
///
/// Runs before anything is queued so malformed input never occupies a
/// training slot. The returned string names the first offending field.
pub fn validate_price_history(payload: &Value) -> Result<(), String> {
    if !payload.is_object() {
        return Err("Price history must be an object".to_string());
    }
    let prices = payload.get("prices").and_then(Value::as_array);
    let Some(prices) = prices else {
        return Err("Missing or invalid 'prices' list".to_string());
    };
    if prices.is_empty() {
        return Err("Missing or invalid 'prices' list".to_string());
    }
    for entry in prices {
        let Some(fields) = entry.as_array() else {
            return Err("Each price entry must be a list of [date, price, quantity]".to_string());
        };
        if fields.len() != 3 {
            return Err("Each price entry must be a list of [date, price, quantity]".to_string());
        }
        if !fields[0].is_string() {
            return Err("Date must be a string".to_string());
        }
        if coerce_to_f64(&fields[1]).is_none() {
            return Err("Price must be a number".to_string());
        }
        let quantity = &fields[2];
        if !(quantity.is_string() || quantity.is_i64() || quantity.is_u64()) {
            return Err("Quantity must be a string or integer".to_string());
        }
    }
    Ok(())
}

/// Extract ticks from a validated envelope. Quantities that are not numeric
/// coerce to volume 0 rather than failing.
pub fn parse_ticks(payload: &Value) -> Vec<PriceTick> {
    let Some(prices) = payload.get("prices").and_then(Value::as_array) else {
        return Vec::new();
    };
    prices
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array()?;
            let time = fields.first()?.as_str()?.to_string();
            let price = coerce_to_f64(fields.get(1)?)?;
            let volume = fields.get(2).and_then(coerce_to_f64).unwrap_or(0.0);
            Some(PriceTick { time, price, volume })
        })
        .collect()
}

fn coerce_to_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Build the sorted, feature-enriched table from raw ticks.
///
/// Rows are sorted ascending by parsed time before any derived column is
/// computed, so the rolling means and the first difference only ever look at
/// current and past rows. A single unparseable timestamp fails the whole
/// batch: dropping it silently would desynchronize the row ordering.
pub fn normalize_prices(ticks: &[PriceTick]) -> Result<NormalizedTable, MlError> {
    if ticks.is_empty() {
        return Err(MlError::Validation(
            "price history contains no ticks".to_string(),
        ));
    }

    let mut parsed: Vec<(NaiveDateTime, f64, f64)> = Vec::with_capacity(ticks.len());
    for tick in ticks {
        let time = parse_timestamp(&tick.time)?;
        parsed.push((time, tick.price, tick.volume));
    }
    parsed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rows = Vec::with_capacity(parsed.len());
    for i in 0..parsed.len() {
        let (time, price, volume) = parsed[i];
        let window = &parsed[i.saturating_sub(ROLLING_WINDOW - 1)..=i];
        let price_rolling_mean_7 =
            window.iter().map(|(_, p, _)| p).sum::<f64>() / window.len() as f64;
        let volume_rolling_mean_7 =
            window.iter().map(|(_, _, v)| v).sum::<f64>() / window.len() as f64;
        let price_diff = if i == 0 { 0.0 } else { price - parsed[i - 1].1 };
        let day_of_week = time.weekday().num_days_from_monday() as f64;

        rows.push(NormalizedRow {
            time,
            time_numeric: time.and_utc().timestamp(),
            price,
            volume,
            day_of_week,
            month: time.month() as f64,
            year: time.year() as f64,
            day: time.day() as f64,
            is_weekend: if day_of_week >= 5.0 { 1.0 } else { 0.0 },
            price_rolling_mean_7,
            price_diff,
            volume_rolling_mean_7,
        });
    }

    Ok(NormalizedTable { rows })
}

/// Parse one tick timestamp, tolerating the " +0" offset marker and the
/// trailing colon the upstream source appends.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, MlError> {
    let trimmed = raw.trim();
    let no_offset = UTC_OFFSET_SUFFIX.replace(trimmed, "");
    let cleaned = TRAILING_COLON.replace(no_offset.as_ref(), "");
    let cleaned = cleaned.as_ref();

    for format in DATETIME_FORMATS {
        if let Ok(time) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Ok(time);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Ok(date.and_time(NaiveTime::MIN));
        }
    }
    Err(MlError::Validation(format!(
        "unparseable timestamp '{raw}' in price history"
    )))
}
