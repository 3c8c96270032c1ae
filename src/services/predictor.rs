use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::error::MlError;
use crate::services::features::FeatureMeans;
use crate::services::scaler::FeatureScaler;
use crate::services::trainer::{self, PriceForest};

/// One predicted price for a future calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionPoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Feature rows for synthetic future dates.
///
/// Calendar features come straight from each date. Volume and the rolling
/// features have no real history for dates that have not happened yet, so the
/// persisted training-time means stand in for them uniformly. That assumes
/// those features are stationary over the prediction horizon.
pub fn build_future_features(dates: &[NaiveDate], means: &FeatureMeans) -> Vec<Vec<f64>> {
    dates
        .iter()
        .map(|date| {
            let day_of_week = date.weekday().num_days_from_monday() as f64;
            vec![
                date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64,
                means.volume,
                day_of_week,
                date.month() as f64,
                date.year() as f64,
                date.day() as f64,
                if day_of_week >= 5.0 { 1.0 } else { 0.0 },
                means.price_rolling_mean_7,
                means.price_diff,
                means.volume_rolling_mean_7,
            ]
        })
        .collect()
}

/// Predict one price per calendar day in `[start, end]` (inclusive) using a
/// persisted model, scaler and feature-means snapshot.
pub fn predict_range(
    model: &PriceForest,
    scaler: &FeatureScaler,
    means: &FeatureMeans,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PredictionPoint>, MlError> {
    if start > end {
        return Err(MlError::Validation(format!(
            "start date {start} is after end date {end}"
        )));
    }

    let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let scaled = scaler.transform(&build_future_features(&dates, means));
    let prices = trainer::predict_scaled(model, &scaled)?;

    Ok(dates
        .into_iter()
        .zip(prices)
        .map(|(date, price)| PredictionPoint { date, price })
        .collect())
}
