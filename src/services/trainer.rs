use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::{mean_squared_error, r2};
use smartcore::model_selection::train_test_split;

use crate::error::MlError;
use crate::services::features::{FEATURE_COLS, NormalizedTable};
use crate::services::scaler::FeatureScaler;

/// Fitted regression model over the ten-feature design matrix.
pub type PriceForest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Held-out fraction for evaluation. The split is shuffled with a fixed seed
/// so identical data always trains on identical rows.
const TEST_FRACTION: f32 = 0.3;
const SPLIT_SEED: u64 = 42;

/// Held-out error metrics of one training run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub mse: f64,
    pub r2: f64,
}

/// Everything a finished training run hands back to the caller.
#[derive(Debug)]
pub struct TrainingOutput {
    pub model: PriceForest,
    pub scaler: FeatureScaler,
    pub metrics: TrainingMetrics,
}

/// Fit the regression pipeline on a normalized table.
///
/// The scaler is fitted on the full feature matrix, then the scaled rows are
/// split 70/30 and the forest is fitted on the training part. Hyperparameters
/// are fixed for reproducibility: 600 trees, depth at most 20, at least 5
/// samples per leaf, sqrt-feature subsampling over the 10 columns, bootstrap
/// sampling, seed 42.
pub fn train_and_evaluate(table: &NormalizedTable) -> Result<TrainingOutput, MlError> {
    if table.len() < 4 {
        return Err(MlError::Training(format!(
            "not enough price points to train: got {}, need at least 4",
            table.len()
        )));
    }

    let feature_rows = table.feature_rows();
    let scaler = FeatureScaler::fit(&feature_rows);
    let scaled = scaler.transform(&feature_rows);

    let n_rows = scaled.len();
    let flat: Vec<f64> = scaled.into_iter().flatten().collect();
    let x = DenseMatrix::new(n_rows, FEATURE_COLS.len(), flat, false);
    let y = table.prices();

    let (x_train, x_test, y_train, y_test) =
        train_test_split(&x, &y, TEST_FRACTION, true, Some(SPLIT_SEED));

    let params = RandomForestRegressorParameters::default()
        .with_n_trees(600)
        .with_max_depth(20)
        .with_min_samples_leaf(5)
        .with_m(3)
        .with_seed(SPLIT_SEED);

    let model = RandomForestRegressor::fit(&x_train, &y_train, params)
        .map_err(|e| MlError::Training(format!("model fit failed: {e}")))?;
    let predicted = model
        .predict(&x_test)
        .map_err(|e| MlError::Training(format!("held-out evaluation failed: {e}")))?;

    let metrics = TrainingMetrics {
        mse: mean_squared_error(&y_test, &predicted),
        r2: r2(&y_test, &predicted),
    };

    Ok(TrainingOutput {
        model,
        scaler,
        metrics,
    })
}

/// Run the fitted model over already-scaled feature rows.
pub fn predict_scaled(model: &PriceForest, scaled_rows: &[Vec<f64>]) -> Result<Vec<f64>, MlError> {
    let n_rows = scaled_rows.len();
    let flat: Vec<f64> = scaled_rows.iter().flatten().copied().collect();
    let x = DenseMatrix::new(n_rows, FEATURE_COLS.len(), flat, false);
    model
        .predict(&x)
        .map_err(|e| MlError::Training(format!("prediction failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::{PriceTick, normalize_prices};

    fn linear_table(days: usize) -> NormalizedTable {
        let ticks: Vec<PriceTick> = (0..days)
            .map(|i| {
                let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64);
                PriceTick {
                    time: format!("{} 00:", date.format("%b %d %Y")),
                    price: 10.0 + i as f64,
                    volume: 5.0,
                }
            })
            .collect();
        normalize_prices(&ticks).unwrap()
    }

    #[test]
    fn trains_and_reports_sane_metrics() {
        let output = train_and_evaluate(&linear_table(20)).unwrap();
        assert!(output.metrics.mse >= 0.0);
        assert!(output.metrics.r2 <= 1.0);
        assert_eq!(output.scaler.n_features(), FEATURE_COLS.len());
    }

    #[test]
    fn is_reproducible_for_identical_data() {
        let table = linear_table(20);
        let a = train_and_evaluate(&table).unwrap();
        let b = train_and_evaluate(&table).unwrap();
        assert_eq!(a.metrics.mse, b.metrics.mse);
        assert_eq!(a.metrics.r2, b.metrics.r2);
    }

    #[test]
    fn rejects_too_few_rows() {
        let err = train_and_evaluate(&linear_table(3)).unwrap_err();
        assert!(matches!(err, MlError::Training(_)));
    }

    #[test]
    fn fitted_model_round_trips_through_bincode() {
        let output = train_and_evaluate(&linear_table(20)).unwrap();
        let table = linear_table(20);
        let scaled = output.scaler.transform(&table.feature_rows());

        let bytes = bincode::serialize(&output.model).unwrap();
        let restored: PriceForest = bincode::deserialize(&bytes).unwrap();

        assert_eq!(
            predict_scaled(&output.model, &scaled).unwrap(),
            predict_scaled(&restored, &scaled).unwrap()
        );
    }

    #[test]
    fn predictions_track_a_rising_series() {
        let table = linear_table(25);
        let output = train_and_evaluate(&table).unwrap();
        let scaled = output.scaler.transform(&table.feature_rows());
        let fitted = predict_scaled(&output.model, &scaled).unwrap();
        assert_eq!(fitted.len(), table.len());
        // The in-sample fit of a monotone series should stay within its range.
        for price in fitted {
            assert!(price >= 9.0 && price <= 36.0);
        }
    }
}
