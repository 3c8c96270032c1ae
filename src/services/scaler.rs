use serde::{Deserialize, Serialize};

/// Column-wise standardizer fitted on the full training feature matrix.
///
/// Persisted alongside the model so prediction-time feature rows go through
/// the identical transform. Columns with zero spread are only centered,
/// never divided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len() as f64;

        let mut means = vec![0.0; n_cols];
        for row in rows {
            for (j, value) in row.iter().enumerate() {
                means[j] += value;
            }
        }
        for mean in &mut means {
            *mean /= n;
        }

        let mut stds = vec![0.0; n_cols];
        for row in rows {
            for (j, value) in row.iter().enumerate() {
                stds[j] += (value - means[j]).powi(2);
            }
        }
        for std in &mut stds {
            *std = (*std / n).sqrt();
        }

        Self { means, stds }
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, value)| {
                        let centered = value - self.means[j];
                        if self.stds[j] == 0.0 {
                            centered
                        } else {
                            centered / self.stds[j]
                        }
                    })
                    .collect()
            })
            .collect()
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }
}
