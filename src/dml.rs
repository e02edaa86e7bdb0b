use linfa::dataset::Dataset;
use linfa::traits::{Fit, Predict};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::boosting::GradientBoostingParams;
use crate::config::{BoostingConfig, ForestConfig};
use crate::error::{PipelineError, Result};
use crate::forest::{CausalForest, EffectInference, ForestParams};

// Double machine learning with a causal forest final stage
//
// The outcome and treatment are first residualized on [X, W] with
// cross-fitted gradient boosting, so every residual comes from a model that
// never saw its row. The forest then estimates how the residual-on-residual
// slope varies with X.
#[derive(Debug, Clone)]
pub struct CausalForestDml {
    model_y: GradientBoostingParams,
    model_t: GradientBoostingParams,
    forest: ForestParams,
    cv_folds: usize,
    seed: u64,
}

impl CausalForestDml {
    pub fn new(nuisance: &BoostingConfig, forest: &ForestConfig) -> Self {
        Self {
            model_y: GradientBoostingParams::from(nuisance),
            model_t: GradientBoostingParams::from(nuisance),
            forest: ForestParams::from(forest),
            cv_folds: forest.cv_folds,
            seed: forest.seed,
        }
    }

    pub fn fit(
        &self,
        y: &Array1<f64>,
        t: &Array1<f64>,
        x: &Array2<f64>,
        w: Option<&Array2<f64>>,
    ) -> Result<FittedDml> {
        let n = y.len();
        if t.len() != n || x.nrows() != n || w.map_or(false, |w| w.nrows() != n) {
            return Err(PipelineError::estimation(
                "outcome, treatment, features and controls must have the same number of rows",
            ));
        }
        if n < self.cv_folds {
            return Err(PipelineError::estimation(format!(
                "need at least {} rows for {}-fold cross-fitting, got {n}",
                self.cv_folds, self.cv_folds
            )));
        }

        let features = match w {
            Some(w) => concatenate(Axis(1), &[x.view(), w.view()])
                .map_err(|e| PipelineError::estimation(e.to_string()))?,
            None => x.clone(),
        };

        let folds = self.folds(n);
        let y_res = cross_fit_residuals(&self.model_y, &features, y, &folds)?;
        let t_res = cross_fit_residuals(&self.model_t, &features, t, &folds)?;
        debug!(rows = n, folds = folds.len(), "nuisance models cross-fitted");

        let forest = CausalForest::fit(x.view(), t_res.as_slice(), y_res.as_slice(), &self.forest)?;
        Ok(FittedDml { forest })
    }

    // Shuffled row indices dealt round-robin into `cv_folds` folds.
    fn folds(&self, n: usize) -> Vec<Vec<usize>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut rng);
        let mut folds = vec![Vec::new(); self.cv_folds];
        for (k, row) in rows.into_iter().enumerate() {
            folds[k % self.cv_folds].push(row);
        }
        for fold in folds.iter_mut() {
            fold.sort_unstable();
        }
        folds
    }
}

// Out-of-fold residuals `target - model(features)`.
fn cross_fit_residuals(
    params: &GradientBoostingParams,
    features: &Array2<f64>,
    target: &Array1<f64>,
    folds: &[Vec<usize>],
) -> Result<Vec<f64>> {
    let n = target.len();
    let mut residuals = vec![0.0; n];
    for (k, held_out) in folds.iter().enumerate() {
        let train: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != k)
            .flat_map(|(_, fold)| fold.iter().copied())
            .collect();
        let dataset = Dataset::new(
            features.select(Axis(0), &train),
            target.select(Axis(0), &train),
        );
        let model = params.fit(&dataset)?;
        let predicted: Array1<f64> = model.predict(&features.select(Axis(0), held_out));
        for (&row, p) in held_out.iter().zip(predicted.iter()) {
            residuals[row] = target[row] - p;
        }
    }
    Ok(residuals)
}

#[derive(Debug, Clone)]
pub struct FittedDml {
    forest: CausalForest,
}

impl FittedDml {
    pub fn inference(&self, x: &Array2<f64>) -> Vec<EffectInference> {
        x.rows().into_iter().map(|row| self.forest.infer(row)).collect()
    }

    // Point estimate of the treatment effect at every row of `x`.
    pub fn effect(&self, x: &Array2<f64>) -> Array1<f64> {
        self.inference(x).iter().map(|e| e.point).collect()
    }

    // Two-sided `1 - alpha` normal intervals, as (lower, upper) arrays.
    pub fn effect_interval(&self, x: &Array2<f64>, alpha: f64) -> Result<(Array1<f64>, Array1<f64>)> {
        let z = critical_value(alpha)?;
        let inference = self.inference(x);
        let lower = inference.iter().map(|e| e.point - z * e.std_err).collect();
        let upper = inference.iter().map(|e| e.point + z * e.std_err).collect();
        Ok((lower, upper))
    }
}

// Upper `alpha / 2` quantile of the standard normal.
fn critical_value(alpha: f64) -> Result<f64> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(PipelineError::estimation(format!(
            "alpha must lie in (0, 1), got {alpha}"
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| PipelineError::estimation(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - alpha / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;

    fn quick_forest() -> ForestConfig {
        ForestConfig {
            n_estimators: 200,
            ..ForestConfig::default()
        }
    }

    fn quick_nuisance() -> BoostingConfig {
        BoostingConfig {
            n_estimators: 30,
            ..BoostingConfig::default()
        }
    }

    #[test]
    fn critical_value_matches_normal_table() {
        assert_abs_diff_eq!(critical_value(0.05).unwrap(), 1.959964, epsilon = 1e-5);
        assert!(critical_value(0.0).is_err());
    }

    #[test]
    fn recovers_linear_effect_with_confounding() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 300;
        let x = Array2::from_shape_fn((n, 1), |_| rng.gen::<f64>());
        let w = Array2::from_shape_fn((n, 1), |_| rng.gen::<f64>());
        let t: Array1<f64> = (0..n)
            .map(|i| w[[i, 0]] + 0.5 * (rng.gen::<f64>() - 0.5))
            .collect();
        let y: Array1<f64> = (0..n)
            .map(|i| 3.0 * t[i] + 2.0 * w[[i, 0]] + 0.1 * (rng.gen::<f64>() - 0.5))
            .collect();

        let dml = CausalForestDml::new(&quick_nuisance(), &quick_forest());
        let fitted = dml.fit(&y, &t, &x, Some(&w)).unwrap();
        let effect = fitted.effect(&x);
        let mean = effect.mean().unwrap();
        assert!((mean - 3.0).abs() < 0.5, "mean effect {mean} too far from 3");

        let (lower, upper) = fitted.effect_interval(&x, 0.05).unwrap();
        for i in 0..n {
            assert!(lower[i] <= effect[i] && effect[i] <= upper[i]);
        }
    }

    #[test]
    fn identical_inputs_give_identical_estimates() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let t: Array1<f64> = (0..40).map(|i| ((i * 5) % 9) as f64).collect();
        let y: Array1<f64> = (0..40).map(|i| 0.5 * t[i] + x[[i, 0]]).collect();

        let dml = CausalForestDml::new(&quick_nuisance(), &quick_forest());
        let a = dml.fit(&y, &t, &x, None).unwrap();
        let b = dml.fit(&y, &t, &x, None).unwrap();
        let (ia, ib) = (a.inference(&x), b.inference(&x));
        for (p, q) in ia.iter().zip(ib.iter()) {
            assert_eq!(p.std_err.to_bits(), q.std_err.to_bits());
        }

        let (ea, eb) = (a.effect(&x), b.effect(&x));
        for (p, q) in ea.iter().zip(eb.iter()) {
            assert_eq!(p.to_bits(), q.to_bits());
        }
    }

    #[test]
    fn rejects_mismatched_rows() {
        let dml = CausalForestDml::new(&quick_nuisance(), &quick_forest());
        let err = dml
            .fit(
                &Array1::zeros(5),
                &Array1::zeros(4),
                &Array2::zeros((5, 1)),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Estimation(_)));
    }
}
