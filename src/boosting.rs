use linfa::dataset::DatasetBase;
use linfa::traits::{Fit, PredictInplace};
use ndarray::{Array1, Array2};

use crate::config::BoostingConfig;
use crate::error::{PipelineError, Result};
use crate::tree::{RegressionTree, SquaredError, TreeParams};

// Hyper-parameters for least-squares gradient boosting
//
// Fitting goes through linfa's `Fit` trait so the nuisance models are
// trained on a `Dataset` like any other linfa estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
}

impl From<&BoostingConfig> for GradientBoostingParams {
    fn from(config: &BoostingConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            learning_rate: config.learning_rate,
            tree: TreeParams {
                max_depth: Some(config.max_depth),
                min_samples_split: config.min_samples_split,
                min_samples_leaf: config.min_samples_leaf,
            },
        }
    }
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self::from(&BoostingConfig::default())
    }
}

// A fitted boosted ensemble: the training mean plus shrunken tree corrections.
#[derive(Debug, Clone)]
pub struct GradientBoostingRegressor {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl Fit<Array2<f64>, Array1<f64>, PipelineError> for GradientBoostingParams {
    type Object = GradientBoostingRegressor;

    // Each stage fits a tree to the current residuals and adds a
    // `learning_rate` fraction of its prediction.
    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<f64>>) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        let n = x.nrows();
        if n == 0 {
            return Err(PipelineError::estimation("cannot fit gradient boosting on zero rows"));
        }

        let init = y.sum() / n as f64;
        let mut fitted = vec![init; n];
        let samples: Vec<usize> = (0..n).collect();
        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(y, f)| y - f).collect();
            let tree = RegressionTree::fit(
                x.view(),
                &samples,
                &SquaredError::new(&residuals),
                &self.tree,
            );
            for (i, f) in fitted.iter_mut().enumerate() {
                *f += self.learning_rate * tree.predict_row(x.row(i));
            }
            trees.push(tree);
        }

        Ok(GradientBoostingRegressor {
            init,
            learning_rate: self.learning_rate,
            trees,
        })
    }
}

impl PredictInplace<Array2<f64>, Array1<f64>> for GradientBoostingRegressor {
    fn predict_inplace(&self, x: &Array2<f64>, y: &mut Array1<f64>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        for (row, out) in x.rows().into_iter().zip(y.iter_mut()) {
            *out = self.init
                + self.learning_rate
                    * self
                        .trees
                        .iter()
                        .map(|tree| tree.predict_row(row))
                        .sum::<f64>();
        }
    }

    fn default_target(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}
