// Honest causal forest for the moment `E[(y - theta(x) * t) * t | x] = 0`
// on the nuisance residuals. Trees grow in little bags; the spread between
// bag means gives the standard error.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use tracing::debug;

use crate::config::ForestConfig;
use crate::error::{PipelineError, Result};
use crate::tree::{RegressionTree, SplitCriterion, TreeParams};

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub max_samples: f64,
    pub subforest_size: usize,
    pub honest: bool,
    pub seed: u64,
}

impl From<&ForestConfig> for ForestParams {
    fn from(config: &ForestConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            tree: TreeParams {
                max_depth: config.max_depth,
                min_samples_split: config.min_samples_split,
                min_samples_leaf: config.min_samples_leaf,
            },
            max_samples: config.max_samples,
            subforest_size: config.subforest_size,
            honest: config.honest,
            seed: config.seed,
        }
    }
}

// Splits on the gradient pseudo-outcomes of the moment at the parent's
// solution, `rho_i = t_i * (y_i - theta * t_i) / mean(t^2)`.
struct MomentCriterion<'a> {
    t: &'a [f64],
    y: &'a [f64],
}

impl MomentCriterion<'_> {
    // (sum t*y, sum t*t) over the given rows.
    fn sums(&self, samples: &[usize]) -> (f64, f64) {
        samples.iter().fold((0.0, 0.0), |(ty, tt), &i| {
            (ty + self.t[i] * self.y[i], tt + self.t[i] * self.t[i])
        })
    }
}

impl SplitCriterion for MomentCriterion<'_> {
    fn node_targets(&self, samples: &[usize]) -> Vec<f64> {
        let (ty, tt) = self.sums(samples);
        if tt <= f64::EPSILON {
            return vec![0.0; samples.len()];
        }
        let theta = ty / tt;
        let scale = tt / samples.len() as f64;
        samples
            .iter()
            .map(|&i| self.t[i] * (self.y[i] - theta * self.t[i]) / scale)
            .collect()
    }

    fn leaf_value(&self, samples: &[usize]) -> f64 {
        let (ty, tt) = self.sums(samples);
        if tt <= f64::EPSILON {
            0.0
        } else {
            ty / tt
        }
    }
}

// Leaf averages of `t*y` and `t*t` over a tree's estimation rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct LeafMoment {
    ty: f64,
    tt: f64,
}

#[derive(Debug, Clone)]
struct HonestTree {
    tree: RegressionTree,
    moments: HashMap<usize, LeafMoment>,
}

impl HonestTree {
    fn moment(&self, row: ArrayView1<f64>) -> Option<LeafMoment> {
        self.moments.get(&self.tree.leaf(row)).copied()
    }
}

// Point estimate and standard error of the effect at one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectInference {
    pub point: f64,
    pub std_err: f64,
}

#[derive(Debug, Clone)]
pub struct CausalForest {
    trees: Vec<HonestTree>,
    subforest_size: usize,
}

impl CausalForest {
    // Fits the forest on heterogeneity features `x` and residuals `t`, `y`.
    pub fn fit(x: ArrayView2<f64>, t: &[f64], y: &[f64], params: &ForestParams) -> Result<Self> {
        let n = x.nrows();
        if t.len() != n || y.len() != n {
            return Err(PipelineError::estimation(format!(
                "forest inputs disagree on length: x has {n} rows, t {} and y {}",
                t.len(),
                y.len()
            )));
        }
        if n < 2 {
            return Err(PipelineError::estimation(format!(
                "causal forest needs at least 2 rows, got {n}"
            )));
        }
        if params.subforest_size == 0 || params.n_estimators < params.subforest_size {
            return Err(PipelineError::estimation(
                "n_estimators must cover at least one subforest",
            ));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let criterion = MomentCriterion { t, y };
        let n_bags = params.n_estimators / params.subforest_size;
        let half = (n / 2).max(1);
        let per_tree = ((params.max_samples * n as f64).ceil() as usize).clamp(1, half);

        let mut trees = Vec::with_capacity(n_bags * params.subforest_size);
        let mut pool: Vec<usize> = (0..n).collect();
        for _ in 0..n_bags {
            pool.shuffle(&mut rng);
            let bag = &pool[..half];
            for _ in 0..params.subforest_size {
                let mut drawn = bag.to_vec();
                drawn.shuffle(&mut rng);
                drawn.truncate(per_tree);
                let (structure, estimation) = if params.honest && drawn.len() >= 2 {
                    let mid = drawn.len() / 2;
                    (drawn[..mid].to_vec(), drawn[mid..].to_vec())
                } else {
                    (drawn.clone(), drawn)
                };

                let tree = RegressionTree::fit(x, &structure, &criterion, &params.tree);
                let mut sums: HashMap<usize, (f64, f64, usize)> = HashMap::new();
                for &i in &estimation {
                    let entry = sums.entry(tree.leaf(x.row(i))).or_insert((0.0, 0.0, 0));
                    entry.0 += t[i] * y[i];
                    entry.1 += t[i] * t[i];
                    entry.2 += 1;
                }
                let moments = sums
                    .into_iter()
                    .map(|(leaf, (ty, tt, count))| {
                        let count = count as f64;
                        (leaf, LeafMoment { ty: ty / count, tt: tt / count })
                    })
                    .collect();
                trees.push(HonestTree { tree, moments });
            }
        }
        debug!(
            trees = trees.len(),
            leaves = trees.iter().map(|h| h.tree.n_leaves()).sum::<usize>(),
            bags = n_bags,
            rows_per_tree = per_tree,
            "causal forest fitted"
        );

        Ok(Self {
            trees,
            subforest_size: params.subforest_size,
        })
    }

    // Little-bags inference at one row
    //
    // theta solves sum_b (ty_b - theta * tt_b) = 0 over the trees whose leaf
    // holds estimation rows. For psi_b = ty_b - theta * tt_b, the variance of
    // the moment is the between-bag variance of bag means minus the
    // within-bag noise, falling back to the uncorrected between-bag term
    // when the correction overshoots; dividing by mean(tt)^2 maps it onto
    // theta.
    pub fn infer(&self, row: ArrayView1<f64>) -> EffectInference {
        let per_bag: Vec<Vec<LeafMoment>> = self
            .trees
            .chunks(self.subforest_size)
            .map(|bag| bag.iter().filter_map(|tree| tree.moment(row)).collect())
            .collect();
        let all: Vec<LeafMoment> = per_bag.iter().flatten().copied().collect();
        let undefined = EffectInference {
            point: f64::NAN,
            std_err: f64::NAN,
        };
        if all.is_empty() {
            return undefined;
        }
        let tt_mean = all.iter().map(|m| m.tt).sum::<f64>() / all.len() as f64;
        if tt_mean <= f64::EPSILON {
            return undefined;
        }
        let ty_mean = all.iter().map(|m| m.ty).sum::<f64>() / all.len() as f64;
        let theta = ty_mean / tt_mean;

        let bag_psis: Vec<Vec<f64>> = per_bag
            .iter()
            .filter(|bag| !bag.is_empty())
            .map(|bag| bag.iter().map(|m| m.ty - theta * m.tt).collect())
            .collect();
        let bag_means: Vec<f64> = bag_psis
            .iter()
            .map(|psis| psis.iter().sum::<f64>() / psis.len() as f64)
            .collect();
        let grand = bag_means.iter().sum::<f64>() / bag_means.len() as f64;
        let between = bag_means.iter().map(|m| (m - grand).powi(2)).sum::<f64>()
            / bag_means.len() as f64;
        let within_terms: Vec<f64> = bag_psis
            .iter()
            .zip(&bag_means)
            .filter(|(psis, _)| psis.len() >= 2)
            .map(|(psis, mean)| {
                let l = psis.len() as f64;
                psis.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (l * (l - 1.0))
            })
            .collect();
        let within = if within_terms.is_empty() {
            0.0
        } else {
            within_terms.iter().sum::<f64>() / within_terms.len() as f64
        };
        let corrected = between - within;
        let variance = if corrected > 0.0 { corrected } else { between };

        EffectInference {
            point: theta,
            std_err: variance.max(0.0).sqrt() / tt_mean,
        }
    }
}
